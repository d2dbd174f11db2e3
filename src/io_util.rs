use std::io::{self, Write};

/// Copies everything written to `primary` into `secondary` as well.
///
/// The primary decides success: its errors propagate and only the bytes it
/// accepted are mirrored. A failing secondary is dropped from the tee and
/// reported through [`TeeWriter::secondary_failed`].
pub struct TeeWriter<W1, W2> {
    primary: W1,
    secondary: W2,
    secondary_failed: bool,
}

impl<W1, W2> TeeWriter<W1, W2> {
    pub fn new(primary: W1, secondary: W2) -> Self {
        Self {
            primary,
            secondary,
            secondary_failed: false,
        }
    }

    pub fn secondary_failed(&self) -> bool {
        self.secondary_failed
    }

    pub fn into_inner(self) -> (W1, W2) {
        (self.primary, self.secondary)
    }
}

impl<W1, W2> Write for TeeWriter<W1, W2>
where
    W1: Write,
    W2: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.primary.write(buf)?;
        if !self.secondary_failed && self.secondary.write_all(&buf[..n]).is_err() {
            self.secondary_failed = true;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        if !self.secondary_failed && self.secondary.flush().is_err() {
            self.secondary_failed = true;
        }
        Ok(())
    }
}

/// Accepts at most `limit` bytes, then fails every further write.
#[derive(Debug, Default)]
pub struct LimitedBuffer {
    buf: Vec<u8>,
    limit: Option<u64>,
}

impl LimitedBuffer {
    /// `None` accepts any amount.
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for LimitedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.limit
            && (self.buf.len() as u64).saturating_add(buf.len() as u64) > limit
        {
            return Err(io::Error::other("capture limit exceeded"));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
