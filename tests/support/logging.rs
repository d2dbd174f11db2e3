use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

#[derive(Clone)]
struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriterHandle {
            buffer: self.buffer.clone(),
        }
    }
}

struct BufferWriterHandle {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for BufferWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captures tracing output emitted on the current thread while `f` runs.
pub fn capture_logs<T>(filter: &str, f: impl FnOnce() -> T) -> (T, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = BufferWriter {
        buffer: buffer.clone(),
    };
    let subscriber = fmt::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_writer(writer)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let guard = buffer.lock().unwrap_or_else(|err| err.into_inner());
    (result, String::from_utf8_lossy(&guard).to_string())
}
