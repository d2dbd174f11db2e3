use std::io::{self, Write};

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::http::CacheResponse;
use crate::io_util::{LimitedBuffer, TeeWriter};

/// Forwards a resolver's response to the client while keeping a copy.
///
/// The copy of the body stops at the capture limit; past it the response
/// still reaches the client but is reported as not capturable.
pub(super) struct RecordingResponse<'a> {
    inner: &'a mut dyn CacheResponse,
    status: StatusCode,
    headers: HeaderMap,
    capture: LimitedBuffer,
    capture_failed: bool,
}

#[derive(Debug)]
pub(super) struct RecordedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub capture_failed: bool,
}

impl<'a> RecordingResponse<'a> {
    /// `capture_limit` of 0 captures without bound.
    pub(super) fn new(inner: &'a mut dyn CacheResponse, capture_limit: u64) -> Self {
        Self {
            inner,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            capture: LimitedBuffer::new((capture_limit > 0).then_some(capture_limit)),
            capture_failed: false,
        }
    }

    pub(super) fn finish(self) -> RecordedResponse {
        RecordedResponse {
            status: self.status,
            headers: self.headers,
            body: self.capture.into_inner(),
            capture_failed: self.capture_failed,
        }
    }
}

impl CacheResponse for RecordingResponse<'_> {
    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
        self.status = status;
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.set_header(name.clone(), value.clone());
        self.headers.insert(name, value);
    }

    fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.add_header(name.clone(), value.clone());
        self.headers.append(name, value);
    }

    fn output(&mut self) -> &mut dyn Write {
        self
    }
}

impl Write for RecordingResponse<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.capture_failed {
            return self.inner.output().write(buf);
        }
        let mut tee = TeeWriter::new(self.inner.output(), &mut self.capture);
        let written = tee.write(buf)?;
        if tee.secondary_failed() {
            self.capture_failed = true;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.output().flush()
    }
}
