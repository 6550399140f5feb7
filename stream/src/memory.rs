use crate::error::StreamError;
use crate::stream::{ByteStream, OpenMode};

/// In-memory byte stream for tests, network payloads and embedded data.
///
/// Writes past the end grow the buffer. Seeking past the end of a writable
/// stream is allowed; the gap is zero-filled on the next write.
///
/// # Example
///
/// ```
/// use redlilium_stream::{ByteStream, MemoryStream};
///
/// let mut stream = MemoryStream::from_bytes(b"{}".to_vec());
/// let mut out = Vec::new();
/// stream.read_to_end(&mut out).unwrap();
/// assert_eq!(out, b"{}");
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStream {
    data: Vec<u8>,
    position: usize,
    mode: OpenMode,
    open: bool,
}

impl MemoryStream {
    /// Create an empty read-write stream.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            position: 0,
            mode: OpenMode::ReadWrite,
            open: true,
        }
    }

    /// Create a read-write stream over existing bytes, cursor at the start.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new()
        }
    }

    /// Create a read-only stream over existing bytes.
    pub fn read_only(data: Vec<u8>) -> Self {
        Self {
            data,
            mode: OpenMode::Read,
            ..Self::new()
        }
    }

    /// Borrow the full contents regardless of cursor position.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the stream and return its contents.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.open {
            Ok(())
        } else {
            Err(StreamError::Closed)
        }
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.ensure_open()?;
        if !self.mode.can_read() {
            return Err(StreamError::NotReadable);
        }
        if self.position >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - self.position);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        self.ensure_open()?;
        if !self.mode.can_write() {
            return Err(StreamError::NotWritable);
        }
        let end = self.position + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(data.len())
    }

    fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        self.ensure_open()?;
        let len = self.data.len() as u64;
        if position > len && !self.mode.can_write() {
            return Err(StreamError::OutOfRange { position, len });
        }
        self.position = position as usize;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn len(&self) -> Result<u64, StreamError> {
        self.ensure_open()?;
        Ok(self.data.len() as u64)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn can_read(&self) -> bool {
        self.open && self.mode.can_read()
    }

    fn can_write(&self) -> bool {
        self.open && self.mode.can_write()
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.ensure_open()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.ensure_open()?;
        self.open = false;
        Ok(())
    }
}
