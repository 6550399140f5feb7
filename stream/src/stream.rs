use crate::StreamError;

/// How a stream was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only access to existing data.
    Read,
    /// Write-only access. File backends create or truncate the target.
    Write,
    /// Read and write access.
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Trait for byte-addressable streams with position tracking.
///
/// Backends implement byte-level I/O relative to an internal cursor.
/// `read` and `write` advance the cursor by exactly the number of bytes
/// transferred. After [`close()`](ByteStream::close) every operation fails
/// with [`StreamError::Closed`].
///
/// # Capability Contract
///
/// Callers check [`can_read()`](ByteStream::can_read) and
/// [`can_write()`](ByteStream::can_write) before driving a stream.
/// Backends return [`StreamError::NotReadable`] / [`StreamError::NotWritable`]
/// when an operation does not match the open mode.
pub trait ByteStream: Send {
    // --- Cursor I/O (required) ---

    /// Read up to `buf.len()` bytes at the cursor. Returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Write all of `data` at the cursor, growing the stream if needed.
    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError>;

    /// Move the cursor to an absolute position.
    fn seek(&mut self, position: u64) -> Result<(), StreamError>;

    /// Current cursor position.
    fn position(&self) -> u64;

    /// Total length of the stream in bytes.
    fn len(&self) -> Result<u64, StreamError>;

    // --- Capabilities ---

    fn is_open(&self) -> bool;

    fn can_read(&self) -> bool;

    fn can_write(&self) -> bool;

    // --- Lifecycle ---

    /// Flush buffered data to the backing storage.
    fn flush(&mut self) -> Result<(), StreamError>;

    /// Flush and close the stream. Closing twice returns [`StreamError::Closed`].
    fn close(&mut self) -> Result<(), StreamError>;

    /// Whether the stream holds no bytes at all.
    fn is_empty(&self) -> Result<bool, StreamError> {
        Ok(self.len()? == 0)
    }

    /// Read everything from the cursor to the end of the stream.
    fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, StreamError> {
        let start = out.len();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out.len() - start)
    }
}
