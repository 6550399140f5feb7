use std::fmt;

/// Errors that can occur while reading or writing a [`ByteStream`](crate::ByteStream).
#[derive(Debug)]
pub enum StreamError {
    /// The backing file was not found.
    NotFound(String),
    /// An IO error occurred in the backing storage.
    Io(std::io::Error),
    /// The stream has already been closed.
    Closed,
    /// The stream was not opened for reading.
    NotReadable,
    /// The stream was not opened for writing.
    NotWritable,
    /// A seek targeted a position past the end of a read-only stream.
    OutOfRange { position: u64, len: u64 },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::NotFound(path) => write!(f, "not found: {path}"),
            StreamError::Io(err) => write!(f, "IO error: {err}"),
            StreamError::Closed => write!(f, "stream is closed"),
            StreamError::NotReadable => write!(f, "stream is not readable"),
            StreamError::NotWritable => write!(f, "stream is not writable"),
            StreamError::OutOfRange { position, len } => {
                write!(f, "position {position} is out of range (length {len})")
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StreamError::NotFound(err.to_string())
        } else {
            StreamError::Io(err)
        }
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(inner) => inner,
            StreamError::NotFound(path) => {
                std::io::Error::new(std::io::ErrorKind::NotFound, path)
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}
