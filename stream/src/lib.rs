//! Positioned byte streams for the RedLilium engine.
//!
//! The object serializer never touches files directly. It reads and writes
//! through the [`ByteStream`] trait, which tracks a cursor position and
//! reports its open/readable/writable capabilities.
//!
//! # Backends
//!
//! - [`MemoryStream`]: growable in-memory buffer for tests, network payloads
//!   and embedded data (read-write)
//! - [`FileStream`]: native file access (not available on wasm)
//!
//! Codecs that want an [`std::io::Read`] / [`std::io::Write`] view of a stream
//! wrap it in an [`IoAdapter`].
//!
//! # Example
//!
//! ```
//! use redlilium_stream::{ByteStream, MemoryStream};
//!
//! let mut stream = MemoryStream::new();
//! stream.write(b"hello").unwrap();
//! stream.seek(0).unwrap();
//!
//! let mut buf = [0u8; 5];
//! assert_eq!(stream.read(&mut buf).unwrap(), 5);
//! assert_eq!(&buf, b"hello");
//! ```

mod adapter;
mod error;
#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
mod file;
mod memory;
mod stream;

pub use adapter::IoAdapter;
pub use error::StreamError;
#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
pub use file::FileStream;
pub use memory::MemoryStream;
pub use stream::{ByteStream, OpenMode};
