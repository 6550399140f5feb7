use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::StreamError;
use crate::stream::{ByteStream, OpenMode};

/// File-backed byte stream.
///
/// All I/O is blocking (`std::fs`). Write modes create missing parent
/// directories and truncate an existing file.
///
/// # Example
///
/// ```ignore
/// let mut stream = FileStream::open("saves/level.xml", OpenMode::Write)?;
/// stream.write(b"<ObjectStream version=\"3\"/>")?;
/// stream.close()?;
/// ```
pub struct FileStream {
    path: PathBuf,
    file: Option<File>,
    mode: OpenMode,
    position: u64,
}

impl FileStream {
    /// Open a file with the given mode.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        if mode.can_write() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let file = OpenOptions::new()
            .read(mode.can_read())
            .write(mode.can_write())
            .create(mode.can_write())
            .truncate(mode == OpenMode::Write)
            .open(&path)?;
        log::debug!("Opened file stream {:?} ({mode:?})", path);
        Ok(Self {
            path,
            file: Some(file),
            mode,
            position: 0,
        })
    }

    /// Path this stream was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, StreamError> {
        self.file.as_mut().ok_or(StreamError::Closed)
    }
}

impl ByteStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if !self.is_open() {
            return Err(StreamError::Closed);
        }
        if !self.mode.can_read() {
            return Err(StreamError::NotReadable);
        }
        let n = self.file()?.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if !self.is_open() {
            return Err(StreamError::Closed);
        }
        if !self.mode.can_write() {
            return Err(StreamError::NotWritable);
        }
        self.file()?.write_all(data)?;
        self.position += data.len() as u64;
        Ok(data.len())
    }

    fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        let len = self.len()?;
        if position > len && !self.mode.can_write() {
            return Err(StreamError::OutOfRange { position, len });
        }
        self.file()?.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len(&self) -> Result<u64, StreamError> {
        let file = self.file.as_ref().ok_or(StreamError::Closed)?;
        Ok(file.metadata()?.len())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn can_read(&self) -> bool {
        self.is_open() && self.mode.can_read()
    }

    fn can_write(&self) -> bool {
        self.is_open() && self.mode.can_write()
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.file()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let mut file = self.file.take().ok_or(StreamError::Closed)?;
        if self.mode.can_write() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}
