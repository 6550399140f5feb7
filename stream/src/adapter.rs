use crate::stream::ByteStream;

/// Exposes a [`ByteStream`] as [`std::io::Read`] + [`std::io::Write`].
///
/// Lets ecosystem readers and writers (XML/JSON encoders, `byteorder`)
/// drive a stream without knowing its backend. The adapter borrows the
/// stream; the cursor it leaves behind is the stream's own cursor.
pub struct IoAdapter<'a> {
    stream: &'a mut dyn ByteStream,
}

impl<'a> IoAdapter<'a> {
    pub fn new(stream: &'a mut dyn ByteStream) -> Self {
        Self { stream }
    }
}

impl std::io::Read for IoAdapter<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.stream.read(buf)?)
    }
}

impl std::io::Write for IoAdapter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.stream.write(buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(self.stream.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;
    use std::io::{Read, Write};

    #[test]
    fn io_write_then_read() {
        let mut stream = MemoryStream::new();
        {
            let mut io = IoAdapter::new(&mut stream);
            write!(io, "v={}", 3).unwrap();
        }
        stream.seek(0).unwrap();
        let mut text = String::new();
        IoAdapter::new(&mut stream).read_to_string(&mut text).unwrap();
        assert_eq!(text, "v=3");
    }

    #[test]
    fn closed_stream_surfaces_as_io_error() {
        let mut stream = MemoryStream::new();
        stream.close().unwrap();
        let err = IoAdapter::new(&mut stream).write(b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
    }
}
