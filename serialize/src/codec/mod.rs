//! Format codecs: byte-level encoding of [`StreamNode`] trees.
//!
//! Writers push roots one at a time (`begin`, `write_root`..., `finish`).
//! Readers decode the whole document up front, so a malformed stream is
//! rejected before any object is handed out.

mod binary;
mod json;
mod xml;

pub use binary::BinaryCodec;
pub use json::JsonCodec;
pub use xml::XmlCodec;

use redlilium_stream::ByteStream;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::node::{Document, StreamNode};

/// Current object stream version. Streams of version 0 or of a newer
/// version are rejected.
pub const OBJECT_STREAM_VERSION: u32 = 3;

/// Deepest node nesting any decoder accepts. Deeper documents are
/// malformed, which keeps decoding and dropping the tree off the stack limit.
pub(crate) const MAX_NESTING: usize = 1024;

/// On-disk format of an object stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    Binary,
    #[default]
    Xml,
    Json,
}

impl StreamFormat {
    /// Detect the format from the first bytes of a stream.
    ///
    /// Binary streams start with `0x00`, XML with `<`, JSON with `{`.
    /// Leading ASCII whitespace is skipped for the text formats.
    pub fn detect(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes.first() {
            None => return Err(CodecError::Empty),
            Some(0x00) => return Ok(StreamFormat::Binary),
            Some(_) => {}
        }
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => Ok(StreamFormat::Xml),
            Some(b'{') => Ok(StreamFormat::Json),
            Some(_) => Err(CodecError::BadHeader),
            None => Err(CodecError::Empty),
        }
    }

    pub fn is_text(self) -> bool {
        !matches!(self, StreamFormat::Binary)
    }

    /// Create a codec for this format.
    pub fn codec(self, pretty: bool) -> Box<dyn FormatCodec> {
        match self {
            StreamFormat::Binary => Box::new(BinaryCodec::new()),
            StreamFormat::Xml => Box::new(XmlCodec::new(pretty)),
            StreamFormat::Json => Box::new(JsonCodec::new(pretty)),
        }
    }
}

/// How a reader picks its codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFormat {
    /// Detect from the stream header.
    #[default]
    Auto,
    Exact(StreamFormat),
}

impl ReadFormat {
    pub fn resolve(self, bytes: &[u8]) -> Result<StreamFormat, CodecError> {
        match self {
            ReadFormat::Auto => StreamFormat::detect(bytes),
            ReadFormat::Exact(format) => Ok(format),
        }
    }
}

impl From<StreamFormat> for ReadFormat {
    fn from(format: StreamFormat) -> Self {
        ReadFormat::Exact(format)
    }
}

/// Encoder/decoder for one stream format.
pub trait FormatCodec: Send {
    fn format(&self) -> StreamFormat;

    /// Write the document header.
    fn begin(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError>;

    /// Append one complete root.
    fn write_root(&mut self, out: &mut dyn ByteStream, node: &StreamNode) -> Result<(), CodecError>;

    /// Write the document trailer.
    fn finish(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError>;

    /// Decode a whole document.
    fn read_document(&mut self, input: &[u8]) -> Result<Document, CodecError>;
}

pub(crate) fn check_version(version: u32) -> Result<u32, CodecError> {
    if version == 0 || version > OBJECT_STREAM_VERSION {
        Err(CodecError::UnsupportedVersion {
            found: version,
            supported: OBJECT_STREAM_VERSION,
        })
    } else {
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodePayload;
    use redlilium_stream::MemoryStream;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    #[case(&[0x00, b'R'], StreamFormat::Binary)]
    #[case(b"<?xml", StreamFormat::Xml)]
    #[case(b"  \n\t<ObjectStream", StreamFormat::Xml)]
    #[case(b"{\"name\"", StreamFormat::Json)]
    #[case(b"\r\n {", StreamFormat::Json)]
    fn detects_format(#[case] bytes: &[u8], #[case] expected: StreamFormat) {
        assert_eq!(StreamFormat::detect(bytes).unwrap(), expected);
    }

    #[rstest]
    #[case(b"")]
    #[case(b"   ")]
    fn detect_empty(#[case] bytes: &[u8]) {
        assert!(matches!(StreamFormat::detect(bytes), Err(CodecError::Empty)));
    }

    #[test]
    fn detect_garbage() {
        assert!(matches!(
            StreamFormat::detect(b"RIFF"),
            Err(CodecError::BadHeader)
        ));
    }

    #[test]
    fn version_bounds() {
        assert!(check_version(0).is_err());
        assert!(check_version(1).is_ok());
        assert!(check_version(OBJECT_STREAM_VERSION).is_ok());
        assert!(check_version(OBJECT_STREAM_VERSION + 1).is_err());
    }

    fn sample_tree(binary: bool) -> StreamNode {
        let leaf = |field: &str, text: &str, bytes: Vec<u8>| {
            let mut node = StreamNode::new(Uuid::from_u128(0x20), "Leaf").with_field(field);
            node.payload = if binary {
                NodePayload::Bytes(bytes)
            } else {
                NodePayload::Text(text.to_owned())
            };
            node
        };
        let mut root = StreamNode::new(Uuid::from_u128(0x10), "Root").with_version(4);
        root.add_child(leaf("a", "1", vec![1]));
        root.add_child(leaf("b", "  spaced <&> \"quoted\"  ", vec![]));
        root.add_child(leaf("c", "", vec![0xff, 0x00]));
        let mut nested = StreamNode::new(Uuid::from_u128(0x30), "Nested").with_field("n");
        nested.add_child(StreamNode::new(Uuid::from_u128(0x40), "Empty").with_field("e"));
        root.add_child(nested);
        root
    }

    /// Binary streams don't store type names.
    fn strip_names(node: &mut StreamNode) {
        node.type_name.clear();
        node.children.iter_mut().for_each(strip_names);
    }

    #[rstest]
    #[case(StreamFormat::Binary, false)]
    #[case(StreamFormat::Xml, false)]
    #[case(StreamFormat::Xml, true)]
    #[case(StreamFormat::Json, false)]
    #[case(StreamFormat::Json, true)]
    fn codec_preserves_tree(#[case] format: StreamFormat, #[case] pretty: bool) {
        let binary = format == StreamFormat::Binary;
        let roots = vec![sample_tree(binary), StreamNode::new(Uuid::from_u128(0x50), "Bare")];

        let mut out = MemoryStream::new();
        let mut codec = format.codec(pretty);
        codec.begin(&mut out).unwrap();
        for root in &roots {
            codec.write_root(&mut out, root).unwrap();
        }
        codec.finish(&mut out).unwrap();

        let bytes = out.into_inner();
        assert_eq!(StreamFormat::detect(&bytes).unwrap(), format);
        let document = format.codec(false).read_document(&bytes).unwrap();
        assert_eq!(document.version, OBJECT_STREAM_VERSION);

        let mut expected = roots;
        if binary {
            expected.iter_mut().for_each(strip_names);
        }
        assert_eq!(document.roots, expected);
    }

    #[rstest]
    #[case(StreamFormat::Binary)]
    #[case(StreamFormat::Xml)]
    #[case(StreamFormat::Json)]
    fn empty_document(#[case] format: StreamFormat) {
        let mut out = MemoryStream::new();
        let mut codec = format.codec(true);
        codec.begin(&mut out).unwrap();
        codec.finish(&mut out).unwrap();
        let document = format.codec(true).read_document(out.as_bytes()).unwrap();
        assert!(document.roots.is_empty());
    }

    #[rstest]
    #[case(StreamFormat::Binary)]
    #[case(StreamFormat::Xml)]
    #[case(StreamFormat::Json)]
    fn truncated_stream_is_fatal(#[case] format: StreamFormat) {
        let mut out = MemoryStream::new();
        let mut codec = format.codec(false);
        codec.begin(&mut out).unwrap();
        codec.write_root(&mut out, &sample_tree(false)).unwrap();
        codec.finish(&mut out).unwrap();

        let bytes = out.into_inner();
        let cut = &bytes[..bytes.len() * 2 / 3];
        assert!(format.codec(false).read_document(cut).is_err());
    }
}
