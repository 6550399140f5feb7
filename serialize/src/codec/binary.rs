use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use redlilium_stream::{ByteStream, IoAdapter};
use uuid::Uuid;

use super::{check_version, FormatCodec, StreamFormat, MAX_NESTING, OBJECT_STREAM_VERSION};
use crate::error::CodecError;
use crate::node::{Document, NodePayload, StreamNode};

const MAGIC: &[u8; 4] = b"RLOS";
const END_OF_ROOTS: u8 = 0xFF;

// Node tag bits.
const HAS_FIELD: u8 = 1 << 0;
const HAS_VERSION: u8 = 1 << 1;
const HAS_BYTES: u8 = 1 << 2;
const HAS_TEXT: u8 = 1 << 3;
const HAS_CHILDREN: u8 = 1 << 4;
const AS_ATTRIBUTE: u8 = 1 << 5;

/// Compact binary codec.
///
/// Layout: `0x00 "RLOS" version:u32be`, then one tagged node per root and
/// a `0xFF` terminator. A node is
/// `tag:u8 uuid:[u8; 16] [field:u16+utf8] [version:u32] [payload:u32+bytes] [children:u32 node*]`
/// where the tag bits say which optional parts are present. Lengths and
/// counts are little-endian. Type names are not stored.
#[derive(Debug, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self {
        Self
    }
}

impl FormatCodec for BinaryCodec {
    fn format(&self) -> StreamFormat {
        StreamFormat::Binary
    }

    fn begin(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError> {
        let mut header = Vec::with_capacity(9);
        header.write_u8(0)?;
        header.write_all(MAGIC)?;
        header.write_u32::<BigEndian>(OBJECT_STREAM_VERSION)?;
        IoAdapter::new(out).write_all(&header)?;
        Ok(())
    }

    fn write_root(&mut self, out: &mut dyn ByteStream, node: &StreamNode) -> Result<(), CodecError> {
        let mut buffer = Vec::new();
        encode_node(&mut buffer, node)?;
        IoAdapter::new(out).write_all(&buffer)?;
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError> {
        IoAdapter::new(out).write_all(&[END_OF_ROOTS])?;
        Ok(())
    }

    fn read_document(&mut self, input: &[u8]) -> Result<Document, CodecError> {
        let mut cursor = Cursor::new(input);
        let mut magic = [0u8; 5];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| CodecError::BadHeader)?;
        if magic[0] != 0 || &magic[1..] != MAGIC {
            return Err(CodecError::BadHeader);
        }
        let version = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| CodecError::BadHeader)?;
        let version = check_version(version)?;

        let mut roots = Vec::new();
        loop {
            let tag = cursor.read_u8().map_err(eof)?;
            if tag == END_OF_ROOTS {
                break;
            }
            roots.push(decode_node(&mut cursor, tag, 0)?);
        }
        let trailing = input.len() as u64 - cursor.position();
        if trailing > 0 {
            return Err(CodecError::malformed(
                StreamFormat::Binary,
                format!("{trailing} bytes after the end of roots"),
            ));
        }
        Ok(Document { version, roots })
    }
}

fn encode_node(out: &mut Vec<u8>, node: &StreamNode) -> Result<(), CodecError> {
    let mut tag = 0u8;
    if node.field.is_some() {
        tag |= HAS_FIELD;
    }
    if node.version != 0 {
        tag |= HAS_VERSION;
    }
    match node.payload {
        NodePayload::None => {}
        NodePayload::Bytes(_) => tag |= HAS_BYTES,
        NodePayload::Text(_) => tag |= HAS_TEXT,
    }
    if !node.children.is_empty() {
        tag |= HAS_CHILDREN;
    }
    if node.as_attribute {
        tag |= AS_ATTRIBUTE;
    }

    out.write_u8(tag)?;
    out.write_all(node.type_uuid.as_bytes())?;
    if let Some(field) = &node.field {
        let len = u16::try_from(field.len()).map_err(|_| {
            CodecError::malformed(StreamFormat::Binary, format!("field name '{field}' is too long"))
        })?;
        out.write_u16::<LittleEndian>(len)?;
        out.write_all(field.as_bytes())?;
    }
    if node.version != 0 {
        out.write_u32::<LittleEndian>(node.version)?;
    }
    match &node.payload {
        NodePayload::None => {}
        NodePayload::Bytes(bytes) => write_blob(out, bytes)?,
        NodePayload::Text(text) => write_blob(out, text.as_bytes())?,
    }
    if !node.children.is_empty() {
        write_len(out, node.children.len())?;
        for child in &node.children {
            encode_node(out, child)?;
        }
    }
    Ok(())
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len)
        .map_err(|_| CodecError::malformed(StreamFormat::Binary, "length exceeds u32"))?;
    out.write_u32::<LittleEndian>(len)?;
    Ok(())
}

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    write_len(out, bytes.len())?;
    out.write_all(bytes)?;
    Ok(())
}

fn decode_node(cursor: &mut Cursor<&[u8]>, tag: u8, depth: usize) -> Result<StreamNode, CodecError> {
    if depth > MAX_NESTING {
        return Err(CodecError::malformed(
            StreamFormat::Binary,
            format!("nesting deeper than {MAX_NESTING}"),
        ));
    }
    if tag & !(HAS_FIELD | HAS_VERSION | HAS_BYTES | HAS_TEXT | HAS_CHILDREN | AS_ATTRIBUTE) != 0
        || (tag & HAS_BYTES != 0 && tag & HAS_TEXT != 0)
    {
        return Err(CodecError::malformed(
            StreamFormat::Binary,
            format!("invalid node tag {tag:#04x}"),
        ));
    }

    let mut uuid = [0u8; 16];
    cursor.read_exact(&mut uuid).map_err(eof)?;
    let mut node = StreamNode::new(Uuid::from_bytes(uuid), String::new());
    node.as_attribute = tag & AS_ATTRIBUTE != 0;

    if tag & HAS_FIELD != 0 {
        let len = cursor.read_u16::<LittleEndian>().map_err(eof)? as usize;
        let bytes = read_exact_vec(cursor, len)?;
        node.field = Some(utf8(bytes)?);
    }
    if tag & HAS_VERSION != 0 {
        node.version = cursor.read_u32::<LittleEndian>().map_err(eof)?;
    }
    if tag & (HAS_BYTES | HAS_TEXT) != 0 {
        let len = cursor.read_u32::<LittleEndian>().map_err(eof)? as usize;
        let bytes = read_exact_vec(cursor, len)?;
        node.payload = if tag & HAS_TEXT != 0 {
            NodePayload::Text(utf8(bytes)?)
        } else {
            NodePayload::Bytes(bytes)
        };
    }
    if tag & HAS_CHILDREN != 0 {
        let count = cursor.read_u32::<LittleEndian>().map_err(eof)?;
        for _ in 0..count {
            let child_tag = cursor.read_u8().map_err(eof)?;
            node.children.push(decode_node(cursor, child_tag, depth + 1)?);
        }
    }
    Ok(node)
}

fn read_exact_vec(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, CodecError> {
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if len as u64 > remaining {
        return Err(CodecError::truncated(
            StreamFormat::Binary,
            format!("need {len} bytes, {remaining} left"),
        ));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(eof)?;
    Ok(bytes)
}

fn utf8(bytes: Vec<u8>) -> Result<String, CodecError> {
    String::from_utf8(bytes).map_err(|e| CodecError::malformed(StreamFormat::Binary, e))
}

fn eof(err: std::io::Error) -> CodecError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        CodecError::truncated(StreamFormat::Binary, "unexpected end of stream")
    } else {
        CodecError::Io(err)
    }
}
