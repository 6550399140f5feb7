use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use redlilium_stream::{ByteStream, IoAdapter};
use uuid::Uuid;

use super::{check_version, FormatCodec, StreamFormat, MAX_NESTING, OBJECT_STREAM_VERSION};
use crate::error::CodecError;
use crate::node::{Document, NodePayload, StreamNode};
use crate::registry::parse_braced_uuid;

const ROOT_TAG: &str = "ObjectStream";
const NODE_TAG: &str = "Class";

/// XML codec.
///
/// ```text
/// <ObjectStream version="3">
///   <Class name="Widget" type="{...}" version="2">
///     <Class name="i32" field="id" type="{...}">42</Class>
///     <Class name="bool" field="visible" type="{...}" value="true"/>
///   </Class>
/// </ObjectStream>
/// ```
///
/// Leaf values are element text, or a `value` attribute for nodes stored
/// as attributes. Binary payloads use a base64 `bytes` attribute.
#[derive(Debug)]
pub struct XmlCodec {
    pretty: bool,
}

impl XmlCodec {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl FormatCodec for XmlCodec {
    fn format(&self) -> StreamFormat {
        StreamFormat::Xml
    }

    fn begin(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError> {
        write!(
            IoAdapter::new(out),
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<{ROOT_TAG} version=\"{OBJECT_STREAM_VERSION}\">"
        )?;
        Ok(())
    }

    fn write_root(&mut self, out: &mut dyn ByteStream, node: &StreamNode) -> Result<(), CodecError> {
        let mut io = IoAdapter::new(out);
        if self.pretty {
            io.write_all(b"\n")?;
            let mut writer = Writer::new_with_indent(io, b' ', 2);
            write_node(&mut writer, node)
        } else {
            write_node(&mut Writer::new(io), node)
        }
    }

    fn finish(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError> {
        let mut io = IoAdapter::new(out);
        if self.pretty {
            io.write_all(b"\n")?;
        }
        write!(io, "</{ROOT_TAG}>")?;
        if self.pretty {
            io.write_all(b"\n")?;
        }
        Ok(())
    }

    fn read_document(&mut self, input: &[u8]) -> Result<Document, CodecError> {
        DocumentParser::default().parse(input)
    }
}

fn write_node<W: Write>(writer: &mut Writer<W>, node: &StreamNode) -> Result<(), CodecError> {
    let version = node.version.to_string();
    let type_id = node.type_uuid.braced().to_string();

    let mut start = BytesStart::new(NODE_TAG);
    if !node.type_name.is_empty() {
        start.push_attribute(("name", node.type_name.as_str()));
    }
    if let Some(field) = &node.field {
        start.push_attribute(("field", field.as_str()));
    }
    start.push_attribute(("type", type_id.as_str()));
    if node.version != 0 {
        start.push_attribute(("version", version.as_str()));
    }

    let text = match &node.payload {
        NodePayload::None => None,
        NodePayload::Bytes(bytes) => {
            start.push_attribute(("bytes", STANDARD.encode(bytes).as_str()));
            None
        }
        NodePayload::Text(text) if node.as_attribute => {
            start.push_attribute(("value", text.as_str()));
            None
        }
        NodePayload::Text(text) => Some(text.as_str()),
    };

    if text.is_none() && node.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_error)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    if let Some(text) = text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_error)?;
    }
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(NODE_TAG)))
        .map_err(xml_error)?;
    Ok(())
}

fn xml_error(err: impl std::fmt::Display) -> CodecError {
    CodecError::malformed(StreamFormat::Xml, err)
}

/// Node under construction while its element is open.
struct OpenNode {
    node: StreamNode,
    text: String,
    has_children: bool,
}

impl OpenNode {
    fn close(mut self) -> StreamNode {
        // Whitespace between child elements is indentation, not a value.
        if !self.has_children && self.node.payload.is_none() {
            self.node.payload = NodePayload::Text(self.text);
        }
        self.node
    }
}

#[derive(Default)]
struct DocumentParser {
    version: Option<u32>,
    stack: Vec<OpenNode>,
    roots: Vec<StreamNode>,
    closed: bool,
}

impl DocumentParser {
    fn parse(mut self, input: &[u8]) -> Result<Document, CodecError> {
        let mut reader = Reader::from_reader(input);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf).map_err(xml_error)? {
                Event::Start(e) => {
                    if self.version.is_none() {
                        self.open_document(&e)?;
                    } else {
                        if self.stack.len() > MAX_NESTING {
                            return Err(CodecError::malformed(
                                StreamFormat::Xml,
                                format!("nesting deeper than {MAX_NESTING}"),
                            ));
                        }
                        let node = parse_node(&e)?;
                        self.stack.push(OpenNode {
                            node,
                            text: String::new(),
                            has_children: false,
                        });
                    }
                }
                Event::Empty(e) => {
                    if self.version.is_none() {
                        self.open_document(&e)?;
                        self.closed = true;
                    } else {
                        let node = parse_node(&e)?;
                        self.attach(node)?;
                    }
                }
                Event::End(_) => match self.stack.pop() {
                    Some(open) => self.attach(open.close())?,
                    None => self.closed = true,
                },
                Event::Text(t) => {
                    if let Some(open) = self.stack.last_mut() {
                        open.text.push_str(&t.unescape().map_err(xml_error)?);
                    }
                }
                Event::CData(c) => {
                    if let Some(open) = self.stack.last_mut() {
                        let text = std::str::from_utf8(&c).map_err(xml_error)?;
                        open.text.push_str(text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let version = self.version.ok_or(CodecError::BadHeader)?;
        if !self.closed || !self.stack.is_empty() {
            return Err(CodecError::truncated(
                StreamFormat::Xml,
                format!("missing </{ROOT_TAG}>"),
            ));
        }
        Ok(Document {
            version,
            roots: self.roots,
        })
    }

    fn open_document(&mut self, e: &BytesStart<'_>) -> Result<(), CodecError> {
        if e.name().as_ref() != ROOT_TAG.as_bytes() {
            return Err(CodecError::BadHeader);
        }
        let mut version = None;
        for attr in e.attributes() {
            let attr = attr.map_err(xml_error)?;
            if attr.key.as_ref() == b"version" {
                let value = attr.unescape_value().map_err(xml_error)?;
                version = value.trim().parse::<u32>().ok();
            }
        }
        let version = version.ok_or(CodecError::BadHeader)?;
        self.version = Some(check_version(version)?);
        Ok(())
    }

    fn attach(&mut self, node: StreamNode) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::malformed(
                StreamFormat::Xml,
                format!("element after </{ROOT_TAG}>"),
            ));
        }
        match self.stack.last_mut() {
            Some(parent) => {
                parent.has_children = true;
                parent.node.children.push(node);
            }
            None => self.roots.push(node),
        }
        Ok(())
    }
}

fn parse_node(e: &BytesStart<'_>) -> Result<StreamNode, CodecError> {
    if e.name().as_ref() != NODE_TAG.as_bytes() {
        return Err(CodecError::malformed(
            StreamFormat::Xml,
            format!(
                "unexpected element <{}>",
                String::from_utf8_lossy(e.name().as_ref())
            ),
        ));
    }

    let mut node = StreamNode::new(Uuid::nil(), String::new());
    let mut type_id = None;
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        let value = attr.unescape_value().map_err(xml_error)?;
        match attr.key.as_ref() {
            b"name" => node.type_name = value.into_owned(),
            b"field" => node.field = Some(value.into_owned()),
            b"type" => type_id = parse_braced_uuid(&value),
            b"version" => {
                node.version = value.trim().parse().map_err(|_| {
                    CodecError::malformed(StreamFormat::Xml, format!("bad version '{value}'"))
                })?
            }
            b"value" => {
                node.payload = NodePayload::Text(value.into_owned());
                node.as_attribute = true;
            }
            b"bytes" => {
                let bytes = STANDARD.decode(value.trim()).map_err(xml_error)?;
                node.payload = NodePayload::Bytes(bytes);
            }
            _ => {}
        }
    }
    node.type_uuid = type_id.ok_or_else(|| {
        CodecError::malformed(
            StreamFormat::Xml,
            format!("element '{}' has no valid type id", node.field_name()),
        )
    })?;
    Ok(node)
}
