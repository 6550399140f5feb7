use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use redlilium_stream::{ByteStream, IoAdapter};
use serde::{Deserialize, Serialize};

use super::{check_version, FormatCodec, StreamFormat, MAX_NESTING, OBJECT_STREAM_VERSION};
use crate::error::CodecError;
use crate::node::{Document, NodePayload, StreamNode};
use crate::registry::parse_braced_uuid;

const DOCUMENT_NAME: &str = "ObjectStream";
// Document object, its `Objects` array and the root, then an array and an
// object per nested node.
const MAX_BRACKET_DEPTH: usize = 3 + 2 * MAX_NESTING + 1;

/// JSON codec.
///
/// ```text
/// {"name":"ObjectStream","version":3,"Objects":[
///   {"typeName":"Widget","typeId":"{...}","version":2,"Objects":[
///     {"field":"id","typeName":"i32","typeId":"{...}","value":"42"}]}]}
/// ```
///
/// Absent parts of a node are omitted. Binary payloads use a base64
/// `bytes` key.
#[derive(Debug)]
pub struct JsonCodec {
    pretty: bool,
    roots_written: usize,
}

impl JsonCodec {
    pub fn new(pretty: bool) -> Self {
        Self {
            pretty,
            roots_written: 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct JsonNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(rename = "typeName", default, skip_serializing_if = "String::is_empty")]
    type_name: String,
    #[serde(rename = "typeId")]
    type_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bytes: Option<String>,
    #[serde(rename = "Objects", default, skip_serializing_if = "Vec::is_empty")]
    objects: Vec<JsonNode>,
}

#[derive(Deserialize)]
struct JsonDocument {
    name: String,
    version: u32,
    #[serde(rename = "Objects", default)]
    objects: Vec<JsonNode>,
}

fn is_zero(version: &u32) -> bool {
    *version == 0
}

impl From<&StreamNode> for JsonNode {
    fn from(node: &StreamNode) -> Self {
        let (value, bytes) = match &node.payload {
            NodePayload::None => (None, None),
            NodePayload::Text(text) => (Some(text.clone()), None),
            NodePayload::Bytes(raw) => (None, Some(STANDARD.encode(raw))),
        };
        Self {
            field: node.field.clone(),
            type_name: node.type_name.clone(),
            type_id: node.type_uuid.braced().to_string(),
            version: node.version,
            value,
            bytes,
            objects: node.children.iter().map(JsonNode::from).collect(),
        }
    }
}

impl TryFrom<JsonNode> for StreamNode {
    type Error = CodecError;

    fn try_from(json: JsonNode) -> Result<Self, CodecError> {
        let type_uuid = parse_braced_uuid(&json.type_id).ok_or_else(|| {
            CodecError::malformed(
                StreamFormat::Json,
                format!("invalid typeId '{}'", json.type_id),
            )
        })?;
        let payload = match (json.value, json.bytes) {
            (Some(_), Some(_)) => {
                return Err(CodecError::malformed(
                    StreamFormat::Json,
                    "node has both 'value' and 'bytes'",
                ))
            }
            (Some(text), None) => NodePayload::Text(text),
            (None, Some(encoded)) => NodePayload::Bytes(
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| CodecError::malformed(StreamFormat::Json, e))?,
            ),
            (None, None) => NodePayload::None,
        };
        let mut node = StreamNode::new(type_uuid, json.type_name);
        node.field = json.field;
        node.version = json.version;
        node.payload = payload;
        node.children = json
            .objects
            .into_iter()
            .map(StreamNode::try_from)
            .collect::<Result<_, _>>()?;
        Ok(node)
    }
}

/// Whether `{`/`[` nesting outside string literals goes deeper than `limit`.
fn nests_deeper_than(input: &[u8], limit: usize) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in input {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > limit {
                    return true;
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    false
}

fn json_error(err: serde_json::Error) -> CodecError {
    if err.is_io() {
        CodecError::Io(err.into())
    } else if err.is_eof() {
        CodecError::truncated(StreamFormat::Json, err)
    } else {
        CodecError::malformed(StreamFormat::Json, err)
    }
}

impl FormatCodec for JsonCodec {
    fn format(&self) -> StreamFormat {
        StreamFormat::Json
    }

    fn begin(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError> {
        self.roots_written = 0;
        write!(
            IoAdapter::new(out),
            "{{\"name\":\"{DOCUMENT_NAME}\",\"version\":{OBJECT_STREAM_VERSION},\"Objects\":["
        )?;
        Ok(())
    }

    fn write_root(&mut self, out: &mut dyn ByteStream, node: &StreamNode) -> Result<(), CodecError> {
        let mut io = IoAdapter::new(out);
        if self.roots_written > 0 {
            io.write_all(b",")?;
        }
        if self.pretty {
            io.write_all(b"\n")?;
        }
        let json = JsonNode::from(node);
        if self.pretty {
            serde_json::to_writer_pretty(&mut io, &json).map_err(json_error)?;
        } else {
            serde_json::to_writer(&mut io, &json).map_err(json_error)?;
        }
        self.roots_written += 1;
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn ByteStream) -> Result<(), CodecError> {
        let trailer: &[u8] = if self.pretty { b"\n]}\n" } else { b"]}" };
        IoAdapter::new(out).write_all(trailer)?;
        Ok(())
    }

    fn read_document(&mut self, input: &[u8]) -> Result<Document, CodecError> {
        if nests_deeper_than(input, MAX_BRACKET_DEPTH) {
            return Err(CodecError::malformed(
                StreamFormat::Json,
                format!("nesting deeper than {MAX_NESTING}"),
            ));
        }
        // serde_json stops at 128 levels by default, about 64 nodes.
        let mut de = serde_json::Deserializer::from_slice(input);
        de.disable_recursion_limit();
        let document = JsonDocument::deserialize(serde_stacker::Deserializer::new(&mut de))
            .map_err(json_error)?;
        de.end().map_err(json_error)?;
        if document.name != DOCUMENT_NAME {
            return Err(CodecError::BadHeader);
        }
        let version = check_version(document.version)?;
        let roots = document
            .objects
            .into_iter()
            .map(StreamNode::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Document { version, roots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlilium_stream::MemoryStream;
    use uuid::Uuid;

    #[test]
    fn compact_layout() {
        let mut root = StreamNode::new(Uuid::from_u128(1), "Widget").with_version(2);
        root.add_leaf("id", &42i32);

        let mut out = MemoryStream::new();
        let mut codec = JsonCodec::new(false);
        codec.begin(&mut out).unwrap();
        codec.write_root(&mut out, &root).unwrap();
        codec.write_root(&mut out, &root).unwrap();
        codec.finish(&mut out).unwrap();

        let text = String::from_utf8(out.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["name"], "ObjectStream");
        assert_eq!(value["version"], 3);
        let objects = value["Objects"].as_array().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["typeName"], "Widget");
        assert_eq!(objects[0]["version"], 2);
        assert!(objects[0].get("field").is_none());
        assert_eq!(objects[0]["Objects"][0]["field"], "id");
        assert_eq!(objects[0]["Objects"][0]["value"], "42");
    }

    #[test]
    fn rejects_other_documents() {
        let result = JsonCodec::new(false).read_document(br#"{"name":"Scene","version":3}"#);
        assert!(matches!(result, Err(CodecError::BadHeader)));
    }

    #[test]
    fn rejects_version_zero() {
        let result = JsonCodec::new(false).read_document(br#"{"name":"ObjectStream","version":0}"#);
        assert!(matches!(
            result,
            Err(CodecError::UnsupportedVersion { found: 0, .. })
        ));
    }

    #[test]
    fn invalid_type_id() {
        let json = br#"{"name":"ObjectStream","version":3,"Objects":[{"typeId":"nope"}]}"#;
        assert!(matches!(
            JsonCodec::new(false).read_document(json),
            Err(CodecError::Malformed { .. })
        ));
    }

    fn chain(depth: usize) -> StreamNode {
        let mut node = StreamNode::leaf("value", &1u32);
        for _ in 0..depth {
            let mut parent = StreamNode::new(Uuid::from_u128(2), "Link");
            parent.add_child(node);
            node = parent;
        }
        node
    }

    #[test]
    fn deep_documents_read_back() {
        let root = chain(300);
        let mut out = MemoryStream::new();
        let mut codec = JsonCodec::new(false);
        codec.begin(&mut out).unwrap();
        codec.write_root(&mut out, &root).unwrap();
        codec.finish(&mut out).unwrap();

        let document = codec.read_document(&out.into_inner()).unwrap();
        assert_eq!(document.roots, vec![root]);
    }

    #[test]
    fn nesting_past_limit_is_malformed() {
        let depth = MAX_NESTING * 4;
        let mut json = String::from(r#"{"name":"ObjectStream","version":3,"Objects":["#);
        json.push_str(&r#"{"typeId":"{00000000-0000-0000-0000-000000000001}","Objects":["#.repeat(depth));
        json.push_str(&"]}".repeat(depth));
        json.push_str("]}");
        assert!(matches!(
            JsonCodec::new(false).read_document(json.as_bytes()),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn brackets_inside_strings_do_not_count() {
        let text = br#"{"a":"[[[{\"[{"}"#;
        assert!(!nests_deeper_than(text, 1));
        assert!(nests_deeper_than(b"[[{}]]", 2));
    }
}
