//! Format-independent tree of stream elements.
//!
//! Every codec decodes into a [`Document`] and encodes from [`StreamNode`]s.
//! Version converters rewrite nodes before the loader assigns them.

use uuid::Uuid;

use crate::registry::PrimitiveValue;

/// Leaf payload of a stream node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodePayload {
    #[default]
    None,
    /// Little-endian binary encoding.
    Bytes(Vec<u8>),
    /// Canonical text encoding.
    Text(String),
}

impl NodePayload {
    pub fn is_none(&self) -> bool {
        matches!(self, NodePayload::None)
    }

    /// Decode this payload as a primitive of type `T`.
    pub fn decode<T: PrimitiveValue>(&self) -> Option<T> {
        match self {
            NodePayload::None => None,
            NodePayload::Bytes(bytes) => T::from_bytes(bytes),
            NodePayload::Text(text) => T::from_text(text),
        }
    }
}

/// One element of an object stream: a class instance, a field value, or a
/// container element.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamNode {
    pub type_uuid: Uuid,
    /// Informational only. Binary streams do not store names.
    pub type_name: String,
    /// Field this node is stored in. `None` for roots.
    pub field: Option<String>,
    pub version: u32,
    pub payload: NodePayload,
    /// Text formats that distinguish attributes from elements store this
    /// node's value as an attribute.
    pub as_attribute: bool,
    pub children: Vec<StreamNode>,
}

impl StreamNode {
    pub fn new(type_uuid: Uuid, type_name: impl Into<String>) -> Self {
        Self {
            type_uuid,
            type_name: type_name.into(),
            field: None,
            version: 0,
            payload: NodePayload::None,
            as_attribute: false,
            children: Vec::new(),
        }
    }

    /// Build a text leaf for a primitive value.
    pub fn leaf<T: PrimitiveValue>(field: &str, value: &T) -> Self {
        let mut node = Self::new(T::type_uuid(), T::NAME).with_field(field);
        node.payload = NodePayload::Text(value.to_text());
        node
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or("<root>")
    }

    pub fn find_child(&self, field: &str) -> Option<&StreamNode> {
        self.children
            .iter()
            .find(|c| c.field.as_deref() == Some(field))
    }

    pub fn find_child_mut(&mut self, field: &str) -> Option<&mut StreamNode> {
        self.children
            .iter_mut()
            .find(|c| c.field.as_deref() == Some(field))
    }

    /// Remove the first child stored under `field`.
    pub fn remove_child(&mut self, field: &str) -> Option<StreamNode> {
        let index = self
            .children
            .iter()
            .position(|c| c.field.as_deref() == Some(field))?;
        Some(self.children.remove(index))
    }

    /// Rename a child field. Returns `false` if no child has the old name.
    pub fn rename_child(&mut self, from: &str, to: &str) -> bool {
        match self.find_child_mut(from) {
            Some(child) => {
                child.field = Some(to.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn add_child(&mut self, child: StreamNode) {
        self.children.push(child);
    }

    /// Append a primitive child, as converters do when a new field gets a
    /// default value.
    pub fn add_leaf<T: PrimitiveValue>(&mut self, field: &str, value: &T) {
        self.children.push(Self::leaf(field, value));
    }

    /// Decode a primitive child value.
    pub fn child_value<T: PrimitiveValue>(&self, field: &str) -> Option<T> {
        self.find_child(field)
            .filter(|c| c.type_uuid == T::type_uuid())
            .and_then(|c| c.payload.decode())
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(StreamNode::subtree_len).sum::<usize>()
    }
}

/// A fully decoded stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub version: u32,
    pub roots: Vec<StreamNode>,
}
