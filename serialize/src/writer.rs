//! Object graph to stream: walks reflected objects and emits one root at a
//! time through a [`FormatCodec`].

use redlilium_stream::ByteStream;
use uuid::Uuid;

use crate::asset::AssetRef;
use crate::cancel::CancellationToken;
use crate::codec::{FormatCodec, StreamFormat, MAX_NESTING};
use crate::config::ObjectStreamConfig;
use crate::error::{CodecError, SerializeError};
use crate::node::{NodePayload, StreamNode};
use crate::registry::{
    ClassDescriptor, ClassKind, FieldAccess, FieldDescriptor, FieldFlags, LookupFlags,
    PrimitiveValue, Reflect, TypeRegistry,
};

/// Field name used for container elements.
pub const ELEMENT_FIELD: &str = "element";

// Leaves sit one level below their object, and every decoder stops at
// `MAX_NESTING`.
const DEPTH_CEILING: usize = MAX_NESTING - 1;

/// Writes root objects to a stream.
///
/// Roots are encoded and written as soon as [`write_class`](Self::write_class)
/// accepts them. [`finalize`](Self::finalize) writes the document trailer
/// and closes the stream; a writer that never wrote a root still produces
/// a valid empty document.
///
/// # Example
///
/// ```
/// use redlilium_serialize::{ObjectStreamWriter, StreamFormat, TypeRegistry};
/// use redlilium_stream::MemoryStream;
///
/// let registry = TypeRegistry::with_builtins();
/// let mut stream = MemoryStream::new();
/// let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Json);
/// assert!(writer.write_object(&String::from("hello")));
/// assert!(writer.finalize());
/// ```
pub struct ObjectStreamWriter<'a> {
    stream: &'a mut dyn ByteStream,
    registry: &'a TypeRegistry,
    codec: Box<dyn FormatCodec>,
    strict: bool,
    max_depth: usize,
    cancel: Option<CancellationToken>,
    begun: bool,
    broken: bool,
    roots_written: usize,
    failed_roots: usize,
    skipped: usize,
}

impl<'a> ObjectStreamWriter<'a> {
    /// Create a writer with default settings for `format`.
    pub fn create(
        stream: &'a mut dyn ByteStream,
        registry: &'a TypeRegistry,
        format: StreamFormat,
    ) -> Self {
        let config = ObjectStreamConfig {
            format,
            ..ObjectStreamConfig::default()
        };
        Self::create_with_config(stream, registry, &config)
    }

    /// Create a writer using the format, strictness, depth limit and pretty
    /// printing from `config`.
    pub fn create_with_config(
        stream: &'a mut dyn ByteStream,
        registry: &'a TypeRegistry,
        config: &ObjectStreamConfig,
    ) -> Self {
        Self {
            stream,
            registry,
            codec: config.format.codec(config.pretty),
            strict: config.strict,
            max_depth: config.max_depth.min(DEPTH_CEILING),
            cancel: None,
            begun: false,
            broken: false,
            roots_written: 0,
            failed_roots: 0,
            skipped: 0,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// In strict mode any failed subtree rejects the whole root.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Deepest object nesting to write. Values past what the decoders accept
    /// are clamped so every written stream stays readable.
    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth.min(DEPTH_CEILING);
    }

    pub fn format(&self) -> StreamFormat {
        self.codec.format()
    }

    pub fn roots_written(&self) -> usize {
        self.roots_written
    }

    /// Roots rejected by [`write_class`](Self::write_class) so far.
    pub fn failed_roots(&self) -> usize {
        self.failed_roots
    }

    /// Subtrees dropped from otherwise written roots (non-strict mode only).
    pub fn skipped_subtrees(&self) -> usize {
        self.skipped
    }

    /// Write a statically typed root.
    pub fn write_object<T: Reflect>(&mut self, object: &T) -> bool {
        self.write_class(object, object.class_uuid(), None)
    }

    /// Write one root object.
    ///
    /// `type_uuid` is the type the caller knows the object as; the most
    /// derived runtime type is what gets written. `descriptor` skips the
    /// registry lookup when it matches that runtime type.
    ///
    /// Returns `false` if the root was not written: its type is not
    /// registered or is generic, a subtree failed in strict mode, the
    /// stream failed, or the operation was cancelled.
    pub fn write_class(
        &mut self,
        object: &dyn Reflect,
        type_uuid: Uuid,
        descriptor: Option<&ClassDescriptor>,
    ) -> bool {
        if self.broken {
            log::error!("Object stream writer is unusable after an earlier stream failure");
            self.failed_roots += 1;
            return false;
        }
        if let Some(token) = &self.cancel {
            if token.checkpoint().is_err() {
                log::warn!("Object stream save cancelled, root not written");
                self.failed_roots += 1;
                return false;
            }
        }

        let node = match self.encode_root(object, type_uuid, descriptor) {
            Ok(node) => node,
            Err(err) => {
                log::error!("Object stream root rejected: {err}");
                self.failed_roots += 1;
                return false;
            }
        };

        match self.emit(&node) {
            Ok(()) => {
                self.roots_written += 1;
                true
            }
            Err(err) => {
                log::error!("Failed to write root '{}': {err}", node.type_name);
                self.broken = true;
                self.failed_roots += 1;
                false
            }
        }
    }

    /// Write the document trailer, flush and close the stream.
    ///
    /// Returns `false` if any of that failed or an earlier root could not be
    /// written to the stream.
    pub fn finalize(mut self) -> bool {
        match self.close_out() {
            Ok(()) => {
                log::debug!(
                    "Object stream finalized: {} root(s) written, {} rejected, {} subtree(s) skipped",
                    self.roots_written,
                    self.failed_roots,
                    self.skipped
                );
                !self.broken
            }
            Err(err) => {
                log::error!("Failed to finalize object stream: {err}");
                false
            }
        }
    }

    fn encode_root(
        &mut self,
        object: &dyn Reflect,
        type_uuid: Uuid,
        descriptor: Option<&ClassDescriptor>,
    ) -> Result<StreamNode, SerializeError> {
        let registry = self.registry;
        let runtime = object.class_uuid();
        if !registry.is_derived_from(&runtime, &type_uuid) {
            return Err(SerializeError::TypeMismatch {
                field: "<root>".to_owned(),
                expected: type_uuid,
                found: runtime,
            });
        }

        let class: &ClassDescriptor = match descriptor {
            Some(descriptor) if descriptor.uuid() == runtime => descriptor,
            _ => match registry.find_class_descriptor(&runtime, None, LookupFlags::empty()) {
                Some(class) => class.as_ref(),
                None => {
                    return Err(match registry.generic_info(&runtime) {
                        Some(generic) => SerializeError::GenericRoot {
                            name: generic.name().to_owned(),
                            uuid: runtime,
                        },
                        None => SerializeError::UnregisteredType(runtime),
                    })
                }
            },
        };
        if class.kind().is_generic() {
            return Err(SerializeError::GenericRoot {
                name: class.name().to_owned(),
                uuid: runtime,
            });
        }

        let mut walk = GraphWalk {
            registry,
            text: self.codec.format().is_text(),
            strict: self.strict,
            max_depth: self.max_depth,
            path: vec![object.address()],
            skipped: 0,
        };
        let node = walk.object_node(object, class, None, 0)?;
        if walk.skipped > 0 {
            log::warn!(
                "Root '{}' written with {} skipped subtree(s)",
                class.name(),
                walk.skipped
            );
            self.skipped += walk.skipped;
        }
        Ok(node)
    }

    fn ensure_begun(&mut self) -> Result<(), CodecError> {
        if !self.begun {
            self.codec.begin(&mut *self.stream)?;
            self.begun = true;
        }
        Ok(())
    }

    fn emit(&mut self, node: &StreamNode) -> Result<(), CodecError> {
        self.ensure_begun()?;
        self.codec.write_root(&mut *self.stream, node)
    }

    fn close_out(&mut self) -> Result<(), CodecError> {
        self.ensure_begun()?;
        self.codec.finish(&mut *self.stream)?;
        self.stream.flush()?;
        self.stream.close()?;
        Ok(())
    }
}

/// State of one root's graph walk.
struct GraphWalk<'r> {
    registry: &'r TypeRegistry,
    text: bool,
    strict: bool,
    max_depth: usize,
    /// Addresses of pointer targets on the path from the root.
    path: Vec<usize>,
    skipped: usize,
}

impl<'r> GraphWalk<'r> {
    fn object_node(
        &mut self,
        object: &dyn Reflect,
        class: &ClassDescriptor,
        field: Option<&str>,
        depth: usize,
    ) -> Result<StreamNode, SerializeError> {
        if depth > self.max_depth {
            return Err(SerializeError::DepthExceeded(self.max_depth));
        }

        let mut node = StreamNode::new(class.uuid(), class.name()).with_version(class.version());
        node.field = field.map(str::to_owned);

        match class.kind() {
            ClassKind::Primitive(codec) => {
                let payload = if self.text {
                    (codec.to_text)(object).map(NodePayload::Text)
                } else {
                    (codec.to_bytes)(object).map(NodePayload::Bytes)
                };
                node.payload = payload.ok_or_else(|| SerializeError::PrimitiveEncode {
                    class: class.name().to_owned(),
                })?;
            }
            ClassKind::Struct => {
                for field in class.fields() {
                    if let Some(child) = self.field_node(object, class, field, depth)? {
                        node.children.push(child);
                    }
                }
            }
            ClassKind::Container(handler) => {
                let declared = handler.element_type();
                for element in handler.elements(object) {
                    let result = self.element_node(element, class, declared, depth);
                    if let Some(child) = self.recover(result)? {
                        node.children.push(child);
                    }
                }
            }
            ClassKind::AssetRef => {
                let asset = object.downcast_ref::<AssetRef>().ok_or_else(|| {
                    SerializeError::FieldAccess {
                        class: class.name().to_owned(),
                        field: node.field_name().to_owned(),
                    }
                })?;
                node.children = vec![
                    self.leaf("id", &asset.id),
                    self.leaf("type", &asset.asset_type),
                    self.leaf("hint", &asset.hint),
                    self.leaf("loadBehavior", &(asset.load_behavior as u8)),
                ];
            }
        }
        Ok(node)
    }

    /// Node for one field, or `None` for a null pointer or a skipped subtree.
    fn field_node(
        &mut self,
        object: &dyn Reflect,
        class: &ClassDescriptor,
        field: &FieldDescriptor,
        depth: usize,
    ) -> Result<Option<StreamNode>, SerializeError> {
        let result = match field.access() {
            FieldAccess::Value { get, .. } => match get(object) {
                Some(value) => self.value_node(value, class, field, depth),
                None => Err(SerializeError::FieldAccess {
                    class: class.name().to_owned(),
                    field: field.name().to_owned(),
                }),
            },
            FieldAccess::Pointer { get, .. } => match get(object) {
                Some(target) => self.pointer_node(target, class, field, depth),
                None => return Ok(None),
            },
        };
        self.recover(result)
    }

    fn value_node(
        &mut self,
        value: &dyn Reflect,
        class: &ClassDescriptor,
        field: &FieldDescriptor,
        depth: usize,
    ) -> Result<StreamNode, SerializeError> {
        let registry = self.registry;
        let uuid = value.class_uuid();
        let value_class = registry
            .find_class_descriptor(&uuid, Some(class), LookupFlags::empty())
            .ok_or(SerializeError::UnregisteredType(uuid))?;
        let mut node = self.object_node(value, value_class, Some(field.name()), depth + 1)?;
        node.as_attribute = self.text
            && field.flags().contains(FieldFlags::ATTRIBUTE)
            && matches!(value_class.kind(), ClassKind::Primitive(_));
        Ok(node)
    }

    fn pointer_node(
        &mut self,
        target: &dyn Reflect,
        class: &ClassDescriptor,
        field: &FieldDescriptor,
        depth: usize,
    ) -> Result<StreamNode, SerializeError> {
        let uuid = target.class_uuid();
        if !self.registry.is_derived_from(&uuid, &field.type_uuid()) {
            return Err(SerializeError::TypeMismatch {
                field: field.name().to_owned(),
                expected: field.type_uuid(),
                found: uuid,
            });
        }
        let address = target.address();
        if self.path.contains(&address) {
            return Err(SerializeError::CyclicReference {
                class: class.name().to_owned(),
            });
        }
        self.path.push(address);
        let result = self.value_node(target, class, field, depth);
        self.path.pop();
        result
    }

    fn element_node(
        &mut self,
        element: &dyn Reflect,
        container: &ClassDescriptor,
        declared: Uuid,
        depth: usize,
    ) -> Result<StreamNode, SerializeError> {
        let registry = self.registry;
        let uuid = element.class_uuid();
        if !registry.is_derived_from(&uuid, &declared) {
            return Err(SerializeError::TypeMismatch {
                field: ELEMENT_FIELD.to_owned(),
                expected: declared,
                found: uuid,
            });
        }
        let element_class = registry
            .find_class_descriptor(&uuid, Some(container), LookupFlags::empty())
            .ok_or(SerializeError::UnregisteredType(uuid))?;
        self.object_node(element, element_class, Some(ELEMENT_FIELD), depth + 1)
    }

    fn leaf<T: PrimitiveValue>(&self, field: &str, value: &T) -> StreamNode {
        let mut node = StreamNode::leaf(field, value);
        if !self.text {
            node.payload = NodePayload::Bytes(value.to_bytes());
        }
        node
    }

    /// Non-strict walks drop a failed subtree and carry on.
    fn recover(
        &mut self,
        result: Result<StreamNode, SerializeError>,
    ) -> Result<Option<StreamNode>, SerializeError> {
        match result {
            Ok(node) => Ok(Some(node)),
            Err(err) if self.strict => Err(err),
            Err(err) => {
                log::error!("Skipping subtree: {err}");
                self.skipped += 1;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OBJECT_STREAM_VERSION;
    use crate::registry::TypeUuid;
    use redlilium_stream::MemoryStream;

    #[derive(Default)]
    struct Node {
        value: i32,
        next: Option<Box<Node>>,
    }

    impl TypeUuid for Node {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0xa001)
        }
    }

    /// Opaque to the registry.
    struct Secret;

    impl TypeUuid for Secret {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0xa002)
        }
    }

    #[derive(Default)]
    struct Holder {
        id: u32,
        secret: Option<Box<dyn Reflect>>,
    }

    impl TypeUuid for Holder {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0xa003)
        }
    }

    /// A pointer field that points back at its owner.
    #[derive(Default)]
    struct Loop {
        id: u32,
    }

    impl TypeUuid for Loop {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0xa004)
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        registry.register_vec::<i32>();
        registry
            .class::<Node>("Node")
            .field("value", |n| &n.value, |n| &mut n.value)
            .boxed("next", |n| &n.next, |n| &mut n.next)
            .register();
        registry
            .class::<Holder>("Holder")
            .field("id", |h| &h.id, |h| &mut h.id)
            .pointer(
                "secret",
                Secret::type_uuid(),
                |h| h.secret.as_deref(),
                |h, v| {
                    h.secret = Some(v);
                    true
                },
            )
            .register();
        registry
            .class::<Loop>("Loop")
            .field("id", |l| &l.id, |l| &mut l.id)
            .pointer(
                "myself",
                Loop::type_uuid(),
                |l| Some(l as &dyn Reflect),
                |_, _| false,
            )
            .register();
        registry
    }

    fn document(bytes: &[u8]) -> crate::node::Document {
        let format = StreamFormat::detect(bytes).unwrap();
        format.codec(false).read_document(bytes).unwrap()
    }

    #[test]
    fn empty_writer_produces_valid_document() {
        let registry = registry();
        for format in [StreamFormat::Binary, StreamFormat::Xml, StreamFormat::Json] {
            let mut stream = MemoryStream::new();
            let writer = ObjectStreamWriter::create(&mut stream, &registry, format);
            assert!(writer.finalize());
            assert!(!stream.is_open());
            let doc = document(stream.as_bytes());
            assert_eq!(doc.version, OBJECT_STREAM_VERSION);
            assert!(doc.roots.is_empty());
        }
    }

    #[test]
    fn null_pointers_are_omitted() {
        let registry = registry();
        let list = Node {
            value: 1,
            next: Some(Box::new(Node {
                value: 2,
                next: None,
            })),
        };
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Binary);
        assert!(writer.write_object(&list));
        assert!(writer.finalize());

        let doc = document(stream.as_bytes());
        let root = &doc.roots[0];
        assert_eq!(root.child_value::<i32>("value"), Some(1));
        let next = root.find_child("next").unwrap();
        assert_eq!(next.child_value::<i32>("value"), Some(2));
        assert!(next.find_child("next").is_none());
    }

    #[test]
    fn unregistered_root_writes_nothing() {
        let registry = registry();
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Json);
        writer.set_strict(false);
        assert!(!writer.write_object(&Secret));
        assert_eq!(writer.failed_roots(), 1);
        assert!(writer.finalize());
        assert!(document(stream.as_bytes()).roots.is_empty());
    }

    #[test]
    fn generic_root_is_rejected() {
        let registry = registry();
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Xml);
        assert!(!writer.write_object(&vec![1i32, 2]));
        assert!(writer.finalize());
    }

    #[test]
    fn unregistered_subtree_skipped_unless_strict() {
        let registry = registry();
        let holder = Holder {
            id: 9,
            secret: Some(Box::new(Secret)),
        };

        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Xml);
        assert!(writer.write_object(&holder));
        assert_eq!(writer.skipped_subtrees(), 1);
        writer.set_strict(true);
        assert!(!writer.write_object(&holder));
        assert!(writer.finalize());

        let doc = document(stream.as_bytes());
        assert_eq!(doc.roots.len(), 1);
        assert_eq!(doc.roots[0].child_value::<u32>("id"), Some(9));
        assert!(doc.roots[0].find_child("secret").is_none());
    }

    #[test]
    fn pointer_cycles_are_detected() {
        let registry = registry();
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Json);
        assert!(writer.write_object(&Loop { id: 3 }));
        assert_eq!(writer.skipped_subtrees(), 1);
        writer.set_strict(true);
        assert!(!writer.write_object(&Loop { id: 4 }));
        assert!(writer.finalize());
    }

    #[test]
    fn depth_limit() {
        let registry = registry();
        let mut list = Node::default();
        for value in 0..10 {
            list = Node {
                value,
                next: Some(Box::new(list)),
            };
        }
        let config = ObjectStreamConfig {
            format: StreamFormat::Binary,
            strict: true,
            max_depth: 5,
            ..ObjectStreamConfig::default()
        };
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create_with_config(&mut stream, &registry, &config);
        assert!(!writer.write_object(&list));
        writer.set_max_depth(64);
        assert!(writer.write_object(&list));
        assert!(writer.finalize());
    }

    #[test]
    fn depth_limit_is_clamped_to_decoder_nesting() {
        let registry = registry();
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Json);
        writer.set_max_depth(usize::MAX);
        assert_eq!(writer.max_depth, MAX_NESTING - 1);
    }

    #[test]
    fn cancelled_writer_rejects_roots() {
        let registry = registry();
        let token = CancellationToken::new();
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Binary)
            .with_cancellation(token.clone());
        assert!(writer.write_object(&7i32));
        token.cancel();
        assert!(!writer.write_object(&8i32));
        assert_eq!(writer.roots_written(), 1);
        assert!(writer.finalize());
    }

    #[test]
    fn closed_stream_fails_finalize() {
        let registry = registry();
        let mut stream = MemoryStream::new();
        stream.close().unwrap();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Xml);
        assert!(!writer.write_object(&1u8));
        assert!(!writer.finalize());
    }
}
