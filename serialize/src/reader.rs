//! Stream to object graph: decodes a document and rebuilds each root,
//! handing it to the caller as soon as it is complete.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redlilium_stream::{ByteStream, StreamError};
use uuid::Uuid;

use crate::asset::{AssetLoadBehavior, AssetRef};
use crate::cancel::CancellationToken;
use crate::codec::ReadFormat;
use crate::config::ObjectStreamConfig;
use crate::error::{CodecError, DeserializeError};
use crate::filter::FilterDescriptor;
use crate::node::{Document, NodePayload, StreamNode};
use crate::registry::{
    ClassDescriptor, ClassKind, ContainerHandler, FieldAccess, LookupFlags, Reflect, TypeRegistry,
};
use crate::writer::ELEMENT_FIELD;

/// A root handed to the `class_ready` callback.
pub enum LoadedRoot {
    /// Created by the class factory. The callback takes ownership.
    Created(Box<dyn Reflect>),
    /// Loaded into the target supplied by an [`InplaceRootProvider`].
    InPlace,
}

impl LoadedRoot {
    pub fn is_in_place(&self) -> bool {
        matches!(self, LoadedRoot::InPlace)
    }

    pub fn into_boxed(self) -> Option<Box<dyn Reflect>> {
        match self {
            LoadedRoot::Created(object) => Some(object),
            LoadedRoot::InPlace => None,
        }
    }

    /// Take a created root as its concrete type.
    pub fn downcast<T: Reflect>(self) -> Option<Box<T>> {
        self.into_boxed()?.into_any().downcast::<T>().ok()
    }
}

/// Answer of an [`InplaceRootProvider`] for one root.
///
/// With an address the root is loaded into that object instead of a fresh
/// one. A class overrides the registry lookup for the root's stored type.
/// The default answer declines both.
#[derive(Default)]
pub struct InplaceRoot<'a> {
    pub address: Option<&'a mut dyn Reflect>,
    pub class: Option<Arc<ClassDescriptor>>,
}

impl<'a> InplaceRoot<'a> {
    pub fn decline() -> Self {
        Self::default()
    }

    pub fn at(address: &'a mut dyn Reflect) -> Self {
        Self {
            address: Some(address),
            class: None,
        }
    }

    pub fn with_class(mut self, class: Arc<ClassDescriptor>) -> Self {
        self.class = Some(class);
        self
    }
}

/// Chooses, per root, whether to load into existing storage.
///
/// ```ignore
/// struct IntoSettings<'s>(&'s mut Settings);
///
/// impl InplaceRootProvider for IntoSettings<'_> {
///     fn root_info(&mut self, type_uuid: &Uuid, _: &TypeRegistry) -> InplaceRoot<'_> {
///         if *type_uuid == Settings::type_uuid() {
///             InplaceRoot::at(&mut *self.0)
///         } else {
///             InplaceRoot::decline()
///         }
///     }
/// }
/// ```
pub trait InplaceRootProvider {
    fn root_info(&mut self, type_uuid: &Uuid, registry: &TypeRegistry) -> InplaceRoot<'_>;
}

/// Result of one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// No fatal error, not cancelled, and either no recoverable errors or
    /// a non-strict filter.
    pub success: bool,
    pub cancelled: bool,
    /// Roots handed to the `class_ready` callback.
    pub roots_loaded: usize,
    /// Recoverable errors reported while loading.
    pub errors: usize,
}

/// Configurable loader.
///
/// [`load_blocking`] covers the common case; use the reader directly to
/// pick a format, a depth limit, or a cancellation token.
pub struct ObjectStreamReader<'r> {
    registry: &'r TypeRegistry,
    filter: FilterDescriptor,
    format: ReadFormat,
    max_depth: usize,
    cancel: Option<CancellationToken>,
    outstanding: Option<Arc<AtomicUsize>>,
}

impl<'r> ObjectStreamReader<'r> {
    pub fn new(registry: &'r TypeRegistry, filter: FilterDescriptor) -> Self {
        Self {
            registry,
            filter,
            format: ReadFormat::Auto,
            max_depth: ObjectStreamConfig::default().max_depth,
            cancel: None,
            outstanding: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<ReadFormat>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Counter kept at the number of roots not yet handed out.
    pub(crate) fn with_outstanding(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.outstanding = Some(counter);
        self
    }

    pub fn filter(&self) -> &FilterDescriptor {
        &self.filter
    }

    /// Decode the whole stream, then load its roots in stream order.
    ///
    /// A malformed or truncated stream fails before any callback runs.
    pub fn load<F>(
        &self,
        stream: &mut dyn ByteStream,
        mut class_ready: F,
        mut inplace: Option<&mut dyn InplaceRootProvider>,
    ) -> LoadOutcome
    where
        F: FnMut(LoadedRoot, Uuid, &TypeRegistry),
    {
        let mut outcome = LoadOutcome::default();
        let document = match self.read_document(stream) {
            Ok(document) => document,
            Err(err) => {
                log::error!("Failed to read object stream: {err}");
                return outcome;
            }
        };
        log::debug!(
            "Loading object stream v{} with {} root(s)",
            document.version,
            document.roots.len()
        );

        let total = document.roots.len();
        if let Some(counter) = &self.outstanding {
            counter.store(total, Ordering::Release);
        }

        let mut load = RootLoader {
            registry: self.registry,
            filter: &self.filter,
            max_depth: self.max_depth,
            errors: 0,
        };
        for (index, root) in document.roots.into_iter().enumerate() {
            if let Some(token) = &self.cancel {
                if token.checkpoint().is_err() {
                    log::warn!(
                        "Object stream load cancelled with {} of {total} root(s) remaining",
                        total - index
                    );
                    outcome.cancelled = true;
                    break;
                }
            }

            let info = match inplace.as_mut() {
                Some(provider) => provider.root_info(&root.type_uuid, self.registry),
                None => InplaceRoot::decline(),
            };
            if load.load_root(root, info, &mut class_ready) {
                outcome.roots_loaded += 1;
            }
            if let Some(counter) = &self.outstanding {
                counter.fetch_sub(1, Ordering::AcqRel);
            }
        }

        outcome.errors = load.errors;
        outcome.success =
            !outcome.cancelled && (outcome.errors == 0 || !self.filter.is_strict());
        outcome
    }

    fn read_document(&self, stream: &mut dyn ByteStream) -> Result<Document, CodecError> {
        if !stream.can_read() {
            return Err(CodecError::Stream(StreamError::NotReadable));
        }
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        let format = self.format.resolve(&bytes)?;
        format.codec(false).read_document(&bytes)
    }
}

/// Per-load state shared by every root.
struct RootLoader<'l> {
    registry: &'l TypeRegistry,
    filter: &'l FilterDescriptor,
    max_depth: usize,
    errors: usize,
}

impl<'l> RootLoader<'l> {
    /// Returns whether the root reached the callback.
    fn load_root<F>(&mut self, node: StreamNode, info: InplaceRoot<'_>, class_ready: &mut F) -> bool
    where
        F: FnMut(LoadedRoot, Uuid, &TypeRegistry),
    {
        let registry = self.registry;
        let class = match info.class {
            Some(class) => class,
            None => match registry.find_class_descriptor(&node.type_uuid, None, LookupFlags::empty())
            {
                Some(class) => Arc::clone(class),
                None => {
                    self.unknown_class(&node);
                    return false;
                }
            },
        };
        let Some(node) = self.upgrade(Cow::Owned(node), &class) else {
            return false;
        };

        match info.address {
            Some(target) => {
                let found = target.class_uuid();
                if found != class.uuid() {
                    self.report(DeserializeError::TypeMismatch {
                        field: node.field_name().to_owned(),
                        expected: class.uuid(),
                        found,
                    });
                    return false;
                }
                self.load_object(&node, &class, target, 0);
                class_ready(LoadedRoot::InPlace, class.uuid(), registry);
            }
            None => {
                let Some(mut object) = class.create() else {
                    self.report(DeserializeError::MissingFactory {
                        class: class.name().to_owned(),
                    });
                    return false;
                };
                self.load_object(&node, &class, object.as_mut(), 0);
                class_ready(LoadedRoot::Created(object), class.uuid(), registry);
            }
        }
        true
    }

    fn load_object(
        &mut self,
        node: &StreamNode,
        class: &ClassDescriptor,
        target: &mut dyn Reflect,
        depth: usize,
    ) {
        if depth > self.max_depth {
            self.report(DeserializeError::DepthExceeded(self.max_depth));
            return;
        }
        match class.kind() {
            ClassKind::Primitive(codec) => {
                let decoded = match &node.payload {
                    NodePayload::Bytes(bytes) => (codec.from_bytes)(bytes, target),
                    NodePayload::Text(text) => (codec.from_text)(text, target),
                    NodePayload::None => false,
                };
                if !decoded {
                    self.report(DeserializeError::PrimitiveDecode {
                        class: class.name().to_owned(),
                        field: node.field_name().to_owned(),
                    });
                }
            }
            ClassKind::Struct => {
                for child in &node.children {
                    self.load_field(child, class, &mut *target, depth);
                }
            }
            ClassKind::Container(handler) => {
                handler.clear(&mut *target);
                for child in &node.children {
                    self.load_element(child, class, handler.as_ref(), &mut *target, depth);
                }
            }
            ClassKind::AssetRef => self.load_asset(node, target),
        }
    }

    fn load_field(
        &mut self,
        child: &StreamNode,
        class: &ClassDescriptor,
        target: &mut dyn Reflect,
        depth: usize,
    ) {
        let Some(name) = child.field.as_deref() else {
            self.report(DeserializeError::UnnamedChild {
                class: class.name().to_owned(),
            });
            return;
        };
        let Some(field) = class.field(name) else {
            self.report(DeserializeError::UnknownField {
                class: class.name().to_owned(),
                field: name.to_owned(),
            });
            return;
        };

        let registry = self.registry;
        let Some(child_class) =
            registry.find_class_descriptor(&child.type_uuid, Some(class), LookupFlags::empty())
        else {
            self.unknown_class(child);
            return;
        };
        let acceptable = if field.is_pointer() {
            registry.is_derived_from(&child.type_uuid, &field.type_uuid())
        } else {
            child.type_uuid == field.type_uuid()
        };
        if !acceptable {
            self.report(DeserializeError::TypeMismatch {
                field: name.to_owned(),
                expected: field.type_uuid(),
                found: child.type_uuid,
            });
            return;
        }
        let Some(child) = self.upgrade(Cow::Borrowed(child), child_class) else {
            return;
        };

        match field.access() {
            FieldAccess::Value { get_mut, .. } => match get_mut(target) {
                Some(slot) => self.load_object(&child, child_class, slot, depth + 1),
                None => self.report(DeserializeError::FieldAccess {
                    class: class.name().to_owned(),
                    field: name.to_owned(),
                }),
            },
            FieldAccess::Pointer { set, .. } => {
                let Some(mut object) = child_class.create() else {
                    self.report(DeserializeError::MissingFactory {
                        class: child_class.name().to_owned(),
                    });
                    return;
                };
                self.load_object(&child, child_class, object.as_mut(), depth + 1);
                if !set(target, object) {
                    self.report(DeserializeError::FieldAccess {
                        class: class.name().to_owned(),
                        field: name.to_owned(),
                    });
                }
            }
        }
    }

    fn load_element(
        &mut self,
        child: &StreamNode,
        container: &ClassDescriptor,
        handler: &dyn ContainerHandler,
        target: &mut dyn Reflect,
        depth: usize,
    ) {
        let registry = self.registry;
        let Some(element_class) =
            registry.find_class_descriptor(&child.type_uuid, Some(container), LookupFlags::empty())
        else {
            self.unknown_class(child);
            return;
        };
        if !registry.is_derived_from(&child.type_uuid, &handler.element_type()) {
            self.report(DeserializeError::TypeMismatch {
                field: child.field.as_deref().unwrap_or(ELEMENT_FIELD).to_owned(),
                expected: handler.element_type(),
                found: child.type_uuid,
            });
            return;
        }
        let Some(child) = self.upgrade(Cow::Borrowed(child), element_class) else {
            return;
        };
        let Some(mut element) = element_class.create() else {
            self.report(DeserializeError::MissingFactory {
                class: element_class.name().to_owned(),
            });
            return;
        };
        self.load_object(&child, element_class, element.as_mut(), depth + 1);
        if !handler.push(target, element) {
            self.report(DeserializeError::ContainerPush {
                class: container.name().to_owned(),
                element: child.type_uuid,
            });
        }
    }

    fn load_asset(&mut self, node: &StreamNode, target: &mut dyn Reflect) {
        let Some(slot) = target.downcast_mut::<AssetRef>() else {
            self.report(DeserializeError::FieldAccess {
                class: "Asset".to_owned(),
                field: node.field_name().to_owned(),
            });
            return;
        };
        let Some(asset) = decode_asset(node) else {
            self.report(DeserializeError::AssetDecode {
                field: node.field_name().to_owned(),
            });
            return;
        };
        if !asset.is_set() {
            *slot = asset;
            return;
        }
        if !self.filter.accepts(&asset) {
            log::debug!(
                "Asset {} ('{}') for '{}' filtered out",
                asset.id,
                asset.hint,
                node.field_name()
            );
            *slot = AssetRef::default();
            return;
        }
        *slot = asset;
        if let Some(loader) = self.filter.loader() {
            loader.queue_load(slot);
        }
    }

    /// Bring a node up to the runtime class version.
    fn upgrade<'n>(
        &mut self,
        node: Cow<'n, StreamNode>,
        class: &ClassDescriptor,
    ) -> Option<Cow<'n, StreamNode>> {
        let stored = node.version;
        let current = class.version();
        if stored == current {
            return Some(node);
        }
        if stored > current {
            self.report(DeserializeError::NewerVersion {
                class: class.name().to_owned(),
                stored,
                current,
            });
            return None;
        }
        let Some(converter) = class.converter() else {
            self.report(DeserializeError::MissingConverter {
                class: class.name().to_owned(),
                stored,
                current,
            });
            return None;
        };

        let mut node = node.into_owned();
        if !converter(&mut node, self.registry) {
            self.report(DeserializeError::ConverterFailed {
                class: class.name().to_owned(),
                stored,
            });
            return None;
        }
        log::debug!(
            "Converted '{}' from version {stored} to {current}",
            class.name()
        );
        node.version = current;
        Some(Cow::Owned(node))
    }

    fn unknown_class(&mut self, node: &StreamNode) {
        if self.filter.ignores_unknown_classes() {
            log::debug!(
                "Ignoring unknown class {} ('{}') in '{}'",
                node.type_uuid,
                node.type_name,
                node.field_name()
            );
        } else {
            self.report(DeserializeError::UnknownClass {
                uuid: node.type_uuid,
                name: node.type_name.clone(),
            });
        }
    }

    fn report(&mut self, err: DeserializeError) {
        log::error!("{err}");
        self.errors += 1;
    }
}

fn decode_asset(node: &StreamNode) -> Option<AssetRef> {
    Some(AssetRef {
        id: node.child_value("id")?,
        asset_type: node.child_value("type")?,
        hint: node.child_value("hint").unwrap_or_default(),
        load_behavior: node
            .child_value::<u8>("loadBehavior")
            .and_then(AssetLoadBehavior::from_u8)
            .unwrap_or_default(),
    })
}

/// Load every root of `stream`, calling `class_ready` for each in stream
/// order.
///
/// Returns `false` on a fatal stream error (nothing is loaded), or when
/// recoverable errors occurred under a strict filter. Non-strict loads
/// report those errors through the log and still return `true`.
///
/// ```
/// use redlilium_serialize::{load_blocking, FilterDescriptor, ObjectStreamWriter, StreamFormat, TypeRegistry};
/// use redlilium_stream::MemoryStream;
///
/// let registry = TypeRegistry::with_builtins();
/// let mut stream = MemoryStream::new();
/// let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Xml);
/// writer.write_object(&42i32);
/// writer.finalize();
///
/// let mut stream = MemoryStream::read_only(stream.into_inner());
/// let mut loaded = Vec::new();
/// let ok = load_blocking(
///     &mut stream,
///     &registry,
///     |root, _, _| loaded.extend(root.downcast::<i32>()),
///     &FilterDescriptor::default(),
///     None,
/// );
/// assert!(ok);
/// assert_eq!(*loaded[0], 42);
/// ```
pub fn load_blocking<F>(
    stream: &mut dyn ByteStream,
    registry: &TypeRegistry,
    class_ready: F,
    filter: &FilterDescriptor,
    inplace: Option<&mut dyn InplaceRootProvider>,
) -> bool
where
    F: FnMut(LoadedRoot, Uuid, &TypeRegistry),
{
    ObjectStreamReader::new(registry, filter.clone())
        .load(stream, class_ready, inplace)
        .success
}

/// [`load_blocking`] with an explicit format and the depth limit and
/// filter flags of `config` added to `filter`.
pub fn load_blocking_with<F>(
    stream: &mut dyn ByteStream,
    registry: &TypeRegistry,
    class_ready: F,
    filter: &FilterDescriptor,
    inplace: Option<&mut dyn InplaceRootProvider>,
    format: ReadFormat,
    config: &ObjectStreamConfig,
) -> bool
where
    F: FnMut(LoadedRoot, Uuid, &TypeRegistry),
{
    let filter = filter.clone().with_flags(filter.flags() | config.filter_flags());
    ObjectStreamReader::new(registry, filter)
        .with_format(format)
        .with_max_depth(config.max_depth)
        .load(stream, class_ready, inplace)
        .success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StreamFormat;
    use crate::filter::FilterFlags;
    use crate::registry::TypeUuid;
    use crate::writer::ObjectStreamWriter;
    use redlilium_stream::MemoryStream;

    #[derive(Default, Debug, PartialEq)]
    struct Counter {
        count: u32,
        label: String,
    }

    impl TypeUuid for Counter {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0xb001)
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        registry
            .class::<Counter>("Counter")
            .field("count", |c| &c.count, |c| &mut c.count)
            .field("label", |c| &c.label, |c| &mut c.label)
            .register();
        registry
    }

    fn stream_of(root: StreamNode) -> MemoryStream {
        let mut out = MemoryStream::new();
        let mut codec = StreamFormat::Json.codec(false);
        codec.begin(&mut out).unwrap();
        codec.write_root(&mut out, &root).unwrap();
        codec.finish(&mut out).unwrap();
        MemoryStream::read_only(out.into_inner())
    }

    fn counter_node() -> StreamNode {
        let mut node = StreamNode::new(Counter::type_uuid(), "Counter");
        node.add_leaf("count", &5u32);
        node.add_leaf("label", &String::from("five"));
        node
    }

    fn load(registry: &TypeRegistry, stream: &mut MemoryStream, flags: FilterFlags) -> (LoadOutcome, Vec<Counter>) {
        let mut loaded = Vec::new();
        let outcome = ObjectStreamReader::new(registry, FilterDescriptor::from_flags(flags)).load(
            stream,
            |root, _, _| loaded.extend(root.downcast::<Counter>().map(|c| *c)),
            None,
        );
        (outcome, loaded)
    }

    #[test]
    fn loads_a_hand_built_stream() {
        let registry = registry();
        let (outcome, loaded) = load(&registry, &mut stream_of(counter_node()), FilterFlags::STRICT);
        assert!(outcome.success);
        assert_eq!(outcome.roots_loaded, 1);
        assert_eq!(
            loaded,
            [Counter {
                count: 5,
                label: "five".into()
            }]
        );
    }

    #[test]
    fn wrong_field_type_is_an_error() {
        let registry = registry();
        let mut node = counter_node();
        node.find_child_mut("count").unwrap().type_uuid = i64::type_uuid();
        let (outcome, loaded) = load(&registry, &mut stream_of(node.clone()), FilterFlags::empty());
        assert!(outcome.success);
        assert_eq!(outcome.errors, 1);
        assert_eq!(loaded[0].count, 0);
        assert_eq!(loaded[0].label, "five");

        let (outcome, _) = load(&registry, &mut stream_of(node), FilterFlags::STRICT);
        assert!(!outcome.success);
    }

    #[test]
    fn unparsable_primitive_is_an_error() {
        let registry = registry();
        let mut node = counter_node();
        node.find_child_mut("count").unwrap().payload = NodePayload::Text("many".into());
        let (outcome, loaded) = load(&registry, &mut stream_of(node), FilterFlags::empty());
        assert_eq!(outcome.errors, 1);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn newer_version_is_rejected() {
        let registry = registry();
        let node = counter_node().with_version(4);
        let (outcome, loaded) = load(&registry, &mut stream_of(node), FilterFlags::empty());
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.roots_loaded, 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn unknown_root_class_can_be_ignored() {
        let registry = registry();
        let node = StreamNode::new(Uuid::from_u128(0xdead), "Gone");

        let (outcome, _) = load(&registry, &mut stream_of(node.clone()), FilterFlags::STRICT);
        assert!(!outcome.success);
        assert_eq!(outcome.errors, 1);

        let flags = FilterFlags::STRICT | FilterFlags::IGNORE_UNKNOWN_CLASSES;
        let (outcome, loaded) = load(&registry, &mut stream_of(node), flags);
        assert!(outcome.success);
        assert_eq!(outcome.errors, 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn empty_or_garbage_stream_is_fatal() {
        let registry = registry();
        let mut calls = 0;
        for bytes in [Vec::new(), b"not a stream".to_vec()] {
            let ok = load_blocking(
                &mut MemoryStream::read_only(bytes),
                &registry,
                |_, _, _| calls += 1,
                &FilterDescriptor::default(),
                None,
            );
            assert!(!ok);
        }
        assert_eq!(calls, 0);
    }

    #[test]
    fn exact_format_must_match() {
        let registry = registry();
        let mut stream = MemoryStream::new();
        let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Xml);
        assert!(writer.write_object(&1u8));
        assert!(writer.finalize());

        let bytes = stream.into_inner();
        let reader = ObjectStreamReader::new(&registry, FilterDescriptor::default());
        let outcome = reader
            .with_format(StreamFormat::Json)
            .load(&mut MemoryStream::read_only(bytes.clone()), |_, _, _| {}, None);
        assert!(!outcome.success);

        let outcome = ObjectStreamReader::new(&registry, FilterDescriptor::default())
            .with_format(StreamFormat::Xml)
            .load(&mut MemoryStream::read_only(bytes), |_, _, _| {}, None);
        assert!(outcome.success);
        assert_eq!(outcome.roots_loaded, 1);
    }

    #[test]
    fn outstanding_counter_drains() {
        let registry = registry();
        let counter = Arc::new(AtomicUsize::new(usize::MAX));
        let outcome = ObjectStreamReader::new(&registry, FilterDescriptor::default())
            .with_outstanding(Arc::clone(&counter))
            .load(&mut stream_of(counter_node()), |_, _, _| {}, None);
        assert!(outcome.success);
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }
}
