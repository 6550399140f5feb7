//! Class and field descriptors, and the fluent builder that produces them.

use std::marker::PhantomData;
use std::sync::Arc;

use bitflags::bitflags;
use uuid::Uuid;

use super::container::ContainerHandler;
use super::primitive::PrimitiveCodec;
use super::reflect::{Reflect, TypeUuid};
use super::TypeRegistry;
use crate::node::StreamNode;

bitflags! {
    /// Per-field storage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u32 {
        /// Field holds an optional, owned, possibly polymorphic object.
        const POINTER = 1 << 0;
        /// Field is an embedded base class.
        const BASE_CLASS = 1 << 1;
        /// Field type is a container class.
        const DYNAMIC_ARRAY = 1 << 2;
        /// Text formats persist the value as an attribute instead of element text.
        const ATTRIBUTE = 1 << 3;
    }
}

/// Creates a default instance of a class.
pub type Factory = fn() -> Box<dyn Reflect>;

/// Upgrades a node stored with an older class version in place.
///
/// The node still carries its stored version when the converter runs.
/// Returning `false` rejects the data.
pub type VersionConverter = fn(&mut StreamNode, &TypeRegistry) -> bool;

pub type ValueGetter =
    Box<dyn for<'a> Fn(&'a dyn Reflect) -> Option<&'a dyn Reflect> + Send + Sync>;
pub type ValueGetterMut =
    Box<dyn for<'a> Fn(&'a mut dyn Reflect) -> Option<&'a mut dyn Reflect> + Send + Sync>;
pub type PointerSetter = Box<dyn Fn(&mut dyn Reflect, Box<dyn Reflect>) -> bool + Send + Sync>;

/// How a field is reached from its owning object.
pub enum FieldAccess {
    /// Embedded value, always present.
    Value {
        get: ValueGetter,
        get_mut: ValueGetterMut,
    },
    /// Optional owned object. `get` returns `None` for a null pointer; `set`
    /// returns `false` when the object is not of an acceptable type.
    Pointer { get: ValueGetter, set: PointerSetter },
}

/// Describes one field of a class.
pub struct FieldDescriptor {
    name: String,
    type_uuid: Uuid,
    flags: FieldFlags,
    access: FieldAccess,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type. Pointer fields may hold derived types.
    pub fn type_uuid(&self) -> Uuid {
        self.type_uuid
    }

    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    pub fn access(&self) -> &FieldAccess {
        &self.access
    }

    pub fn is_pointer(&self) -> bool {
        self.flags.contains(FieldFlags::POINTER)
    }

    pub fn is_base_class(&self) -> bool {
        self.flags.contains(FieldFlags::BASE_CLASS)
    }

    fn value<T: TypeUuid, F: TypeUuid>(
        name: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        Self {
            name: name.to_owned(),
            type_uuid: F::type_uuid(),
            flags: FieldFlags::empty(),
            access: FieldAccess::Value {
                get: value_getter(move |obj| {
                    obj.downcast_ref::<T>().map(|t| get(t) as &dyn Reflect)
                }),
                get_mut: value_getter_mut(move |obj| {
                    obj.downcast_mut::<T>().map(|t| get_mut(t) as &mut dyn Reflect)
                }),
            },
        }
    }
}

impl std::fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("type_uuid", &self.type_uuid)
            .field("flags", &self.flags)
            .finish()
    }
}

fn value_getter<G>(get: G) -> ValueGetter
where
    G: for<'a> Fn(&'a dyn Reflect) -> Option<&'a dyn Reflect> + Send + Sync + 'static,
{
    Box::new(get)
}

fn value_getter_mut<G>(get: G) -> ValueGetterMut
where
    G: for<'a> Fn(&'a mut dyn Reflect) -> Option<&'a mut dyn Reflect> + Send + Sync + 'static,
{
    Box::new(get)
}

fn pointer_setter<S>(set: S) -> PointerSetter
where
    S: Fn(&mut dyn Reflect, Box<dyn Reflect>) -> bool + Send + Sync + 'static,
{
    Box::new(set)
}

/// What kind of data a class describes.
pub enum ClassKind {
    /// Record with named fields.
    Struct,
    /// Leaf value encoded directly into a node payload.
    Primitive(PrimitiveCodec),
    /// Generic container; elements are stored as child nodes.
    Container(Arc<dyn ContainerHandler>),
    /// Reference to an external asset, resolved through the load filter.
    AssetRef,
}

impl ClassKind {
    pub fn is_generic(&self) -> bool {
        matches!(self, ClassKind::Container(_))
    }
}

/// Reflection metadata for one class.
pub struct ClassDescriptor {
    uuid: Uuid,
    name: String,
    version: u32,
    kind: ClassKind,
    fields: Vec<FieldDescriptor>,
    factory: Option<Factory>,
    converter: Option<VersionConverter>,
}

impl ClassDescriptor {
    pub(crate) fn new(uuid: Uuid, name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            uuid,
            name: name.into(),
            version: 0,
            kind,
            fields: Vec::new(),
            factory: None,
            converter: None,
        }
    }

    pub(crate) fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    /// Fields in stream order: base classes first, then members.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn converter(&self) -> Option<VersionConverter> {
        self.converter
    }

    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// Create a default instance, if the class has a factory.
    pub fn create(&self) -> Option<Box<dyn Reflect>> {
        self.factory.map(|factory| factory())
    }
}

impl std::fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Fluent registration of a struct class.
///
/// Base classes are always placed before members regardless of call order,
/// so the stream layout is bases first, then members in registration order.
///
/// # Example
///
/// ```
/// use redlilium_serialize::{TypeRegistry, TypeUuid};
/// use uuid::Uuid;
///
/// #[derive(Default)]
/// struct Door {
///     locked: bool,
///     code: String,
/// }
///
/// impl TypeUuid for Door {
///     fn type_uuid() -> Uuid {
///         Uuid::from_u128(0x0d00_0000_0000_4000_8000_0000_0000_0001)
///     }
/// }
///
/// let mut registry = TypeRegistry::with_builtins();
/// registry
///     .class::<Door>("Door")
///     .version(2)
///     .field("locked", |d| &d.locked, |d| &mut d.locked)
///     .field("code", |d| &d.code, |d| &mut d.code)
///     .register();
///
/// let door = registry.find_by_name("Door").unwrap();
/// assert_eq!(door.fields().len(), 2);
/// ```
#[must_use = "call `register()` to add the class to the registry"]
pub struct ClassBuilder<'r, T> {
    registry: &'r mut TypeRegistry,
    descriptor: ClassDescriptor,
    bases: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T: TypeUuid> ClassBuilder<'r, T> {
    pub(crate) fn new(registry: &'r mut TypeRegistry, descriptor: ClassDescriptor) -> Self {
        Self {
            registry,
            descriptor,
            bases: 0,
            _marker: PhantomData,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.descriptor.version = version;
        self
    }

    /// Embed a base class. Stored as `BaseClass1`, `BaseClass2`, ...
    pub fn base<B: TypeUuid>(mut self, get: fn(&T) -> &B, get_mut: fn(&mut T) -> &mut B) -> Self {
        let name = format!("BaseClass{}", self.bases + 1);
        let mut field = FieldDescriptor::value(&name, get, get_mut);
        field.flags |= FieldFlags::BASE_CLASS;
        self.descriptor.fields.insert(self.bases, field);
        self.bases += 1;
        self
    }

    pub fn field<F: TypeUuid>(
        mut self,
        name: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.descriptor
            .fields
            .push(FieldDescriptor::value(name, get, get_mut));
        self
    }

    /// Like [`field`](Self::field), but text formats keep the value inline
    /// as an attribute.
    pub fn attribute<F: TypeUuid>(
        mut self,
        name: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        let mut field = FieldDescriptor::value(name, get, get_mut);
        field.flags |= FieldFlags::ATTRIBUTE;
        self.descriptor.fields.push(field);
        self
    }

    /// Optional owned object of exactly type `F`.
    pub fn boxed<F: TypeUuid>(
        mut self,
        name: &str,
        get: fn(&T) -> &Option<Box<F>>,
        get_mut: fn(&mut T) -> &mut Option<Box<F>>,
    ) -> Self {
        self.descriptor.fields.push(FieldDescriptor {
            name: name.to_owned(),
            type_uuid: F::type_uuid(),
            flags: FieldFlags::POINTER,
            access: FieldAccess::Pointer {
                get: value_getter(move |obj| {
                    obj.downcast_ref::<T>()
                        .and_then(|t| get(t).as_deref())
                        .map(|f| f as &dyn Reflect)
                }),
                set: pointer_setter(move |obj, value| {
                    let Some(target) = obj.downcast_mut::<T>() else {
                        return false;
                    };
                    match value.into_any().downcast::<F>() {
                        Ok(value) => {
                            *get_mut(target) = Some(value);
                            true
                        }
                        Err(_) => false,
                    }
                }),
            },
        });
        self
    }

    /// Optional owned object of any type derived from `declared`.
    ///
    /// ```ignore
    /// .pointer("shape", Shape::type_uuid(), |s| s.shape.as_deref(), |s, v| {
    ///     s.shape = Some(v);
    ///     true
    /// })
    /// ```
    pub fn pointer(
        mut self,
        name: &str,
        declared: Uuid,
        get: fn(&T) -> Option<&dyn Reflect>,
        set: fn(&mut T, Box<dyn Reflect>) -> bool,
    ) -> Self {
        self.descriptor.fields.push(FieldDescriptor {
            name: name.to_owned(),
            type_uuid: declared,
            flags: FieldFlags::POINTER,
            access: FieldAccess::Pointer {
                get: value_getter(move |obj| obj.downcast_ref::<T>().and_then(get)),
                set: pointer_setter(move |obj, value| {
                    obj.downcast_mut::<T>().is_some_and(|t| set(t, value))
                }),
            },
        });
        self
    }

    pub fn converter(mut self, converter: VersionConverter) -> Self {
        self.descriptor.converter = Some(converter);
        self
    }

    /// Abstract classes can only be loaded in place or through a derived
    /// class.
    pub fn no_factory(mut self) -> Self {
        self.descriptor.factory = None;
        self
    }

    pub fn register(self) -> Arc<ClassDescriptor> {
        let mut descriptor = self.descriptor;
        for field in &mut descriptor.fields {
            if self
                .registry
                .generic_info(&field.type_uuid)
                .is_some()
            {
                field.flags |= FieldFlags::DYNAMIC_ARRAY;
            }
        }
        self.registry.insert(descriptor)
    }
}
