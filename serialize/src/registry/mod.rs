//! Type registry: maps type identities to reflection metadata.
//!
//! The registry is configured once, then shared read-only (`&TypeRegistry`
//! or `Arc<TypeRegistry>`) by every writer, reader and job.

mod class;
mod container;
mod primitive;
mod reflect;

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use uuid::Uuid;

pub use class::{
    ClassBuilder, ClassDescriptor, ClassKind, Factory, FieldAccess, FieldDescriptor, FieldFlags,
    PointerSetter, ValueGetter, ValueGetterMut, VersionConverter,
};
pub use container::{ContainerHandler, VecHandler};
pub use primitive::{PrimitiveCodec, PrimitiveValue};
pub(crate) use primitive::parse_braced_uuid;
pub use reflect::{Reflect, TypeUuid};

use crate::asset::AssetRef;

bitflags! {
    /// Options for [`TypeRegistry::find_class_descriptor`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LookupFlags: u32 {
        /// Also resolve generic (container) classes without a parent.
        const ALLOW_GENERIC = 1 << 0;
    }
}

/// Registry of serializable classes.
#[derive(Default)]
pub struct TypeRegistry {
    classes: HashMap<Uuid, Arc<ClassDescriptor>>,
    generics: HashMap<Uuid, Arc<ClassDescriptor>>,
    names: HashMap<String, Uuid>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in primitive and [`AssetRef`]
    /// registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_primitive::<bool>()
            .register_primitive::<i8>()
            .register_primitive::<i16>()
            .register_primitive::<i32>()
            .register_primitive::<i64>()
            .register_primitive::<u8>()
            .register_primitive::<u16>()
            .register_primitive::<u32>()
            .register_primitive::<u64>()
            .register_primitive::<f32>()
            .register_primitive::<f64>()
            .register_primitive::<String>()
            .register_primitive::<Uuid>()
            .register_primitive::<Vec<u8>>();
        registry.insert(
            ClassDescriptor::new(AssetRef::type_uuid(), "Asset", ClassKind::AssetRef)
                .with_factory(|| Box::new(AssetRef::default())),
        );
        registry
    }

    /// Register a leaf value type.
    pub fn register_primitive<T: PrimitiveValue>(&mut self) -> &mut Self {
        self.insert(
            ClassDescriptor::new(
                T::type_uuid(),
                T::NAME,
                ClassKind::Primitive(PrimitiveCodec::of::<T>()),
            )
            .with_factory(|| Box::new(T::default())),
        );
        self
    }

    /// Register `Vec<T>` as a generic container class.
    pub fn register_vec<T: TypeUuid>(&mut self) -> &mut Self {
        let name = match self.find_class_descriptor(&T::type_uuid(), None, LookupFlags::ALLOW_GENERIC)
        {
            Some(element) => format!("Vec<{}>", element.name()),
            None => format!("Vec<{}>", T::type_uuid()),
        };
        self.insert(
            ClassDescriptor::new(
                Vec::<T>::type_uuid(),
                name,
                ClassKind::Container(Arc::new(VecHandler::<T>::new())),
            )
            .with_factory(|| Box::new(Vec::<T>::new())),
        );
        self
    }

    /// Start registering a struct class with a `Default` factory.
    pub fn class<T: TypeUuid + Default>(&mut self, name: &str) -> ClassBuilder<'_, T> {
        let descriptor = ClassDescriptor::new(T::type_uuid(), name, ClassKind::Struct)
            .with_factory(|| Box::new(T::default()));
        ClassBuilder::new(self, descriptor)
    }

    /// Start registering a struct class that cannot be default-constructed.
    pub fn abstract_class<T: TypeUuid>(&mut self, name: &str) -> ClassBuilder<'_, T> {
        let descriptor = ClassDescriptor::new(T::type_uuid(), name, ClassKind::Struct);
        ClassBuilder::new(self, descriptor)
    }

    /// Insert a finished descriptor, replacing any earlier registration of
    /// the same identity.
    pub fn insert(&mut self, descriptor: ClassDescriptor) -> Arc<ClassDescriptor> {
        let uuid = descriptor.uuid();
        let descriptor = Arc::new(descriptor);
        let map = if descriptor.kind().is_generic() {
            &mut self.generics
        } else {
            &mut self.classes
        };
        if let Some(previous) = map.insert(uuid, Arc::clone(&descriptor)) {
            log::warn!(
                "Class '{}' ({uuid}) registered twice, replacing previous registration",
                previous.name()
            );
        }
        self.names.insert(descriptor.name().to_owned(), uuid);
        descriptor
    }

    /// Resolve a type identity.
    ///
    /// Concrete classes always resolve. Generic classes only resolve in the
    /// context of a parent class (as a field or element type) or when
    /// [`LookupFlags::ALLOW_GENERIC`] is set, so a container can never be
    /// mistaken for a root object.
    pub fn find_class_descriptor(
        &self,
        uuid: &Uuid,
        parent: Option<&ClassDescriptor>,
        flags: LookupFlags,
    ) -> Option<&Arc<ClassDescriptor>> {
        self.classes.get(uuid).or_else(|| {
            if parent.is_some() || flags.contains(LookupFlags::ALLOW_GENERIC) {
                self.generics.get(uuid)
            } else {
                None
            }
        })
    }

    /// Metadata for a generic (container) class.
    pub fn generic_info(&self, uuid: &Uuid) -> Option<&Arc<ClassDescriptor>> {
        self.generics.get(uuid)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Arc<ClassDescriptor>> {
        let uuid = self.names.get(name)?;
        self.find_class_descriptor(uuid, None, LookupFlags::ALLOW_GENERIC)
    }

    /// Whether `derived` is `base` or embeds it, directly or transitively,
    /// as a base class.
    pub fn is_derived_from(&self, derived: &Uuid, base: &Uuid) -> bool {
        if derived == base {
            return true;
        }
        let Some(descriptor) = self.find_class_descriptor(derived, None, LookupFlags::ALLOW_GENERIC)
        else {
            return false;
        };
        descriptor
            .fields()
            .iter()
            .filter(|f| f.is_base_class())
            .any(|f| self.is_derived_from(&f.type_uuid(), base))
    }

    /// Create a default instance of a registered class.
    pub fn create(&self, uuid: &Uuid) -> Option<Box<dyn Reflect>> {
        self.find_class_descriptor(uuid, None, LookupFlags::ALLOW_GENERIC)?
            .create()
    }

    pub fn len(&self) -> usize {
        self.classes.len() + self.generics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Shape {
        sides: u32,
    }

    #[derive(Default)]
    struct Square {
        shape: Shape,
        size: f32,
    }

    impl TypeUuid for Shape {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0x1000)
        }
    }

    impl TypeUuid for Square {
        fn type_uuid() -> Uuid {
            Uuid::from_u128(0x1001)
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        registry.register_vec::<String>();
        registry
            .abstract_class::<Shape>("Shape")
            .field("sides", |s| &s.sides, |s| &mut s.sides)
            .register();
        registry
            .class::<Square>("Square")
            .field("size", |s| &s.size, |s| &mut s.size)
            .base(|s| &s.shape, |s| &mut s.shape)
            .register();
        registry
    }

    #[test]
    fn bases_come_before_members() {
        let registry = registry();
        let square = registry.find_by_name("Square").unwrap();
        let names: Vec<_> = square.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["BaseClass1", "size"]);
        assert!(square.fields()[0].is_base_class());
    }

    #[test]
    fn derivation_walks_base_fields() {
        let registry = registry();
        assert!(registry.is_derived_from(&Square::type_uuid(), &Shape::type_uuid()));
        assert!(!registry.is_derived_from(&Shape::type_uuid(), &Square::type_uuid()));
        assert!(registry.is_derived_from(&i32::type_uuid(), &i32::type_uuid()));
    }

    #[test]
    fn generics_need_a_parent_or_flag() {
        let registry = registry();
        let uuid = Vec::<String>::type_uuid();
        let parent = registry.find_by_name("Square").unwrap();

        assert!(registry
            .find_class_descriptor(&uuid, None, LookupFlags::empty())
            .is_none());
        assert!(registry
            .find_class_descriptor(&uuid, Some(parent), LookupFlags::empty())
            .is_some());
        assert!(registry
            .find_class_descriptor(&uuid, None, LookupFlags::ALLOW_GENERIC)
            .is_some());
        assert_eq!(registry.generic_info(&uuid).unwrap().name(), "Vec<String>");
    }

    #[test]
    fn create_uses_factory() {
        let registry = registry();
        let square = registry.create(&Square::type_uuid()).unwrap();
        assert!(square.is::<Square>());
        assert!(registry.create(&Shape::type_uuid()).is_none());
        assert_eq!(registry.create(&i32::type_uuid()).unwrap().downcast_ref::<i32>(), Some(&0));
    }

    #[test]
    fn container_fields_are_flagged() {
        #[derive(Default)]
        struct Tagged {
            tags: Vec<String>,
        }
        impl TypeUuid for Tagged {
            fn type_uuid() -> Uuid {
                Uuid::from_u128(0x1002)
            }
        }

        let mut registry = registry();
        let tagged = registry
            .class::<Tagged>("Tagged")
            .field("tags", |t| &t.tags, |t| &mut t.tags)
            .register();
        assert!(tagged.fields()[0]
            .flags()
            .contains(FieldFlags::DYNAMIC_ARRAY));
    }
}
