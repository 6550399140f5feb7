//! Runtime type identity for serializable values.

use std::any::Any;

use uuid::Uuid;

/// Namespace used to derive identities of generic containers from their
/// element identity.
const VEC_NAMESPACE: Uuid = Uuid::from_u128(0x5d7e_2f0c_91a4_4c3b_8e6f_1a2b_3c4d_5e6f);

/// A type with a stable, process-independent identity.
///
/// The identity is what goes into a stream, so it must never change once
/// data has been written with it.
///
/// ```
/// use redlilium_serialize::TypeUuid;
/// use uuid::Uuid;
///
/// struct Health(f32);
///
/// impl TypeUuid for Health {
///     fn type_uuid() -> Uuid {
///         Uuid::from_u128(0x61c1_90d4_3f4e_4a8e_9b1d_0c7e_52aa_1001)
///     }
/// }
///
/// assert_eq!(Health::type_uuid(), Health::type_uuid());
/// ```
pub trait TypeUuid: Send + Sync + 'static {
    fn type_uuid() -> Uuid;
}

/// Object-safe view of a [`TypeUuid`] value.
///
/// Every `TypeUuid` type implements this automatically; the serializer only
/// ever sees objects through `&dyn Reflect`.
pub trait Reflect: Any + Send + Sync + 'static {
    /// Identity of the concrete (most-derived) runtime type.
    fn class_uuid(&self) -> Uuid;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: TypeUuid> Reflect for T {
    fn class_uuid(&self) -> Uuid {
        T::type_uuid()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn Reflect {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Address of the object, used to detect pointer cycles.
    pub(crate) fn address(&self) -> usize {
        self as *const dyn Reflect as *const () as usize
    }
}

macro_rules! builtin_uuid {
    ($($ty:ty => $id:expr),* $(,)?) => {
        $(
            impl TypeUuid for $ty {
                fn type_uuid() -> Uuid {
                    Uuid::from_u128($id)
                }
            }
        )*
    };
}

builtin_uuid! {
    bool => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0001,
    i8 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0002,
    i16 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0003,
    i32 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0004,
    i64 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0005,
    u8 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0006,
    u16 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0007,
    u32 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0008,
    u64 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_0009,
    f32 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_000a,
    f64 => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_000b,
    String => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_000c,
    Uuid => 0x43bd_0c72_2e4f_4b6e_a6f4_0000_0000_000d,
}

/// `Vec<T>` derives its identity from the element identity, so every
/// instantiation gets a distinct but stable id.
impl<T: TypeUuid> TypeUuid for Vec<T> {
    fn type_uuid() -> Uuid {
        Uuid::new_v5(&VEC_NAMESPACE, T::type_uuid().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_identity_depends_on_element() {
        assert_ne!(Vec::<i32>::type_uuid(), Vec::<u32>::type_uuid());
        assert_eq!(Vec::<i32>::type_uuid(), Vec::<i32>::type_uuid());
        assert_ne!(Vec::<i32>::type_uuid(), i32::type_uuid());
    }

    #[test]
    fn downcast_through_dyn() {
        let mut value: Box<dyn Reflect> = Box::new(7i32);
        assert_eq!(value.class_uuid(), i32::type_uuid());
        assert!(value.is::<i32>());
        assert!(value.downcast_ref::<u32>().is_none());
        *value.downcast_mut::<i32>().unwrap() = 9;
        assert_eq!(value.downcast_ref::<i32>(), Some(&9));
    }

    #[test]
    fn into_any_recovers_concrete_box() {
        let value: Box<dyn Reflect> = Box::new(String::from("x"));
        let back = value.into_any().downcast::<String>().unwrap();
        assert_eq!(*back, "x");
    }
}
