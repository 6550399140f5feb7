//! Leaf value encodings.
//!
//! Binary streams store primitives as little-endian bytes; text streams
//! store their canonical text form. Floats use Rust's shortest
//! round-trip formatting, raw buffers use standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use uuid::Uuid;

use super::reflect::{Reflect, TypeUuid};

/// A value stored as a single leaf node.
pub trait PrimitiveValue: TypeUuid + Default + Sized {
    /// Name written next to the type id in text formats.
    const NAME: &'static str;

    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Option<Self>;
    fn to_text(&self) -> String;
    fn from_text(text: &str) -> Option<Self>;
}

/// Type-erased encoders for one primitive class.
#[derive(Clone, Copy)]
pub struct PrimitiveCodec {
    pub to_bytes: fn(&dyn Reflect) -> Option<Vec<u8>>,
    pub from_bytes: fn(&[u8], &mut dyn Reflect) -> bool,
    pub to_text: fn(&dyn Reflect) -> Option<String>,
    pub from_text: fn(&str, &mut dyn Reflect) -> bool,
}

impl PrimitiveCodec {
    pub fn of<T: PrimitiveValue>() -> Self {
        Self {
            to_bytes: |obj| obj.downcast_ref::<T>().map(T::to_bytes),
            from_bytes: |bytes, obj| assign::<T>(obj, T::from_bytes(bytes)),
            to_text: |obj| obj.downcast_ref::<T>().map(T::to_text),
            from_text: |text, obj| assign::<T>(obj, T::from_text(text)),
        }
    }
}

impl std::fmt::Debug for PrimitiveCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrimitiveCodec")
    }
}

fn assign<T: PrimitiveValue>(obj: &mut dyn Reflect, value: Option<T>) -> bool {
    match (obj.downcast_mut::<T>(), value) {
        (Some(slot), Some(value)) => {
            *slot = value;
            true
        }
        _ => false,
    }
}

impl PrimitiveValue for bool {
    const NAME: &'static str = "bool";

    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

macro_rules! numeric_primitive {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl PrimitiveValue for $ty {
                const NAME: &'static str = $name;

                fn to_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn from_bytes(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_le_bytes)
                }

                fn to_text(&self) -> String {
                    self.to_string()
                }

                fn from_text(text: &str) -> Option<Self> {
                    text.trim().parse().ok()
                }
            }
        )*
    };
}

numeric_primitive! {
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
}

impl PrimitiveValue for String {
    const NAME: &'static str = "String";

    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn to_text(&self) -> String {
        self.clone()
    }

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_owned())
    }
}

impl PrimitiveValue for Uuid {
    const NAME: &'static str = "Uuid";

    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok()
    }

    fn to_text(&self) -> String {
        self.braced().to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        parse_braced_uuid(text)
    }
}

/// Raw byte buffers are leaves, not containers of `u8` elements.
impl PrimitiveValue for Vec<u8> {
    const NAME: &'static str = "Vec<u8>";

    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(bytes.to_vec())
    }

    fn to_text(&self) -> String {
        STANDARD.encode(self)
    }

    fn from_text(text: &str) -> Option<Self> {
        STANDARD.decode(text.trim()).ok()
    }
}

/// Parse a uuid in `{...}` or bare form.
pub(crate) fn parse_braced_uuid(text: &str) -> Option<Uuid> {
    let text = text.trim();
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text);
    Uuid::parse_str(inner).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x0102_0304i32.to_bytes(), vec![4, 3, 2, 1]);
        assert_eq!(i32::from_bytes(&[4, 3, 2, 1]), Some(0x0102_0304));
        assert_eq!(i32::from_bytes(&[1, 2]), None);
    }

    #[test]
    fn float_text_is_shortest_round_trip() {
        assert_eq!(0.1f32.to_text(), "0.1");
        assert_eq!(f32::from_text("0.1"), Some(0.1));
        assert_eq!(1.0e-7f64.to_text(), "0.0000001");
        assert_eq!(f64::from_text(" 2.5 "), Some(2.5));
    }

    #[test]
    fn bool_rejects_garbage() {
        assert_eq!(bool::from_bytes(&[2]), None);
        assert_eq!(bool::from_text("yes"), None);
        assert_eq!(bool::from_text("true"), Some(true));
    }

    #[test]
    fn strings_keep_whitespace() {
        assert_eq!(String::from_text("  padded  ").as_deref(), Some("  padded  "));
        assert_eq!(String::from_bytes(&[0xff]), None);
    }

    #[test]
    fn uuid_text_is_braced() {
        let id = Uuid::from_u128(0xabcd);
        let text = id.to_text();
        assert!(text.starts_with('{') && text.ends_with('}'));
        assert_eq!(Uuid::from_text(&text), Some(id));
        assert_eq!(parse_braced_uuid(&id.to_string()), Some(id));
    }

    #[test]
    fn raw_buffer_uses_base64() {
        let buffer = vec![0u8, 1, 2, 250];
        assert_eq!(buffer.to_text(), "AAEC+g==");
        assert_eq!(Vec::<u8>::from_text("AAEC+g=="), Some(buffer));
    }

    #[test]
    fn erased_codec_writes_through_dyn() {
        let codec = PrimitiveCodec::of::<u16>();
        let mut value: Box<dyn Reflect> = Box::new(0u16);
        assert!((codec.from_text)("513", value.as_mut()));
        assert_eq!((codec.to_bytes)(value.as_ref()), Some(vec![1, 2]));
        assert!(!(codec.from_text)("-1", value.as_mut()));
        assert!(!(codec.from_bytes)(&[1, 2], &mut 0u32));
    }
}
