//! Error types for object stream encoding, serialization and loading.

use redlilium_stream::StreamError;
use thiserror::Error;
use uuid::Uuid;

use crate::codec::StreamFormat;

/// Fatal errors raised by a format codec.
///
/// A codec error aborts the whole operation: for reads, no root is
/// delivered; for writes, the stream is left incomplete.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stream is empty")]
    Empty,
    #[error("Unrecognized object stream header")]
    BadHeader,
    #[error("Unsupported object stream version {found} (runtime supports 1..={supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("Truncated {format:?} stream: {message}")]
    Truncated {
        format: StreamFormat,
        message: String,
    },
    #[error("Malformed {format:?} stream: {message}")]
    Malformed {
        format: StreamFormat,
        message: String,
    },
}

impl CodecError {
    pub(crate) fn malformed(format: StreamFormat, message: impl ToString) -> Self {
        Self::Malformed {
            format,
            message: message.to_string(),
        }
    }

    pub(crate) fn truncated(format: StreamFormat, message: impl ToString) -> Self {
        Self::Truncated {
            format,
            message: message.to_string(),
        }
    }
}

/// Errors raised while turning a live object into stream nodes.
///
/// Outside strict mode these are recoverable: the offending subtree is
/// skipped and the rest of the root is still written.
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("Type {0} is not registered with the serializer")]
    UnregisteredType(Uuid),
    #[error("Generic type '{name}' ({uuid}) cannot be written as a root object")]
    GenericRoot { name: String, uuid: Uuid },
    #[error("Type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: Uuid,
        found: Uuid,
    },
    #[error("Field '{field}' could not be read from an instance of '{class}'")]
    FieldAccess { class: String, field: String },
    #[error("Value of primitive '{class}' could not be encoded")]
    PrimitiveEncode { class: String },
    #[error("Pointer cycle detected through '{class}'")]
    CyclicReference { class: String },
    #[error("Object graph is deeper than {0} levels")]
    DepthExceeded(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Recoverable per-object errors raised while loading.
///
/// The loader logs each one, counts it, and keeps going with the next
/// field or root.
#[derive(Error, Debug)]
pub enum DeserializeError {
    #[error("Unknown class {uuid} ('{name}')")]
    UnknownClass { uuid: Uuid, name: String },
    #[error("Class '{class}' has no factory and no in-place target was provided")]
    MissingFactory { class: String },
    #[error("Unknown field '{field}' in class '{class}'")]
    UnknownField { class: String, field: String },
    #[error("Element of class '{class}' has no field name")]
    UnnamedChild { class: String },
    #[error("Type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: Uuid,
        found: Uuid,
    },
    #[error("Class '{class}' stored at version {stored} has no converter to version {current}")]
    MissingConverter {
        class: String,
        stored: u32,
        current: u32,
    },
    #[error("Converter for class '{class}' rejected data stored at version {stored}")]
    ConverterFailed { class: String, stored: u32 },
    #[error("Class '{class}' stored at version {stored} is newer than runtime version {current}")]
    NewerVersion {
        class: String,
        stored: u32,
        current: u32,
    },
    #[error("Could not decode '{class}' value for '{field}'")]
    PrimitiveDecode { class: String, field: String },
    #[error("Field '{field}' could not be assigned on an instance of '{class}'")]
    FieldAccess { class: String, field: String },
    #[error("Container '{class}' rejected an element of type {element}")]
    ContainerPush { class: String, element: Uuid },
    #[error("Asset reference '{field}' is malformed")]
    AssetDecode { field: String },
    #[error("Object graph is deeper than {0} levels")]
    DepthExceeded(usize),
}

/// Errors raised while loading an [`ObjectStreamConfig`](crate::ObjectStreamConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse object stream config: {0}")]
    Parse(#[from] toml::de::Error),
}
