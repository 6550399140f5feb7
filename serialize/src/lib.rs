//! Reflection-driven object streams for the RedLilium engine.
//!
//! Objects are described once in a [`TypeRegistry`] (fields, factories,
//! versions, converters) and can then be written to and read from a
//! [`ByteStream`](redlilium_stream::ByteStream) in one of three formats:
//!
//! - [`StreamFormat::Binary`]: compact tagged nodes, no type names
//! - [`StreamFormat::Xml`]: `<ObjectStream>` with nested `<Class>` elements
//! - [`StreamFormat::Json`]: `{"name":"ObjectStream","Objects":[...]}`
//!
//! # Saving
//!
//! An [`ObjectStreamWriter`] walks each submitted root through the registry
//! (base classes first, then members in registration order) and writes it
//! immediately. Failed subtrees are skipped, or reject the whole root in
//! strict mode.
//!
//! # Loading
//!
//! [`load_blocking`] decodes the stream, recreates each root through its
//! factory (or loads it in place via an [`InplaceRootProvider`]), upgrades
//! old data with version converters, filters asset references through the
//! [`FilterDescriptor`], and hands every finished root to a callback.
//! Per-object errors are logged and only fail the load under
//! [`FilterFlags::STRICT`].
//!
//! # Jobs
//!
//! [`ObjectStreamJob`] wraps either direction with a completion callback
//! and a [`JobHandle`] that can cancel it between roots, on the calling
//! thread or a dedicated one.
//!
//! # Example
//!
//! ```
//! use redlilium_serialize::{load_blocking, FilterDescriptor, ObjectStreamWriter, StreamFormat, TypeRegistry, TypeUuid};
//! use redlilium_stream::MemoryStream;
//! use uuid::Uuid;
//!
//! #[derive(Default, Debug, PartialEq)]
//! struct Player {
//!     name: String,
//!     score: u32,
//! }
//!
//! impl TypeUuid for Player {
//!     fn type_uuid() -> Uuid {
//!         Uuid::from_u128(0x2a7d_5b1e_8c34_4f0a_9e61_d3b8_07c2_41f5)
//!     }
//! }
//!
//! let mut registry = TypeRegistry::with_builtins();
//! registry
//!     .class::<Player>("Player")
//!     .field("name", |p| &p.name, |p| &mut p.name)
//!     .field("score", |p| &p.score, |p| &mut p.score)
//!     .register();
//!
//! let player = Player { name: "ada".into(), score: 7 };
//! let mut stream = MemoryStream::new();
//! let mut writer = ObjectStreamWriter::create(&mut stream, &registry, StreamFormat::Binary);
//! assert!(writer.write_object(&player));
//! assert!(writer.finalize());
//!
//! let mut loaded = None;
//! let mut stream = MemoryStream::read_only(stream.into_inner());
//! let ok = load_blocking(
//!     &mut stream,
//!     &registry,
//!     |root, _, _| loaded = root.downcast::<Player>(),
//!     &FilterDescriptor::default(),
//!     None,
//! );
//! assert!(ok);
//! assert_eq!(loaded.as_deref(), Some(&player));
//! ```

mod asset;
mod cancel;
pub mod codec;
mod config;
mod error;
mod filter;
mod job;
mod node;
mod reader;
pub mod registry;
mod writer;

pub use asset::{AssetLoadBehavior, AssetLoader, AssetRef, SLICE_ASSET_TYPE};
pub use cancel::{CancellationToken, Cancelled};
pub use codec::{FormatCodec, ReadFormat, StreamFormat, OBJECT_STREAM_VERSION};
pub use config::ObjectStreamConfig;
pub use error::{CodecError, ConfigError, DeserializeError, SerializeError};
pub use filter::{
    AssetFilter, DefaultAssetFilter, FilterDescriptor, FilterFlags, NoAssetLoading, SlicesOnly,
    TypesOnly,
};
pub use job::{CompletionCb, JobHandle, ObjectStream, ObjectStreamJob, WriteSession};
pub use node::{Document, NodePayload, StreamNode};
pub use reader::{
    load_blocking, load_blocking_with, InplaceRoot, InplaceRootProvider, LoadOutcome,
    LoadedRoot, ObjectStreamReader,
};
pub use registry::{
    ClassBuilder, ClassDescriptor, ClassKind, ContainerHandler, FieldFlags, LookupFlags,
    PrimitiveValue, Reflect, TypeRegistry, TypeUuid,
};
pub use writer::{ObjectStreamWriter, ELEMENT_FIELD};
