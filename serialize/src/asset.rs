//! References to externally stored assets.

use uuid::Uuid;

use crate::registry::TypeUuid;

/// Asset type of slice (prefab) assets.
pub const SLICE_ASSET_TYPE: Uuid = Uuid::from_u128(0xc62c_7a87_9c09_4148_a985_12f2_c99c_0a45);

/// How an asset reference wants to be resolved when its owner loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssetLoadBehavior {
    /// Load before the owning object is handed out.
    #[default]
    PreLoad = 0,
    /// Queue for loading, but don't wait for it.
    QueueLoad = 1,
    /// Never load automatically.
    NoLoad = 2,
}

impl AssetLoadBehavior {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PreLoad),
            1 => Some(Self::QueueLoad),
            2 => Some(Self::NoLoad),
            _ => None,
        }
    }
}

/// A field value pointing at an asset by id.
///
/// An unset reference has a nil id. Loading leaves a reference unset when
/// the active asset filter rejects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRef {
    pub id: Uuid,
    pub asset_type: Uuid,
    /// Human-readable path hint, typically the source file.
    pub hint: String,
    pub load_behavior: AssetLoadBehavior,
}

impl AssetRef {
    pub fn new(id: Uuid, asset_type: Uuid) -> Self {
        Self {
            id,
            asset_type,
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn with_load_behavior(mut self, behavior: AssetLoadBehavior) -> Self {
        self.load_behavior = behavior;
        self
    }

    pub fn is_set(&self) -> bool {
        !self.id.is_nil()
    }
}

impl TypeUuid for AssetRef {
    fn type_uuid() -> Uuid {
        Uuid::from_u128(0x77a1_9d40_79e6_4eb6_b1a4_8a4b_2c2a_0b51)
    }
}

/// Receives accepted asset references during a load.
///
/// Called once per accepted reference, after the reference has been
/// assigned to its field.
pub trait AssetLoader: Send + Sync {
    fn queue_load(&self, asset: &AssetRef);
}

impl<F> AssetLoader for F
where
    F: Fn(&AssetRef) + Send + Sync,
{
    fn queue_load(&self, asset: &AssetRef) {
        self(asset)
    }
}
