//! Load policies: error severity flags and asset reference filters.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use uuid::Uuid;

use crate::asset::{AssetLoadBehavior, AssetLoader, AssetRef, SLICE_ASSET_TYPE};

bitflags! {
    /// Error policy flags for a load.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FilterFlags: u32 {
        /// Any recoverable error makes the whole load report failure.
        const STRICT = 1 << 0;
        /// Unknown classes are skipped silently and never count as errors,
        /// even together with `STRICT`.
        const IGNORE_UNKNOWN_CLASSES = 1 << 1;
    }
}

/// Decides whether an asset reference found during a load is kept.
///
/// Rejected references are left unset on the loaded object. Rejection is a
/// policy decision, not an error.
pub trait AssetFilter: Send + Sync {
    fn accept(&self, asset: &AssetRef) -> bool;
}

impl<F> AssetFilter for F
where
    F: Fn(&AssetRef) -> bool + Send + Sync,
{
    fn accept(&self, asset: &AssetRef) -> bool {
        self(asset)
    }
}

/// Honors the reference's own load behavior: everything except
/// [`AssetLoadBehavior::NoLoad`] is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAssetFilter;

impl AssetFilter for DefaultAssetFilter {
    fn accept(&self, asset: &AssetRef) -> bool {
        asset.load_behavior != AssetLoadBehavior::NoLoad
    }
}

/// Accepts slice assets only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlicesOnly;

impl AssetFilter for SlicesOnly {
    fn accept(&self, asset: &AssetRef) -> bool {
        asset.asset_type == SLICE_ASSET_TYPE && DefaultAssetFilter.accept(asset)
    }
}

/// Accepts assets whose type is in an allow-list.
///
/// Types are checked in order and the first match wins.
#[derive(Debug, Clone, Default)]
pub struct TypesOnly {
    types: Vec<Uuid>,
}

impl TypesOnly {
    pub fn new(types: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    pub fn or(mut self, asset_type: Uuid) -> Self {
        self.types.push(asset_type);
        self
    }

    pub fn types(&self) -> &[Uuid] {
        &self.types
    }
}

impl AssetFilter for TypesOnly {
    fn accept(&self, asset: &AssetRef) -> bool {
        self.types.iter().any(|t| *t == asset.asset_type) && DefaultAssetFilter.accept(asset)
    }
}

/// Rejects every asset reference. Structural data still loads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssetLoading;

impl AssetFilter for NoAssetLoading {
    fn accept(&self, _asset: &AssetRef) -> bool {
        false
    }
}

/// Flags, asset filter and optional asset loader for one load.
///
/// Immutable once built; the builder methods consume `self`.
///
/// ```
/// use redlilium_serialize::{FilterDescriptor, FilterFlags, NoAssetLoading};
///
/// let filter = FilterDescriptor::new(NoAssetLoading, FilterFlags::STRICT);
/// assert!(filter.is_strict());
/// assert!(!filter.ignores_unknown_classes());
/// ```
#[derive(Clone)]
pub struct FilterDescriptor {
    flags: FilterFlags,
    filter: Arc<dyn AssetFilter>,
    loader: Option<Arc<dyn AssetLoader>>,
}

impl FilterDescriptor {
    pub fn new(filter: impl AssetFilter + 'static, flags: FilterFlags) -> Self {
        Self {
            flags,
            filter: Arc::new(filter),
            loader: None,
        }
    }

    /// Default asset policy with the given flags.
    pub fn from_flags(flags: FilterFlags) -> Self {
        Self::new(DefaultAssetFilter, flags)
    }

    pub fn with_flags(mut self, flags: FilterFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_asset_loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn flags(&self) -> FilterFlags {
        self.flags
    }

    pub fn is_strict(&self) -> bool {
        self.flags.contains(FilterFlags::STRICT)
    }

    pub fn ignores_unknown_classes(&self) -> bool {
        self.flags.contains(FilterFlags::IGNORE_UNKNOWN_CLASSES)
    }

    pub fn accepts(&self, asset: &AssetRef) -> bool {
        self.filter.accept(asset)
    }

    pub fn loader(&self) -> Option<&dyn AssetLoader> {
        self.loader.as_deref()
    }
}

impl Default for FilterDescriptor {
    fn default() -> Self {
        Self::from_flags(FilterFlags::empty())
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("flags", &self.flags)
            .field("has_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTURE: Uuid = Uuid::from_u128(0x7e);
    const MESH: Uuid = Uuid::from_u128(0x3e);

    fn asset(asset_type: Uuid, behavior: AssetLoadBehavior) -> AssetRef {
        AssetRef::new(Uuid::from_u128(1), asset_type).with_load_behavior(behavior)
    }

    #[test]
    fn default_rejects_no_load() {
        assert!(DefaultAssetFilter.accept(&asset(TEXTURE, AssetLoadBehavior::PreLoad)));
        assert!(DefaultAssetFilter.accept(&asset(TEXTURE, AssetLoadBehavior::QueueLoad)));
        assert!(!DefaultAssetFilter.accept(&asset(TEXTURE, AssetLoadBehavior::NoLoad)));
    }

    #[test]
    fn slices_only() {
        assert!(SlicesOnly.accept(&asset(SLICE_ASSET_TYPE, AssetLoadBehavior::PreLoad)));
        assert!(!SlicesOnly.accept(&asset(SLICE_ASSET_TYPE, AssetLoadBehavior::NoLoad)));
        assert!(!SlicesOnly.accept(&asset(TEXTURE, AssetLoadBehavior::PreLoad)));
    }

    #[test]
    fn types_only_is_an_ordered_or() {
        let filter = TypesOnly::new([TEXTURE]).or(MESH);
        assert_eq!(filter.types(), &[TEXTURE, MESH]);
        assert!(filter.accept(&asset(MESH, AssetLoadBehavior::PreLoad)));
        assert!(!filter.accept(&asset(SLICE_ASSET_TYPE, AssetLoadBehavior::PreLoad)));
        assert!(!filter.accept(&asset(TEXTURE, AssetLoadBehavior::NoLoad)));
        assert!(!TypesOnly::default().accept(&asset(TEXTURE, AssetLoadBehavior::PreLoad)));
    }

    #[test]
    fn no_asset_loading_rejects_all() {
        assert!(!NoAssetLoading.accept(&asset(SLICE_ASSET_TYPE, AssetLoadBehavior::PreLoad)));
    }

    #[test]
    fn closures_are_filters() {
        let filter = FilterDescriptor::new(|a: &AssetRef| a.hint.ends_with(".png"), FilterFlags::empty());
        assert!(filter.accepts(&asset(TEXTURE, AssetLoadBehavior::NoLoad).with_hint("a.png")));
        assert!(!filter.accepts(&asset(TEXTURE, AssetLoadBehavior::PreLoad)));
    }

    #[test]
    fn default_descriptor() {
        let filter = FilterDescriptor::default();
        assert_eq!(filter.flags(), FilterFlags::empty());
        assert!(filter.loader().is_none());
        let both = filter.with_flags(FilterFlags::STRICT | FilterFlags::IGNORE_UNKNOWN_CLASSES);
        assert!(both.is_strict() && both.ignores_unknown_classes());
    }
}
