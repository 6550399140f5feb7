use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::StreamFormat;
use crate::error::ConfigError;
use crate::filter::{FilterDescriptor, FilterFlags};

/// Object stream settings, usually loaded from a TOML file.
///
/// Every key is optional:
///
/// ```toml
/// format = "json"          # "binary", "xml" (default) or "json"
/// strict = true
/// ignore_unknown_classes = false
/// max_depth = 256
/// pretty = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStreamConfig {
    /// Format used when saving.
    pub format: StreamFormat,
    /// Writers reject a root when any subtree fails; readers fail a load
    /// that reported any error.
    pub strict: bool,
    pub ignore_unknown_classes: bool,
    /// Deepest object nesting a writer or reader will follow.
    pub max_depth: usize,
    /// Indent text formats.
    pub pretty: bool,
}

impl Default for ObjectStreamConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::Xml,
            strict: false,
            ignore_unknown_classes: false,
            max_depth: 256,
            pretty: true,
        }
    }
}

impl ObjectStreamConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded object stream config from {}", path.display());
        Ok(config)
    }

    /// Load settings, falling back to defaults if the file is missing or
    /// invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{e}, using default object stream config");
                Self::default()
            }
        }
    }

    pub fn filter_flags(&self) -> FilterFlags {
        let mut flags = FilterFlags::empty();
        flags.set(FilterFlags::STRICT, self.strict);
        flags.set(FilterFlags::IGNORE_UNKNOWN_CLASSES, self.ignore_unknown_classes);
        flags
    }

    /// Filter with these flags and the default asset policy.
    pub fn filter_descriptor(&self) -> FilterDescriptor {
        FilterDescriptor::from_flags(self.filter_flags())
    }
}
