use std::fmt::Debug;
use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{NamespaceId, Result, SombraError};

/// Per-namespace block size and id ceiling.
pub trait IdBlockSizer: Send + Sync + Debug {
    /// Number of ids handed out per block; positive.
    fn block_size(&self, namespace: NamespaceId) -> u64;

    /// Exclusive ceiling on raw ids before tag encoding; positive.
    fn id_upper_bound(&self, namespace: NamespaceId) -> u64;
}

/// Same limits for every namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBlockSizer {
    /// Ids per block.
    pub block_size: u64,
    /// Exclusive id ceiling.
    pub upper_bound: u64,
}

impl FixedBlockSizer {
    /// Validates and builds a sizer.
    pub fn new(block_size: u64, upper_bound: u64) -> Result<Self> {
        let sizer = Self {
            block_size,
            upper_bound,
        };
        sizer.validate()?;
        Ok(sizer)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(SombraError::invalid("block_size must be positive"));
        }
        if self.upper_bound == 0 {
            return Err(SombraError::invalid("upper_bound must be positive"));
        }
        Ok(())
    }
}

impl IdBlockSizer for FixedBlockSizer {
    fn block_size(&self, _namespace: NamespaceId) -> u64 {
        self.block_size
    }

    fn id_upper_bound(&self, _namespace: NamespaceId) -> u64 {
        self.upper_bound
    }
}

/// Override entry of a `[sizer]` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceLimits {
    /// Namespace the override applies to.
    pub id: u32,
    /// Ids per block.
    pub block_size: u64,
    /// Exclusive id ceiling.
    pub upper_bound: u64,
}

/// Shape of the `[sizer]` TOML table.
///
/// ```toml
/// [sizer]
/// block_size = 10000
/// upper_bound = 1073741824
///
/// [[sizer.namespace]]
/// id = 2
/// block_size = 50
/// upper_bound = 65536
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Default ids per block.
    pub block_size: u64,
    /// Default exclusive ceiling.
    pub upper_bound: u64,
    /// Per-namespace overrides.
    #[serde(default, rename = "namespace")]
    pub namespaces: Vec<NamespaceLimits>,
}

#[derive(Deserialize, Default)]
struct SizerFile {
    sizer: Option<SizerConfig>,
}

impl SizerConfig {
    /// Extracts the `[sizer]` table of a TOML document; `None` when absent.
    pub fn from_toml_str(raw: &str) -> Result<Option<Self>> {
        let file: SizerFile = toml::from_str(raw)?;
        Ok(file.sizer)
    }
}

/// Default limits with per-namespace overrides.
#[derive(Clone, Debug)]
pub struct NamespaceBlockSizer {
    default: FixedBlockSizer,
    overrides: FxHashMap<u32, FixedBlockSizer>,
}

impl NamespaceBlockSizer {
    /// Sizer applying `default` to every namespace without an override.
    pub fn new(default: FixedBlockSizer) -> Self {
        Self {
            default,
            overrides: FxHashMap::default(),
        }
    }

    /// Adds or replaces the limits of `namespace`.
    pub fn with_namespace(mut self, namespace: NamespaceId, limits: FixedBlockSizer) -> Self {
        self.overrides.insert(namespace.0, limits);
        self
    }

    /// Builds and validates a sizer from its TOML table.
    pub fn from_config(config: &SizerConfig) -> Result<Self> {
        let mut sizer = Self::new(FixedBlockSizer::new(config.block_size, config.upper_bound)?);
        for ns in &config.namespaces {
            let limits = FixedBlockSizer::new(ns.block_size, ns.upper_bound).map_err(|err| {
                SombraError::invalid(format!("sizer namespace {}: {err}", ns.id))
            })?;
            if sizer.overrides.insert(ns.id, limits).is_some() {
                return Err(SombraError::invalid(format!(
                    "sizer namespace {} configured twice",
                    ns.id
                )));
            }
        }
        Ok(sizer)
    }

    /// Reads the `[sizer]` table of a TOML document; `None` when absent.
    pub fn from_toml_str(raw: &str) -> Result<Option<Self>> {
        SizerConfig::from_toml_str(raw)?
            .as_ref()
            .map(Self::from_config)
            .transpose()
    }

    /// Reads the `[sizer]` table of a TOML file.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    fn limits(&self, namespace: NamespaceId) -> &FixedBlockSizer {
        self.overrides.get(&namespace.0).unwrap_or(&self.default)
    }
}

impl IdBlockSizer for NamespaceBlockSizer {
    fn block_size(&self, namespace: NamespaceId) -> u64 {
        self.limits(namespace).block_size
    }

    fn id_upper_bound(&self, namespace: NamespaceId) -> u64 {
        self.limits(namespace).upper_bound
    }
}
