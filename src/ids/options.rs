use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::ConsistencyLevel;
use crate::types::{Result, SombraError};

/// How claimants spread over the uniqueness-tag space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAvoidanceMode {
    /// Every claimant uses tag 0.
    #[default]
    None,
    /// Fixed configured tag, claims use data-center local consistency.
    LocalManual,
    /// Fixed configured tag, claims use global consistency.
    GlobalManual,
    /// Random tag per attempt.
    GlobalAuto,
}

impl ConflictAvoidanceMode {
    /// Consistency requested for claim reads and writes.
    pub fn consistency(self) -> ConsistencyLevel {
        match self {
            ConflictAvoidanceMode::LocalManual => ConsistencyLevel::LocalKey,
            _ => ConsistencyLevel::Key,
        }
    }

    /// Name used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictAvoidanceMode::None => "none",
            ConflictAvoidanceMode::LocalManual => "local_manual",
            ConflictAvoidanceMode::GlobalManual => "global_manual",
            ConflictAvoidanceMode::GlobalAuto => "global_auto",
        }
    }
}

impl fmt::Display for ConflictAvoidanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictAvoidanceMode {
    type Err = SombraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(ConflictAvoidanceMode::None),
            "local_manual" => Ok(ConflictAvoidanceMode::LocalManual),
            "global_manual" => Ok(ConflictAvoidanceMode::GlobalManual),
            "global_auto" => Ok(ConflictAvoidanceMode::GlobalAuto),
            other => Err(SombraError::invalid(format!(
                "unknown conflict avoidance mode '{other}'"
            ))),
        }
    }
}

/// Configuration of a [`super::ConsistentKeyIdAuthority`].
///
/// Ids are `(counter << cav_bits) | tag`, so every tag owns the counter range
/// `0..(upper_bound >> cav_bits)`. With the default `cav_bits = 4` a namespace
/// of bound `U` and block size `B` yields `floor((U >> 4) / B)` blocks per tag
/// before [`crate::SombraError::PoolExhausted`]; set `cav_bits(0)` to get the
/// full `floor(U / B)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdAuthorityOptions {
    /// Identity of this authority; unique among live authorities on one store.
    pub unique_instance_id: String,
    /// Time a claim waits before it is verified; the grace period is a tenth of it.
    pub wait: Duration,
    /// Uniqueness-tag policy.
    pub conflict_avoidance: ConflictAvoidanceMode,
    /// Width of the uniqueness tag in bits (0..=16). Each extra bit halves
    /// the counter space of every tag.
    pub cav_bits: u32,
    /// Fixed tag for the manual modes.
    pub cav_tag: Option<u32>,
    /// Distinct exhausted tags tolerated by `global_auto` before giving up.
    pub cav_retries: u32,
    /// Number of partitions; a power of two up to 65536.
    pub max_partitions: u32,
    /// Age after which a tentative claim is stale.
    pub claim_expiry: Duration,
    /// Retry budget for a single store call.
    pub storage_op_budget: Duration,
    /// Perturb backoff waits by +/-50%.
    pub jitter: bool,
    /// Take over an existing registration of `unique_instance_id`.
    pub replace_instance_if_exists: bool,
    /// Table holding claims.
    pub id_store_name: String,
    /// Table holding instance registrations.
    pub registry_store_name: String,
    /// Seed for the tag generator; random when unset.
    pub rng_seed: Option<u64>,
}

impl IdAuthorityOptions {
    /// Defaults for the instance `unique_instance_id`.
    pub fn new(unique_instance_id: impl Into<String>) -> Self {
        Self {
            unique_instance_id: unique_instance_id.into(),
            wait: Duration::from_millis(300),
            conflict_avoidance: ConflictAvoidanceMode::None,
            cav_bits: 4,
            cav_tag: None,
            cav_retries: 20,
            max_partitions: 32,
            claim_expiry: Duration::from_secs(60),
            storage_op_budget: Duration::from_secs(10),
            jitter: true,
            replace_instance_if_exists: false,
            id_store_name: "ids".to_owned(),
            registry_store_name: "system_properties".to_owned(),
            rng_seed: None,
        }
    }

    /// Sets the claim wait time.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the conflict avoidance mode.
    pub fn conflict_avoidance(mut self, mode: ConflictAvoidanceMode) -> Self {
        self.conflict_avoidance = mode;
        self
    }

    /// Sets the uniqueness tag width.
    ///
    /// The per-tag counter bound becomes `upper_bound >> bits`.
    pub fn cav_bits(mut self, bits: u32) -> Self {
        self.cav_bits = bits;
        self
    }

    /// Sets the fixed uniqueness tag.
    pub fn cav_tag(mut self, tag: u32) -> Self {
        self.cav_tag = Some(tag);
        self
    }

    /// Sets the exhausted-tag tolerance of `global_auto`.
    pub fn cav_retries(mut self, retries: u32) -> Self {
        self.cav_retries = retries;
        self
    }

    /// Sets the partition count.
    pub fn max_partitions(mut self, partitions: u32) -> Self {
        self.max_partitions = partitions;
        self
    }

    /// Sets the tentative claim expiry.
    pub fn claim_expiry(mut self, expiry: Duration) -> Self {
        self.claim_expiry = expiry;
        self
    }

    /// Sets the per-call store retry budget.
    pub fn storage_op_budget(mut self, budget: Duration) -> Self {
        self.storage_op_budget = budget;
        self
    }

    /// Enables or disables backoff jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Allows replacing an existing registration of the instance id.
    pub fn replace_instance_if_exists(mut self, replace: bool) -> Self {
        self.replace_instance_if_exists = replace;
        self
    }

    /// Seeds the tag generator.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Slack added to `wait` before a written claim is verified.
    pub fn grace_period(&self) -> Duration {
        self.wait / 10
    }

    /// Bits of the row key taken by the partition id.
    pub fn partition_bits(&self) -> u32 {
        self.max_partitions.trailing_zeros()
    }

    /// Number of distinct uniqueness tags.
    pub fn tag_count(&self) -> u32 {
        1u32 << self.cav_bits
    }

    /// Tag used by every attempt outside `global_auto`.
    pub fn fixed_tag(&self) -> u32 {
        self.cav_tag.unwrap_or(0)
    }

    /// Checks ranges and mode-specific requirements.
    pub fn validate(&self) -> Result<()> {
        if self.unique_instance_id.is_empty() {
            return Err(SombraError::invalid("unique_instance_id must not be empty"));
        }
        if self.wait.is_zero() {
            return Err(SombraError::invalid("wait must be positive"));
        }
        if self.storage_op_budget.is_zero() {
            return Err(SombraError::invalid("storage_op_budget must be positive"));
        }
        if self.claim_expiry <= self.wait + self.grace_period() {
            return Err(SombraError::invalid(
                "claim_expiry must exceed wait plus its grace period",
            ));
        }
        if self.cav_bits > 16 {
            return Err(SombraError::invalid(format!(
                "cav_bits {} outside 0..=16",
                self.cav_bits
            )));
        }
        if self.max_partitions == 0
            || !self.max_partitions.is_power_of_two()
            || self.max_partitions > 1 << 16
        {
            return Err(SombraError::invalid(format!(
                "max_partitions {} must be a power of two no larger than 65536",
                self.max_partitions
            )));
        }
        if self.id_store_name == self.registry_store_name {
            return Err(SombraError::invalid(
                "id_store_name and registry_store_name must differ",
            ));
        }
        match self.conflict_avoidance {
            ConflictAvoidanceMode::GlobalAuto => {
                if self.cav_tag.is_some() {
                    return Err(SombraError::invalid(
                        "cav_tag conflicts with global_auto, which picks tags at random",
                    ));
                }
                if self.cav_retries == 0 || self.cav_retries >= self.tag_count() {
                    return Err(SombraError::invalid(format!(
                        "cav_retries {} must be in 1..{} for cav_bits {}",
                        self.cav_retries,
                        self.tag_count(),
                        self.cav_bits
                    )));
                }
            }
            ConflictAvoidanceMode::LocalManual if self.cav_tag.is_none() => {
                return Err(SombraError::invalid("local_manual requires cav_tag"));
            }
            ConflictAvoidanceMode::None if self.cav_tag.is_some_and(|t| t != 0) => {
                return Err(SombraError::invalid(
                    "cav_tag requires a manual conflict avoidance mode",
                ));
            }
            _ => {}
        }
        if self.fixed_tag() >= self.tag_count() {
            return Err(SombraError::invalid(format!(
                "cav_tag {} too large for cav_bits {}",
                self.fixed_tag(),
                self.cav_bits
            )));
        }
        Ok(())
    }

    /// Parses and validates options from TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let raw: RawOptions = toml::from_str(raw)?;
        let options = raw.into_options()?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and validates options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Serializable form with durations in milliseconds.
    pub fn to_raw(&self) -> RawOptions {
        RawOptions {
            unique_instance_id: Some(self.unique_instance_id.clone()),
            wait_ms: Some(self.wait.as_millis() as u64),
            conflict_avoidance: Some(self.conflict_avoidance),
            cav_bits: Some(self.cav_bits),
            cav_tag: self.cav_tag,
            cav_retries: Some(self.cav_retries),
            max_partitions: Some(self.max_partitions),
            claim_expiry_ms: Some(self.claim_expiry.as_millis() as u64),
            storage_op_budget_ms: Some(self.storage_op_budget.as_millis() as u64),
            jitter: Some(self.jitter),
            replace_instance_if_exists: Some(self.replace_instance_if_exists),
            id_store_name: Some(self.id_store_name.clone()),
            registry_store_name: Some(self.registry_store_name.clone()),
            rng_seed: self.rng_seed,
        }
    }
}

/// On-disk representation; every field is optional and falls back to the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unique_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conflict_avoidance: Option<ConflictAvoidanceMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cav_bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cav_tag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cav_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_partitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claim_expiry_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_op_budget_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jitter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replace_instance_if_exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_store_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registry_store_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rng_seed: Option<u64>,
}

impl RawOptions {
    fn into_options(self) -> Result<IdAuthorityOptions> {
        let uid = self
            .unique_instance_id
            .ok_or_else(|| SombraError::invalid("unique_instance_id is required"))?;
        let mut options = IdAuthorityOptions::new(uid);
        if let Some(ms) = self.wait_ms {
            options.wait = Duration::from_millis(ms);
        }
        if let Some(mode) = self.conflict_avoidance {
            options.conflict_avoidance = mode;
        }
        if let Some(bits) = self.cav_bits {
            options.cav_bits = bits;
        }
        options.cav_tag = self.cav_tag;
        if let Some(retries) = self.cav_retries {
            options.cav_retries = retries;
        }
        if let Some(partitions) = self.max_partitions {
            options.max_partitions = partitions;
        }
        if let Some(ms) = self.claim_expiry_ms {
            options.claim_expiry = Duration::from_millis(ms);
        }
        if let Some(ms) = self.storage_op_budget_ms {
            options.storage_op_budget = Duration::from_millis(ms);
        }
        if let Some(jitter) = self.jitter {
            options.jitter = jitter;
        }
        if let Some(replace) = self.replace_instance_if_exists {
            options.replace_instance_if_exists = replace;
        }
        if let Some(name) = self.id_store_name {
            options.id_store_name = name;
        }
        if let Some(name) = self.registry_store_name {
            options.registry_store_name = name;
        }
        options.rng_seed = self.rng_seed;
        Ok(options)
    }
}
