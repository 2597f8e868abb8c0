//! `wattgrid.toml` scheduler configuration.
//!
//! Every field has a default, so an empty file yields the stock
//! best-fit-decreasing setup.

use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::types::{PState, SState};

/// Which placement/rebalancing policy drives the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    BestFitDecreasing,
    BucketedRoundRobin,
    UtilizationBalance,
    FrequencyScaling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerConfig {
    pub policy: PolicyKind,
    /// Seed for the fallback placement generator. Entropy when unset.
    pub seed: Option<u64>,
    pub placement: PlacementConfig,
    pub capacity: CapacityConfig,
    pub frequency: FrequencyConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Instruction-rate headroom (MIPS) reserved per task.
    pub task_mips_cost: u64,
    /// Fraction of physical memory that can be reserved.
    pub memory_headroom: f64,
    /// Performance state pushed to machines activated at start-up.
    pub initial_pstate: PState,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            task_mips_cost: 1000,
            memory_headroom: 0.95,
            initial_pstate: PState::P0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Fraction of each pool powered on at start-up (at least one machine).
    pub startup_active_fraction: f64,
    /// States for the start-up tiers after the first, in the tiered variant.
    /// The last entry also covers any remainder.
    pub tier_states: Vec<SState>,
    /// Pool load above which inactive machines are woken.
    pub high_load_threshold: f64,
    /// Fraction of the inactive set woken per high-load check (at least one).
    pub wake_batch_fraction: f64,
    /// Consecutive idle periodic checks before an active machine sleeps.
    pub idle_check_threshold: u32,
    /// Fraction of each pool that stays active (at least one machine).
    pub active_floor_fraction: f64,
    /// Sleep states handed out in turn to idle machines.
    pub sleep_rotation: Vec<SState>,
    /// Pressure signals counted before the activation frontier widens.
    pub pressure_check_threshold: u32,
    /// Fraction of idle machines kept awake as warm spares.
    pub warm_spare_fraction: f64,
    /// At or below this many idle machines, every idle machine stays awake.
    pub warm_spare_min_idle: usize,
    /// State idle machines beyond the warm spares are sent to.
    pub spare_sleep_state: SState,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            startup_active_fraction: 0.25,
            tier_states: vec![SState::S1, SState::S3, SState::S5],
            high_load_threshold: 0.5,
            wake_batch_fraction: 0.2,
            idle_check_threshold: 500,
            active_floor_fraction: 0.25,
            sleep_rotation: vec![SState::S2, SState::S3, SState::S4, SState::S5],
            pressure_check_threshold: 1000,
            warm_spare_fraction: 0.46,
            warm_spare_min_idle: 4,
            spare_sleep_state: SState::S1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Load thresholds for P0, P1 and P2, highest first. Below the last: P3.
    pub bands: Vec<f64>,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            bands: vec![0.8, 0.6, 0.4],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Move work toward busy machines whenever a task completes.
    pub consolidate_on_completion: bool,
    /// Tasks further along than this fraction are never consolidated.
    pub consolidation_completion_cutoff: f64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            consolidate_on_completion: true,
            consolidation_completion_cutoff: 0.75,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: SchedulerConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the controllers cannot act on.
    pub fn validate(&self) -> anyhow::Result<()> {
        let fractions = [
            ("placement.memory_headroom", self.placement.memory_headroom),
            ("capacity.startup_active_fraction", self.capacity.startup_active_fraction),
            ("capacity.high_load_threshold", self.capacity.high_load_threshold),
            ("capacity.wake_batch_fraction", self.capacity.wake_batch_fraction),
            ("capacity.active_floor_fraction", self.capacity.active_floor_fraction),
            ("capacity.warm_spare_fraction", self.capacity.warm_spare_fraction),
            ("migration.consolidation_completion_cutoff", self.migration.consolidation_completion_cutoff),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within 0.0..=1.0, got {value}");
            }
        }

        if self.capacity.startup_active_fraction == 0.0 {
            bail!("capacity.startup_active_fraction must be positive");
        }
        if self.capacity.sleep_rotation.is_empty() {
            bail!("capacity.sleep_rotation must name at least one state");
        }
        if self.capacity.sleep_rotation.contains(&SState::S0) || self.capacity.spare_sleep_state == SState::S0 {
            bail!("sleep states must not include S0");
        }
        if self.capacity.tier_states.is_empty() {
            bail!("capacity.tier_states must name at least one state");
        }
        if self.frequency.bands.len() != 3 {
            bail!("frequency.bands must hold exactly three thresholds");
        }
        if self.frequency.bands.windows(2).any(|w| w[0] < w[1]) {
            bail!("frequency.bands must be in descending order");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config: SchedulerConfig = toml::from_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.policy, PolicyKind::BestFitDecreasing);
        assert_eq!(config.placement.task_mips_cost, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_sections() {
        let toml_str = r#"
policy = "utilization_balance"
seed = 7

[capacity]
idle_check_threshold = 3
sleep_rotation = ["S3"]
"#;
        let config: SchedulerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.policy, PolicyKind::UtilizationBalance);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.capacity.idle_check_threshold, 3);
        assert_eq!(config.capacity.sleep_rotation, vec![SState::S3]);
        assert_eq!(config.capacity.high_load_threshold, 0.5);
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        let mut config = SchedulerConfig::default();
        config.capacity.wake_batch_fraction = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wake_batch_fraction"));
    }

    #[test]
    fn rejects_ascending_bands() {
        let mut config = SchedulerConfig::default();
        config.frequency.bands = vec![0.4, 0.6, 0.8];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_s0_in_sleep_rotation() {
        let mut config = SchedulerConfig::default();
        config.capacity.sleep_rotation = vec![SState::S0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_round_trips() {
        let mut config = SchedulerConfig::default();
        config.policy = PolicyKind::FrequencyScaling;
        config.frequency.bands = vec![0.9, 0.7, 0.5];

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();

        let loaded = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn from_file_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"policy = \"fastest\"").unwrap();

        let err = SchedulerConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
