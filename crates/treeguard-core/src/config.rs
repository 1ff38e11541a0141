//! Guard configuration and TOML parsing.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// What the guard does once an attack is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reaction {
    /// Record detection but keep answering truthfully (monitoring only).
    None,
    /// Refuse all further queries for the session.
    Block,
    /// Answer with a uniformly random leaf instead of the true one.
    RandomLeaf,
}

impl FromStr for Reaction {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Reaction::None),
            "block" => Ok(Reaction::Block),
            "random-leaf" => Ok(Reaction::RandomLeaf),
            other => Err(GuardError::UnsupportedReaction(other.to_string())),
        }
    }
}

/// Boundary-guard configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Queries between aggregate ratio recomputations.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// A leaf's ratio counts as zero until it has seen more than this many
    /// queries.
    #[serde(default = "default_min_leaf_queries")]
    pub min_leaf_queries: u64,

    /// Maximum fraction of a leaf's threshold interval usable as margin.
    #[serde(default = "default_margin_rate")]
    pub margin_rate: f64,

    /// Target tail probability mass for the density-based margin.
    #[serde(default = "default_false_probability")]
    pub false_probability: f64,

    /// Aggregate in-margin ratio that triggers detection. `None` disables
    /// the latch entirely (pure monitoring).
    #[serde(default = "default_blocking_threshold")]
    pub blocking_threshold: Option<f64>,

    /// Restrict the aggregate mean to leaves that received queries.
    #[serde(default)]
    pub count_only_active_leaves: bool,

    /// Reaction once detected: `none`, `block` or `random-leaf`.
    #[serde(default = "default_reaction")]
    pub reaction: String,
}

fn default_check_interval() -> u64 {
    10
}

fn default_min_leaf_queries() -> u64 {
    5
}

fn default_margin_rate() -> f64 {
    0.075
}

fn default_false_probability() -> f64 {
    0.005
}

fn default_blocking_threshold() -> Option<f64> {
    Some(0.3)
}

fn default_reaction() -> String {
    "none".to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            min_leaf_queries: default_min_leaf_queries(),
            margin_rate: default_margin_rate(),
            false_probability: default_false_probability(),
            blocking_threshold: default_blocking_threshold(),
            count_only_active_leaves: false,
            reaction: default_reaction(),
        }
    }
}

impl GuardConfig {
    /// Load from a TOML file. An unrecognized `reaction` value fails here,
    /// at configuration time, not at query time.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GuardConfig = toml::from_str(&contents)?;
        config.reaction()?;
        Ok(config)
    }

    /// The parsed reaction.
    pub fn reaction(&self) -> Result<Reaction> {
        self.reaction.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_values() {
        let config = GuardConfig::default();
        assert_eq!(config.check_interval, 10);
        assert_eq!(config.min_leaf_queries, 5);
        assert!((config.margin_rate - 0.075).abs() < 1e-12);
        assert!((config.false_probability - 0.005).abs() < 1e-12);
        assert_eq!(config.blocking_threshold, Some(0.3));
        assert!(!config.count_only_active_leaves);
        assert_eq!(config.reaction().unwrap(), Reaction::None);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config.check_interval, 10);
        assert_eq!(config.reaction, "none");
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: GuardConfig = toml::from_str(
            r#"
            check_interval = 25
            reaction = "block"
            count_only_active_leaves = true
            "#,
        )
        .unwrap();
        assert_eq!(config.check_interval, 25);
        assert_eq!(config.reaction().unwrap(), Reaction::Block);
        assert!(config.count_only_active_leaves);
        assert_eq!(config.min_leaf_queries, 5);
    }

    #[test]
    fn test_unknown_reaction_rejected_at_config_time() {
        let config: GuardConfig = toml::from_str(r#"reaction = "shrug""#).unwrap();
        let err = config.reaction().unwrap_err();
        assert!(matches!(err, GuardError::UnsupportedReaction(r) if r == "shrug"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "reaction = \"random-leaf\"\nblocking_threshold = 0.5\n")
            .unwrap();
        let config = GuardConfig::load(&path).unwrap();
        assert_eq!(config.reaction().unwrap(), Reaction::RandomLeaf);
        assert_eq!(config.blocking_threshold, Some(0.5));
    }

    #[test]
    fn test_load_rejects_bad_reaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "reaction = \"explode\"\n").unwrap();
        assert!(matches!(
            GuardConfig::load(&path).unwrap_err(),
            GuardError::UnsupportedReaction(_)
        ));
    }
}
