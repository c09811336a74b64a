//! Serializable run configuration.
//!
//! A run file binds the engine parameters to an environment: where bars come
//! from, where state lives, and which venue executes fills. Only the engine
//! parameters enter the config hash that keys committed epochs; the
//! environment can move (new store path, different venue) without invalidating
//! history, and the audit events still record what actually filled.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rotolab_core::config::EngineConfig;
use rotolab_core::domain::{ConfigHash, Instrument, InstrumentId};
use rotolab_core::error::EngineError;
use rotolab_core::pool::ScreenList;

use crate::venue::VenueConfig;

#[derive(Debug, Error)]
pub enum RunConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid run config: {0}")]
    Parse(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Where bar data comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataConfig {
    /// One CSV per instrument under `bars_dir`, universe from a TOML file.
    Csv { universe: PathBuf, bars_dir: PathBuf },

    /// Deterministic generated market, for demos and dry runs.
    Synthetic {
        instruments: usize,
        start: NaiveDate,
        end: NaiveDate,
        seed: u64,
    },
}

/// Hard pool exclusions (delistings, compliance blocks). Environment data
/// like the venue: it never enters the config hash, and the committed events
/// record the pool that actually resulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ScreenConfig {
    pub fn build(&self) -> ScreenList {
        ScreenList::new(self.exclude.iter().cloned().map(InstrumentId::new))
    }
}

/// Full configuration for a scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    pub data: DataConfig,

    /// Store directory for the audit log and snapshots.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    #[serde(default)]
    pub venue: VenueConfig,

    #[serde(default)]
    pub screen: ScreenConfig,

    /// First session to process (inclusive). None means the calendar start.
    #[serde(default)]
    pub start: Option<NaiveDate>,

    /// Last session to process (inclusive). None means the calendar end.
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("rotolab-store")
}

impl RunConfig {
    /// Load and validate a run file.
    pub fn load(path: &Path) -> Result<Self, RunConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, RunConfigError> {
        let config: RunConfig =
            toml::from_str(text).map_err(|e| RunConfigError::Parse(e.to_string()))?;
        config.engine.validate()?;
        if let DataConfig::Synthetic { instruments, start, end, .. } = &config.data {
            if *instruments == 0 {
                return Err(RunConfigError::Parse(
                    "synthetic data needs at least one instrument".into(),
                ));
            }
            if end < start {
                return Err(RunConfigError::Parse(format!(
                    "synthetic window ends ({end}) before it starts ({start})"
                )));
            }
        }
        Ok(config)
    }

    /// The hash keying committed epochs. Engine parameters only.
    pub fn config_hash(&self) -> Result<ConfigHash, EngineError> {
        self.engine.hash()
    }
}

/// Instrument list for the synthetic data mode. Ids are `SYN000`, `SYN001`,
/// and so on; every third instrument carries a breadth feed so both factor
/// paths get exercised.
pub fn synthetic_universe(count: usize) -> Vec<Instrument> {
    (0..count)
        .map(|i| Instrument {
            id: InstrumentId::new(format!("SYN{i:03}")),
            name: format!("Synthetic basket {i}"),
            has_breadth_feed: i % 3 == 0,
        })
        .collect()
}
