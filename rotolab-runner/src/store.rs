//! Durable state — the JSONL audit log plus JSON snapshots.
//!
//! Layout of a store directory:
//!
//! ```text
//! events.jsonl                      append-only audit log (commit point)
//! current.json                      convenience copy of the latest state
//! clusters-{epoch}.json             cluster partition per monthly epoch
//! pool-{epoch}.json                 candidate pool per monthly epoch
//! scores-{date}.json                score cross-section per daily epoch
//! signals-{date}.json               classified actions per daily epoch
//! portfolio-{kind}-{date}.json      post-state of each committed epoch
//! ```
//!
//! The write protocol is snapshots first, event append last. Until its event
//! line lands in `events.jsonl` an epoch is uncommitted and any snapshot it
//! wrote is provisional; a rerun of the same epoch overwrites provisional
//! files with identical content, so nothing is ever double-applied.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use rotolab_core::domain::{
    ClusterSet, EpochKind, Pool, Position, RebalanceEvent, ScoreRecord, Signal,
};

/// Schema version for persisted portfolio state.
pub const PORTFOLIO_SCHEMA_VERSION: u32 = 1;

fn default_portfolio_schema_version() -> u32 {
    PORTFOLIO_SCHEMA_VERSION
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Portfolio state as of one committed epoch.
///
/// The `portfolio-{kind}-{date}.json` snapshot of the last committed event is
/// the authoritative state at resume; `current.json` is the same payload kept
/// at a fixed name for humans and the status command, and may lag by one epoch
/// after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    #[serde(default = "default_portfolio_schema_version")]
    pub schema_version: u32,
    /// Session date of the epoch that produced this state.
    pub as_of: NaiveDate,
    /// Sequence number of the event this state follows.
    pub last_seq: u64,
    /// Monthly epoch whose pool and clusters are live. None until the first
    /// monthly rebuild commits.
    pub pool_epoch: Option<NaiveDate>,
    pub positions: Vec<Position>,
}

/// JSONL audit log manager.
///
/// Appends one JSON object per line. Each line is independent, so a partial
/// trailing line from a crash is skipped on read instead of poisoning the log.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one event. This is the commit point: callers must have written
    /// every snapshot for the epoch before calling this.
    pub fn append(&self, event: &RebalanceEvent) -> Result<(), StoreError> {
        let json = serde_json::to_string(event)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{json}")?;
        file.flush()?;

        Ok(())
    }

    /// Read every event in append order. Skips malformed lines.
    pub fn read_all(&self) -> Result<Vec<RebalanceEvent>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)?;
        let reader = io::BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RebalanceEvent>(&line) {
                Ok(event) => events.push(event),
                Err(_) => continue, // skip malformed lines
            }
        }

        Ok(events)
    }

    /// Current file size in bytes.
    pub fn file_size_bytes(&self) -> Result<u64, StoreError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Snapshot and log store rooted at one directory.
pub struct StateStore {
    dir: PathBuf,
    log: EventLog,
}

impl StateStore {
    /// Open (creating if needed) a store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let log = EventLog::new(dir.join("events.jsonl"));
        Ok(Self { dir, log })
    }

    /// Attach to a store directory without creating it. Reads against a
    /// missing directory return `None` or empty; used by read-only consumers.
    pub fn attach(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let log = EventLog::new(dir.join("events.jsonl"));
        Self { dir, log }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn events(&self) -> &EventLog {
        &self.log
    }

    // ── Monthly snapshots ────────────────────────────────────────────

    pub fn write_clusters(&self, clusters: &ClusterSet) -> Result<(), StoreError> {
        self.write_json(&self.clusters_path(clusters.epoch), clusters)
    }

    pub fn read_clusters(&self, epoch: NaiveDate) -> Result<Option<ClusterSet>, StoreError> {
        self.read_json(&self.clusters_path(epoch))
    }

    pub fn write_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        self.write_json(&self.pool_path(pool.epoch), pool)
    }

    pub fn read_pool(&self, epoch: NaiveDate) -> Result<Option<Pool>, StoreError> {
        self.read_json(&self.pool_path(epoch))
    }

    // ── Daily snapshots ──────────────────────────────────────────────

    pub fn write_scores(&self, date: NaiveDate, records: &[ScoreRecord]) -> Result<(), StoreError> {
        self.write_json(&self.scores_path(date), &records)
    }

    pub fn read_scores(&self, date: NaiveDate) -> Result<Option<Vec<ScoreRecord>>, StoreError> {
        self.read_json(&self.scores_path(date))
    }

    pub fn write_signals(&self, date: NaiveDate, signals: &[Signal]) -> Result<(), StoreError> {
        self.write_json(&self.signals_path(date), &signals)
    }

    pub fn read_signals(&self, date: NaiveDate) -> Result<Option<Vec<Signal>>, StoreError> {
        self.read_json(&self.signals_path(date))
    }

    // ── Portfolio state ──────────────────────────────────────────────

    pub fn write_portfolio_snapshot(
        &self,
        kind: EpochKind,
        date: NaiveDate,
        state: &PortfolioState,
    ) -> Result<(), StoreError> {
        self.write_json(&self.portfolio_path(kind, date), state)
    }

    pub fn read_portfolio_snapshot(
        &self,
        kind: EpochKind,
        date: NaiveDate,
    ) -> Result<Option<PortfolioState>, StoreError> {
        self.read_json(&self.portfolio_path(kind, date))
    }

    /// Overwrite `current.json`. Called after the event append, so this file
    /// can be one epoch stale after a crash; resume never trusts it over the
    /// per-epoch snapshot of the last committed event.
    pub fn write_current(&self, state: &PortfolioState) -> Result<(), StoreError> {
        self.write_json(&self.dir.join("current.json"), state)
    }

    pub fn read_current(&self) -> Result<Option<PortfolioState>, StoreError> {
        self.read_json(&self.dir.join("current.json"))
    }

    // ── Paths and JSON plumbing ──────────────────────────────────────

    fn clusters_path(&self, epoch: NaiveDate) -> PathBuf {
        self.dir.join(format!("clusters-{epoch}.json"))
    }

    fn pool_path(&self, epoch: NaiveDate) -> PathBuf {
        self.dir.join(format!("pool-{epoch}.json"))
    }

    fn scores_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("scores-{date}.json"))
    }

    fn signals_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("signals-{date}.json"))
    }

    fn portfolio_path(&self, kind: EpochKind, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("portfolio-{kind}-{date}.json"))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

/// Read-only view over a store directory for presentation consumers: the
/// status and scores commands, report tooling, external dashboards.
///
/// Never creates or writes anything; a missing store reads as empty. Committed
/// state only — a provisional snapshot whose event never landed is invisible
/// through `current()` and the log, though its file may exist on disk.
pub struct SnapshotReader {
    store: StateStore,
}

impl SnapshotReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StateStore::attach(dir),
        }
    }

    /// Latest committed portfolio state, if any epoch has committed.
    pub fn current(&self) -> Result<Option<PortfolioState>, StoreError> {
        self.store.read_current()
    }

    /// Candidate pool for a monthly epoch.
    pub fn pool(&self, epoch: NaiveDate) -> Result<Option<Pool>, StoreError> {
        self.store.read_pool(epoch)
    }

    /// Cluster partition for a monthly epoch.
    pub fn clusters(&self, epoch: NaiveDate) -> Result<Option<ClusterSet>, StoreError> {
        self.store.read_clusters(epoch)
    }

    /// Ranked score cross-section for a session date.
    pub fn scores(&self, date: NaiveDate) -> Result<Option<Vec<ScoreRecord>>, StoreError> {
        self.store.read_scores(date)
    }

    pub fn signals(&self, date: NaiveDate) -> Result<Option<Vec<Signal>>, StoreError> {
        self.store.read_signals(date)
    }

    /// Position weights after the given epoch committed.
    pub fn portfolio(
        &self,
        kind: EpochKind,
        date: NaiveDate,
    ) -> Result<Option<PortfolioState>, StoreError> {
        self.store.read_portfolio_snapshot(kind, date)
    }

    /// The full audit log in append order.
    pub fn events(&self) -> Result<Vec<RebalanceEvent>, StoreError> {
        self.store.events().read_all()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
