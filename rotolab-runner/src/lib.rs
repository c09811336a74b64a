//! Rotolab Runner — persistence, scheduling, and execution for the rotation
//! engine.
//!
//! This crate builds on `rotolab-core` to provide:
//! - Universe and bar loading from CSV, plus a synthetic data generator
//! - An append-only rebalance event log with snapshot store
//! - The epoch scheduler: monthly rebuilds, daily rebalances, crash-resume
//! - Execution venues (paper fills, haircut fills) and fill auditing
//! - NAV ledger, trade tape, and portfolio performance metrics
//! - JSON/CSV/Markdown artifact export

pub mod config;
pub mod data;
pub mod export;
pub mod performance;
pub mod scheduler;
pub mod store;
pub mod venue;

pub use config::{synthetic_universe, DataConfig, RunConfig, RunConfigError, ScreenConfig};
pub use data::{load_universe, DataError, MarketData};
pub use export::{
    describe_event, export_json, export_nav_csv, export_scores_csv, export_trades_csv,
    generate_report, generate_status, import_json, load_artifacts, save_artifacts, RunReport,
    REPORT_SCHEMA_VERSION,
};
pub use performance::{Ledger, PortfolioMetrics, TradeRecord};
pub use scheduler::{RunSummary, Scheduler, SchedulerError};
pub use store::{
    EventLog, PortfolioState, SnapshotReader, StateStore, StoreError, PORTFOLIO_SCHEMA_VERSION,
};
pub use venue::{Fill, HaircutVenue, PaperVenue, Venue, VenueConfig};
