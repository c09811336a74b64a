//! Domain types for the rotation engine.

pub mod bar;
pub mod cluster;
pub mod event;
pub mod ids;
pub mod instrument;
pub mod pool;
pub mod position;
pub mod score;
pub mod signal;

pub use bar::Bar;
pub use cluster::{ClusterAssignment, ClusterSet};
pub use event::{
    EpochKind, EventPayload, ExecutionMismatch, RebalanceEvent, EVENT_SCHEMA_VERSION,
};
pub use ids::{ClusterId, ConfigHash, InstrumentId};
pub use instrument::Instrument;
pub use pool::{Pool, PoolMember};
pub use position::{gross_weight, DeltaSide, Position, WeightDelta};
pub use score::{ScoreRecord, SubScores};
pub use signal::{DiversificationOverride, Signal, SignalAction};
