//! Rotolab Core — domain types, feature pipeline, clustering, pool, scoring,
//! classification, and allocation for the rotation engine.
//!
//! This crate contains the pure decision logic:
//! - Domain types (bars, instruments, clusters, pools, scores, signals,
//!   positions, rebalance events)
//! - Feature pipeline over daily bars with sane-history gating
//! - k-means++ cluster builder with deterministic tie-breaking
//! - Candidate pool construction (fundamental screen + Sharpe ranking)
//! - Quantile-mapped factor scoring against the pool cross-section
//! - Threshold classifier with hysteresis and cluster-cap overrides
//! - Risk-parity allocator with per-position and gross exposure caps
//!
//! Everything here is deterministic and free of I/O and wall-clock reads.
//! Persistence, scheduling, and execution live in `rotolab-runner`.

pub mod alloc;
pub mod calendar;
pub mod classify;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod pool;
pub mod rng;
pub mod scoring;
