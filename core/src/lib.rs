//! impact-core: scoring, ranking and audit engine for artist and label impact.
//!
//! Layers, bottom up:
//!   store      SQLite persistence (the only code that issues SQL)
//!   scoring    additive impact score from raw signals
//!   ranking    windowed rankings with previous-rank deltas and receipts
//!   leaderboard cached read side with snapshots and featured entries
//!   audit      append-only score history with hashed source lineage
//!   verification  replay of recorded scores against current data
//!   corrections, integrity  operator adjustments and per-entity trust
//!   engine     the batch cycle tying the stages together

pub mod audit;
pub mod clock;
pub mod command;
pub mod config;
pub mod corrections;
pub mod engine;
pub mod error;
pub mod event;
pub mod integrity_subsystem;
pub mod leaderboard;
pub mod ranking_subsystem;
pub mod receipt;
pub mod scoring;
pub mod signals;
pub mod store;
pub mod subsystem;
pub mod trust_score_subsystem;
pub mod types;
pub mod verification_subsystem;
