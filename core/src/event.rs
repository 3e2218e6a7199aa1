//! The event bus: what each batch stage reports.
//!
//! RULE: Subsystems communicate ONLY through events.
//! A subsystem may never call another subsystem's functions directly.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    corrections::DisputeStatus,
    types::{EntityId, EntityType, HistoryId, Interval, RunId, WindowId},
    verification_subsystem::VerificationStatus,
};

/// Every event emitted during a run.
/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImpactEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        as_of: NaiveDate,
    },
    CycleStarted {
        cycle: u64,
        as_of: NaiveDate,
    },
    CycleCompleted {
        cycle: u64,
    },

    // ── Ranking ────────────────────────────────────
    WindowRanked {
        interval: Interval,
        window_id: WindowId,
        entity_type: EntityType,
        ranked: usize,
        degraded: usize,
        skipped: usize,
        receipts_failed: usize,
    },
    RankingCancelled {
        interval: Interval,
        entity_type: EntityType,
    },

    // ── Trust scoring and verification ─────────────
    TrustScoresRecorded {
        entity_type: EntityType,
        recorded: usize,
        failed: usize,
    },
    ScoreVerified {
        history_id: HistoryId,
        entity_type: EntityType,
        entity_id: EntityId,
        status: VerificationStatus,
        score_difference: f64,
    },
    BulkVerificationCompleted {
        verified: usize,
        passed: usize,
        failed: usize,
        errors: usize,
        cancelled: bool,
    },

    // ── Corrections, disputes, integrity ───────────
    CorrectionRecorded {
        correction_id: i64,
        history_id: HistoryId,
        adjustment_amount: f64,
    },
    DisputeFiled {
        dispute_id: i64,
        history_id: HistoryId,
        dispute_type: String,
    },
    DisputeUpdated {
        dispute_id: i64,
        status: DisputeStatus,
    },
    IntegrityCalculated {
        entity_type: EntityType,
        entity_id: EntityId,
        integrity_score: f64,
    },

    // ── Read side ──────────────────────────────────
    EntryFeatured {
        featured_id: i64,
        entity_type: EntityType,
        entity_id: EntityId,
    },
    CachePurged {
        removed: usize,
    },

    // ── Operator ───────────────────────────────────
    OperatorCommandReceived {
        cycle: u64,
        command_type: String,
    },
}

impl ImpactEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }            => "run_initialized",
            Self::CycleStarted { .. }              => "cycle_started",
            Self::CycleCompleted { .. }            => "cycle_completed",
            Self::WindowRanked { .. }              => "window_ranked",
            Self::RankingCancelled { .. }          => "ranking_cancelled",
            Self::TrustScoresRecorded { .. }       => "trust_scores_recorded",
            Self::ScoreVerified { .. }             => "score_verified",
            Self::BulkVerificationCompleted { .. } => "bulk_verification_completed",
            Self::CorrectionRecorded { .. }        => "correction_recorded",
            Self::DisputeFiled { .. }              => "dispute_filed",
            Self::DisputeUpdated { .. }            => "dispute_updated",
            Self::IntegrityCalculated { .. }       => "integrity_calculated",
            Self::EntryFeatured { .. }             => "entry_featured",
            Self::CachePurged { .. }               => "cache_purged",
            Self::OperatorCommandReceived { .. }   => "operator_command_received",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub cycle:      u64,
    pub subsystem:  String,
    pub event_type: String,
    pub payload:    String, // JSON-serialized ImpactEvent
    pub created_at: NaiveDateTime,
}
