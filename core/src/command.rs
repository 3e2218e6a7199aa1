use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    corrections::{DisputeResolution, NewCorrection, NewDispute},
    event::ImpactEvent,
    types::{EntityId, EntityType, HistoryId, Interval},
};

fn default_feature_hours() -> i64 {
    24
}

/// All operator-issued commands.
/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum OperatorCommand {
    // ── Ranking ───────────────────────────────────
    RankInterval {
        interval: Interval,
    },

    // ── Verification ──────────────────────────────
    VerifyScore {
        history_id: HistoryId,
    },
    BulkVerify {
        start: NaiveDate,
        end:   NaiveDate,
        limit: usize,
    },

    // ── Corrections and disputes ──────────────────
    RecordCorrection(NewCorrection),
    FileDispute(NewDispute),
    ResolveDispute {
        dispute_id: i64,
        resolution: DisputeResolution,
    },

    // ── Integrity ─────────────────────────────────
    ComputeIntegrity {
        entity_type: EntityType,
        entity_id:   EntityId,
        start:       NaiveDate,
        end:         NaiveDate,
    },

    // ── Read side ─────────────────────────────────
    FeatureEntry {
        entity_type: EntityType,
        entity_id:   EntityId,
        headline:    String,
        #[serde(default)]
        position:    i64,
        #[serde(default = "default_feature_hours")]
        hours:       i64,
    },
    PurgeCache,
}

impl OperatorCommand {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RankInterval { .. }     => "rank_interval",
            Self::VerifyScore { .. }      => "verify_score",
            Self::BulkVerify { .. }       => "bulk_verify",
            Self::RecordCorrection(_)     => "record_correction",
            Self::FileDispute(_)          => "file_dispute",
            Self::ResolveDispute { .. }   => "resolve_dispute",
            Self::ComputeIntegrity { .. } => "compute_integrity",
            Self::FeatureEntry { .. }     => "feature_entry",
            Self::PurgeCache              => "purge_cache",
        }
    }
}

/// What applying a command produced: the logged events plus the
/// command's own result as JSON for the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub events: Vec<ImpactEvent>,
    pub result: serde_json::Value,
}
