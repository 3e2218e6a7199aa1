//! Correction & dispute bookkeeping.
//!
//! Both reference a score history record; neither ever rewrites it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    clock::RunClock,
    error::{ImpactError, ImpactResult},
    store::ImpactStore,
    types::{text_enum_sql, EntityId, EntityType, HistoryId},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub id:                i64,
    pub entity_type:       EntityType,
    pub entity_id:         EntityId,
    pub history_id:        HistoryId,
    pub correction_type:   String,
    pub reason:            String,
    pub original_score:    f64,
    pub corrected_score:   f64,
    /// `corrected_score - original_score`.
    pub adjustment_amount: f64,
    pub requested_by:      String,
    pub approved_by:       Option<String>,
    pub approved_at:       Option<NaiveDateTime>,
    pub created_at:        NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCorrection {
    pub history_id:      HistoryId,
    pub correction_type: String,
    pub reason:          String,
    pub original_score:  f64,
    pub corrected_score: f64,
    pub requested_by:    String,
    pub approved_by:     Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
    Rejected,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl FromStr for DisputeStatus {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ImpactError::InvalidDisputeStatus { value: other.to_string() }),
        }
    }
}

text_enum_sql!(DisputeStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisputeSeverity {
    Low,
    #[default]
    Medium,
    High,
}

impl DisputeSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for DisputeSeverity {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ImpactError::Other(anyhow::anyhow!(
                "unknown dispute severity '{other}'"
            ))),
        }
    }
}

text_enum_sql!(DisputeSeverity);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub id:                i64,
    pub entity_type:       EntityType,
    pub entity_id:         EntityId,
    pub history_id:        HistoryId,
    pub dispute_type:      String,
    pub description:       String,
    pub alleged_impact:    Option<f64>,
    pub severity:          DisputeSeverity,
    pub status:            DisputeStatus,
    pub resolution:        Option<String>,
    pub action_taken:      Option<String>,
    pub final_score_after: Option<f64>,
    pub created_at:        NaiveDateTime,
    pub resolved_at:       Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDispute {
    pub history_id:     HistoryId,
    pub dispute_type:   String,
    pub description:    String,
    pub alleged_impact: Option<f64>,
    #[serde(default)]
    pub severity:       DisputeSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeResolution {
    pub status:            DisputeStatus,
    pub resolution:        Option<String>,
    pub action_taken:      Option<String>,
    pub final_score_after: Option<f64>,
}

pub struct CorrectionManager<'a> {
    store: &'a ImpactStore,
    clock: &'a RunClock,
}

impl<'a> CorrectionManager<'a> {
    pub fn new(store: &'a ImpactStore, clock: &'a RunClock) -> Self {
        Self { store, clock }
    }

    /// Record a manual correction against a history record. The entity is
    /// taken from the record so the two can never disagree.
    pub fn record_correction(&self, c: &NewCorrection) -> ImpactResult<CorrectionRecord> {
        let history = self.store.get_score_history(c.history_id)?;
        let now = self.clock.now();
        let mut record = CorrectionRecord {
            id: 0,
            entity_type: history.entity_type,
            entity_id: history.entity_id,
            history_id: c.history_id,
            correction_type: c.correction_type.clone(),
            reason: c.reason.clone(),
            original_score: c.original_score,
            corrected_score: c.corrected_score,
            adjustment_amount: c.corrected_score - c.original_score,
            requested_by: c.requested_by.clone(),
            approved_by: c.approved_by.clone(),
            approved_at: c.approved_by.as_ref().map(|_| now),
            created_at: now,
        };
        record.id = self.store.insert_correction(&record)?;
        log::info!(
            "Correction {} on history {}: {:+.4} ({})",
            record.id,
            record.history_id,
            record.adjustment_amount,
            record.correction_type
        );
        Ok(record)
    }

    pub fn create_dispute(&self, d: &NewDispute) -> ImpactResult<DisputeRecord> {
        let history = self.store.get_score_history(d.history_id)?;
        let mut record = DisputeRecord {
            id: 0,
            entity_type: history.entity_type,
            entity_id: history.entity_id,
            history_id: d.history_id,
            dispute_type: d.dispute_type.clone(),
            description: d.description.clone(),
            alleged_impact: d.alleged_impact,
            severity: d.severity,
            status: DisputeStatus::Open,
            resolution: None,
            action_taken: None,
            final_score_after: None,
            created_at: self.clock.now(),
            resolved_at: None,
        };
        record.id = self.store.insert_dispute(&record)?;
        log::info!("Dispute {} filed on history {} ({})", record.id, record.history_id, record.dispute_type);
        Ok(record)
    }

    /// Close an open dispute as resolved or rejected.
    pub fn update_dispute_status(
        &self,
        id: i64,
        update: &DisputeResolution,
    ) -> ImpactResult<DisputeRecord> {
        if update.status == DisputeStatus::Open {
            return Err(ImpactError::InvalidDisputeStatus { value: "open".into() });
        }
        let mut dispute = self.store.get_dispute(id)?;
        if dispute.status.is_closed() {
            return Err(ImpactError::DisputeClosed { id, status: dispute.status.as_str().into() });
        }
        dispute.status = update.status;
        dispute.resolution = update.resolution.clone();
        dispute.action_taken = update.action_taken.clone();
        dispute.final_score_after = update.final_score_after;
        dispute.resolved_at = Some(self.clock.now());
        self.store.update_dispute(&dispute)?;
        log::info!("Dispute {id} {}", dispute.status.as_str());
        Ok(dispute)
    }

    pub fn corrections_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<CorrectionRecord>> {
        self.store.corrections_for_entity(entity_type, entity_id)
    }

    pub fn disputes_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<DisputeRecord>> {
        self.store.disputes_for_entity(entity_type, entity_id)
    }

    pub fn open_disputes(&self) -> ImpactResult<Vec<DisputeRecord>> {
        self.store.open_disputes()
    }
}
