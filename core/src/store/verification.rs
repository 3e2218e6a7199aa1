use super::ImpactStore;
use crate::{
    error::ImpactResult,
    integrity_subsystem::IntegrityMetrics,
    types::{EntityId, EntityType, HistoryId, Period},
    verification_subsystem::{VerificationIssue, VerificationResult, VerificationStatus},
};
use chrono::NaiveDateTime;
use rusqlite::{params, types::Type, OptionalExtension};

/// Stored verdict. Lineage checks live on the lineage rows themselves.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VerificationRow {
    pub id:                 i64,
    pub history_id:         HistoryId,
    pub entity_type:        EntityType,
    pub entity_id:          EntityId,
    pub status:             VerificationStatus,
    pub original_score:     f64,
    pub recalculated_score: f64,
    pub score_difference:   f64,
    pub percent_difference: f64,
    pub data_completeness:  f64,
    pub issues:             Vec<VerificationIssue>,
    pub verified_at:        NaiveDateTime,
}

fn verification_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<VerificationRow> {
    let issues: String = row.get(10)?;
    Ok(VerificationRow {
        id: row.get(0)?,
        history_id: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        status: row.get(4)?,
        original_score: row.get(5)?,
        recalculated_score: row.get(6)?,
        score_difference: row.get(7)?,
        percent_difference: row.get(8)?,
        data_completeness: row.get(9)?,
        issues: serde_json::from_str(&issues)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
        verified_at: row.get(11)?,
    })
}

fn integrity_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<IntegrityMetrics> {
    Ok(IntegrityMetrics {
        entity_type: row.get(0)?,
        entity_id: row.get(1)?,
        period: Period::new(row.get(2)?, row.get(3)?),
        scores_recorded: row.get::<_, i64>(4)? as u64,
        verifications_run: row.get::<_, i64>(5)? as u64,
        verifications_passed: row.get::<_, i64>(6)? as u64,
        pass_rate: row.get(7)?,
        corrections_applied: row.get::<_, i64>(8)? as u64,
        total_adjustment: row.get(9)?,
        disputes_filed: row.get::<_, i64>(10)? as u64,
        disputes_resolved: row.get::<_, i64>(11)? as u64,
        integrity_score: row.get(12)?,
        calculated_at: row.get(13)?,
    })
}

const VERIFICATION_COLUMNS: &str = "id, history_id, entity_type, entity_id, status,
    original_score, recalculated_score, score_difference, percent_difference,
    data_completeness, issues, verified_at";

impl ImpactStore {
    // ── Verification verdicts ──────────────────────────────────────

    pub fn insert_verification(&self, v: &VerificationResult) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO score_verification (
                entity_type, entity_id, history_id, status, original_score, recalculated_score,
                score_difference, percent_difference, data_completeness, issues, verified_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                v.entity_type,
                v.entity_id,
                v.history_id,
                v.status,
                v.original_score,
                v.recalculated_score,
                v.score_difference,
                v.percent_difference,
                v.data_completeness,
                serde_json::to_string(&v.issues)?,
                v.verified_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn verifications_for_history(&self, history_id: HistoryId) -> ImpactResult<Vec<VerificationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VERIFICATION_COLUMNS} FROM score_verification
             WHERE history_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![history_id], verification_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn verifications_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<VerificationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VERIFICATION_COLUMNS} FROM score_verification
             WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY verified_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![entity_type, entity_id], verification_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(run, passed)` verification counts in `[from, until)`.
    pub fn verification_counts(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> ImpactResult<(u64, u64)> {
        let (run, passed): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'passed' THEN 1 ELSE 0 END), 0)
             FROM score_verification
             WHERE entity_type = ?1 AND entity_id = ?2
               AND verified_at >= ?3 AND verified_at < ?4",
            params![entity_type, entity_id, from, until],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((run as u64, passed as u64))
    }

    // ── Integrity metrics ──────────────────────────────────────────

    pub fn insert_integrity_metric(&self, m: &IntegrityMetrics) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO integrity_metric (
                entity_type, entity_id, period_start, period_end, scores_recorded,
                verifications_run, verifications_passed, pass_rate, corrections_applied,
                total_adjustment, disputes_filed, disputes_resolved, integrity_score, calculated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                m.entity_type,
                m.entity_id,
                m.period.start,
                m.period.end,
                m.scores_recorded as i64,
                m.verifications_run as i64,
                m.verifications_passed as i64,
                m.pass_rate,
                m.corrections_applied as i64,
                m.total_adjustment,
                m.disputes_filed as i64,
                m.disputes_resolved as i64,
                m.integrity_score,
                m.calculated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn latest_integrity_metric(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Option<IntegrityMetrics>> {
        self.conn
            .query_row(
                "SELECT entity_type, entity_id, period_start, period_end, scores_recorded,
                        verifications_run, verifications_passed, pass_rate, corrections_applied,
                        total_adjustment, disputes_filed, disputes_resolved, integrity_score,
                        calculated_at
                 FROM integrity_metric WHERE entity_type = ?1 AND entity_id = ?2
                 ORDER BY calculated_at DESC, id DESC LIMIT 1",
                params![entity_type, entity_id],
                integrity_row_mapper,
            )
            .optional()
            .map_err(Into::into)
    }
}
