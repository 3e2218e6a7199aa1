use super::ImpactStore;
use crate::{
    corrections::{CorrectionRecord, DisputeRecord},
    error::{ImpactError, ImpactResult},
    types::{EntityId, EntityType},
};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

fn correction_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorrectionRecord> {
    Ok(CorrectionRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        history_id: row.get(3)?,
        correction_type: row.get(4)?,
        reason: row.get(5)?,
        original_score: row.get(6)?,
        corrected_score: row.get(7)?,
        adjustment_amount: row.get(8)?,
        requested_by: row.get(9)?,
        approved_by: row.get(10)?,
        approved_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn dispute_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<DisputeRecord> {
    Ok(DisputeRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        history_id: row.get(3)?,
        dispute_type: row.get(4)?,
        description: row.get(5)?,
        alleged_impact: row.get(6)?,
        severity: row.get(7)?,
        status: row.get(8)?,
        resolution: row.get(9)?,
        action_taken: row.get(10)?,
        final_score_after: row.get(11)?,
        created_at: row.get(12)?,
        resolved_at: row.get(13)?,
    })
}

const CORRECTION_COLUMNS: &str = "id, entity_type, entity_id, history_id, correction_type,
    reason, original_score, corrected_score, adjustment_amount, requested_by,
    approved_by, approved_at, created_at";

const DISPUTE_COLUMNS: &str = "id, entity_type, entity_id, history_id, dispute_type,
    description, alleged_impact, severity, status, resolution, action_taken,
    final_score_after, created_at, resolved_at";

impl ImpactStore {
    // ── Corrections ────────────────────────────────────────────────

    pub fn insert_correction(&self, c: &CorrectionRecord) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO score_correction (
                entity_type, entity_id, history_id, correction_type, reason, original_score,
                corrected_score, adjustment_amount, requested_by, approved_by, approved_at,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                c.entity_type,
                c.entity_id,
                c.history_id,
                &c.correction_type,
                &c.reason,
                c.original_score,
                c.corrected_score,
                c.adjustment_amount,
                &c.requested_by,
                c.approved_by.as_deref(),
                c.approved_at,
                c.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn corrections_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<CorrectionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CORRECTION_COLUMNS} FROM score_correction
             WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![entity_type, entity_id], correction_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(count, Σ|adjustment|)` for corrections created in `[from, until)`.
    pub fn correction_totals(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> ImpactResult<(u64, f64)> {
        let (count, total): (i64, f64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(ABS(adjustment_amount)), 0.0)
             FROM score_correction
             WHERE entity_type = ?1 AND entity_id = ?2
               AND created_at >= ?3 AND created_at < ?4",
            params![entity_type, entity_id, from, until],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count as u64, total))
    }

    // ── Disputes ───────────────────────────────────────────────────

    pub fn insert_dispute(&self, d: &DisputeRecord) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO score_dispute (
                entity_type, entity_id, history_id, dispute_type, description, alleged_impact,
                severity, status, resolution, action_taken, final_score_after, created_at,
                resolved_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                d.entity_type,
                d.entity_id,
                d.history_id,
                &d.dispute_type,
                &d.description,
                d.alleged_impact,
                d.severity,
                d.status,
                d.resolution.as_deref(),
                d.action_taken.as_deref(),
                d.final_score_after,
                d.created_at,
                d.resolved_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_dispute(&self, id: i64) -> ImpactResult<DisputeRecord> {
        self.conn
            .query_row(
                &format!("SELECT {DISPUTE_COLUMNS} FROM score_dispute WHERE id = ?1"),
                params![id],
                dispute_row_mapper,
            )
            .optional()?
            .ok_or(ImpactError::DisputeNotFound { id })
    }

    pub fn update_dispute(&self, d: &DisputeRecord) -> ImpactResult<()> {
        let n = self.conn.execute(
            "UPDATE score_dispute
             SET status = ?1, resolution = ?2, action_taken = ?3,
                 final_score_after = ?4, resolved_at = ?5
             WHERE id = ?6",
            params![
                d.status,
                d.resolution.as_deref(),
                d.action_taken.as_deref(),
                d.final_score_after,
                d.resolved_at,
                d.id,
            ],
        )?;
        if n == 0 {
            return Err(ImpactError::DisputeNotFound { id: d.id });
        }
        Ok(())
    }

    pub fn disputes_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<DisputeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM score_dispute
             WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![entity_type, entity_id], dispute_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn open_disputes(&self) -> ImpactResult<Vec<DisputeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM score_dispute
             WHERE status = 'open' ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map([], dispute_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(filed, resolved)` for disputes created in `[from, until)`.
    /// Rejected disputes count as resolved.
    pub fn dispute_totals(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> ImpactResult<(u64, u64)> {
        let (filed, resolved): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status != 'open' THEN 1 ELSE 0 END), 0)
             FROM score_dispute
             WHERE entity_type = ?1 AND entity_id = ?2
               AND created_at >= ?3 AND created_at < ?4",
            params![entity_type, entity_id, from, until],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((filed as u64, resolved as u64))
    }
}
