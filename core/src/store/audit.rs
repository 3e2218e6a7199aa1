use super::ImpactStore;
use crate::{
    audit::{FormulaSnapshot, LineageRecord, LineageStatus, ScoreCalculation, ScoreHistoryRecord},
    error::{ImpactError, ImpactResult},
    signals::SourceRef,
    types::{EntityId, EntityType, HistoryId, Period},
};
use chrono::NaiveDateTime;
use rusqlite::{params, types::Type, OptionalExtension};

const HISTORY_COLUMNS: &str = "id, entity_type, entity_id, score_value, period_type,
    period_start, period_end, input_counts, factor_breakdown, modifiers,
    calculation_method, formula_snapshot, calculated_at";

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn history_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreHistoryRecord> {
    Ok(ScoreHistoryRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        score_value: row.get(3)?,
        period_type: row.get(4)?,
        period: Period::new(row.get(5)?, row.get(6)?),
        input_counts: json_column(row, 7)?,
        factor_breakdown: json_column(row, 8)?,
        modifiers: json_column(row, 9)?,
        calculation_method: row.get(10)?,
        formula_snapshot: json_column(row, 11)?,
        calculated_at: row.get(12)?,
    })
}

fn lineage_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<LineageRecord> {
    Ok(LineageRecord {
        id: row.get(0)?,
        history_id: row.get(1)?,
        source_table: row.get(2)?,
        source_id: row.get(3)?,
        data_hash: row.get(4)?,
        validation_status: row.get(5)?,
        last_checked_at: row.get(6)?,
    })
}

impl ImpactStore {
    // ── Score history (append-only) ────────────────────────────────

    pub fn insert_score_history(
        &self,
        calc: &ScoreCalculation,
        snapshot: &FormulaSnapshot,
    ) -> ImpactResult<HistoryId> {
        self.conn.execute(
            "INSERT INTO score_history (
                entity_type, entity_id, score_value, period_type, period_start, period_end,
                input_counts, factor_breakdown, modifiers, calculation_method,
                formula_snapshot, calculated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                calc.entity_type,
                calc.entity_id,
                calc.score_value,
                &calc.period_type,
                calc.period.start,
                calc.period.end,
                serde_json::to_string(&calc.input_counts)?,
                serde_json::to_string(&calc.factor_breakdown)?,
                serde_json::to_string(&calc.modifiers)?,
                snapshot.method,
                serde_json::to_string(snapshot)?,
                calc.calculated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_score_history(&self, id: HistoryId) -> ImpactResult<ScoreHistoryRecord> {
        self.conn
            .query_row(
                &format!("SELECT {HISTORY_COLUMNS} FROM score_history WHERE id = ?1"),
                params![id],
                history_row_mapper,
            )
            .optional()?
            .ok_or(ImpactError::HistoryNotFound { id })
    }

    /// An entity's history, newest first.
    pub fn history_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<ScoreHistoryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM score_history
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY calculated_at DESC, id DESC"
        ))?;
        let records = stmt
            .query_map(params![entity_type, entity_id], history_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The newest record per entity calculated in `[from, until)`.
    pub fn latest_history_per_entity(
        &self,
        from: NaiveDateTime,
        until: NaiveDateTime,
        limit: usize,
    ) -> ImpactResult<Vec<ScoreHistoryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM score_history h
             WHERE h.calculated_at >= ?1 AND h.calculated_at < ?2
               AND h.id = (
                   SELECT MAX(h2.id) FROM score_history h2
                   WHERE h2.entity_type = h.entity_type AND h2.entity_id = h.entity_id
                     AND h2.calculated_at >= ?1 AND h2.calculated_at < ?2
               )
             ORDER BY h.entity_type ASC, h.entity_id ASC
             LIMIT ?3"
        ))?;
        let records = stmt
            .query_map(params![from, until, limit as i64], history_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_history(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> ImpactResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM score_history
             WHERE entity_type = ?1 AND entity_id = ?2
               AND calculated_at >= ?3 AND calculated_at < ?4",
            params![entity_type, entity_id, from, until],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // ── Lineage ────────────────────────────────────────────────────

    pub fn insert_lineage(
        &self,
        history_id: HistoryId,
        source: SourceRef,
        data_hash: &str,
    ) -> ImpactResult<()> {
        self.conn.execute(
            "INSERT INTO score_lineage (history_id, source_table, source_id, data_hash)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (history_id, source_table, source_id) DO NOTHING",
            params![history_id, source.table, source.id, data_hash],
        )?;
        Ok(())
    }

    pub fn lineage_for_history(&self, history_id: HistoryId) -> ImpactResult<Vec<LineageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, history_id, source_table, source_id, data_hash,
                    validation_status, last_checked_at
             FROM score_lineage WHERE history_id = ?1
             ORDER BY source_table ASC, source_id ASC",
        )?;
        let records = stmt
            .query_map(params![history_id], lineage_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn update_lineage_status(
        &self,
        lineage_id: i64,
        status: LineageStatus,
        checked_at: NaiveDateTime,
    ) -> ImpactResult<()> {
        self.conn.execute(
            "UPDATE score_lineage SET validation_status = ?1, last_checked_at = ?2 WHERE id = ?3",
            params![status, checked_at, lineage_id],
        )?;
        Ok(())
    }
}
