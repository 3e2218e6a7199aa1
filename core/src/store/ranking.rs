use super::ImpactStore;
use crate::{
    error::{ImpactError, ImpactResult},
    ranking_subsystem::{RankDeltas, RankingItem, RankingWindow},
    types::{EntityId, EntityType, Interval, WindowId},
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

fn window_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<RankingWindow> {
    Ok(RankingWindow {
        id: row.get(0)?,
        interval: row.get(1)?,
        window_start: row.get(2)?,
        window_end: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn item_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<RankingItem> {
    let deltas: Option<String> = row.get(8)?;
    Ok(RankingItem {
        window_id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        rank: row.get::<_, i64>(3)? as u32,
        score: row.get(4)?,
        base_score: row.get(5)?,
        boosted: row.get::<_, i32>(6)? != 0,
        prev_rank: row.get::<_, Option<i64>>(7)?.map(|r| r as u32),
        // Unparseable deltas read back as absent; they are derived data.
        deltas: deltas.and_then(|d| serde_json::from_str::<RankDeltas>(&d).ok()),
    })
}

impl ImpactStore {
    // ── Ranking windows ────────────────────────────────────────────

    /// Insert the window unless `(interval, window_start)` already exists,
    /// then return the surviving row's id. Concurrent callers all get the
    /// same id because the unique constraint arbitrates the race.
    pub fn ensure_window(
        &self,
        interval: Interval,
        window_start: NaiveDate,
        window_end: NaiveDate,
        created_at: NaiveDateTime,
    ) -> ImpactResult<WindowId> {
        self.conn.execute(
            "INSERT INTO ranking_window (interval, window_start, window_end, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (interval, window_start) DO NOTHING",
            params![interval, window_start, window_end, created_at],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM ranking_window WHERE interval = ?1 AND window_start = ?2",
            params![interval, window_start],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_window(
        &self,
        interval: Interval,
        window_start: NaiveDate,
    ) -> ImpactResult<Option<RankingWindow>> {
        self.conn
            .query_row(
                "SELECT id, interval, window_start, window_end, created_at
                 FROM ranking_window WHERE interval = ?1 AND window_start = ?2",
                params![interval, window_start],
                window_row_mapper,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_window(&self, id: WindowId) -> ImpactResult<RankingWindow> {
        self.conn
            .query_row(
                "SELECT id, interval, window_start, window_end, created_at
                 FROM ranking_window WHERE id = ?1",
                params![id],
                window_row_mapper,
            )
            .optional()?
            .ok_or(ImpactError::WindowNotFound { id })
    }

    /// The same-interval window with the largest start strictly before `before`.
    pub fn previous_window(
        &self,
        interval: Interval,
        before: NaiveDate,
    ) -> ImpactResult<Option<WindowId>> {
        self.conn
            .query_row(
                "SELECT id FROM ranking_window
                 WHERE interval = ?1 AND window_start < ?2
                 ORDER BY window_start DESC LIMIT 1",
                params![interval, before],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn windows_for_interval(&self, interval: Interval) -> ImpactResult<Vec<RankingWindow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, interval, window_start, window_end, created_at
             FROM ranking_window WHERE interval = ?1 ORDER BY window_start ASC",
        )?;
        let windows = stmt
            .query_map(params![interval], window_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(windows)
    }

    // ── Ranking items ──────────────────────────────────────────────

    /// Rank held by each entity of `entity_type` in a window.
    pub fn ranks_in_window(
        &self,
        window_id: WindowId,
        entity_type: EntityType,
    ) -> ImpactResult<HashMap<EntityId, u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, rank FROM ranking_item
             WHERE window_id = ?1 AND entity_type = ?2",
        )?;
        let ranks = stmt
            .query_map(params![window_id, entity_type], |row| {
                Ok((row.get::<_, EntityId>(0)?, row.get::<_, i64>(1)? as u32))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(ranks)
    }

    pub fn delete_ranking_items(
        &self,
        window_id: WindowId,
        entity_type: EntityType,
    ) -> ImpactResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM ranking_item WHERE window_id = ?1 AND entity_type = ?2",
            params![window_id, entity_type],
        )?;
        Ok(n)
    }

    pub fn insert_ranking_item(&self, item: &RankingItem) -> ImpactResult<()> {
        let deltas = item.deltas.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO ranking_item (
                window_id, entity_type, entity_id, rank, score, base_score,
                boosted, prev_rank, deltas
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.window_id,
                item.entity_type,
                item.entity_id,
                item.rank as i64,
                item.score,
                item.base_score,
                if item.boosted { 1i32 } else { 0i32 },
                item.prev_rank.map(|r| r as i64),
                deltas,
            ],
        )?;
        Ok(())
    }

    /// All items for `(window, type)` ordered by rank.
    pub fn ranking_items(
        &self,
        window_id: WindowId,
        entity_type: EntityType,
    ) -> ImpactResult<Vec<RankingItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT window_id, entity_type, entity_id, rank, score, base_score,
                    boosted, prev_rank, deltas
             FROM ranking_item WHERE window_id = ?1 AND entity_type = ?2
             ORDER BY rank ASC",
        )?;
        let items = stmt
            .query_map(params![window_id, entity_type], item_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}
