use super::ImpactStore;
use crate::{
    error::ImpactResult,
    leaderboard::{FeaturedEntry, LeaderboardRow, SnapshotRow},
    types::{EntityId, EntityType, Interval, WindowId},
};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

impl ImpactStore {
    // ── Leaderboard cache ──────────────────────────────────────────

    /// Cached payload for `key`, unless it has expired by `now`.
    pub fn leaderboard_cache_get(
        &self,
        key: &str,
        now: NaiveDateTime,
    ) -> ImpactResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT payload FROM leaderboard_cache WHERE cache_key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn leaderboard_cache_put(
        &self,
        key: &str,
        entity_type: EntityType,
        interval: Interval,
        window_id: WindowId,
        category: Option<&str>,
        payload: &str,
        created_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> ImpactResult<()> {
        self.conn.execute(
            "INSERT INTO leaderboard_cache (
                cache_key, entity_type, interval, window_id, category, payload, created_at, expires_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (cache_key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![key, entity_type, interval, window_id, category, payload, created_at, expires_at],
        )?;
        Ok(())
    }

    pub fn purge_leaderboard_cache(&self, now: NaiveDateTime) -> ImpactResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM leaderboard_cache WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(n)
    }

    /// Drop every cached board built on `window_id`.
    pub fn invalidate_leaderboard_cache(&self, window_id: WindowId) -> ImpactResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM leaderboard_cache WHERE window_id = ?1",
            params![window_id],
        )?;
        Ok(n)
    }

    /// Ranking items of a window joined with entity names, in rank order.
    pub fn leaderboard_rows(
        &self,
        window_id: WindowId,
        entity_type: EntityType,
    ) -> ImpactResult<Vec<LeaderboardRow>> {
        // The table name comes from a closed enum, never from input.
        let table = entity_type.as_str();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ri.rank, ri.entity_id, e.name, e.genre, ri.score, ri.prev_rank
             FROM ranking_item ri
             JOIN {table} e ON e.id = ri.entity_id
             WHERE ri.window_id = ?1 AND ri.entity_type = ?2
             ORDER BY ri.rank ASC"
        ))?;
        let rows = stmt
            .query_map(params![window_id, entity_type], |row| {
                Ok(LeaderboardRow {
                    rank: row.get::<_, i64>(0)? as u32,
                    entity_id: row.get(1)?,
                    name: row.get(2)?,
                    genre: row.get(3)?,
                    score: row.get(4)?,
                    prev_rank: row.get::<_, Option<i64>>(5)?.map(|r| r as u32),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn insert_leaderboard_snapshot(&self, s: &SnapshotRow) -> ImpactResult<()> {
        self.conn.execute(
            "INSERT INTO leaderboard_snapshot (
                window_id, entity_type, category, entity_id, rank, score, prev_rank, trend, captured_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                s.window_id,
                s.entity_type,
                s.category.as_deref(),
                s.entity_id,
                s.rank as i64,
                s.score,
                s.prev_rank.map(|r| r as i64),
                s.trend,
                s.captured_at,
            ],
        )?;
        Ok(())
    }

    pub fn snapshots_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<SnapshotRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT window_id, entity_type, category, entity_id, rank, score, prev_rank, trend, captured_at
             FROM leaderboard_snapshot WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY captured_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![entity_type, entity_id], |row| {
                Ok(SnapshotRow {
                    window_id: row.get(0)?,
                    entity_type: row.get(1)?,
                    category: row.get(2)?,
                    entity_id: row.get(3)?,
                    rank: row.get::<_, i64>(4)? as u32,
                    score: row.get(5)?,
                    prev_rank: row.get::<_, Option<i64>>(6)?.map(|r| r as u32),
                    trend: row.get(7)?,
                    captured_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Featured entries ───────────────────────────────────────────

    pub fn insert_featured_entry(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        headline: &str,
        position: i64,
        featured_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO featured_entry (entity_type, entity_id, headline, position, featured_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![entity_type, entity_id, headline, position, featured_at, expires_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn active_featured_entries(
        &self,
        entity_type: EntityType,
        now: NaiveDateTime,
    ) -> ImpactResult<Vec<FeaturedEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_type, entity_id, headline, position, featured_at, expires_at
             FROM featured_entry WHERE entity_type = ?1 AND expires_at > ?2
             ORDER BY position ASC, featured_at DESC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![entity_type, now], |row| {
                Ok(FeaturedEntry {
                    id: row.get(0)?,
                    entity_type: row.get(1)?,
                    entity_id: row.get(2)?,
                    headline: row.get(3)?,
                    position: row.get(4)?,
                    featured_at: row.get(5)?,
                    expires_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
