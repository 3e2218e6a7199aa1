//! Raw signal queries: the SQLite implementation of `SignalSource`,
//! plus the writers upstream services (and tests) use to feed it.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, types::ValueRef, OptionalExtension, Row};
use serde_json::{Map, Value};

use super::ImpactStore;
use crate::{
    error::ImpactResult,
    signals::{
        ChartTotals, EngagementCounts, EngagementQualityRow, Entity, FollowerPoint, SignalSource,
        SourceError, SourceRef, SourceResult, VideoRow,
    },
    types::{EntityId, EntityType, Period},
};

/// Profile fields accepted by `insert_entity`.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub id:               EntityId,
    pub entity_type:      EntityType,
    pub name:             String,
    pub claimed:          bool,
    pub status:           String,
    pub investor:         bool,
    pub genre:            Option<String>,
    pub label_id:         Option<EntityId>,
    pub reputation_score: Option<f64>,
    pub created_at:       NaiveDateTime,
}

impl NewEntity {
    pub fn artist(id: EntityId, name: &str) -> Self {
        Self::new(EntityType::Artist, id, name)
    }

    pub fn label(id: EntityId, name: &str) -> Self {
        Self::new(EntityType::Label, id, name)
    }

    fn new(entity_type: EntityType, id: EntityId, name: &str) -> Self {
        Self {
            id,
            entity_type,
            name: name.to_string(),
            claimed: false,
            status: "active".into(),
            investor: false,
            genre: None,
            label_id: None,
            reputation_score: None,
            created_at: NaiveDateTime::default(),
        }
    }

    pub fn claimed(mut self) -> Self {
        self.claimed = true;
        self
    }

    pub fn investor(mut self) -> Self {
        self.investor = true;
        self
    }

    pub fn genre(mut self, genre: &str) -> Self {
        self.genre = Some(genre.to_string());
        self
    }

    pub fn signed_to(mut self, label_id: EntityId) -> Self {
        self.label_id = Some(label_id);
        self
    }

    pub fn reputation(mut self, score: f64) -> Self {
        self.reputation_score = Some(score);
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }
}

const ARTIST_COLUMNS: &str =
    "id, name, claimed, status, investor, genre, label_id, reputation_score";
const LABEL_COLUMNS: &str =
    "id, name, claimed, status, investor, genre, NULL, reputation_score";

fn entity_from_row(entity_type: EntityType, row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        entity_type,
        name: row.get(1)?,
        claimed: row.get::<_, i64>(2)? != 0,
        status: row.get(3)?,
        investor: row.get::<_, i64>(4)? != 0,
        genre: row.get(5)?,
        label_id: row.get(6)?,
        reputation_score: row.get(7)?,
    })
}

fn entity_select(entity_type: EntityType) -> String {
    match entity_type {
        EntityType::Artist => format!("SELECT {ARTIST_COLUMNS} FROM artist"),
        EntityType::Label => format!("SELECT {LABEL_COLUMNS} FROM label"),
    }
}

fn follower_point(row: &Row<'_>) -> rusqlite::Result<FollowerPoint> {
    Ok(FollowerPoint {
        id: row.get(0)?,
        followers: row.get(1)?,
        captured_at: row.get(2)?,
    })
}

/// Convert one SQLite row into a JSON object keyed by column name.
fn row_to_json(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Value> {
    let mut map = Map::new();
    for (i, name) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::String(hex::encode(b)),
        };
        map.insert(name.clone(), value);
    }
    Ok(Value::Object(map))
}

impl ImpactStore {
    fn count_u64(
        &self,
        signal: &'static str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> SourceResult<u64> {
        self.conn
            .query_row(sql, params, |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(|e| SourceError::new(signal, e))
    }

    fn id_list(
        &self,
        signal: &'static str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> SourceResult<Vec<i64>> {
        let run = || -> rusqlite::Result<Vec<i64>> {
            let mut stmt = self.conn.prepare(sql)?;
            let ids = stmt
                .query_map(params, |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        };
        run().map_err(|e| SourceError::new(signal, e))
    }

    // ── Upstream writers ───────────────────────────────────────

    pub fn insert_entity(&self, e: &NewEntity) -> ImpactResult<()> {
        match e.entity_type {
            EntityType::Artist => {
                self.conn.execute(
                    "INSERT INTO artist (id, name, claimed, status, investor, genre,
                        label_id, reputation_score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        e.id, e.name, e.claimed as i64, e.status, e.investor as i64,
                        e.genre, e.label_id, e.reputation_score, e.created_at,
                    ],
                )?;
            }
            EntityType::Label => {
                self.conn.execute(
                    "INSERT INTO label (id, name, claimed, status, investor, genre,
                        reputation_score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        e.id, e.name, e.claimed as i64, e.status, e.investor as i64,
                        e.genre, e.reputation_score, e.created_at,
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub fn update_entity_status(
        &self,
        entity_type: EntityType,
        id: EntityId,
        status: &str,
    ) -> ImpactResult<()> {
        let sql = match entity_type {
            EntityType::Artist => "UPDATE artist SET status = ?1 WHERE id = ?2",
            EntityType::Label => "UPDATE label SET status = ?1 WHERE id = ?2",
        };
        self.conn.execute(sql, params![status, id])?;
        Ok(())
    }

    pub fn insert_radio_spin(&self, artist_id: EntityId, station: &str, at: NaiveDateTime) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO radio_spin (artist_id, station, played_at) VALUES (?1, ?2, ?3)",
            params![artist_id, station, at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_chart_entry(
        &self,
        artist_id: EntityId,
        chart: &str,
        position: i64,
        spins: i64,
        chart_date: NaiveDate,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO chart_entry (artist_id, chart, position, spins, chart_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![artist_id, chart, position, spins, chart_date],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_social_account(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        platform: &str,
        handle: &str,
        linked_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO social_account (entity_type, entity_id, platform, handle, linked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entity_type, entity_id, platform, handle, linked_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_release(&self, artist_id: EntityId, title: &str, released_at: NaiveDateTime) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO catalog_release (artist_id, title, released_at) VALUES (?1, ?2, ?3)",
            params![artist_id, title, released_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn delete_release(&self, release_id: i64) -> ImpactResult<()> {
        self.conn
            .execute("DELETE FROM catalog_release WHERE id = ?1", params![release_id])?;
        Ok(())
    }

    pub fn insert_video(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        title: &str,
        view_count: i64,
        published_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO video (entity_type, entity_id, title, view_count, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entity_type, entity_id, title, view_count, published_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_video_views(&self, video_id: i64, view_count: i64) -> ImpactResult<()> {
        self.conn.execute(
            "UPDATE video SET view_count = ?1 WHERE id = ?2",
            params![view_count, video_id],
        )?;
        Ok(())
    }

    pub fn insert_post(
        &self,
        title: &str,
        teaser: Option<&str>,
        tags: Option<&str>,
        body: Option<&str>,
        published_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO post (title, teaser, tags, body, published_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, teaser, tags, body, published_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Upsert the precomputed engagement-quality score.
    pub fn set_engagement_quality(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        score: f64,
        computed_at: NaiveDateTime,
    ) -> ImpactResult<()> {
        self.conn.execute(
            "INSERT INTO engagement_quality (entity_type, entity_id, score, computed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (entity_type, entity_id)
             DO UPDATE SET score = excluded.score, computed_at = excluded.computed_at",
            params![entity_type, entity_id, score, computed_at],
        )?;
        Ok(())
    }

    pub fn insert_playback_event(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        duration_secs: i64,
        played_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO playback_event (entity_type, entity_id, duration_secs, played_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entity_type, entity_id, duration_secs, played_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// `kind` is one of like, comment, share, save.
    pub fn insert_engagement_event(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        kind: &str,
        created_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO engagement_event (entity_type, entity_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entity_type, entity_id, kind, created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_spark(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        amount: f64,
        created_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO spark (entity_type, entity_id, amount, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![entity_type, entity_id, amount, created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_follower_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        followers: i64,
        captured_at: NaiveDateTime,
    ) -> ImpactResult<i64> {
        self.conn.execute(
            "INSERT INTO follower_snapshot (entity_type, entity_id, followers, captured_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entity_type, entity_id, followers, captured_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl SignalSource for ImpactStore {
    fn active_entities(&self, entity_type: EntityType) -> SourceResult<Vec<Entity>> {
        let run = || -> rusqlite::Result<Vec<Entity>> {
            let sql = format!("{} WHERE status = 'active' ORDER BY id", entity_select(entity_type));
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| entity_from_row(entity_type, row))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        };
        run().map_err(|e| SourceError::new("entities", e))
    }

    fn entity(&self, entity_type: EntityType, id: EntityId) -> SourceResult<Option<Entity>> {
        let sql = format!("{} WHERE id = ?1", entity_select(entity_type));
        self.conn
            .query_row(&sql, params![id], |row| entity_from_row(entity_type, row))
            .optional()
            .map_err(|e| SourceError::new("entities", e))
    }

    fn roster(&self, label_id: EntityId) -> SourceResult<Vec<Entity>> {
        let run = || -> rusqlite::Result<Vec<Entity>> {
            let sql = format!(
                "{} WHERE label_id = ?1 AND status = 'active' ORDER BY id",
                entity_select(EntityType::Artist)
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![label_id], |row| entity_from_row(EntityType::Artist, row))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        };
        run().map_err(|e| SourceError::new("roster", e))
    }

    fn spin_count(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<u64> {
        match entity_type {
            EntityType::Artist => self.count_u64(
                "radio_spins",
                "SELECT COUNT(*) FROM radio_spin
                 WHERE artist_id = ?1 AND played_at >= ?2 AND played_at < ?3",
                params![id, period.start_at(), period.end_exclusive()],
            ),
            EntityType::Label => self.count_u64(
                "radio_spins",
                "SELECT COUNT(*) FROM radio_spin s
                 JOIN artist a ON a.id = s.artist_id
                 WHERE a.label_id = ?1 AND a.status = 'active'
                   AND s.played_at >= ?2 AND s.played_at < ?3",
                params![id, period.start_at(), period.end_exclusive()],
            ),
        }
    }

    fn chart_totals(&self, artist_id: EntityId, period: &Period) -> SourceResult<ChartTotals> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(spins), 0), COUNT(*) FROM chart_entry
                 WHERE artist_id = ?1 AND chart_date >= ?2 AND chart_date <= ?3",
                params![artist_id, period.start, period.end],
                |row| {
                    Ok(ChartTotals {
                        spins: row.get::<_, i64>(0)?.max(0) as u64,
                        appearances: row.get::<_, i64>(1)?.max(0) as u64,
                    })
                },
            )
            .map_err(|e| SourceError::new("chart_entries", e))
    }

    fn social_account_ids(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> SourceResult<Vec<i64>> {
        self.id_list(
            "social_accounts",
            "SELECT id FROM social_account
             WHERE entity_type = ?1 AND entity_id = ?2 AND linked_at < ?3
             ORDER BY id",
            params![entity_type, id, period.end_exclusive()],
        )
    }

    fn release_ids(&self, artist_id: EntityId, period: &Period) -> SourceResult<Vec<i64>> {
        self.id_list(
            "releases",
            "SELECT id FROM catalog_release
             WHERE artist_id = ?1 AND released_at < ?2
             ORDER BY id",
            params![artist_id, period.end_exclusive()],
        )
    }

    fn videos(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<Vec<VideoRow>> {
        let run = || -> rusqlite::Result<Vec<VideoRow>> {
            let mut stmt = self.conn.prepare(
                "SELECT id, view_count FROM video
                 WHERE entity_type = ?1 AND entity_id = ?2 AND published_at < ?3
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![entity_type, id, period.end_exclusive()], |row| {
                    Ok(VideoRow {
                        id: row.get(0)?,
                        view_count: row.get::<_, i64>(1)?.max(0) as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        };
        run().map_err(|e| SourceError::new("videos", e))
    }

    fn mention_count(&self, name: &str, period: &Period) -> SourceResult<u64> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(0);
        }
        // SQLite's lower() only folds ASCII, so matching happens here.
        let run = || -> rusqlite::Result<u64> {
            let mut stmt = self.conn.prepare(
                "SELECT title, COALESCE(teaser, ''), COALESCE(tags, ''), COALESCE(body, '')
                 FROM post WHERE published_at >= ?1 AND published_at < ?2",
            )?;
            let mut rows = stmt.query(params![period.start_at(), period.end_exclusive()])?;
            let mut count = 0;
            while let Some(row) = rows.next()? {
                for i in 0..4 {
                    let field: String = row.get(i)?;
                    if field.to_lowercase().contains(&needle) {
                        count += 1;
                        break;
                    }
                }
            }
            Ok(count)
        };
        run().map_err(|e| SourceError::new("mentions", e))
    }

    fn engagement_quality(
        &self,
        entity_type: EntityType,
        id: EntityId,
    ) -> SourceResult<Option<EngagementQualityRow>> {
        self.conn
            .query_row(
                "SELECT id, score FROM engagement_quality WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, id],
                |row| Ok(EngagementQualityRow { id: row.get(0)?, score: row.get(1)? }),
            )
            .optional()
            .map_err(|e| SourceError::new("engagement_quality", e))
    }

    fn playback_count(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<u64> {
        self.count_u64(
            "playback_events",
            "SELECT COUNT(*) FROM playback_event
             WHERE entity_type = ?1 AND entity_id = ?2 AND played_at >= ?3 AND played_at < ?4",
            params![entity_type, id, period.start_at(), period.end_exclusive()],
        )
    }

    fn engagement_counts(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> SourceResult<EngagementCounts> {
        let run = || -> rusqlite::Result<EngagementCounts> {
            let mut stmt = self.conn.prepare(
                "SELECT kind, COUNT(*) FROM engagement_event
                 WHERE entity_type = ?1 AND entity_id = ?2 AND created_at >= ?3 AND created_at < ?4
                 GROUP BY kind",
            )?;
            let rows = stmt.query_map(
                params![entity_type, id, period.start_at(), period.end_exclusive()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64)),
            )?;
            let mut counts = EngagementCounts::default();
            for r in rows {
                let (kind, n) = r?;
                match kind.as_str() {
                    "like" => counts.likes += n,
                    "comment" => counts.comments += n,
                    "share" => counts.shares += n,
                    "save" => counts.saves += n,
                    other => log::debug!("ignoring unknown engagement kind '{other}'"),
                }
            }
            Ok(counts)
        };
        run().map_err(|e| SourceError::new("engagement_events", e))
    }

    fn spark_total(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM spark
                 WHERE entity_type = ?1 AND entity_id = ?2 AND created_at >= ?3 AND created_at < ?4",
                params![entity_type, id, period.start_at(), period.end_exclusive()],
                |row| row.get::<_, f64>(0),
            )
            .map_err(|e| SourceError::new("sparks", e))
    }

    fn follower_points(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> SourceResult<Vec<FollowerPoint>> {
        let run = || -> rusqlite::Result<Vec<FollowerPoint>> {
            let before = self
                .conn
                .query_row(
                    "SELECT id, followers, captured_at FROM follower_snapshot
                     WHERE entity_type = ?1 AND entity_id = ?2 AND captured_at < ?3
                     ORDER BY captured_at DESC, id DESC LIMIT 1",
                    params![entity_type, id, period.start_at()],
                    follower_point,
                )
                .optional()?;
            let first_inside = self
                .conn
                .query_row(
                    "SELECT id, followers, captured_at FROM follower_snapshot
                     WHERE entity_type = ?1 AND entity_id = ?2
                       AND captured_at >= ?3 AND captured_at < ?4
                     ORDER BY captured_at ASC, id ASC LIMIT 1",
                    params![entity_type, id, period.start_at(), period.end_exclusive()],
                    follower_point,
                )
                .optional()?;
            let last_inside = self
                .conn
                .query_row(
                    "SELECT id, followers, captured_at FROM follower_snapshot
                     WHERE entity_type = ?1 AND entity_id = ?2
                       AND captured_at >= ?3 AND captured_at < ?4
                     ORDER BY captured_at DESC, id DESC LIMIT 1",
                    params![entity_type, id, period.start_at(), period.end_exclusive()],
                    follower_point,
                )
                .optional()?;

            let mut points: Vec<FollowerPoint> = Vec::new();
            for p in [before.or(first_inside), last_inside].into_iter().flatten() {
                if points.iter().all(|q| q.id != p.id) {
                    points.push(p);
                }
            }
            Ok(points)
        };
        run().map_err(|e| SourceError::new("follower_snapshots", e))
    }

    fn source_row(&self, source: SourceRef) -> SourceResult<Option<Value>> {
        let run = || -> rusqlite::Result<Option<Value>> {
            let sql = format!("SELECT * FROM {} WHERE id = ?1", source.table.as_str());
            let mut stmt = self.conn.prepare(&sql)?;
            let columns: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            stmt.query_row(params![source.id], |row| row_to_json(row, &columns))
                .optional()
        };
        run().map_err(|e| SourceError::new(source.table.as_str(), e))
    }
}
