//! Leaderboard read path: time-boxed cache, trend snapshots and featured entries.
//!
//! The cache is disposable. A missing, expired or unreadable entry is
//! recomputed from ranking rows, so correctness never depends on it.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    clock::RunClock,
    config::CacheConfig,
    error::{ImpactError, ImpactResult},
    signals::SignalSource,
    store::ImpactStore,
    types::{text_enum_sql, EntityId, EntityType, Interval, Period, WindowId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Static,
    New,
}

impl Trend {
    pub fn between(previous_rank: Option<u32>, rank: u32) -> Self {
        match previous_rank {
            None => Self::New,
            Some(prev) if prev > rank => Self::Up,
            Some(prev) if prev < rank => Self::Down,
            Some(_) => Self::Static,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Static => "static",
            Self::New => "new",
        }
    }
}

impl FromStr for Trend {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "static" => Ok(Self::Static),
            "new" => Ok(Self::New),
            other => Err(ImpactError::Other(anyhow::anyhow!("unknown trend '{other}'"))),
        }
    }
}

text_enum_sql!(Trend);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank:          u32,
    pub id:            EntityId,
    pub name:          String,
    pub score:         f64,
    pub previous_rank: Option<u32>,
    /// `previous_rank - rank`; positive means the entity climbed.
    pub rank_movement: Option<i64>,
    pub trend:         Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entity_type: EntityType,
    pub interval:    Interval,
    pub window_id:   Option<WindowId>,
    pub period:      Period,
    pub category:    Option<String>,
    pub entries:     Vec<LeaderboardEntry>,
    pub from_cache:  bool,
}

/// A ranking item joined with entity display data.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub rank:      u32,
    pub entity_id: EntityId,
    pub name:      String,
    pub genre:     Option<String>,
    pub score:     f64,
    pub prev_rank: Option<u32>,
}

impl LeaderboardRow {
    fn into_entry(self) -> LeaderboardEntry {
        LeaderboardEntry {
            rank: self.rank,
            id: self.entity_id,
            name: self.name,
            score: self.score,
            previous_rank: self.prev_rank,
            rank_movement: self.prev_rank.map(|prev| prev as i64 - self.rank as i64),
            trend: Trend::between(self.prev_rank, self.rank),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub window_id:   WindowId,
    pub entity_type: EntityType,
    pub category:    Option<String>,
    pub entity_id:   EntityId,
    pub rank:        u32,
    pub score:       f64,
    pub prev_rank:   Option<u32>,
    pub trend:       Trend,
    pub captured_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturedEntry {
    pub id:          i64,
    pub entity_type: EntityType,
    pub entity_id:   EntityId,
    pub headline:    String,
    pub position:    i64,
    pub featured_at: NaiveDateTime,
    pub expires_at:  NaiveDateTime,
}

pub struct LeaderboardService<'a> {
    store:  &'a ImpactStore,
    config: &'a CacheConfig,
    clock:  &'a RunClock,
}

impl<'a> LeaderboardService<'a> {
    pub fn new(store: &'a ImpactStore, config: &'a CacheConfig, clock: &'a RunClock) -> Self {
        Self { store, config, clock }
    }

    /// Leaderboard for the current window of `interval`. `limit == 0` means
    /// the configured default. `category` filters by genre and is part of
    /// the cache key.
    pub fn get_leaderboard(
        &self,
        entity_type: EntityType,
        interval: Interval,
        category: Option<&str>,
        limit: usize,
    ) -> ImpactResult<Leaderboard> {
        let mut board = self.full_leaderboard(entity_type, interval, category)?;
        let limit = if limit == 0 { self.config.default_limit } else { limit };
        board.entries.truncate(limit);
        Ok(board)
    }

    /// Entities that climbed since the previous window, biggest jump first.
    pub fn get_trending_entries(
        &self,
        entity_type: EntityType,
        interval: Interval,
        limit: usize,
    ) -> ImpactResult<Vec<LeaderboardEntry>> {
        let board = self.full_leaderboard(entity_type, interval, None)?;
        let mut climbers: Vec<LeaderboardEntry> = board
            .entries
            .into_iter()
            .filter(|e| e.previous_rank.is_some_and(|prev| prev > e.rank))
            .collect();
        climbers.sort_by(|a, b| {
            b.rank_movement
                .cmp(&a.rank_movement)
                .then(a.rank.cmp(&b.rank))
        });
        climbers.truncate(limit);
        Ok(climbers)
    }

    pub fn get_featured_entries(&self, entity_type: EntityType) -> ImpactResult<Vec<FeaturedEntry>> {
        self.store.active_featured_entries(entity_type, self.clock.now())
    }

    /// Curate an entity onto the featured list for `hours`.
    pub fn feature_entry(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        headline: &str,
        position: i64,
        hours: i64,
    ) -> ImpactResult<i64> {
        if self.store.entity(entity_type, entity_id)?.is_none() {
            return Err(ImpactError::Other(anyhow::anyhow!(
                "cannot feature unknown {entity_type} {entity_id}"
            )));
        }
        let now = self.clock.now();
        let id = self.store.insert_featured_entry(
            entity_type,
            entity_id,
            headline,
            position,
            now,
            now + Duration::hours(hours),
        )?;
        log::info!("Featured {entity_type} {entity_id} for {hours}h: {headline}");
        Ok(id)
    }

    /// Drop expired cache entries. Returns how many were removed.
    pub fn purge_expired(&self) -> ImpactResult<usize> {
        let removed = self.store.purge_leaderboard_cache(self.clock.now())?;
        if removed > 0 {
            log::debug!("Purged {removed} expired leaderboard cache entries");
        }
        Ok(removed)
    }

    pub fn snapshot_history(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> ImpactResult<Vec<SnapshotRow>> {
        self.store.snapshots_for_entity(entity_type, entity_id)
    }

    fn full_leaderboard(
        &self,
        entity_type: EntityType,
        interval: Interval,
        category: Option<&str>,
    ) -> ImpactResult<Leaderboard> {
        let period = interval.period_containing(self.clock.today());
        let category = category.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty());
        let mut board = Leaderboard {
            entity_type,
            interval,
            window_id: None,
            period,
            category: category.clone(),
            entries: Vec::new(),
            from_cache: false,
        };

        let Some(window) = self.store.find_window(interval, period.start)? else {
            log::debug!("No {interval} window starting {} yet", period.start);
            return Ok(board);
        };
        board.window_id = Some(window.id);

        let key = cache_key(entity_type, interval, window.id, category.as_deref());
        let now = self.clock.now();
        if let Some(payload) = self.store.leaderboard_cache_get(&key, now)? {
            match serde_json::from_str::<Vec<LeaderboardEntry>>(&payload) {
                Ok(entries) => {
                    log::debug!("Leaderboard cache hit: {key}");
                    board.entries = entries;
                    board.from_cache = true;
                    return Ok(board);
                }
                Err(e) => log::warn!("Discarding unreadable cache entry {key}: {e}"),
            }
        }
        log::debug!("Leaderboard cache miss: {key}");

        let entries: Vec<LeaderboardEntry> = self
            .store
            .leaderboard_rows(window.id, entity_type)?
            .into_iter()
            .filter(|row| match &category {
                Some(c) => row.genre.as_deref().is_some_and(|g| g.trim().to_lowercase() == *c),
                None => true,
            })
            .map(LeaderboardRow::into_entry)
            .collect();

        let tx = self.store.transaction()?;
        self.store.leaderboard_cache_put(
            &key,
            entity_type,
            interval,
            window.id,
            category.as_deref(),
            &serde_json::to_string(&entries)?,
            now,
            now + Duration::hours(self.config.ttl_hours),
        )?;
        for entry in &entries {
            self.store.insert_leaderboard_snapshot(&SnapshotRow {
                window_id: window.id,
                entity_type,
                category: category.clone(),
                entity_id: entry.id,
                rank: entry.rank,
                score: entry.score,
                prev_rank: entry.previous_rank,
                trend: entry.trend,
                captured_at: now,
            })?;
        }
        tx.commit()?;

        board.entries = entries;
        Ok(board)
    }
}

pub fn cache_key(
    entity_type: EntityType,
    interval: Interval,
    window_id: WindowId,
    category: Option<&str>,
) -> String {
    format!(
        "leaderboard:{entity_type}:{interval}:{window_id}:{}",
        category.unwrap_or("all")
    )
}
