//! Signal aggregation: the read-only data source capability.
//!
//! RULE: Scoring and verification read raw engagement data only through
//! `SignalSource`. Every query returns its own `Result` so a single failing
//! source can be degraded without aborting the whole computation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::{
    error::ImpactError,
    types::{text_enum_sql, EntityId, EntityType, Period},
};

/// A failed read from one raw-data source.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{signal} unavailable: {message}")]
pub struct SourceError {
    pub signal:  &'static str,
    pub message: String,
}

impl SourceError {
    pub fn new(signal: &'static str, err: impl std::fmt::Display) -> Self {
        Self { signal, message: err.to_string() }
    }
}

impl From<SourceError> for ImpactError {
    fn from(e: SourceError) -> Self {
        ImpactError::DataSourceUnavailable { reason: e.to_string() }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// An artist or label profile, owned by the upstream profile service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id:               EntityId,
    pub entity_type:      EntityType,
    pub name:             String,
    pub claimed:          bool,
    pub status:           String,
    pub investor:         bool,
    pub genre:            Option<String>,
    /// Artists only: the label whose roster this artist belongs to.
    pub label_id:         Option<EntityId>,
    pub reputation_score: Option<f64>,
}

impl Entity {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn source_ref(&self) -> SourceRef {
        let table = match self.entity_type {
            EntityType::Artist => SourceTable::Artist,
            EntityType::Label => SourceTable::Label,
        };
        SourceRef { table, id: self.id }
    }
}

/// Raw-data tables that lineage records may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Artist,
    Label,
    RadioSpin,
    ChartEntry,
    SocialAccount,
    CatalogRelease,
    Video,
    Post,
    EngagementQuality,
    PlaybackEvent,
    EngagementEvent,
    Spark,
    FollowerSnapshot,
}

impl SourceTable {
    /// The physical table name. Only these names are ever interpolated into SQL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Label => "label",
            Self::RadioSpin => "radio_spin",
            Self::ChartEntry => "chart_entry",
            Self::SocialAccount => "social_account",
            Self::CatalogRelease => "catalog_release",
            Self::Video => "video",
            Self::Post => "post",
            Self::EngagementQuality => "engagement_quality",
            Self::PlaybackEvent => "playback_event",
            Self::EngagementEvent => "engagement_event",
            Self::Spark => "spark",
            Self::FollowerSnapshot => "follower_snapshot",
        }
    }
}

impl FromStr for SourceTable {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let table = match s {
            "artist" => Self::Artist,
            "label" => Self::Label,
            "radio_spin" => Self::RadioSpin,
            "chart_entry" => Self::ChartEntry,
            "social_account" => Self::SocialAccount,
            "catalog_release" => Self::CatalogRelease,
            "video" => Self::Video,
            "post" => Self::Post,
            "engagement_quality" => Self::EngagementQuality,
            "playback_event" => Self::PlaybackEvent,
            "engagement_event" => Self::EngagementEvent,
            "spark" => Self::Spark,
            "follower_snapshot" => Self::FollowerSnapshot,
            other => {
                return Err(ImpactError::Other(anyhow::anyhow!("unknown source table '{other}'")))
            }
        };
        Ok(table)
    }
}

text_enum_sql!(SourceTable);

/// One raw row consulted while producing a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub table: SourceTable,
    pub id:    i64,
}

impl SourceRef {
    pub fn new(table: SourceTable, id: i64) -> Self {
        Self { table, id }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartTotals {
    pub spins:       u64,
    pub appearances: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoRow {
    pub id:         i64,
    pub view_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementQualityRow {
    pub id:    i64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub likes:    u64,
    pub comments: u64,
    pub shares:   u64,
    pub saves:    u64,
}

impl EngagementCounts {
    pub fn total(&self) -> u64 {
        self.likes + self.comments + self.shares + self.saves
    }

    /// Share of all engagement that is likes. Zero when there is no engagement.
    pub fn like_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.likes as f64 / total as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FollowerPoint {
    pub id:          i64,
    pub followers:   i64,
    pub captured_at: NaiveDateTime,
}

/// Query-by-entity access to every raw signal the engine consumes.
///
/// Period-bounded queries use the half-open range
/// `[period.start_at(), period.end_exclusive())`. Catalogue-style queries
/// (socials, releases, videos) count everything that existed by the end of
/// the period.
pub trait SignalSource {
    /// Active entities of one type, ordered by id.
    fn active_entities(&self, entity_type: EntityType) -> SourceResult<Vec<Entity>>;

    fn entity(&self, entity_type: EntityType, id: EntityId) -> SourceResult<Option<Entity>>;

    /// Active artists signed to `label_id`, ordered by id.
    fn roster(&self, label_id: EntityId) -> SourceResult<Vec<Entity>>;

    /// Radio spins in the period. For a label, spins of its roster artists.
    fn spin_count(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<u64>;

    fn chart_totals(&self, artist_id: EntityId, period: &Period) -> SourceResult<ChartTotals>;

    fn social_account_ids(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> SourceResult<Vec<i64>>;

    fn release_ids(&self, artist_id: EntityId, period: &Period) -> SourceResult<Vec<i64>>;

    fn videos(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<Vec<VideoRow>>;

    /// Posts in the period whose title, teaser, tags or body mention `name`
    /// (case-insensitive substring).
    fn mention_count(&self, name: &str, period: &Period) -> SourceResult<u64>;

    /// The precomputed engagement-quality aggregate, if one exists.
    fn engagement_quality(
        &self,
        entity_type: EntityType,
        id: EntityId,
    ) -> SourceResult<Option<EngagementQualityRow>>;

    fn playback_count(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<u64>;

    fn engagement_counts(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> SourceResult<EngagementCounts>;

    fn spark_total(&self, entity_type: EntityType, id: EntityId, period: &Period) -> SourceResult<f64>;

    /// Follower snapshots bracketing the period: the latest one at or before
    /// its start (or the first inside it) and the latest one inside it.
    fn follower_points(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> SourceResult<Vec<FollowerPoint>>;

    /// The full raw row as a JSON object, or `None` when it no longer exists.
    fn source_row(&self, source: SourceRef) -> SourceResult<Option<serde_json::Value>>;
}
