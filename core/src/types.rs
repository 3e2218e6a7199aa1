//! Shared primitive types used across the scoring engine.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ImpactError;

/// Identifier of an artist or label. Ids are only unique within one type.
pub type EntityId = i64;

pub type WindowId = i64;

/// Identifier of a `score_history` row.
pub type HistoryId = i64;

/// The canonical batch-run identifier.
pub type RunId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Artist,
    Label,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Artist, EntityType::Label];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Label => "label",
        }
    }
}

impl FromStr for EntityType {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" | "artists" => Ok(Self::Artist),
            "label" | "labels" => Ok(Self::Label),
            other => Err(ImpactError::InvalidEntityType { value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// The window of this interval that contains `date`.
    ///
    /// Daily is the day itself, weekly runs Monday–Sunday,
    /// monthly runs from the first to the last day of the month.
    pub fn period_containing(&self, date: NaiveDate) -> Period {
        match self {
            Self::Daily => Period::new(date, date),
            Self::Weekly => {
                let start = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                Period::new(start, start + Duration::days(6))
            }
            Self::Monthly => {
                let start = date.with_day(1).unwrap_or(date);
                let next_month = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                };
                let end = next_month.map(|d| d - Duration::days(1)).unwrap_or(start);
                Period::new(start, end)
            }
        }
    }
}

impl FromStr for Interval {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ImpactError::InvalidInterval { value: other.to_string() }),
        }
    }
}

/// Store a string-backed enum as TEXT, using its `as_str` / `FromStr` pair.
macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value.as_str()?.parse().map_err(|e: $crate::error::ImpactError| {
                    rusqlite::types::FromSqlError::Other(Box::new(e))
                })
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum_sql!(EntityType);
text_enum_sql!(Interval);
pub(crate) use text_enum_sql;

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// First instant inside the period.
    pub fn start_at(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// First instant after the period. Queries use `ts >= start_at AND ts < end_exclusive`.
    pub fn end_exclusive(&self) -> NaiveDateTime {
        (self.end + Duration::days(1)).and_time(NaiveTime::MIN)
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start_at() && ts < self.end_exclusive()
    }
}
