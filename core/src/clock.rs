//! Run clock: the single source of "now" for window resolution and cache expiry.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunClock {
    /// When set, every reading returns this instant. Used by tests and replays.
    fixed: Option<NaiveDateTime>,
}

impl RunClock {
    pub fn system() -> Self {
        Self { fixed: None }
    }

    pub fn fixed(at: NaiveDateTime) -> Self {
        Self { fixed: Some(at) }
    }

    /// Fixed clock at midday of `date`.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::fixed(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }

    pub fn now(&self) -> NaiveDateTime {
        self.fixed.unwrap_or_else(|| Utc::now().naive_utc())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Move a fixed clock forward. No-op for the system clock.
    pub fn advance(&mut self, by: chrono::Duration) {
        if let Some(at) = self.fixed.as_mut() {
            *at += by;
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::system()
    }
}
