use thiserror::Error;

use crate::types::{HistoryId, WindowId};

#[derive(Error, Debug)]
pub enum ImpactError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid interval '{value}' (expected daily, weekly or monthly)")]
    InvalidInterval { value: String },

    #[error("Invalid entity type '{value}' (expected artist or label)")]
    InvalidEntityType { value: String },

    #[error("Invalid dispute status '{value}'")]
    InvalidDisputeStatus { value: String },

    #[error("Data source unavailable: {reason}")]
    DataSourceUnavailable { reason: String },

    #[error("Score history record {id} not found")]
    HistoryNotFound { id: HistoryId },

    #[error("Ranking window {id} not found")]
    WindowNotFound { id: WindowId },

    #[error("Dispute {id} not found")]
    DisputeNotFound { id: i64 },

    #[error("Dispute {id} is already {status}")]
    DisputeClosed { id: i64, status: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ImpactResult<T> = Result<T, ImpactError>;
