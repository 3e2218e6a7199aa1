//! Fairness / audit-receipt notifications.
//!
//! One receipt per ranked entity per window, sent after the ranking commit.
//! Delivery is best effort: failures are logged by the caller and never retried.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::{
    ranking_subsystem::RankingItem,
    types::{EntityId, EntityType, Interval, WindowId},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReceipt {
    pub receipt_id:  String,
    pub window_id:   WindowId,
    pub interval:    Interval,
    pub entity_type: EntityType,
    pub entity_id:   EntityId,
    pub rank:        u32,
    pub score:       f64,
    pub boosted:     bool,
    pub issued_at:   NaiveDateTime,
}

impl RankingReceipt {
    pub fn for_item(item: &RankingItem, interval: Interval, issued_at: NaiveDateTime) -> Self {
        Self {
            receipt_id: Uuid::new_v4().to_string(),
            window_id: item.window_id,
            interval,
            entity_type: item.entity_type,
            entity_id: item.entity_id,
            rank: item.rank,
            score: item.score,
            boosted: item.boosted,
            issued_at,
        }
    }
}

pub trait ReceiptSink: Send + Sync {
    fn notify(&self, receipt: &RankingReceipt) -> anyhow::Result<()>;
}

/// Default sink: writes receipts to the debug log.
#[derive(Debug, Default)]
pub struct LogReceiptSink;

impl ReceiptSink for LogReceiptSink {
    fn notify(&self, receipt: &RankingReceipt) -> anyhow::Result<()> {
        log::debug!(
            "receipt {}: {} {} rank {} in {} window {}",
            receipt.receipt_id,
            receipt.entity_type,
            receipt.entity_id,
            receipt.rank,
            receipt.interval,
            receipt.window_id
        );
        Ok(())
    }
}

/// Keeps every receipt in memory. Used by the runner summary and tests.
#[derive(Debug, Default)]
pub struct MemoryReceiptSink {
    receipts: Mutex<Vec<RankingReceipt>>,
}

impl MemoryReceiptSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipts(&self) -> Vec<RankingReceipt> {
        self.receipts.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ReceiptSink for MemoryReceiptSink {
    fn notify(&self, receipt: &RankingReceipt) -> anyhow::Result<()> {
        self.receipts
            .lock()
            .map_err(|_| anyhow::anyhow!("receipt buffer poisoned"))?
            .push(receipt.clone());
        Ok(())
    }
}

impl<T: ReceiptSink + ?Sized> ReceiptSink for std::sync::Arc<T> {
    fn notify(&self, receipt: &RankingReceipt) -> anyhow::Result<()> {
        (**self).notify(receipt)
    }
}
