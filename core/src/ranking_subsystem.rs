//! Ranking window manager and the batch ranking stage.
//!
//! For each configured interval the current window is resolved (or created),
//! every active entity is scored, and the `(window, type)` ranking rows are
//! swapped in one transaction together with their audit history. Readers
//! never see a partially written window.
//!
//! DESIGN RULE: order is decided on the unmultiplied score. The investor
//! multiplier only changes the stored score, never the rank.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditRecorder, FormulaWeights, ScoreCalculation, ScoreModifiers},
    clock::RunClock,
    config::ImpactConfig,
    error::{ImpactError, ImpactResult},
    event::ImpactEvent,
    receipt::{RankingReceipt, ReceiptSink},
    scoring::{ScoreCalculator, ScoreCard},
    signals::{Entity, SignalSource},
    store::ImpactStore,
    subsystem::{CancelToken, CycleContext, ImpactSubsystem},
    types::{EntityType, Interval, Period, WindowId},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingWindow {
    pub id:           WindowId,
    pub interval:     Interval,
    pub window_start: NaiveDate,
    pub window_end:   NaiveDate,
    pub created_at:   chrono::NaiveDateTime,
}

impl RankingWindow {
    pub fn period(&self) -> Period {
        Period::new(self.window_start, self.window_end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDeltas {
    /// `prev_rank - rank`; positive means the entity climbed.
    pub rank_change: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingItem {
    pub window_id:   WindowId,
    pub entity_type: EntityType,
    pub entity_id:   i64,
    pub rank:        u32,
    /// Stored score, including the investor multiplier when `boosted`.
    pub score:       f64,
    /// Score the rank was decided on.
    pub base_score:  f64,
    pub boosted:     bool,
    pub prev_rank:   Option<u32>,
    pub deltas:      Option<RankDeltas>,
}

/// Outcome of ranking one entity type within a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeRanking {
    pub entity_type:     Option<EntityType>,
    pub ranked:          usize,
    /// Entities ranked with at least one factor degraded to 0.
    pub degraded:        usize,
    /// Entities left out because none of their sources could be read.
    pub skipped:         usize,
    pub receipts_failed: usize,
    pub cancelled:       bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub interval:  Interval,
    pub window_id: WindowId,
    pub period:    Period,
    pub types:     Vec<TypeRanking>,
}

impl RankingReport {
    pub fn ranked(&self, entity_type: EntityType) -> usize {
        self.types
            .iter()
            .find(|t| t.entity_type == Some(entity_type))
            .map(|t| t.ranked)
            .unwrap_or(0)
    }

    pub fn cancelled(&self) -> bool {
        self.types.iter().any(|t| t.cancelled)
    }
}

pub struct RankingManager<'a> {
    store:  &'a ImpactStore,
    config: &'a ImpactConfig,
    clock:  &'a RunClock,
    sink:   &'a dyn ReceiptSink,
    cancel: &'a CancelToken,
}

impl<'a> RankingManager<'a> {
    pub fn new(
        store: &'a ImpactStore,
        config: &'a ImpactConfig,
        clock: &'a RunClock,
        sink: &'a dyn ReceiptSink,
        cancel: &'a CancelToken,
    ) -> Self {
        Self { store, config, clock, sink, cancel }
    }

    /// Idempotent: the same `(interval, window_start)` always yields the same id.
    pub fn get_or_create_window(
        &self,
        interval: Interval,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> ImpactResult<WindowId> {
        self.store
            .ensure_window(interval, window_start, window_end, self.clock.now())
    }

    pub fn get_previous_window(
        &self,
        interval: Interval,
        window_start: NaiveDate,
    ) -> ImpactResult<Option<WindowId>> {
        self.store.previous_window(interval, window_start)
    }

    /// Rank every active entity of both types in the current window of `interval`.
    pub fn compute_for_interval(&self, interval: Interval) -> ImpactResult<RankingReport> {
        let period = interval.period_containing(self.clock.today());
        let window_id = self.get_or_create_window(interval, period.start, period.end)?;
        let previous = self.get_previous_window(interval, period.start)?;
        log::info!(
            "Ranking {interval} window {window_id} ({}..={}), previous={previous:?}",
            period.start,
            period.end
        );

        let mut report = RankingReport { interval, window_id, period, types: Vec::new() };
        for entity_type in EntityType::ALL {
            let outcome = self.rank_type(interval, window_id, previous, &period, entity_type)?;
            let cancelled = outcome.cancelled;
            report.types.push(outcome);
            if cancelled {
                log::warn!("Ranking of {interval} window {window_id} cancelled at {entity_type}");
                break;
            }
        }
        Ok(report)
    }

    fn rank_type(
        &self,
        interval: Interval,
        window_id: WindowId,
        previous: Option<WindowId>,
        period: &Period,
        entity_type: EntityType,
    ) -> ImpactResult<TypeRanking> {
        let mut outcome = TypeRanking { entity_type: Some(entity_type), ..Default::default() };

        let entities = self.store.active_entities(entity_type)?;
        let Some(scored) = self.score_entities(&entities, period)? else {
            outcome.cancelled = true;
            return Ok(outcome);
        };

        let mut cards: Vec<(&Entity, ScoreCard)> = Vec::with_capacity(scored.len());
        for (entity, result) in entities.iter().zip(scored) {
            match result {
                Ok(card) => cards.push((entity, card)),
                Err(e) => {
                    log::warn!("Skipping {entity_type} {}: {e}", entity.id);
                    outcome.skipped += 1;
                }
            }
        }
        cards.sort_by(|(_, a), (_, b)| {
            b.score
                .total_cmp(&a.score)
                .then(a.entity_id.cmp(&b.entity_id))
        });

        if self.cancel.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        let prev_ranks = match previous {
            Some(prev) => self.store.ranks_in_window(prev, entity_type)?,
            None => Default::default(),
        };
        let ranking = &self.config.ranking;
        let now = self.clock.now();
        let audit = AuditRecorder::new(self.store);

        let tx = self.store.transaction()?;
        self.store.delete_ranking_items(window_id, entity_type)?;
        let mut items = Vec::with_capacity(cards.len());
        for (i, (entity, card)) in cards.iter().enumerate() {
            let rank = (i + 1) as u32;
            let prev_rank = prev_ranks.get(&card.entity_id).copied();
            let boosted = ranking.apply_investor_multiplier && entity.investor;
            let multiplier = if boosted { ranking.investor_multiplier } else { 1.0 };
            let item = RankingItem {
                window_id,
                entity_type,
                entity_id: card.entity_id,
                rank,
                score: card.score * multiplier,
                base_score: card.score,
                boosted,
                prev_rank,
                deltas: prev_rank.map(|prev| RankDeltas { rank_change: prev as i64 - rank as i64 }),
            };
            self.store.insert_ranking_item(&item)?;

            let history_id = audit.record_score_calculation(&ScoreCalculation {
                entity_type,
                entity_id: card.entity_id,
                score_value: item.score,
                period_type: interval.as_str().to_string(),
                period: *period,
                input_counts: serde_json::to_value(&card.inputs)?,
                factor_breakdown: serde_json::to_value(&card.factors)?,
                modifiers: ScoreModifiers { investor_multiplier: multiplier, ..Default::default() },
                weights: FormulaWeights::Additive(self.config.scoring.clone()),
                calculated_at: now,
            })?;
            audit.record_sources(history_id, &card.sources)?;

            if card.is_degraded() {
                outcome.degraded += 1;
            }
            items.push(item);
        }
        self.store.invalidate_leaderboard_cache(window_id)?;
        tx.commit()?;
        outcome.ranked = items.len();

        for item in &items {
            let receipt = RankingReceipt::for_item(item, interval, now);
            if let Err(e) = self.sink.notify(&receipt) {
                log::warn!(
                    "Receipt for {entity_type} {} in window {window_id} failed: {e}",
                    item.entity_id
                );
                outcome.receipts_failed += 1;
            }
        }

        log::info!(
            "{interval} window {window_id}: ranked {} {entity_type}s ({} degraded, {} skipped)",
            outcome.ranked,
            outcome.degraded,
            outcome.skipped
        );
        Ok(outcome)
    }

    /// Score entities, in parallel when the store can hand out extra
    /// connections. Returns `None` if cancelled part way.
    fn score_entities(
        &self,
        entities: &[Entity],
        period: &Period,
    ) -> ImpactResult<Option<Vec<ImpactResult<ScoreCard>>>> {
        let workers = self.config.ranking.workers.max(1).min(entities.len().max(1));
        if workers == 1 || !self.store.is_shared() {
            let calc = ScoreCalculator::new(self.store, &self.config.scoring);
            let mut out = Vec::with_capacity(entities.len());
            for entity in entities {
                if self.cancel.is_cancelled() {
                    return Ok(None);
                }
                out.push(calc.compute(entity, period));
            }
            return Ok(Some(out));
        }

        let chunk = entities.len().div_ceil(workers);
        let weights = &self.config.scoring;
        let cancel = self.cancel;
        let results: Vec<ImpactResult<Option<Vec<ImpactResult<ScoreCard>>>>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = entities
                    .chunks(chunk)
                    .map(|slice| {
                        let store = self.store.reopen();
                        scope.spawn(move || -> ImpactResult<Option<Vec<ImpactResult<ScoreCard>>>> {
                            let store = store?;
                            let calc = ScoreCalculator::new(&store, weights);
                            let mut out = Vec::with_capacity(slice.len());
                            for entity in slice {
                                if cancel.is_cancelled() {
                                    return Ok(None);
                                }
                                out.push(calc.compute(entity, period));
                            }
                            Ok(Some(out))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(ImpactError::Other(anyhow::anyhow!("scoring worker panicked")))
                        })
                    })
                    .collect()
            });

        let mut out = Vec::with_capacity(entities.len());
        for part in results {
            match part? {
                Some(cards) => out.extend(cards),
                None => return Ok(None),
            }
        }
        log::debug!("Scored {} entities on {workers} workers", out.len());
        Ok(Some(out))
    }
}

/// Batch stage: ranks every configured interval once per cycle.
pub struct RankingSubsystem {
    sink: Box<dyn ReceiptSink>,
}

impl RankingSubsystem {
    pub fn new(sink: Box<dyn ReceiptSink>) -> Self {
        Self { sink }
    }
}

impl ImpactSubsystem for RankingSubsystem {
    fn name(&self) -> &'static str {
        "ranking"
    }

    fn update(
        &mut self,
        ctx: &CycleContext<'_>,
        _events_in: &[ImpactEvent],
    ) -> ImpactResult<Vec<ImpactEvent>> {
        let manager =
            RankingManager::new(ctx.store, ctx.config, ctx.clock, self.sink.as_ref(), ctx.cancel);
        let mut events = Vec::new();
        for interval in &ctx.config.ranking.intervals {
            let report = manager.compute_for_interval(*interval)?;
            for t in &report.types {
                let Some(entity_type) = t.entity_type else { continue };
                if t.cancelled {
                    events.push(ImpactEvent::RankingCancelled { interval: *interval, entity_type });
                } else {
                    events.push(ImpactEvent::WindowRanked {
                        interval: *interval,
                        window_id: report.window_id,
                        entity_type,
                        ranked: t.ranked,
                        degraded: t.degraded,
                        skipped: t.skipped,
                        receipts_failed: t.receipts_failed,
                    });
                }
            }
            if report.cancelled() {
                break;
            }
        }
        Ok(events)
    }
}
