//! Integrity scorer: one 0–100 trust metric per entity and period.
//!
//! Starts at 100 and loses points for a low verification pass rate, a high
//! correction rate and every dispute filed. Each metric is persisted.

use serde::{Deserialize, Serialize};

use crate::{
    clock::RunClock,
    config::IntegrityConfig,
    error::ImpactResult,
    event::ImpactEvent,
    signals::SignalSource,
    store::ImpactStore,
    subsystem::{CycleContext, ImpactSubsystem},
    types::{EntityId, EntityType, Interval, Period},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityMetrics {
    pub entity_type:          EntityType,
    pub entity_id:            EntityId,
    pub period:               Period,
    pub scores_recorded:      u64,
    pub verifications_run:    u64,
    pub verifications_passed: u64,
    /// Percent; 100 when nothing was verified.
    pub pass_rate:            f64,
    pub corrections_applied:  u64,
    /// Σ |adjustment| over the period's corrections.
    pub total_adjustment:     f64,
    pub disputes_filed:       u64,
    pub disputes_resolved:    u64,
    pub integrity_score:      f64,
    pub calculated_at:        chrono::NaiveDateTime,
}

/// Pure scoring rule. Rates are percentages.
pub fn integrity_score(
    pass_rate: f64,
    correction_rate: f64,
    disputes: u64,
    cfg: &IntegrityConfig,
) -> f64 {
    let mut score = 100.0;
    if pass_rate < cfg.pass_rate_target {
        score -= cfg.pass_rate_penalty * (cfg.pass_rate_target - pass_rate);
    }
    if correction_rate > cfg.correction_rate_threshold {
        score -= (cfg.correction_penalty_factor * correction_rate).min(cfg.correction_penalty_cap);
    }
    score -= cfg.dispute_penalty * disputes as f64;
    (score.max(0.0) * 100.0).round() / 100.0
}

pub struct IntegrityScorer<'a> {
    store:  &'a ImpactStore,
    config: &'a IntegrityConfig,
    clock:  &'a RunClock,
}

impl<'a> IntegrityScorer<'a> {
    pub fn new(store: &'a ImpactStore, config: &'a IntegrityConfig, clock: &'a RunClock) -> Self {
        Self { store, config, clock }
    }

    pub fn calculate_integrity_metrics(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        period: &Period,
    ) -> ImpactResult<IntegrityMetrics> {
        let (from, until) = (period.start_at(), period.end_exclusive());
        let scores = self.store.count_history(entity_type, entity_id, from, until)?;
        let (run, passed) = self.store.verification_counts(entity_type, entity_id, from, until)?;
        let (corrections, total_adjustment) =
            self.store.correction_totals(entity_type, entity_id, from, until)?;
        let (filed, resolved) = self.store.dispute_totals(entity_type, entity_id, from, until)?;

        let pass_rate = if run == 0 { 100.0 } else { passed as f64 / run as f64 * 100.0 };
        let correction_rate =
            if scores == 0 { 0.0 } else { corrections as f64 / scores as f64 * 100.0 };

        let metrics = IntegrityMetrics {
            entity_type,
            entity_id,
            period: *period,
            scores_recorded: scores,
            verifications_run: run,
            verifications_passed: passed,
            pass_rate,
            corrections_applied: corrections,
            total_adjustment,
            disputes_filed: filed,
            disputes_resolved: resolved,
            integrity_score: integrity_score(pass_rate, correction_rate, filed, self.config),
            calculated_at: self.clock.now(),
        };
        self.store.insert_integrity_metric(&metrics)?;
        log::debug!(
            "{entity_type} {entity_id} integrity {:.2} (pass {:.1}%, corrections {}, disputes {})",
            metrics.integrity_score,
            pass_rate,
            corrections,
            filed
        );
        Ok(metrics)
    }
}

/// Batch stage: recomputes integrity for every active entity over the
/// current trust window.
#[derive(Debug, Default)]
pub struct IntegritySubsystem;

impl IntegritySubsystem {
    pub fn new() -> Self {
        Self
    }
}

impl ImpactSubsystem for IntegritySubsystem {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn update(
        &mut self,
        ctx: &CycleContext<'_>,
        _events_in: &[ImpactEvent],
    ) -> ImpactResult<Vec<ImpactEvent>> {
        let scorer = IntegrityScorer::new(ctx.store, &ctx.config.integrity, ctx.clock);
        let interval: Interval = ctx.config.trust.interval;
        let period = interval.period_containing(ctx.clock.today());
        let mut events = Vec::new();
        for entity_type in EntityType::ALL {
            for entity in ctx.store.active_entities(entity_type)? {
                if ctx.cancel.is_cancelled() {
                    return Ok(events);
                }
                let m = scorer.calculate_integrity_metrics(entity_type, entity.id, &period)?;
                events.push(ImpactEvent::IntegrityCalculated {
                    entity_type,
                    entity_id: entity.id,
                    integrity_score: m.integrity_score,
                });
            }
        }
        Ok(events)
    }
}
