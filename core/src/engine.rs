//! The batch engine: one cycle per scheduled run.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Ranking        (every configured interval)
//!   2. Trust scoring  (normalized trust history)
//!   3. Verification   (bulk replay of the day's history)
//!   4. Integrity      (per-entity integrity metrics)
//!
//! RULES:
//!   - Subsystems execute in registration order, once per cycle.
//!   - No subsystem calls another subsystem's functions directly.
//!   - Every event is recorded in the event log.
//!   - Cancellation is checked per entity and cleared when the cycle ends.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

use crate::{
    clock::RunClock,
    command::{CommandOutcome, OperatorCommand},
    config::ImpactConfig,
    corrections::CorrectionManager,
    error::ImpactResult,
    event::{EventLogEntry, ImpactEvent},
    integrity_subsystem::{IntegritySubsystem, IntegrityScorer},
    leaderboard::LeaderboardService,
    ranking_subsystem::{RankingManager, RankingSubsystem},
    receipt::{LogReceiptSink, ReceiptSink},
    store::ImpactStore,
    subsystem::{CancelToken, CycleContext, ImpactSubsystem},
    trust_score_subsystem::TrustScoreSubsystem,
    types::{Period, RunId},
    verification_subsystem::{VerificationEngine, VerificationSubsystem},
};

pub struct ImpactEngine {
    pub run_id: RunId,
    pub clock:  RunClock,
    config:     ImpactConfig,
    store:      ImpactStore,
    cancel:     CancelToken,
    sink:       Arc<dyn ReceiptSink>,
    subsystems: Vec<Box<dyn ImpactSubsystem>>,
    cycle:      u64,
    initialized: bool,
}

impl ImpactEngine {
    pub fn new(run_id: RunId, config: ImpactConfig, store: ImpactStore, clock: RunClock) -> Self {
        Self {
            run_id,
            clock,
            config,
            store,
            cancel: CancelToken::new(),
            sink: Arc::new(LogReceiptSink),
            subsystems: Vec::new(),
            cycle: 0,
            initialized: false,
        }
    }

    /// Build a fully wired engine with all subsystems registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(
        run_id: RunId,
        config: ImpactConfig,
        store: ImpactStore,
        clock: RunClock,
        sink: Arc<dyn ReceiptSink>,
    ) -> Self {
        let mut engine = ImpactEngine::new(run_id, config, store, clock);
        engine.register(Box::new(RankingSubsystem::new(Box::new(Arc::clone(&sink)))));
        engine.sink = sink;
        engine.register(Box::new(TrustScoreSubsystem::new()));
        engine.register(Box::new(VerificationSubsystem::new()));
        engine.register(Box::new(IntegritySubsystem::new()));
        engine
    }

    /// Register a subsystem. Call in the documented execution order.
    pub fn register(&mut self, subsystem: Box<dyn ImpactSubsystem>) {
        self.subsystems.push(subsystem);
    }

    pub fn store(&self) -> &ImpactStore {
        &self.store
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Handle for cancelling the running cycle from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run one cycle at the clock's current instant.
    pub fn run_cycle(&mut self) -> ImpactResult<Vec<ImpactEvent>> {
        self.ensure_initialized()?;
        self.cycle += 1;
        let cycle = self.cycle;

        let started = ImpactEvent::CycleStarted { cycle, as_of: self.clock.today() };
        self.log_event(cycle, "engine", &started)?;
        let mut cycle_events = vec![started];

        let ctx = CycleContext {
            run_id: &self.run_id,
            cycle,
            clock: &self.clock,
            store: &self.store,
            config: &self.config,
            cancel: &self.cancel,
        };
        for subsystem in &mut self.subsystems {
            let new_events = subsystem.update(&ctx, &cycle_events)?;
            for event in &new_events {
                log_event(&self.store, &self.run_id, &self.clock, cycle, subsystem.name(), event)?;
            }
            cycle_events.extend(new_events);
            if self.cancel.is_cancelled() {
                log::warn!("Cycle {cycle} cancelled after {}", subsystem.name());
                break;
            }
        }

        let completed = ImpactEvent::CycleCompleted { cycle };
        self.log_event(cycle, "engine", &completed)?;
        cycle_events.push(completed);
        self.cancel.reset();
        Ok(cycle_events)
    }

    /// Run `n` cycles, moving a fixed clock forward one day after each.
    pub fn run_cycles(&mut self, n: u64) -> ImpactResult<()> {
        for _ in 0..n {
            self.run_cycle()?;
            self.clock.advance(Duration::days(1));
        }
        Ok(())
    }

    /// Apply one operator command and log it against the current cycle.
    pub fn apply_command(&mut self, command: &OperatorCommand) -> ImpactResult<CommandOutcome> {
        self.ensure_initialized()?;
        let cycle = self.cycle;
        let received = ImpactEvent::OperatorCommandReceived {
            cycle,
            command_type: command.type_name().to_string(),
        };
        self.log_event(cycle, "operator", &received)?;

        let (events, result) = self.execute(command)?;
        for event in &events {
            self.log_event(cycle, "operator", event)?;
        }
        let mut all = vec![received];
        all.extend(events);
        Ok(CommandOutcome { events: all, result })
    }

    /// Query events for a specific cycle from the store.
    pub fn store_events_for_cycle(&self, cycle: u64) -> ImpactResult<Vec<EventLogEntry>> {
        self.store.events_for_cycle(&self.run_id, cycle)
    }

    fn execute(
        &self,
        command: &OperatorCommand,
    ) -> ImpactResult<(Vec<ImpactEvent>, serde_json::Value)> {
        let (store, config, clock) = (&self.store, &self.config, &self.clock);
        match command {
            OperatorCommand::RankInterval { interval } => {
                let manager = RankingManager::new(store, config, clock, self.sink.as_ref(), &self.cancel);
                let report = manager.compute_for_interval(*interval)?;
                let events = report
                    .types
                    .iter()
                    .filter_map(|t| {
                        t.entity_type.map(|entity_type| ImpactEvent::WindowRanked {
                            interval: *interval,
                            window_id: report.window_id,
                            entity_type,
                            ranked: t.ranked,
                            degraded: t.degraded,
                            skipped: t.skipped,
                            receipts_failed: t.receipts_failed,
                        })
                    })
                    .collect();
                Ok((events, serde_json::to_value(&report)?))
            }
            OperatorCommand::VerifyScore { history_id } => {
                let result = VerificationEngine::new(store, config, clock).verify_score(*history_id)?;
                let event = ImpactEvent::ScoreVerified {
                    history_id: result.history_id,
                    entity_type: result.entity_type,
                    entity_id: result.entity_id,
                    status: result.status,
                    score_difference: result.score_difference,
                };
                Ok((vec![event], serde_json::to_value(&result)?))
            }
            OperatorCommand::BulkVerify { start, end, limit } => {
                let report = VerificationEngine::new(store, config, clock)
                    .run_bulk_verification(*start, *end, *limit, &self.cancel)?;
                let event = ImpactEvent::BulkVerificationCompleted {
                    verified: report.verified,
                    passed: report.passed,
                    failed: report.failed,
                    errors: report.errors,
                    cancelled: report.cancelled,
                };
                Ok((vec![event], serde_json::to_value(&report)?))
            }
            OperatorCommand::RecordCorrection(correction) => {
                let record = CorrectionManager::new(store, clock).record_correction(correction)?;
                let event = ImpactEvent::CorrectionRecorded {
                    correction_id: record.id,
                    history_id: record.history_id,
                    adjustment_amount: record.adjustment_amount,
                };
                Ok((vec![event], serde_json::to_value(&record)?))
            }
            OperatorCommand::FileDispute(dispute) => {
                let record = CorrectionManager::new(store, clock).create_dispute(dispute)?;
                let event = ImpactEvent::DisputeFiled {
                    dispute_id: record.id,
                    history_id: record.history_id,
                    dispute_type: record.dispute_type.clone(),
                };
                Ok((vec![event], serde_json::to_value(&record)?))
            }
            OperatorCommand::ResolveDispute { dispute_id, resolution } => {
                let record =
                    CorrectionManager::new(store, clock).update_dispute_status(*dispute_id, resolution)?;
                let event = ImpactEvent::DisputeUpdated { dispute_id: record.id, status: record.status };
                Ok((vec![event], serde_json::to_value(&record)?))
            }
            OperatorCommand::ComputeIntegrity { entity_type, entity_id, start, end } => {
                let metrics = IntegrityScorer::new(store, &config.integrity, clock)
                    .calculate_integrity_metrics(*entity_type, *entity_id, &Period::new(*start, *end))?;
                let event = ImpactEvent::IntegrityCalculated {
                    entity_type: *entity_type,
                    entity_id: *entity_id,
                    integrity_score: metrics.integrity_score,
                };
                Ok((vec![event], serde_json::to_value(&metrics)?))
            }
            OperatorCommand::FeatureEntry { entity_type, entity_id, headline, position, hours } => {
                let id = LeaderboardService::new(store, &config.cache, clock)
                    .feature_entry(*entity_type, *entity_id, headline, *position, *hours)?;
                let event = ImpactEvent::EntryFeatured {
                    featured_id: id,
                    entity_type: *entity_type,
                    entity_id: *entity_id,
                };
                Ok((vec![event], json!({ "featured_id": id })))
            }
            OperatorCommand::PurgeCache => {
                let removed = LeaderboardService::new(store, &config.cache, clock).purge_expired()?;
                Ok((vec![ImpactEvent::CachePurged { removed }], json!({ "removed": removed })))
            }
        }
    }

    fn ensure_initialized(&mut self) -> ImpactResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.store
            .insert_run(&self.run_id, env!("CARGO_PKG_VERSION"), self.clock.now())?;
        let init = ImpactEvent::RunInitialized {
            run_id: self.run_id.clone(),
            as_of: self.clock.today(),
        };
        self.log_event(0, "engine", &init)?;
        self.initialized = true;
        Ok(())
    }

    fn log_event(&self, cycle: u64, subsystem: &str, event: &ImpactEvent) -> ImpactResult<()> {
        log_event(&self.store, &self.run_id, &self.clock, cycle, subsystem, event)
    }
}

fn log_event(
    store: &ImpactStore,
    run_id: &str,
    clock: &RunClock,
    cycle: u64,
    subsystem: &str,
    event: &ImpactEvent,
) -> ImpactResult<()> {
    let entry = EventLogEntry {
        id:         None,
        run_id:     run_id.to_string(),
        cycle,
        subsystem:  subsystem.to_string(),
        event_type: event.type_name().to_string(),
        payload:    serde_json::to_string(event)?,
        created_at: clock.now(),
    };
    store.append_event(&entry)
}
