//! Subsystem trait and per-cycle context.
//!
//! RULE: Every batch stage implements ImpactSubsystem.
//! The engine calls update() on each registered subsystem
//! in registration order, once per cycle.
//! Execution order is fixed and documented in engine.rs.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    clock::RunClock, config::ImpactConfig, error::ImpactResult, event::ImpactEvent,
    store::ImpactStore,
};

/// Cooperative cancellation flag, checked once per entity by batch work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the next batch can run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Everything a subsystem may touch during one cycle.
pub struct CycleContext<'a> {
    pub run_id: &'a str,
    pub cycle:  u64,
    pub clock:  &'a RunClock,
    pub store:  &'a ImpactStore,
    pub config: &'a ImpactConfig,
    pub cancel: &'a CancelToken,
}

/// The contract every batch stage must fulfill.
pub trait ImpactSubsystem: Send {
    /// Unique stable name, written to the event log.
    fn name(&self) -> &'static str;

    /// Called once per cycle by the engine.
    ///
    /// - `ctx`:       store, config, clock and cancellation for this cycle
    /// - `events_in`: events emitted by earlier subsystems this cycle
    ///
    /// Returns the new events to append to the cycle's log.
    fn update(
        &mut self,
        ctx: &CycleContext<'_>,
        events_in: &[ImpactEvent],
    ) -> ImpactResult<Vec<ImpactEvent>>;
}
