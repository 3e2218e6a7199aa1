//! Trust scoring stage: records a `normalized_v1` score for every active
//! entity over the configured trust window, so verification has trust
//! history to replay alongside ranking history.

use crate::{
    error::ImpactResult,
    event::ImpactEvent,
    signals::SignalSource,
    subsystem::{CycleContext, ImpactSubsystem},
    types::EntityType,
    verification_subsystem::VerificationEngine,
};

#[derive(Debug, Default)]
pub struct TrustScoreSubsystem;

impl TrustScoreSubsystem {
    pub fn new() -> Self {
        Self
    }
}

impl ImpactSubsystem for TrustScoreSubsystem {
    fn name(&self) -> &'static str {
        "trust_score"
    }

    fn update(
        &mut self,
        ctx: &CycleContext<'_>,
        _events_in: &[ImpactEvent],
    ) -> ImpactResult<Vec<ImpactEvent>> {
        let engine = VerificationEngine::new(ctx.store, ctx.config, ctx.clock);
        let interval = ctx.config.trust.interval;
        let period = interval.period_containing(ctx.clock.today());
        let mut events = Vec::new();

        for entity_type in EntityType::ALL {
            let (mut recorded, mut failed) = (0usize, 0usize);
            for entity in ctx.store.active_entities(entity_type)? {
                if ctx.cancel.is_cancelled() {
                    log::warn!("Trust scoring cancelled at {entity_type} {}", entity.id);
                    events.push(ImpactEvent::TrustScoresRecorded { entity_type, recorded, failed });
                    return Ok(events);
                }
                match engine.record_trust_score(&entity, &period, interval.as_str()) {
                    Ok(_) => recorded += 1,
                    Err(e) => {
                        log::warn!("Trust score for {entity_type} {} not recorded: {e}", entity.id);
                        failed += 1;
                    }
                }
            }
            log::info!("Recorded {recorded} {entity_type} trust scores ({failed} failed)");
            events.push(ImpactEvent::TrustScoresRecorded { entity_type, recorded, failed });
        }
        Ok(events)
    }
}
