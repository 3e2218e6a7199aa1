//! Score calculator: the additive ranking score.
//!
//! Combines raw signals into an unbounded weighted score plus a typed factor
//! breakdown. Each factor is fetched on its own; a failed fetch contributes 0
//! and is listed in `ScoreCard::degraded`. Only a computation where every
//! fetch failed is treated as the data layer being unreachable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    config::ScoreWeights,
    error::{ImpactError, ImpactResult},
    signals::{Entity, SignalSource, SourceError, SourceRef, SourceTable},
    types::{EntityId, EntityType, Period},
};

/// Named contributions to the additive score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    ClaimedBonus,
    Spins,
    ChartSpins,
    Social,
    Releases,
    Videos,
    Views,
    Mentions,
    EngagementQuality,
    Roster,
}

pub type FactorBreakdown = BTreeMap<Factor, f64>;

/// Raw counts behind a score, kept for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCounts {
    pub spins:              u64,
    pub chart_spins:        u64,
    pub chart_appearances:  u64,
    pub social_accounts:    u64,
    pub releases:           u64,
    pub videos:             u64,
    pub video_views:        u64,
    pub mentions:           u64,
    pub engagement_quality: f64,
    pub roster_size:        u64,
    pub roster_spins:       u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub entity_type: EntityType,
    pub entity_id:   EntityId,
    pub score:       f64,
    pub factors:     FactorBreakdown,
    pub inputs:      InputCounts,
    /// Raw rows consulted, in a stable order. These become lineage records.
    pub sources:     Vec<SourceRef>,
    /// Factors that fell back to 0 because their source failed.
    pub degraded:    Vec<Factor>,
}

impl ScoreCard {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn factor(&self, factor: Factor) -> f64 {
        self.factors.get(&factor).copied().unwrap_or(0.0)
    }
}

/// Accumulates factor values, recording which ones degraded.
struct Tally {
    factors:  FactorBreakdown,
    degraded: Vec<Factor>,
    fetches:  usize,
    failures: usize,
    last_error: Option<SourceError>,
}

impl Tally {
    fn new() -> Self {
        Self {
            factors: BTreeMap::new(),
            degraded: Vec::new(),
            fetches: 0,
            failures: 0,
            last_error: None,
        }
    }

    fn fixed(&mut self, factor: Factor, value: f64) {
        self.factors.insert(factor, value);
    }

    fn fetched(&mut self, factor: Factor, result: Result<f64, SourceError>, entity: &Entity) {
        self.fetches += 1;
        match result {
            Ok(value) => {
                *self.factors.entry(factor).or_insert(0.0) += value;
            }
            Err(e) => {
                log::warn!(
                    "{} {} ({}): factor {:?} degraded to 0: {e}",
                    entity.entity_type,
                    entity.id,
                    entity.name,
                    factor
                );
                self.failures += 1;
                self.factors.entry(factor).or_insert(0.0);
                if !self.degraded.contains(&factor) {
                    self.degraded.push(factor);
                }
                self.last_error = Some(e);
            }
        }
    }

    fn total(&self) -> f64 {
        self.factors.values().sum()
    }
}

pub struct ScoreCalculator<'a> {
    source:  &'a dyn SignalSource,
    weights: &'a ScoreWeights,
}

impl<'a> ScoreCalculator<'a> {
    pub fn new(source: &'a dyn SignalSource, weights: &'a ScoreWeights) -> Self {
        Self { source, weights }
    }

    /// Score one entity over `period`.
    pub fn compute(&self, entity: &Entity, period: &Period) -> ImpactResult<ScoreCard> {
        let mut inputs = InputCounts::default();
        let mut sources = vec![entity.source_ref()];
        let tally = match entity.entity_type {
            EntityType::Artist => self.artist(entity, period, &mut inputs, &mut sources),
            EntityType::Label => self.label(entity, period, &mut inputs, &mut sources),
        };

        if tally.fetches > 0 && tally.failures == tally.fetches {
            let reason = tally
                .last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "all sources failed".into());
            return Err(ImpactError::DataSourceUnavailable { reason });
        }

        sources.sort();
        sources.dedup();
        Ok(ScoreCard {
            entity_type: entity.entity_type,
            entity_id: entity.id,
            score: tally.total(),
            factors: tally.factors.clone(),
            inputs,
            sources,
            degraded: tally.degraded,
        })
    }

    /// Load an entity by id and score it. Unknown ids are an error.
    pub fn compute_by_id(
        &self,
        entity_type: EntityType,
        id: EntityId,
        period: &Period,
    ) -> ImpactResult<ScoreCard> {
        let entity = self.source.entity(entity_type, id)?.ok_or_else(|| {
            ImpactError::DataSourceUnavailable {
                reason: format!("{entity_type} {id} not found"),
            }
        })?;
        self.compute(&entity, period)
    }

    /// The spin factor on its own. Labels reuse it for their roster.
    fn spin_factor(&self, artist_id: EntityId, period: &Period) -> Result<(u64, f64), SourceError> {
        let spins = self.source.spin_count(EntityType::Artist, artist_id, period)?;
        Ok((spins, spins as f64 * self.weights.spin_weight))
    }

    fn artist(
        &self,
        entity: &Entity,
        period: &Period,
        inputs: &mut InputCounts,
        sources: &mut Vec<SourceRef>,
    ) -> Tally {
        let w = self.weights;
        let mut tally = Tally::new();

        tally.fixed(
            Factor::ClaimedBonus,
            if entity.claimed { w.claimed_bonus_artist } else { 0.0 },
        );

        let spins = self.spin_factor(entity.id, period).map(|(n, value)| {
            inputs.spins = n;
            value
        });
        tally.fetched(Factor::Spins, spins, entity);

        let chart = self.source.chart_totals(entity.id, period).map(|c| {
            inputs.chart_spins = c.spins;
            inputs.chart_appearances = c.appearances;
            c.spins as f64 * w.chart_spin_weight + c.appearances as f64 * w.chart_appearance_bonus
        });
        tally.fetched(Factor::ChartSpins, chart, entity);

        let social = self.social_factor(entity, period, w.social_weight, inputs, sources);
        tally.fetched(Factor::Social, social, entity);

        let releases = self.source.release_ids(entity.id, period).map(|ids| {
            inputs.releases = ids.len() as u64;
            sources.extend(ids.iter().map(|id| SourceRef::new(SourceTable::CatalogRelease, *id)));
            ids.len() as f64 * w.release_weight
        });
        tally.fetched(Factor::Releases, releases, entity);

        match self.source.videos(EntityType::Artist, entity.id, period) {
            Ok(videos) => {
                let views: u64 = videos.iter().map(|v| v.view_count).sum();
                inputs.videos = videos.len() as u64;
                inputs.video_views = views;
                sources.extend(videos.iter().map(|v| SourceRef::new(SourceTable::Video, v.id)));
                tally.fetched(Factor::Videos, Ok(videos.len() as f64 * w.video_weight), entity);
                tally.fetched(Factor::Views, Ok(views as f64 * w.view_weight), entity);
            }
            Err(e) => {
                tally.fetched(Factor::Videos, Err(e.clone()), entity);
                tally.fetched(Factor::Views, Err(e), entity);
            }
        }

        let mentions = self.source.mention_count(&entity.name, period).map(|n| {
            inputs.mentions = n;
            n as f64 * w.mention_weight
        });
        tally.fetched(Factor::Mentions, mentions, entity);

        let eqs = self.eqs_factor(entity, 1.0, inputs, sources);
        tally.fetched(Factor::EngagementQuality, eqs, entity);

        tally
    }

    fn label(
        &self,
        entity: &Entity,
        period: &Period,
        inputs: &mut InputCounts,
        sources: &mut Vec<SourceRef>,
    ) -> Tally {
        let w = self.weights;
        let own = w.label_own_factor;
        let mut tally = Tally::new();

        tally.fixed(
            Factor::ClaimedBonus,
            if entity.claimed { w.claimed_bonus_label } else { 0.0 },
        );

        let roster = self.source.roster(entity.id).map(|artists| {
            let mut spin_share = 0.0;
            for artist in &artists {
                sources.push(artist.source_ref());
                match self.spin_factor(artist.id, period) {
                    Ok((n, value)) => {
                        inputs.roster_spins += n;
                        spin_share += value * w.roster_spin_share;
                    }
                    Err(e) => log::warn!(
                        "label {}: roster artist {} spins unavailable, counted as 0: {e}",
                        entity.id,
                        artist.id
                    ),
                }
            }
            inputs.roster_size = artists.len() as u64;
            spin_share + artists.len() as f64 * w.roster_bonus
        });
        tally.fetched(Factor::Roster, roster, entity);

        let social = self.social_factor(entity, period, w.social_weight * own, inputs, sources);
        tally.fetched(Factor::Social, social, entity);

        let views = self.source.videos(EntityType::Label, entity.id, period).map(|videos| {
            let views: u64 = videos.iter().map(|v| v.view_count).sum();
            inputs.videos = videos.len() as u64;
            inputs.video_views = views;
            sources.extend(videos.iter().map(|v| SourceRef::new(SourceTable::Video, v.id)));
            views as f64 * w.view_weight * own
        });
        tally.fetched(Factor::Views, views, entity);

        let eqs = self.eqs_factor(entity, own, inputs, sources);
        tally.fetched(Factor::EngagementQuality, eqs, entity);

        tally
    }

    fn social_factor(
        &self,
        entity: &Entity,
        period: &Period,
        weight: f64,
        inputs: &mut InputCounts,
        sources: &mut Vec<SourceRef>,
    ) -> Result<f64, SourceError> {
        let ids = self.source.social_account_ids(entity.entity_type, entity.id, period)?;
        inputs.social_accounts = ids.len() as u64;
        sources.extend(ids.iter().map(|id| SourceRef::new(SourceTable::SocialAccount, *id)));
        Ok(ids.len() as f64 * weight)
    }

    /// EQS is read from the upstream aggregate, never recomputed here.
    fn eqs_factor(
        &self,
        entity: &Entity,
        scale: f64,
        inputs: &mut InputCounts,
        sources: &mut Vec<SourceRef>,
    ) -> Result<f64, SourceError> {
        let row = self.source.engagement_quality(entity.entity_type, entity.id)?;
        Ok(match row {
            Some(eqs) => {
                inputs.engagement_quality = eqs.score;
                sources.push(SourceRef::new(SourceTable::EngagementQuality, eqs.id));
                eqs.score * scale
            }
            None => 0.0,
        })
    }
}
