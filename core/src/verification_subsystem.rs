//! Verification engine: forensic replay of historical scores.
//!
//! A history record is recomputed from raw data with the method and weights
//! captured in its formula snapshot, and every lineage source is re-hashed
//! against the fingerprint taken at calculation time. Mismatches are
//! recorded as `failed` verdicts, never raised as errors.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::{
    audit::{
        data_hash, AuditRecorder, FormulaWeights, LineageStatus, ScoreCalculation,
        ScoreHistoryRecord, ScoreModifiers,
    },
    clock::RunClock,
    config::{ImpactConfig, TrustFormula, TrustWeights},
    error::{ImpactError, ImpactResult},
    event::ImpactEvent,
    scoring::{Factor, ScoreCalculator},
    signals::{Entity, EngagementCounts, SignalSource, SourceError, SourceRef, SourceTable},
    store::ImpactStore,
    subsystem::{CancelToken, CycleContext, ImpactSubsystem},
    types::{text_enum_sql, EntityId, EntityType, HistoryId, Interval, Period},
};

/// Raw sources the trust score reads. Completeness is measured against these;
/// the entity row (reputation) is looked up but not counted.
const TRUST_SOURCES: usize = 6;

// ── Trust score (normalized_v1) ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustFactor {
    Spins,
    Plays,
    /// Recorded with the other sub-scores; carries no weight.
    Views,
    Engagement,
    Sparks,
    Momentum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustInputs {
    pub spins:             u64,
    pub plays:             u64,
    pub views:             u64,
    pub engagement:        EngagementCounts,
    pub engagement_points: f64,
    pub sparks:            f64,
    pub followers_start:   Option<i64>,
    pub followers_end:     Option<i64>,
    pub reputation:        f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    pub entity_type:       EntityType,
    pub entity_id:         EntityId,
    pub period:            Period,
    pub score:             f64,
    /// Each factor normalized to 0–100 before weighting.
    pub sub_scores:        BTreeMap<TrustFactor, f64>,
    pub inputs:            TrustInputs,
    pub modifiers:         ScoreModifiers,
    pub weights:           TrustWeights,
    /// Share of the raw sources that answered.
    pub data_completeness: f64,
    /// Raw sources that failed and were counted as 0.
    pub degraded:          Vec<String>,
    pub sources:           Vec<SourceRef>,
}

/// Log-scale normalization onto 0–100, saturating at `cap`.
pub fn normalize(value: f64, cap: f64) -> f64 {
    if value <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    if cap <= 0.0 {
        return 100.0;
    }
    (100.0 * value.ln_1p() / cap.ln_1p()).min(100.0)
}

/// Follower growth mapped around a neutral 50.
fn momentum(start: Option<i64>, end: Option<i64>, per_growth_pct: f64) -> f64 {
    match (start, end) {
        (None, None) => 0.0,
        (Some(start), Some(end)) if start > 0 => {
            let growth_pct = (end - start) as f64 / start as f64 * 100.0;
            (50.0 + growth_pct * per_growth_pct).clamp(0.0, 100.0)
        }
        _ => 50.0,
    }
}

fn reputation_multiplier(reputation: f64, formula: &TrustFormula) -> f64 {
    let r = reputation.clamp(0.0, 100.0) / 100.0;
    formula.reputation_floor + (formula.reputation_ceiling - formula.reputation_floor) * r
}

/// Computes the normalized 0–100 trust score from raw signals.
///
/// Each of the six sources degrades to 0 on failure; the result is always
/// within `[0, 100]`. The formula's weights are used as given, so callers
/// normalize them first.
pub struct TrustCalculator<'a> {
    source:  &'a dyn SignalSource,
    formula: &'a TrustFormula,
}

impl<'a> TrustCalculator<'a> {
    pub fn new(source: &'a dyn SignalSource, formula: &'a TrustFormula) -> Self {
        Self { source, formula }
    }

    pub fn compute(&self, entity_type: EntityType, entity_id: EntityId, period: &Period) -> TrustScore {
        let f = self.formula;
        let src = self.source;
        let mut inputs = TrustInputs { reputation: f.neutral_reputation, ..Default::default() };
        let mut sources = Vec::new();
        let mut degraded = Vec::new();

        let mut note = |signal: &'static str, e: SourceError| {
            log::warn!("{entity_type} {entity_id}: trust source {signal} degraded to 0: {e}");
            degraded.push(signal.to_string());
        };

        match src.spin_count(entity_type, entity_id, period) {
            Ok(n) => inputs.spins = n,
            Err(e) => note("spins", e),
        }
        match src.playback_count(entity_type, entity_id, period) {
            Ok(n) => inputs.plays = n,
            Err(e) => note("plays", e),
        }
        match src.videos(entity_type, entity_id, period) {
            Ok(videos) => {
                inputs.views = videos.iter().map(|v| v.view_count).sum();
                sources.extend(videos.iter().map(|v| SourceRef::new(SourceTable::Video, v.id)));
            }
            Err(e) => note("views", e),
        }
        match src.engagement_counts(entity_type, entity_id, period) {
            Ok(counts) => inputs.engagement = counts,
            Err(e) => note("engagement", e),
        }
        match src.spark_total(entity_type, entity_id, period) {
            Ok(total) => inputs.sparks = total,
            Err(e) => note("sparks", e),
        }
        match src.follower_points(entity_type, entity_id, period) {
            Ok(points) => {
                inputs.followers_start = points.first().map(|p| p.followers);
                inputs.followers_end = points.last().map(|p| p.followers);
                sources.extend(points.iter().map(|p| SourceRef::new(SourceTable::FollowerSnapshot, p.id)));
            }
            Err(e) => note("followers", e),
        }

        // Reputation falls back to neutral and never counts against completeness.
        match src.entity(entity_type, entity_id) {
            Ok(Some(entity)) => {
                inputs.reputation = entity.reputation_score.unwrap_or(f.neutral_reputation);
                sources.push(entity.source_ref());
            }
            Ok(None) => log::warn!("{entity_type} {entity_id}: not found, neutral reputation used"),
            Err(e) => log::warn!("{entity_type} {entity_id}: reputation unavailable, neutral used: {e}"),
        }

        let points = &f.engagement_points;
        let e = &inputs.engagement;
        inputs.engagement_points = e.likes as f64 * points.like
            + e.comments as f64 * points.comment
            + e.shares as f64 * points.share
            + e.saves as f64 * points.save;

        let mut sub_scores = BTreeMap::new();
        sub_scores.insert(TrustFactor::Spins, normalize(inputs.spins as f64, f.spins_cap));
        sub_scores.insert(TrustFactor::Plays, normalize(inputs.plays as f64, f.plays_cap));
        sub_scores.insert(TrustFactor::Views, normalize(inputs.views as f64, f.views_cap));
        sub_scores.insert(TrustFactor::Engagement, normalize(inputs.engagement_points, f.engagement_cap));
        sub_scores.insert(TrustFactor::Sparks, normalize(inputs.sparks, f.sparks_cap));
        sub_scores.insert(
            TrustFactor::Momentum,
            momentum(inputs.followers_start, inputs.followers_end, f.momentum_per_growth_pct),
        );

        let w = &f.weights;
        let weighted = sub_scores[&TrustFactor::Spins] * w.spins
            + sub_scores[&TrustFactor::Plays] * w.plays
            + sub_scores[&TrustFactor::Engagement] * w.engagement
            + sub_scores[&TrustFactor::Sparks] * w.sparks
            + sub_scores[&TrustFactor::Momentum] * w.momentum;

        let fraud_rate = inputs.engagement.like_ratio();
        let rep_multiplier = reputation_multiplier(inputs.reputation, f);
        let mut score = weighted * rep_multiplier;
        if fraud_rate > f.fraud_like_ratio {
            score *= 1.0 - f.fraud_penalty;
        }
        let score = if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 };

        sources.sort();
        sources.dedup();
        TrustScore {
            entity_type,
            entity_id,
            period: *period,
            score,
            sub_scores,
            inputs,
            modifiers: ScoreModifiers {
                fraud_rate,
                reputation_multiplier: rep_multiplier,
                investor_multiplier: 1.0,
            },
            weights: f.weights,
            data_completeness: (TRUST_SOURCES - degraded.len()) as f64 / TRUST_SOURCES as f64,
            degraded,
            sources,
        }
    }
}

// ── Verdicts ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            other => Err(ImpactError::Other(anyhow::anyhow!(
                "unknown verification status '{other}'"
            ))),
        }
    }
}

text_enum_sql!(VerificationStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    LineageModified,
    LineageDeleted,
    LineageSuspicious,
    ScoreMismatch,
    RecalculationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub kind:     IssueKind,
    pub severity: IssueSeverity,
    pub source:   Option<SourceRef>,
    pub detail:   String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageCheck {
    pub lineage_id: i64,
    pub source:     SourceRef,
    pub status:     LineageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id:                 i64,
    pub history_id:         HistoryId,
    pub entity_type:        EntityType,
    pub entity_id:          EntityId,
    pub status:             VerificationStatus,
    pub original_score:     f64,
    pub recalculated_score: f64,
    /// `recalculated - original`.
    pub score_difference:   f64,
    pub percent_difference: f64,
    pub data_completeness:  f64,
    pub score_match:        bool,
    pub lineage:            Vec<LineageCheck>,
    pub issues:             Vec<VerificationIssue>,
    pub verified_at:        chrono::NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkVerificationReport {
    pub verified:  usize,
    pub passed:    usize,
    pub failed:    usize,
    /// Records whose verification could not be completed.
    pub errors:    usize,
    pub cancelled: bool,
    pub results:   Vec<VerificationResult>,
}

/// Percent difference relative to the original score. Zero when both are zero.
pub fn percent_difference(original: f64, recalculated: f64) -> f64 {
    let diff = (recalculated - original).abs();
    if original.abs() > f64::EPSILON {
        diff / original.abs() * 100.0
    } else if diff > f64::EPSILON {
        100.0
    } else {
        0.0
    }
}

pub struct VerificationEngine<'a> {
    store:  &'a ImpactStore,
    config: &'a ImpactConfig,
    clock:  &'a RunClock,
}

impl<'a> VerificationEngine<'a> {
    pub fn new(store: &'a ImpactStore, config: &'a ImpactConfig, clock: &'a RunClock) -> Self {
        Self { store, config, clock }
    }

    /// The live trust formula, with `weights` substituted when given.
    /// Weights are renormalized to sum to 1.
    pub fn trust_formula(&self, weights: Option<TrustWeights>) -> TrustFormula {
        let mut formula = self.config.trust.formula.clone();
        formula.weights = weights.unwrap_or(formula.weights).normalized();
        formula
    }

    /// Independently compute the 0–100 trust score from raw data.
    pub fn recalculate_score(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
        period: &Period,
        weights: Option<TrustWeights>,
    ) -> ImpactResult<TrustScore> {
        let formula = self.trust_formula(weights);
        Ok(TrustCalculator::new(self.store, &formula).compute(entity_type, entity_id, period))
    }

    /// Compute and record a `normalized_v1` trust score with its lineage.
    /// The full formula is stored with the record.
    pub fn record_trust_score(
        &self,
        entity: &Entity,
        period: &Period,
        period_type: &str,
    ) -> ImpactResult<(HistoryId, TrustScore)> {
        let formula = self.trust_formula(None);
        let trust = TrustCalculator::new(self.store, &formula).compute(entity.entity_type, entity.id, period);
        let audit = AuditRecorder::new(self.store);

        let tx = self.store.transaction()?;
        let history_id = audit.record_score_calculation(&ScoreCalculation {
            entity_type: entity.entity_type,
            entity_id: entity.id,
            score_value: trust.score,
            period_type: period_type.to_string(),
            period: *period,
            input_counts: serde_json::to_value(&trust.inputs)?,
            factor_breakdown: serde_json::to_value(&trust.sub_scores)?,
            modifiers: trust.modifiers,
            weights: FormulaWeights::Normalized(formula),
            calculated_at: self.clock.now(),
        })?;
        audit.record_sources(history_id, &trust.sources)?;
        tx.commit()?;
        Ok((history_id, trust))
    }

    /// Replay one history record and persist the verdict.
    pub fn verify_score(&self, history_id: HistoryId) -> ImpactResult<VerificationResult> {
        let record = self.store.get_score_history(history_id)?;
        let mut issues = Vec::new();

        let (recalculated, completeness) = match self.replay(&record) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("history {history_id}: recalculation failed: {e}");
                issues.push(VerificationIssue {
                    kind: IssueKind::RecalculationFailed,
                    severity: IssueSeverity::High,
                    source: None,
                    detail: e.to_string(),
                });
                (0.0, 0.0)
            }
        };
        let difference = recalculated - record.score_value;
        let score_match = difference.abs() < self.config.trust.match_tolerance;
        if !score_match {
            issues.push(VerificationIssue {
                kind: IssueKind::ScoreMismatch,
                severity: IssueSeverity::High,
                source: None,
                detail: format!(
                    "recorded {:.4}, recalculated {:.4}",
                    record.score_value, recalculated
                ),
            });
        }

        let now = self.clock.now();
        let tx = self.store.transaction()?;
        let mut lineage = Vec::new();
        for rec in self.store.lineage_for_history(history_id)? {
            let source = rec.source();
            let status = match self.store.source_row(source) {
                Ok(None) => LineageStatus::Deleted,
                Ok(Some(row)) if data_hash(&row) == rec.data_hash => LineageStatus::Valid,
                Ok(Some(_)) => LineageStatus::Modified,
                Err(e) => {
                    log::warn!("history {history_id}: lineage {} {} unreadable: {e}", source.table, source.id);
                    LineageStatus::Suspicious
                }
            };
            self.store.update_lineage_status(rec.id, status, now)?;
            if let Some(kind) = match status {
                LineageStatus::Modified => Some(IssueKind::LineageModified),
                LineageStatus::Deleted => Some(IssueKind::LineageDeleted),
                LineageStatus::Suspicious | LineageStatus::Unchecked => Some(IssueKind::LineageSuspicious),
                LineageStatus::Valid => None,
            } {
                issues.push(VerificationIssue {
                    kind,
                    severity: if status == LineageStatus::Modified {
                        IssueSeverity::High
                    } else {
                        IssueSeverity::Medium
                    },
                    source: Some(source),
                    detail: format!("{} {} is {}", source.table, source.id, status),
                });
            }
            lineage.push(LineageCheck { lineage_id: rec.id, source, status });
        }

        let all_valid = lineage.iter().all(|c| c.status == LineageStatus::Valid);
        let mut result = VerificationResult {
            id: 0,
            history_id,
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            status: if score_match && all_valid {
                VerificationStatus::Passed
            } else {
                VerificationStatus::Failed
            },
            original_score: record.score_value,
            recalculated_score: recalculated,
            score_difference: difference,
            percent_difference: percent_difference(record.score_value, recalculated),
            data_completeness: completeness,
            score_match,
            lineage,
            issues,
            verified_at: now,
        };
        result.id = self.store.insert_verification(&result)?;
        tx.commit()?;

        log::info!(
            "history {history_id} ({} {}): {} (diff {:.4}, {} issues)",
            result.entity_type,
            result.entity_id,
            result.status.as_str(),
            result.score_difference,
            result.issues.len()
        );
        Ok(result)
    }

    /// Verify the latest record of each entity with history calculated in
    /// `[start, end]`, up to `limit` entities.
    pub fn run_bulk_verification(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
        cancel: &CancelToken,
    ) -> ImpactResult<BulkVerificationReport> {
        let period = Period::new(start, end);
        let records =
            self.store
                .latest_history_per_entity(period.start_at(), period.end_exclusive(), limit)?;
        let mut report = BulkVerificationReport::default();
        for record in records {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.verify_score(record.id) {
                Ok(result) => {
                    report.verified += 1;
                    match result.status {
                        VerificationStatus::Passed => report.passed += 1,
                        VerificationStatus::Failed => report.failed += 1,
                    }
                    report.results.push(result);
                }
                Err(e) => {
                    log::error!("history {}: verification aborted: {e}", record.id);
                    report.errors += 1;
                }
            }
        }
        log::info!(
            "Bulk verification {start}..={end}: {} verified, {} passed, {} failed, {} errors",
            report.verified,
            report.passed,
            report.failed,
            report.errors
        );
        Ok(report)
    }

    /// Recompute a record with the method it was produced by.
    /// Returns the score and the share of sources that answered.
    fn replay(&self, record: &ScoreHistoryRecord) -> ImpactResult<(f64, f64)> {
        match &record.formula_snapshot.weights {
            FormulaWeights::Normalized(formula) => {
                let trust = TrustCalculator::new(self.store, formula).compute(
                    record.entity_type,
                    record.entity_id,
                    &record.period,
                );
                Ok((trust.score, trust.data_completeness))
            }
            FormulaWeights::Additive(weights) => {
                let calc = ScoreCalculator::new(self.store, weights);
                let card = calc.compute_by_id(record.entity_type, record.entity_id, &record.period)?;
                let fetched = card.factors.keys().filter(|f| **f != Factor::ClaimedBonus).count();
                let completeness = if fetched == 0 {
                    1.0
                } else {
                    (fetched - card.degraded.len()) as f64 / fetched as f64
                };
                let multiplier = record.modifiers.investor_multiplier;
                Ok((card.score * multiplier, completeness))
            }
        }
    }
}

/// Batch stage: verifies every entity scored during the current day.
#[derive(Debug, Default)]
pub struct VerificationSubsystem;

impl VerificationSubsystem {
    pub fn new() -> Self {
        Self
    }
}

impl ImpactSubsystem for VerificationSubsystem {
    fn name(&self) -> &'static str {
        "verification"
    }

    fn update(
        &mut self,
        ctx: &CycleContext<'_>,
        _events_in: &[ImpactEvent],
    ) -> ImpactResult<Vec<ImpactEvent>> {
        let engine = VerificationEngine::new(ctx.store, ctx.config, ctx.clock);
        let today = Interval::Daily.period_containing(ctx.clock.today());
        let report = engine.run_bulk_verification(
            today.start,
            today.end,
            ctx.config.trust.bulk_verification_limit,
            ctx.cancel,
        )?;

        let mut events: Vec<ImpactEvent> = report
            .results
            .iter()
            .filter(|r| r.status == VerificationStatus::Failed)
            .map(|r| ImpactEvent::ScoreVerified {
                history_id: r.history_id,
                entity_type: r.entity_type,
                entity_id: r.entity_id,
                status: r.status,
                score_difference: r.score_difference,
            })
            .collect();
        events.push(ImpactEvent::BulkVerificationCompleted {
            verified: report.verified,
            passed: report.passed,
            failed: report.failed,
            errors: report.errors,
            cancelled: report.cancelled,
        });
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_bounded_and_monotonic() {
        assert_eq!(normalize(0.0, 500.0), 0.0);
        assert_eq!(normalize(-5.0, 500.0), 0.0);
        assert!((normalize(500.0, 500.0) - 100.0).abs() < 1e-9);
        assert_eq!(normalize(1e12, 500.0), 100.0);
        assert!(normalize(10.0, 500.0) < normalize(20.0, 500.0));
    }

    #[test]
    fn momentum_is_neutral_without_growth() {
        assert_eq!(momentum(None, None, 1.0), 0.0);
        assert_eq!(momentum(Some(100), Some(100), 1.0), 50.0);
        assert_eq!(momentum(Some(100), Some(120), 1.0), 70.0);
        assert_eq!(momentum(Some(100), Some(0), 1.0), 0.0);
        assert_eq!(momentum(Some(10), Some(1000), 1.0), 100.0);
    }

    #[test]
    fn reputation_maps_onto_configured_range() {
        let cfg = TrustFormula::default();
        assert!((reputation_multiplier(0.0, &cfg) - 0.8).abs() < 1e-9);
        assert!((reputation_multiplier(50.0, &cfg) - 1.0).abs() < 1e-9);
        assert!((reputation_multiplier(100.0, &cfg) - 1.2).abs() < 1e-9);
        assert!((reputation_multiplier(250.0, &cfg) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn percent_difference_handles_zero_original() {
        assert_eq!(percent_difference(0.0, 0.0), 0.0);
        assert_eq!(percent_difference(0.0, 3.0), 100.0);
        assert!((percent_difference(200.0, 210.0) - 5.0).abs() < 1e-9);
    }
}
