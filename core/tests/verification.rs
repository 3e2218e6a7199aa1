//! Verification engine tests: replay of additive and trust history,
//! lineage tamper detection and bulk runs.

use chrono::{NaiveDate, NaiveDateTime};
use impact_core::{
    audit::{CalculationMethod, LineageStatus},
    clock::RunClock,
    config::{ImpactConfig, TrustFormula, TrustWeights},
    error::ImpactError,
    ranking_subsystem::RankingManager,
    receipt::LogReceiptSink,
    signals::{
        ChartTotals, EngagementCounts, EngagementQualityRow, Entity, FollowerPoint, SignalSource,
        SourceError, SourceRef, SourceResult, SourceTable, VideoRow,
    },
    store::{ImpactStore, NewEntity},
    subsystem::CancelToken,
    types::{EntityId, EntityType, Interval, Period},
    verification_subsystem::{
        IssueKind, IssueSeverity, TrustCalculator, TrustFactor, VerificationEngine, VerificationStatus,
    },
};

fn store() -> ImpactStore {
    let store = ImpactStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

fn at(hour: u32) -> NaiveDateTime {
    today().and_hms_opt(hour, 0, 0).unwrap()
}

struct Seeded {
    release_id: i64,
    video_id:   i64,
}

/// An artist with one row in each lineage-tracked table.
fn seed_artist(store: &ImpactStore, id: i64, name: &str) -> Seeded {
    store.insert_entity(&NewEntity::artist(id, name).claimed().reputation(60.0)).unwrap();
    for h in 0..5 {
        store.insert_radio_spin(id, "WKRP", at(h)).unwrap();
        store.insert_playback_event(EntityType::Artist, id, 200, at(h)).unwrap();
    }
    store.insert_social_account(EntityType::Artist, id, "tiktok", name, at(1)).unwrap();
    let release_id = store.insert_release(id, "Single", at(2)).unwrap();
    let video_id = store.insert_video(EntityType::Artist, id, "Clip", 4_000, at(3)).unwrap();
    store.set_engagement_quality(EntityType::Artist, id, 55.0, at(4)).unwrap();
    store.insert_engagement_event(EntityType::Artist, id, "comment", at(5)).unwrap();
    store.insert_spark(EntityType::Artist, id, 12.5, at(6)).unwrap();
    store.insert_follower_snapshot(EntityType::Artist, id, 1_000, at(0)).unwrap();
    store.insert_follower_snapshot(EntityType::Artist, id, 1_100, at(8)).unwrap();
    Seeded { release_id, video_id }
}

fn rank_daily(store: &ImpactStore, config: &ImpactConfig, clock: &RunClock) {
    let cancel = CancelToken::new();
    RankingManager::new(store, config, clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Daily)
        .unwrap();
}

fn latest_history(store: &ImpactStore, id: i64) -> i64 {
    store.history_for_entity(EntityType::Artist, id).unwrap()[0].id
}

#[test]
fn untouched_history_passes() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    seed_artist(&store, 1, "Kalli Vance");
    rank_daily(&store, &config, &clock);
    let history_id = latest_history(&store, 1);

    let result = VerificationEngine::new(&store, &config, &clock).verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Passed);
    assert!(result.score_match);
    assert!(result.percent_difference.abs() < 1e-9);
    assert!(result.issues.is_empty(), "issues: {:?}", result.issues);
    assert_eq!(result.data_completeness, 1.0);
    assert!(result.lineage.iter().all(|c| c.status == LineageStatus::Valid));

    // Every lineage row now carries its check.
    for rec in store.lineage_for_history(history_id).unwrap() {
        assert_eq!(rec.validation_status, LineageStatus::Valid);
        assert_eq!(rec.last_checked_at, Some(clock.now()));
    }
    let stored = store.verifications_for_history(history_id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, VerificationStatus::Passed);
}

#[test]
fn mutated_source_is_flagged_modified_and_fails() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    let seeded = seed_artist(&store, 1, "Kalli Vance");
    rank_daily(&store, &config, &clock);
    let history_id = latest_history(&store, 1);

    store.update_video_views(seeded.video_id, 40_000).unwrap();

    let result = VerificationEngine::new(&store, &config, &clock).verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Failed);
    assert!(!result.score_match);
    assert!((result.score_difference - 360.0).abs() < 1e-6, "diff {}", result.score_difference);

    let video = result
        .lineage
        .iter()
        .find(|c| c.source.table == SourceTable::Video)
        .unwrap();
    assert_eq!(video.status, LineageStatus::Modified);
    let issue = result
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::LineageModified)
        .unwrap();
    assert_eq!(issue.severity, IssueSeverity::High);
    assert!(result.issues.iter().any(|i| i.kind == IssueKind::ScoreMismatch));
}

#[test]
fn lineage_change_alone_fails_even_when_score_matches() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    seed_artist(&store, 1, "Kalli Vance");
    rank_daily(&store, &config, &clock);
    let history_id = latest_history(&store, 1);

    // Same EQS value, new computation timestamp.
    store.set_engagement_quality(EntityType::Artist, 1, 55.0, at(11)).unwrap();

    let result = VerificationEngine::new(&store, &config, &clock).verify_score(history_id).unwrap();
    assert!(result.score_match);
    assert_eq!(result.status, VerificationStatus::Failed);
    let eqs = result
        .lineage
        .iter()
        .find(|c| c.source.table == SourceTable::EngagementQuality)
        .unwrap();
    assert_eq!(eqs.status, LineageStatus::Modified);
}

#[test]
fn deleted_source_is_flagged_with_medium_severity() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    let seeded = seed_artist(&store, 1, "Kalli Vance");
    rank_daily(&store, &config, &clock);
    let history_id = latest_history(&store, 1);

    store.delete_release(seeded.release_id).unwrap();

    let result = VerificationEngine::new(&store, &config, &clock).verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Failed);
    let issue = result
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::LineageDeleted)
        .unwrap();
    assert_eq!(issue.severity, IssueSeverity::Medium);
    let lineage = store.lineage_for_history(history_id).unwrap();
    let release = lineage.iter().find(|l| l.source_table == SourceTable::CatalogRelease).unwrap();
    assert_eq!(release.validation_status, LineageStatus::Deleted);
}

#[test]
fn trust_history_replays_with_its_own_method() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    seed_artist(&store, 1, "Kalli Vance");
    let entity = store.entity(EntityType::Artist, 1).unwrap().unwrap();
    let period = Interval::Daily.period_containing(today());

    let engine = VerificationEngine::new(&store, &config, &clock);
    let (history_id, trust) = engine.record_trust_score(&entity, &period, "daily").unwrap();
    assert!((0.0..=100.0).contains(&trust.score));
    assert_eq!(trust.data_completeness, 1.0);

    let record = store.get_score_history(history_id).unwrap();
    assert_eq!(record.calculation_method, CalculationMethod::NormalizedV1);

    let result = engine.verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Passed, "issues: {:?}", result.issues);

    // New plays change the replayed trust score.
    for h in 12..20 {
        store.insert_playback_event(EntityType::Artist, 1, 200, at(h)).unwrap();
    }
    let result = engine.verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Failed);
    assert!(result.score_difference > 0.0);
}

#[test]
fn recalculated_score_stays_within_bounds() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    store.insert_entity(&NewEntity::artist(1, "Huge").reputation(100.0)).unwrap();
    store.insert_entity(&NewEntity::artist(2, "Empty")).unwrap();
    for h in 0..24 {
        for _ in 0..40 {
            store.insert_radio_spin(1, "WKRP", at(h)).unwrap();
            store.insert_playback_event(EntityType::Artist, 1, 30, at(h)).unwrap();
        }
        store.insert_engagement_event(EntityType::Artist, 1, "share", at(h)).unwrap();
    }
    store.insert_spark(EntityType::Artist, 1, 1e9, at(3)).unwrap();
    store.insert_follower_snapshot(EntityType::Artist, 1, 10, at(0)).unwrap();
    store.insert_follower_snapshot(EntityType::Artist, 1, 10_000_000, at(20)).unwrap();

    let engine = VerificationEngine::new(&store, &config, &clock);
    let period = Interval::Daily.period_containing(today());
    let lopsided = TrustWeights { spins: 5.0, plays: 0.0, engagement: 0.0, sparks: 3.0, momentum: 1.0 };
    for weights in [None, Some(lopsided)] {
        let huge = engine.recalculate_score(EntityType::Artist, 1, &period, weights).unwrap();
        assert!((0.0..=100.0).contains(&huge.score), "score {}", huge.score);
        let empty = engine.recalculate_score(EntityType::Artist, 2, &period, weights).unwrap();
        assert!((0.0..=100.0).contains(&empty.score));
        assert_eq!(empty.score, 0.0);
    }
}

#[test]
fn like_farming_triggers_fraud_penalty() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    store.insert_entity(&NewEntity::artist(1, "Organic")).unwrap();
    store.insert_entity(&NewEntity::artist(2, "Farmed")).unwrap();
    for h in 0..20 {
        store.insert_engagement_event(EntityType::Artist, 1, "comment", at(h)).unwrap();
        store.insert_engagement_event(EntityType::Artist, 2, "like", at(h)).unwrap();
        store.insert_engagement_event(EntityType::Artist, 2, "like", at(h)).unwrap();
        store.insert_engagement_event(EntityType::Artist, 2, "like", at(h)).unwrap();
    }

    let engine = VerificationEngine::new(&store, &config, &clock);
    let period = Interval::Daily.period_containing(today());
    let farmed = engine.recalculate_score(EntityType::Artist, 2, &period, None).unwrap();
    assert_eq!(farmed.modifiers.fraud_rate, 1.0);
    let organic = engine.recalculate_score(EntityType::Artist, 1, &period, None).unwrap();
    assert_eq!(organic.modifiers.fraud_rate, 0.0);

    // 60 likes and 20 comments are worth the same 60 engagement points.
    assert_eq!(farmed.inputs.engagement_points, organic.inputs.engagement_points);
    assert!((farmed.score - organic.score * 0.85).abs() < 1e-9);
}

#[test]
fn bulk_verification_counts_one_record_per_entity() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    seed_artist(&store, 1, "Kalli Vance");
    let tampered = seed_artist(&store, 2, "Marrow Street");
    seed_artist(&store, 3, "Deacon Hale");
    rank_daily(&store, &config, &clock);
    rank_daily(&store, &config, &clock);
    store.update_video_views(tampered.video_id, 1).unwrap();

    let engine = VerificationEngine::new(&store, &config, &clock);
    let cancel = CancelToken::new();
    let report = engine.run_bulk_verification(today(), today(), 100, &cancel).unwrap();
    assert_eq!(report.verified, 3);
    assert_eq!(report.passed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors, 0);
    let failed: Vec<i64> = report
        .results
        .iter()
        .filter(|r| r.status == VerificationStatus::Failed)
        .map(|r| r.entity_id)
        .collect();
    assert_eq!(failed, vec![2]);
    // The newest record of each entity was the one verified.
    for r in &report.results {
        assert_eq!(r.history_id, latest_history(&store, r.entity_id));
    }

    let limited = engine.run_bulk_verification(today(), today(), 2, &cancel).unwrap();
    assert_eq!(limited.verified, 2);

    let outside = engine
        .run_bulk_verification(today().pred_opt().unwrap(), today().pred_opt().unwrap(), 100, &cancel)
        .unwrap();
    assert_eq!(outside.verified, 0);

    cancel.cancel();
    let cancelled = engine.run_bulk_verification(today(), today(), 100, &cancel).unwrap();
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.verified, 0);
}

#[test]
fn verifying_unknown_history_is_an_error() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    let err = VerificationEngine::new(&store, &config, &clock).verify_score(77).unwrap_err();
    assert!(matches!(err, ImpactError::HistoryNotFound { id: 77 }));
}

#[test]
fn trust_history_replays_with_the_formula_it_was_recorded_under() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    seed_artist(&store, 1, "Kalli Vance");
    let entity = store.entity(EntityType::Artist, 1).unwrap().unwrap();
    let period = Interval::Daily.period_containing(today());
    let (history_id, recorded) = VerificationEngine::new(&store, &config, &clock)
        .record_trust_score(&entity, &period, "daily")
        .unwrap();

    let mut retuned = ImpactConfig::default();
    retuned.trust.formula.spins_cap = 50.0;
    retuned.trust.formula.reputation_ceiling = 2.0;
    let engine = VerificationEngine::new(&store, &retuned, &clock);
    let fresh = engine.recalculate_score(EntityType::Artist, 1, &period, None).unwrap();
    assert!((fresh.score - recorded.score).abs() > 1.0);

    let result = engine.verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Passed, "issues: {:?}", result.issues);
    assert!((result.recalculated_score - recorded.score).abs() < 1e-9);
}

/// Delegates to the store but fails one named signal.
struct FailingSource<'a> {
    inner:  &'a ImpactStore,
    failed: &'static str,
}

impl FailingSource<'_> {
    fn check(&self, signal: &'static str) -> SourceResult<()> {
        if signal == self.failed {
            Err(SourceError::new(signal, "connection reset"))
        } else {
            Ok(())
        }
    }
}

impl SignalSource for FailingSource<'_> {
    fn active_entities(&self, t: EntityType) -> SourceResult<Vec<Entity>> {
        self.inner.active_entities(t)
    }
    fn entity(&self, t: EntityType, id: EntityId) -> SourceResult<Option<Entity>> {
        self.check("entity")?;
        self.inner.entity(t, id)
    }
    fn roster(&self, label_id: EntityId) -> SourceResult<Vec<Entity>> {
        self.inner.roster(label_id)
    }
    fn spin_count(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<u64> {
        self.check("radio_spins")?;
        self.inner.spin_count(t, id, p)
    }
    fn chart_totals(&self, id: EntityId, p: &Period) -> SourceResult<ChartTotals> {
        self.inner.chart_totals(id, p)
    }
    fn social_account_ids(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<Vec<i64>> {
        self.inner.social_account_ids(t, id, p)
    }
    fn release_ids(&self, id: EntityId, p: &Period) -> SourceResult<Vec<i64>> {
        self.inner.release_ids(id, p)
    }
    fn videos(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<Vec<VideoRow>> {
        self.check("videos")?;
        self.inner.videos(t, id, p)
    }
    fn mention_count(&self, name: &str, p: &Period) -> SourceResult<u64> {
        self.inner.mention_count(name, p)
    }
    fn engagement_quality(&self, t: EntityType, id: EntityId) -> SourceResult<Option<EngagementQualityRow>> {
        self.inner.engagement_quality(t, id)
    }
    fn playback_count(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<u64> {
        self.check("playback_events")?;
        self.inner.playback_count(t, id, p)
    }
    fn engagement_counts(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<EngagementCounts> {
        self.check("engagement_events")?;
        self.inner.engagement_counts(t, id, p)
    }
    fn spark_total(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<f64> {
        self.check("sparks")?;
        self.inner.spark_total(t, id, p)
    }
    fn follower_points(&self, t: EntityType, id: EntityId, p: &Period) -> SourceResult<Vec<FollowerPoint>> {
        self.check("follower_snapshots")?;
        self.inner.follower_points(t, id, p)
    }
    fn source_row(&self, source: SourceRef) -> SourceResult<Option<serde_json::Value>> {
        self.inner.source_row(source)
    }
}

#[test]
fn trust_views_count_as_one_of_six_sources() {
    let store = store();
    let seeded = seed_artist(&store, 1, "Kalli Vance");
    let period = Interval::Daily.period_containing(today());
    let formula = TrustFormula::default();

    let full = TrustCalculator::new(&store, &formula).compute(EntityType::Artist, 1, &period);
    assert_eq!(full.inputs.views, 4_000);
    assert!(full.sources.contains(&SourceRef::new(SourceTable::Video, seeded.video_id)));
    assert_eq!(full.data_completeness, 1.0);

    let no_videos = FailingSource { inner: &store, failed: "videos" };
    let degraded = TrustCalculator::new(&no_videos, &formula).compute(EntityType::Artist, 1, &period);
    assert_eq!(degraded.degraded, vec!["views".to_string()]);
    assert!((degraded.data_completeness - 5.0 / 6.0).abs() < 1e-9);
    assert_eq!(degraded.inputs.views, 0);
    assert_eq!(degraded.sub_scores[&TrustFactor::Views], 0.0);
    // Views carry no weight, so the score itself is unchanged.
    assert!((degraded.score - full.score).abs() < 1e-9);

    let no_plays = FailingSource { inner: &store, failed: "playback_events" };
    let degraded = TrustCalculator::new(&no_plays, &formula).compute(EntityType::Artist, 1, &period);
    assert_eq!(degraded.degraded, vec!["plays".to_string()]);
    assert!((degraded.data_completeness - 5.0 / 6.0).abs() < 1e-9);
    assert!(degraded.score < full.score);
}

#[test]
fn missing_reputation_falls_back_to_neutral_without_degrading() {
    let store = store();
    seed_artist(&store, 1, "Kalli Vance");
    let period = Interval::Daily.period_containing(today());
    let formula = TrustFormula::default();

    let full = TrustCalculator::new(&store, &formula).compute(EntityType::Artist, 1, &period);
    assert!((full.modifiers.reputation_multiplier - 1.04).abs() < 1e-9);

    let no_entity = FailingSource { inner: &store, failed: "entity" };
    let neutral = TrustCalculator::new(&no_entity, &formula).compute(EntityType::Artist, 1, &period);
    assert_eq!(neutral.data_completeness, 1.0);
    assert!(neutral.degraded.is_empty());
    assert_eq!(neutral.inputs.reputation, 50.0);
    assert!((neutral.modifiers.reputation_multiplier - 1.0).abs() < 1e-9);
}

#[test]
fn added_spin_surfaces_as_score_mismatch_with_lineage_intact() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today());
    seed_artist(&store, 1, "Kalli Vance");
    rank_daily(&store, &config, &clock);
    let history_id = latest_history(&store, 1);

    store.insert_radio_spin(1, "WKRP", at(10)).unwrap();
    let result = VerificationEngine::new(&store, &config, &clock).verify_score(history_id).unwrap();
    assert_eq!(result.status, VerificationStatus::Failed);
    assert!(!result.score_match);
    assert!((result.score_difference - 10.0).abs() < 1e-9);
    let kinds: Vec<IssueKind> = result.issues.iter().map(|i| i.kind).collect();
    assert_eq!(kinds, vec![IssueKind::ScoreMismatch]);
    assert!(result.lineage.iter().all(|c| c.status == LineageStatus::Valid));
}
