//! Ranking window manager tests.
//!
//! Covers window idempotency, dense ranks, determinism, previous-rank
//! deltas, the investor boost, receipts and cancellation.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use impact_core::{
    audit::CalculationMethod,
    clock::RunClock,
    config::ImpactConfig,
    ranking_subsystem::{RankingItem, RankingManager},
    receipt::{LogReceiptSink, MemoryReceiptSink, RankingReceipt, ReceiptSink},
    store::{ImpactStore, NewEntity},
    subsystem::CancelToken,
    types::{EntityType, Interval},
};

fn store() -> ImpactStore {
    let store = ImpactStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, 0, 0).unwrap()
}

/// Seed `spins` radio spins for `artist_id` on `date`.
fn spins(store: &ImpactStore, artist_id: i64, date: NaiveDate, n: u32) {
    for i in 0..n {
        store.insert_radio_spin(artist_id, "WKRP", at(date, i % 24)).unwrap();
    }
}

fn ranked_items(store: &ImpactStore, interval: Interval, date: NaiveDate) -> Vec<RankingItem> {
    let window = store
        .find_window(interval, interval.period_containing(date).start)
        .unwrap()
        .expect("window exists");
    store.ranking_items(window.id, EntityType::Artist).unwrap()
}

struct FailingSink;

impl ReceiptSink for FailingSink {
    fn notify(&self, _receipt: &RankingReceipt) -> anyhow::Result<()> {
        anyhow::bail!("receipt service unreachable")
    }
}

#[test]
fn window_creation_is_idempotent() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(d(2026, 10, 17));
    let cancel = CancelToken::new();
    let manager = RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel);

    let first = manager.get_or_create_window(Interval::Weekly, d(2026, 10, 12), d(2026, 10, 18)).unwrap();
    let second = manager.get_or_create_window(Interval::Weekly, d(2026, 10, 12), d(2026, 10, 18)).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.windows_for_interval(Interval::Weekly).unwrap().len(), 1);

    // Same start date under another interval is a different window.
    let daily = manager.get_or_create_window(Interval::Daily, d(2026, 10, 12), d(2026, 10, 12)).unwrap();
    assert_ne!(daily, first);
}

#[test]
fn previous_window_is_most_recent_strictly_earlier() {
    let store = store();
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(d(2026, 10, 17));
    let cancel = CancelToken::new();
    let manager = RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel);

    let w1 = manager.get_or_create_window(Interval::Weekly, d(2026, 9, 28), d(2026, 10, 4)).unwrap();
    let w2 = manager.get_or_create_window(Interval::Weekly, d(2026, 10, 5), d(2026, 10, 11)).unwrap();
    let w3 = manager.get_or_create_window(Interval::Weekly, d(2026, 10, 12), d(2026, 10, 18)).unwrap();
    manager.get_or_create_window(Interval::Monthly, d(2026, 10, 1), d(2026, 10, 31)).unwrap();

    assert_eq!(manager.get_previous_window(Interval::Weekly, d(2026, 10, 12)).unwrap(), Some(w2));
    assert_eq!(manager.get_previous_window(Interval::Weekly, d(2026, 10, 5)).unwrap(), Some(w1));
    assert_eq!(manager.get_previous_window(Interval::Weekly, d(2026, 9, 28)).unwrap(), None);
    assert_ne!(w3, w2);
}

#[test]
fn ranks_are_a_dense_permutation_ordered_by_score() {
    let store = store();
    let today = d(2026, 10, 17);
    for (id, n) in [(1, 3), (2, 9), (3, 0), (4, 9), (5, 5)] {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}"))).unwrap();
        spins(&store, id, today, n);
    }
    store.insert_entity(&NewEntity::artist(6, "Retired").status("inactive")).unwrap();
    spins(&store, 6, today, 50);

    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    let manager = RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel);
    let report = manager.compute_for_interval(Interval::Weekly).unwrap();
    assert_eq!(report.ranked(EntityType::Artist), 5);

    let items = ranked_items(&store, Interval::Weekly, today);
    let ranks: Vec<u32> = items.iter().map(|i| i.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);

    // Ties on score break on id.
    let order: Vec<i64> = items.iter().map(|i| i.entity_id).collect();
    assert_eq!(order, vec![2, 4, 5, 1, 3]);
    assert!(items.windows(2).all(|w| w[0].base_score >= w[1].base_score));
    assert!(items.iter().all(|i| i.prev_rank.is_none() && i.deltas.is_none()));
}

#[test]
fn recomputing_unchanged_data_is_deterministic() {
    let store = store();
    let today = d(2026, 10, 17);
    for (id, n) in [(1, 4), (2, 7), (3, 7), (4, 1)] {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}")).genre("pop")).unwrap();
        spins(&store, id, today, n);
    }
    store.insert_entity(&NewEntity::label(10, "Label")).unwrap();

    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    let manager = RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel);

    let first_report = manager.compute_for_interval(Interval::Monthly).unwrap();
    let first = ranked_items(&store, Interval::Monthly, today);
    let second_report = manager.compute_for_interval(Interval::Monthly).unwrap();
    let second = ranked_items(&store, Interval::Monthly, today);

    assert_eq!(first_report.window_id, second_report.window_id);
    assert_eq!(first, second);
}

#[test]
fn prev_rank_comes_from_the_previous_window() {
    let store = store();
    let last_week = d(2026, 10, 8);
    let this_week = d(2026, 10, 15);
    for id in 1..=3 {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}"))).unwrap();
    }
    // Last week: 1 > 2 > 3. This week: 3 > 2 > 1, plus newcomer 4 on top.
    spins(&store, 1, last_week, 9);
    spins(&store, 2, last_week, 6);
    spins(&store, 3, last_week, 3);
    spins(&store, 1, this_week, 2);
    spins(&store, 2, this_week, 5);
    spins(&store, 3, this_week, 8);

    let config = ImpactConfig::default();
    let cancel = CancelToken::new();

    let clock = RunClock::at_date(last_week);
    RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Weekly)
        .unwrap();

    store.insert_entity(&NewEntity::artist(4, "Newcomer")).unwrap();
    spins(&store, 4, this_week, 20);
    let clock = RunClock::at_date(this_week);
    RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Weekly)
        .unwrap();

    let items = ranked_items(&store, Interval::Weekly, this_week);
    let by_id = |id: i64| items.iter().find(|i| i.entity_id == id).unwrap().clone();

    assert_eq!(by_id(4).rank, 1);
    assert_eq!(by_id(4).prev_rank, None);
    assert_eq!(by_id(3).rank, 2);
    assert_eq!(by_id(3).prev_rank, Some(3));
    assert_eq!(by_id(3).deltas.unwrap().rank_change, 1);
    assert_eq!(by_id(2).prev_rank, Some(2));
    assert_eq!(by_id(2).deltas.unwrap().rank_change, -1);
    assert_eq!(by_id(1).rank, 4);
    assert_eq!(by_id(1).prev_rank, Some(1));
    assert_eq!(by_id(1).deltas.unwrap().rank_change, -3);
}

#[test]
fn investor_multiplier_changes_stored_score_not_rank() {
    let store = store();
    let today = d(2026, 10, 17);
    store.insert_entity(&NewEntity::artist(1, "Investor Owned").claimed().investor()).unwrap();
    store.insert_entity(&NewEntity::artist(2, "Independent").claimed()).unwrap();
    spins(&store, 2, today, 4);

    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Daily)
        .unwrap();

    let items = ranked_items(&store, Interval::Daily, today);
    assert_eq!(items[0].entity_id, 2);
    assert_eq!(items[0].score, 1040.0);
    assert!(!items[0].boosted);

    let boosted = &items[1];
    assert_eq!(boosted.entity_id, 1);
    assert_eq!(boosted.rank, 2);
    assert_eq!(boosted.base_score, 1000.0);
    assert!((boosted.score - 1050.0).abs() < 1e-9);
    assert!(boosted.boosted);

    // The audit trail carries the boosted score and its multiplier.
    let history = store.history_for_entity(EntityType::Artist, 1).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].calculation_method, CalculationMethod::AdditiveV1);
    assert!((history[0].score_value - 1050.0).abs() < 1e-9);
    assert_eq!(history[0].modifiers.investor_multiplier, 1.05);
}

#[test]
fn investor_multiplier_can_be_disabled() {
    let store = store();
    let today = d(2026, 10, 17);
    store.insert_entity(&NewEntity::artist(1, "Investor Owned").claimed().investor()).unwrap();

    let mut config = ImpactConfig::default();
    config.ranking.apply_investor_multiplier = false;
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Daily)
        .unwrap();

    let items = ranked_items(&store, Interval::Daily, today);
    assert_eq!(items[0].score, 1000.0);
    assert!(!items[0].boosted);
}

#[test]
fn every_ranked_entity_gets_a_receipt() {
    let store = store();
    let today = d(2026, 10, 17);
    for id in 1..=3 {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}"))).unwrap();
    }
    store.insert_entity(&NewEntity::label(10, "Label")).unwrap();

    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    let sink = MemoryReceiptSink::new();
    let report = RankingManager::new(&store, &config, &clock, &sink, &cancel)
        .compute_for_interval(Interval::Weekly)
        .unwrap();

    let receipts = sink.receipts();
    assert_eq!(receipts.len(), 4);
    assert!(receipts.iter().all(|r| r.window_id == report.window_id));
    assert_eq!(receipts.iter().filter(|r| r.entity_type == EntityType::Label).count(), 1);
}

#[test]
fn failing_receipts_never_block_ranking() {
    let store = store();
    let today = d(2026, 10, 17);
    for id in 1..=3 {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}"))).unwrap();
    }

    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    let report = RankingManager::new(&store, &config, &clock, &FailingSink, &cancel)
        .compute_for_interval(Interval::Weekly)
        .unwrap();

    let artists = report
        .types
        .iter()
        .find(|t| t.entity_type == Some(EntityType::Artist))
        .unwrap();
    assert_eq!(artists.ranked, 3);
    assert_eq!(artists.receipts_failed, 3);
    assert_eq!(ranked_items(&store, Interval::Weekly, today).len(), 3);
}

#[test]
fn cancelled_run_leaves_existing_rankings_untouched() {
    let store = store();
    let today = d(2026, 10, 17);
    for id in 1..=3 {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}"))).unwrap();
        spins(&store, id, today, id as u32);
    }

    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    let manager = RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel);
    manager.compute_for_interval(Interval::Weekly).unwrap();
    let before = ranked_items(&store, Interval::Weekly, today);

    spins(&store, 1, today, 30);
    cancel.cancel();
    let report = manager.compute_for_interval(Interval::Weekly).unwrap();
    assert!(report.cancelled());
    assert_eq!(report.types.len(), 1, "labels are not attempted after a cancel");

    assert_eq!(ranked_items(&store, Interval::Weekly, today), before);
    assert_eq!(store.history_for_entity(EntityType::Artist, 1).unwrap().len(), 1);
}

#[test]
fn parallel_scoring_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("impact.db");
    let store = ImpactStore::open(path.to_str().unwrap()).unwrap();
    store.migrate().unwrap();

    let today = d(2026, 10, 17);
    for id in 1..=12 {
        store.insert_entity(&NewEntity::artist(id, &format!("Artist {id}"))).unwrap();
        spins(&store, id, today, (id as u32 * 7) % 11);
    }

    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();

    let sequential = ImpactConfig::default();
    RankingManager::new(&store, &sequential, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Daily)
        .unwrap();
    let expected = ranked_items(&store, Interval::Daily, today);

    let mut parallel = ImpactConfig::default();
    parallel.ranking.workers = 4;
    RankingManager::new(&store, &parallel, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Daily)
        .unwrap();
    let actual = ranked_items(&store, Interval::Daily, today);

    assert_eq!(actual, expected);
    assert_eq!(actual.len(), 12);
}

#[test]
fn monthly_window_spans_the_calendar_month() {
    let store = store();
    let today = d(2026, 10, 17);
    let config = ImpactConfig::default();
    let clock = RunClock::at_date(today);
    let cancel = CancelToken::new();
    let report = RankingManager::new(&store, &config, &clock, &LogReceiptSink, &cancel)
        .compute_for_interval(Interval::Monthly)
        .unwrap();

    assert_eq!(report.period.start, d(2026, 10, 1));
    assert_eq!(report.period.end, d(2026, 10, 31));
    assert_eq!(report.period.end.month(), 10);
    assert_eq!(report.ranked(EntityType::Artist), 0);
}
