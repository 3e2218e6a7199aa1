//! impact-runner: headless batch runner for the impact engine.
//!
//! Usage:
//!   impact-runner --date 2026-10-17 --cycles 7 --demo
//!   impact-runner --db impact.db --data-dir ./data --ipc-mode

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use clap::Parser;
use impact_core::{
    clock::RunClock,
    command::OperatorCommand,
    config::ImpactConfig,
    corrections::CorrectionManager,
    engine::ImpactEngine,
    leaderboard::{Leaderboard, LeaderboardService},
    receipt::{MemoryReceiptSink, ReceiptSink},
    store::{ImpactStore, NewEntity},
    types::{EntityType, Interval},
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "impact-runner")]
#[command(about = "Batch scoring, ranking and verification runner")]
#[command(version)]
struct Args {
    /// SQLite database path. `:memory:` uses a private shared-memory database.
    #[arg(long, default_value = ":memory:", env = "IMPACT_DB")]
    db: String,

    /// Directory holding scoring/, ranking/ and trust/ JSON config.
    #[arg(long, default_value = "./data", env = "IMPACT_DATA_DIR")]
    data_dir: String,

    /// Pin the run clock to this date (YYYY-MM-DD). Defaults to the system clock.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Number of batch cycles to run. A pinned clock advances one day per cycle.
    #[arg(long, default_value_t = 1)]
    cycles: u64,

    /// Seed a small sample catalogue before running.
    #[arg(long)]
    demo: bool,

    /// Read JSON-line commands from stdin instead of running cycles.
    #[arg(long)]
    ipc_mode: bool,
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Cycle {
        #[serde(default = "one")]
        count: u64,
    },
    Command(OperatorCommand),
    Leaderboard {
        entity_type: EntityType,
        interval:    Interval,
        #[serde(default)]
        category:    Option<String>,
        #[serde(default)]
        limit:       usize,
    },
    Quit,
}

fn one() -> u64 {
    1
}

#[derive(serde::Serialize)]
struct RunnerState {
    run_id:        String,
    cycle:         u64,
    as_of:         NaiveDate,
    open_disputes: usize,
    receipts:      usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ImpactConfig::load(&args.data_dir).unwrap_or_else(|e| {
        log::warn!("{e}; falling back to built-in defaults");
        ImpactConfig::default()
    });
    let clock = match args.date {
        Some(date) => RunClock::at_date(date),
        None => RunClock::system(),
    };

    // For :memory: use a shared-memory URI so parallel scoring workers
    // reopening the store see the same database.
    let run_id = format!("run-{}", Uuid::new_v4());
    let db_effective = if args.db == ":memory:" {
        format!("file:impact_{}?mode=memory&cache=shared", Uuid::new_v4().simple())
    } else {
        args.db.clone()
    };
    let store = ImpactStore::open(&db_effective)
        .with_context(|| format!("opening database {}", args.db))?;
    store.migrate().context("applying migrations")?;

    if args.demo {
        seed_demo_catalogue(&store, clock.today())?;
    }

    if !args.ipc_mode {
        println!("impact-runner");
        println!("  run_id:    {run_id}");
        println!("  as of:     {}", clock.today());
        println!("  cycles:    {}", args.cycles);
        println!("  db:        {}", args.db);
        println!("  data_dir:  {}", args.data_dir);
        println!();
    }

    let receipts = Arc::new(MemoryReceiptSink::new());
    let sink: Arc<dyn ReceiptSink> = receipts.clone();
    let mut engine = ImpactEngine::build(run_id, config, store, clock, sink);

    if args.ipc_mode {
        run_ipc_loop(&mut engine, &receipts)?;
    } else {
        engine.run_cycles(args.cycles)?;
        print_summary(&engine, &receipts)?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &mut ImpactEngine, receipts: &MemoryReceiptSink) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => serde_json::to_value(runner_state(engine, receipts)?)?,
            IpcCommand::Cycle { count } => match engine.run_cycles(count) {
                Ok(()) => serde_json::to_value(runner_state(engine, receipts)?)?,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
            IpcCommand::Command(command) => match engine.apply_command(&command) {
                Ok(outcome) => serde_json::to_value(outcome)?,
                Err(e) => {
                    log::warn!("Command {} failed: {e}", command.type_name());
                    serde_json::json!({ "error": e.to_string() })
                }
            },
            IpcCommand::Leaderboard { entity_type, interval, category, limit } => {
                let service =
                    LeaderboardService::new(engine.store(), &engine.config().cache, &engine.clock);
                match service.get_leaderboard(entity_type, interval, category.as_deref(), limit) {
                    Ok(board) => serde_json::to_value(board)?,
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                }
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn runner_state(engine: &ImpactEngine, receipts: &MemoryReceiptSink) -> Result<RunnerState> {
    let open_disputes = CorrectionManager::new(engine.store(), &engine.clock).open_disputes()?;
    Ok(RunnerState {
        run_id: engine.run_id.clone(),
        cycle: engine.cycle(),
        as_of: engine.clock.today(),
        open_disputes: open_disputes.len(),
        receipts: receipts.receipts().len(),
    })
}

fn print_summary(engine: &ImpactEngine, receipts: &MemoryReceiptSink) -> Result<()> {
    let store = engine.store();
    let run_id = &engine.run_id;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:          {run_id}");
    println!("  cycles run:      {}", engine.cycle());
    println!("  windows ranked:  {}", store.event_count(run_id, "window_ranked")?);
    println!("  trust batches:   {}", store.event_count(run_id, "trust_scores_recorded")?);
    println!("  failed verifies: {}", store.event_count(run_id, "score_verified")?);
    println!("  receipts sent:   {}", receipts.receipts().len());

    // Leaderboards are read at the last ranked instant, not after the final
    // clock advance.
    let mut clock = engine.clock.clone();
    if clock.is_fixed() && engine.cycle() > 0 {
        clock.advance(Duration::days(-1));
    }
    let service = LeaderboardService::new(store, &engine.config().cache, &clock);
    for entity_type in EntityType::ALL {
        let board = service.get_leaderboard(entity_type, Interval::Weekly, None, 5)?;
        print_board(&board);
    }
    Ok(())
}

fn print_board(board: &Leaderboard) {
    println!();
    println!(
        "=== TOP {} {} ({} to {}) ===",
        board.entity_type.as_str().to_uppercase(),
        board.interval.as_str().to_uppercase(),
        board.period.start,
        board.period.end
    );
    if board.entries.is_empty() {
        println!("  (no ranked entries)");
        return;
    }
    for e in &board.entries {
        let movement = match e.rank_movement {
            Some(m) if m > 0 => format!("+{m}"),
            Some(m) => m.to_string(),
            None => "new".into(),
        };
        println!("  {:>3}. {:<24} {:>10.2}  {}", e.rank, e.name, e.score, movement);
    }
}

/// A label with a three-artist roster plus one independent artist, each with
/// a spread of signals dated inside the current week.
fn seed_demo_catalogue(store: &ImpactStore, today: NaiveDate) -> Result<()> {
    let at = |days_ago: i64, hour: u32| {
        (today - Duration::days(days_ago))
            .and_hms_opt(hour, 0, 0)
            .unwrap_or_default()
    };

    store.insert_entity(&NewEntity::label(100, "Northside Records").claimed().genre("hip-hop"))?;
    store.insert_entity(&NewEntity::label(101, "Blue Porch").genre("blues").investor())?;

    let artists = [
        NewEntity::artist(1, "Kalli Vance").claimed().genre("hip-hop").signed_to(100).reputation(72.0),
        NewEntity::artist(2, "Marrow Street").genre("hip-hop").signed_to(100),
        NewEntity::artist(3, "Deacon Hale").genre("blues").signed_to(101).investor(),
        NewEntity::artist(4, "Ora Lind").claimed().genre("indie").reputation(55.0),
    ];
    for artist in &artists {
        store.insert_entity(artist)?;
    }

    for (artist_id, spins) in [(1, 14), (2, 6), (3, 9), (4, 3)] {
        for n in 0..spins {
            store.insert_radio_spin(artist_id, "WKRP", at(n % 3, 8 + (n % 10) as u32))?;
            store.insert_playback_event(EntityType::Artist, artist_id, 180, at(n % 2, 9))?;
        }
        store.insert_social_account(EntityType::Artist, artist_id, "instagram", "handle", at(30, 10))?;
        store.insert_follower_snapshot(EntityType::Artist, artist_id, 1_000, at(1, 0))?;
        store.insert_follower_snapshot(EntityType::Artist, artist_id, 1_000 + 40 * spins, at(0, 0))?;
        for kind in ["like", "comment", "share", "save"] {
            store.insert_engagement_event(EntityType::Artist, artist_id, kind, at(0, 11))?;
        }
    }

    store.insert_chart_entry(1, "Hot 40", 12, 120, today - Duration::days(1))?;
    store.insert_chart_entry(3, "Blues 20", 4, 60, today)?;
    store.insert_release(1, "Late Bloom", at(2, 0))?;
    store.insert_release(4, "Glass Harbour", at(0, 0))?;
    store.insert_video(EntityType::Artist, 1, "Late Bloom (Official)", 25_000, at(2, 12))?;
    store.insert_video(EntityType::Label, 100, "Northside Cypher", 8_000, at(1, 12))?;
    store.insert_post("Kalli Vance returns", Some("A new single"), Some("hip-hop"), None, at(0, 7))?;
    store.insert_spark(EntityType::Artist, 1, 25.0, at(0, 13))?;
    store.set_engagement_quality(EntityType::Artist, 1, 82.0, at(0, 1))?;
    store.set_engagement_quality(EntityType::Label, 100, 64.0, at(0, 1))?;

    log::info!("Seeded demo catalogue: 2 labels, {} artists", artists.len());
    Ok(())
}
