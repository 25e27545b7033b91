//! pgdeltad - PostgreSQL metrics collector daemon.
//!
//! Periodically samples statistics of one or more PostgreSQL servers, diffs
//! them against the previous sample persisted in the state file and logs the
//! resulting deltas.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// Uses jemalloc's arena purge to reduce RSS after each cycle.
fn release_memory_to_os() {
    // SAFETY: We're calling jemalloc's mallctl with valid arguments.
    // arena.0.purge tells jemalloc to return unused pages to the OS.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.0.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgdelta_core::collector::{Collector, PostgresConnection, ProcfsSystemSource, RealFs};
use pgdelta_core::config::CollectionOpts;
use pgdelta_core::cycle::{CollectionCycle, CycleError, CycleReport, Reporter};
use pgdelta_core::storage::model::DiffState;
use pgdelta_core::storage::{FileStateStore, MemoryStateStore, StateStore, masked};

/// PostgreSQL metrics collector daemon.
#[derive(Parser)]
#[command(name = "pgdeltad", about = "PostgreSQL metrics collector daemon", version)]
struct Args {
    /// Collection interval in seconds.
    #[arg(short, long, default_value = "600")]
    interval: u64,

    /// File holding the previous snapshot of every target.
    #[arg(long, default_value = "/var/lib/pgdelta/state")]
    state_file: PathBuf,

    /// Run one cycle per target without reading or writing state, then exit.
    #[arg(long)]
    test: bool,

    /// Keep the stored baseline as is (state is still read).
    #[arg(long)]
    no_write_state: bool,

    /// Monitored server as API_KEY=CONNINFO. Repeat for several servers.
    /// Without any, the PG* environment variables and PGDELTA_API_KEY are used.
    #[arg(long = "target", value_name = "API_KEY=CONNINFO", value_parser = parse_target)]
    targets: Vec<Target>,

    /// API key for the target built from the environment.
    #[arg(long, env = "PGDELTA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Collect table and index statistics. Disable with --relations=false.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    relations: bool,

    /// Collect pg_settings.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    settings: bool,

    /// Collect pg_stat_user_functions.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    functions: bool,

    /// Collect host CPU, network and disk counters.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    system: bool,

    /// Diff pg_stat_statements counters.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    statement_diff: bool,

    /// Statement timeout for the collector's queries, in milliseconds.
    #[arg(long, default_value = "30000")]
    statement_timeout_ms: i32,

    /// application_name of the collector's sessions.
    #[arg(long, default_value = "pgdelta")]
    application_name: String,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// A monitored server.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    api_key: String,
    /// `None` means the libpq environment variables.
    conninfo: Option<String>,
}

/// Parses `API_KEY=CONNINFO`. The key ends at the first `=`.
fn parse_target(s: &str) -> Result<Target, String> {
    let (api_key, conninfo) = s
        .split_once('=')
        .ok_or_else(|| format!("expected API_KEY=CONNINFO, got '{}'", s))?;
    let api_key = api_key.trim();
    let conninfo = conninfo.trim();
    if api_key.is_empty() {
        return Err("empty API key".to_string());
    }
    if conninfo.is_empty() {
        return Err(format!("empty connection string for {}", masked(api_key)));
    }
    Ok(Target {
        api_key: api_key.to_string(),
        conninfo: Some(conninfo.to_string()),
    })
}

fn collection_opts(args: &Args) -> CollectionOpts {
    CollectionOpts {
        collect_relations: args.relations,
        collect_settings: args.settings,
        collect_functions: args.functions,
        collect_system_information: args.system,
        collector_application_name: args.application_name.clone(),
        statement_timeout_ms: args.statement_timeout_ms,
        diff_statements: args.statement_diff,
        test_run: args.test,
        state_filename: args.state_file.clone(),
        write_state_update: !args.no_write_state,
        ..CollectionOpts::default()
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgdeltad", "pgdelta_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Describes the contents of a diff for logging.
fn describe_diff(diff: &DiffState) -> String {
    let mut parts = vec![
        format!("{} statements", diff.statement_stats.len()),
        format!("{} tables", diff.relation_stats.len()),
        format!("{} indexes", diff.index_stats.len()),
        format!("{} functions", diff.function_stats.len()),
    ];
    if !diff.system_cpu_stats.is_empty() {
        parts.push(format!("{} cpus", diff.system_cpu_stats.len()));
    }
    if !diff.system_network_stats.is_empty() {
        parts.push(format!("{} interfaces", diff.system_network_stats.len()));
    }
    if !diff.system_disk_stats.is_empty() {
        parts.push(format!("{} disks", diff.system_disk_stats.len()));
    }
    let resets = diff.reset_count();
    if resets > 0 {
        parts.push(format!("{} resets", resets));
    }
    parts.join(", ")
}

/// Logs a summary of every cycle.
struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, report: &CycleReport<'_>) {
        let interval = report
            .diff
            .interval_secs
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "first sample".to_string());
        info!(
            api_key = %masked(report.api_key),
            "PostgreSQL {}: {} ({})",
            report.snapshot.version.short,
            describe_diff(report.diff),
            interval
        );
        if report.submission_allowed {
            debug!(api_key = %masked(report.api_key), "grant valid, data may be submitted");
        } else {
            debug!(api_key = %masked(report.api_key), "no valid grant, data stays local");
        }
    }
}

/// Wall-clock time of the next cycle, `None` if it is out of range.
fn next_cycle_at(now: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(interval.as_secs()).ok()?;
    now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

fn run_target(
    target: Target,
    opts: CollectionOpts,
    proc_path: PathBuf,
    store: Arc<dyn StateStore>,
    interval: Duration,
    running: &AtomicBool,
) {
    let key = masked(&target.api_key);
    let connection = match target.conninfo {
        Some(conninfo) => Ok(PostgresConnection::new(conninfo, &opts)),
        None => PostgresConnection::from_env(&opts),
    };
    let mut connection = match connection {
        Ok(c) => c,
        Err(e) => {
            error!(api_key = %key, "{}", e);
            print_pg_warning(&e.to_string());
            return;
        }
    };
    match connection.try_connect() {
        Ok(()) => info!(api_key = %key, "connected"),
        Err(e) => {
            warn!(api_key = %key, "connection failed ({}), retrying every cycle", e);
            print_pg_warning(&e.to_string());
        }
    }

    let once = opts.test_run;
    let mut collector = Collector::new(connection, opts);
    if collector.opts().collect_system_information {
        collector = collector.with_system(Box::new(ProcfsSystemSource::new(
            RealFs::new(),
            proc_path,
        )));
    }
    let mut cycle = CollectionCycle::new(target.api_key, collector, store);
    let mut reporter = LogReporter;

    while running.load(Ordering::SeqCst) {
        match cycle.run(running, &mut reporter) {
            Ok(outcome) => debug!(
                api_key = %key,
                had_previous = outcome.had_previous,
                saved = outcome.saved,
                resets = outcome.resets,
                "cycle complete"
            ),
            Err(CycleError::Cancelled) => break,
            Err(e) => error!(api_key = %key, "{}", e),
        }
        release_memory_to_os();

        if once {
            break;
        }

        if let Some(next) = next_cycle_at(Utc::now(), interval) {
            debug!(api_key = %key, "next cycle at {}", next.format("%H:%M:%S"));
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let opts = collection_opts(&args);

    info!("pgdeltad {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, state={}, test={}",
        args.interval,
        opts.state_filename.display(),
        opts.test_run
    );

    let targets = if args.targets.is_empty() {
        let Some(api_key) = args.api_key.clone() else {
            error!("no --target given and PGDELTA_API_KEY is not set");
            std::process::exit(1);
        };
        vec![Target {
            api_key,
            conninfo: None,
        }]
    } else {
        args.targets.clone()
    };

    // Dry runs never touch the state file.
    let store: Arc<dyn StateStore> = if opts.test_run {
        Arc::new(MemoryStateStore::new())
    } else {
        Arc::new(FileStateStore::new(opts.state_filename.clone()))
    };

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    info!("Starting collection for {} target(s)", targets.len());
    let interval = Duration::from_secs(args.interval.max(1));

    std::thread::scope(|s| {
        for target in targets {
            let opts = opts.clone();
            let store = store.clone();
            let proc_path = args.proc_path.clone();
            let running = &*running;
            s.spawn(move || run_target(target, opts, proc_path, store, interval, running));
        }
    });

    info!("Shutdown complete");
}

/// Prints a colored PostgreSQL warning with configuration hints.
fn print_pg_warning(error: &str) {
    // ANSI colors: red for error, yellow for hints, reset after
    const RED: &str = "\x1b[1;31m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    eprintln!("{RED}PostgreSQL: {error}{RESET}");
    eprintln!();
    eprintln!("{YELLOW}  Configure targets with --target API_KEY=CONNINFO, or:");
    eprintln!("    export PGHOST=localhost");
    eprintln!("    export PGPORT=5432");
    eprintln!("    export PGUSER=postgres");
    eprintln!("    export PGPASSWORD=secret");
    eprintln!("    export PGDATABASE=postgres");
    eprintln!("    export PGDELTA_API_KEY=...{RESET}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgdelta_core::storage::model::{Diffed, IndexKey, StatementKey, StatementStats};

    #[test]
    fn parse_target_splits_at_first_equals() {
        let t = parse_target("abcd1234=host=db1 port=5433 dbname=app").unwrap();
        assert_eq!(t.api_key, "abcd1234");
        assert_eq!(t.conninfo.as_deref(), Some("host=db1 port=5433 dbname=app"));
    }

    #[test]
    fn parse_target_rejects_incomplete_values() {
        assert!(parse_target("no-separator").is_err());
        assert!(parse_target("=host=db1").is_err());
        assert!(parse_target("key=").is_err());
    }

    #[test]
    fn args_map_to_collection_opts() {
        let args = Args::try_parse_from([
            "pgdeltad",
            "--test",
            "--relations=false",
            "--statement-diff=false",
            "--statement-timeout-ms",
            "5000",
            "--target",
            "k1=host=a",
            "--target",
            "k2=host=b",
        ])
        .unwrap();
        assert_eq!(args.targets.len(), 2);

        let opts = collection_opts(&args);
        assert!(opts.test_run);
        assert!(!opts.collect_relations);
        assert!(opts.collect_functions);
        assert!(!opts.diff_statements);
        assert_eq!(opts.statement_timeout_ms, 5000);
        assert!(!opts.reads_state());
    }

    #[test]
    fn no_write_state_keeps_reading() {
        let args = Args::try_parse_from(["pgdeltad", "--no-write-state"]).unwrap();
        let opts = collection_opts(&args);
        assert!(opts.reads_state());
        assert!(!opts.writes_state());
    }

    #[test]
    fn next_cycle_time_handles_huge_intervals() {
        let now = Utc::now();
        assert_eq!(
            next_cycle_at(now, Duration::from_secs(600)),
            Some(now + chrono::Duration::seconds(600))
        );
        assert_eq!(next_cycle_at(now, Duration::from_secs(u64::MAX)), None);
        assert_eq!(next_cycle_at(now, Duration::from_secs(i64::MAX as u64)), None);
    }

    #[test]
    fn describe_diff_lists_categories_and_resets() {
        let mut diff = DiffState::default();
        diff.statement_stats.insert(
            StatementKey {
                database_oid: 1,
                role_oid: 1,
                query_id: 1,
            },
            Diffed {
                delta: StatementStats::default(),
                reset: true,
            },
        );
        diff.index_stats.insert(
            IndexKey {
                database_oid: 1,
                indexrelid: 2,
            },
            Diffed::default(),
        );

        let desc = describe_diff(&diff);
        assert!(desc.contains("1 statements"));
        assert!(desc.contains("1 indexes"));
        assert!(desc.contains("1 resets"));
        assert!(!desc.contains("cpus"));
    }
}
