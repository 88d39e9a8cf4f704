//! lockwatchd - Lock contention monitoring daemon.
//!
//! Runs periodic sampling passes against a PostgreSQL-compatible resource
//! manager, one worker per tenant scope, and persists findings to archive
//! segments. Retention runs on the hour.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// Uses jemalloc's arena purge to reduce RSS after memory-intensive operations.
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

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Timelike, Utc};
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use lockwatch_core::clock::SystemClock;
use lockwatch_core::collector::{LockSource, MockLockSource, PostgresLockSource};
use lockwatch_core::config::{EngineConfig, RetentionConfig};
use lockwatch_core::engine::{Engine, PassError, PassOutcome};
use lockwatch_core::storage::findings::FindingsStore;
use lockwatch_core::storage::segment;
use lockwatch_core::tenant::TenantScope;

/// Lock contention monitoring daemon.
#[derive(Parser)]
#[command(name = "lockwatchd", about = "Lock contention monitoring daemon", version)]
struct Args {
    /// Sampling interval in seconds.
    #[arg(short, long, default_value = "30")]
    interval: u64,

    /// Tenant scope to monitor (database name). Repeatable; omit for a
    /// single system-wide scope, or pass "*" explicitly.
    #[arg(short, long = "tenant")]
    tenants: Vec<String>,

    /// Output directory for findings archive segments.
    #[arg(short, long, default_value = "./data")]
    output_dir: String,

    /// Retention horizon in days. Older findings are closed, not deleted.
    #[arg(long, default_value = "30")]
    retention_days: u32,

    /// Blocking seconds after which a High-severity session becomes
    /// auto-kill eligible (advisory only).
    #[arg(long, default_value = "600")]
    kill_threshold: i64,

    /// Sampling statement timeout in milliseconds.
    #[arg(long, default_value = "5000")]
    sample_timeout_ms: u64,

    /// Use a scripted mock lock source instead of PostgreSQL.
    /// Useful for smoke-testing the pipeline without a server.
    #[arg(long)]
    mock: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Formats bytes as human-readable size string.
fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
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

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("lockwatchd={}", level).parse().unwrap())
        .add_directive(format!("lockwatch_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// One-line pass summary for logging.
fn describe_outcome(outcome: &PassOutcome) -> String {
    format!(
        "{} locks, {} blocking, {} critical, {} deadlocks",
        outcome.locks_captured,
        outcome.blocking_count,
        outcome.critical_count,
        outcome.deadlocks_count
    )
}

/// Archive segment path for one tenant scope.
fn segment_path(output_dir: &str, scope: &TenantScope) -> PathBuf {
    let label: String = scope
        .label()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    Path::new(output_dir).join(format!("findings-{}.seg", label))
}

/// One monitored tenant: its scope, engine and archive location.
struct Worker {
    scope: TenantScope,
    engine: Engine<Box<dyn LockSource>>,
    archive: PathBuf,
}

impl Worker {
    fn flush_archive(&self) {
        let history = self.engine.store().history();
        match segment::write_segment(&self.archive, history, self.engine.interner()) {
            Ok(()) => {
                let size = std::fs::metadata(&self.archive).map(|m| m.len()).unwrap_or(0);
                debug!(
                    tenant = %self.scope.label(),
                    rows = history.total_rows(),
                    size = %format_size(size),
                    "archive segment written"
                );
            }
            Err(e) => error!(tenant = %self.scope.label(), "failed to write archive: {}", e),
        }
    }
}

fn build_source(args: &Args) -> Result<Box<dyn LockSource>, String> {
    if args.mock {
        let now = Utc::now().timestamp();
        return Ok(Box::new(MockLockSource::single_block(now)));
    }

    let timeout = Duration::from_millis(args.sample_timeout_ms);
    let mut source = PostgresLockSource::from_env(timeout).map_err(|e| e.to_string())?;
    if let Err(e) = source.try_connect() {
        warn!("PostgreSQL: connection failed ({})", e);
        print_pg_warning(&e.to_string());
    }
    Ok(Box::new(source))
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("lockwatchd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, output={}, retention={}d, kill_threshold={}s",
        args.interval, args.output_dir, args.retention_days, args.kill_threshold
    );

    let scopes: Vec<TenantScope> = if args.tenants.is_empty() {
        vec![TenantScope::SystemWide]
    } else {
        args.tenants.iter().map(|t| TenantScope::parse(t)).collect()
    };
    info!(
        "Monitoring {} scope(s): {}",
        scopes.len(),
        scopes
            .iter()
            .map(|s| s.label())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
        error!("Cannot create output directory {}: {}", args.output_dir, e);
        std::process::exit(1);
    }

    let config = EngineConfig {
        sample_timeout: Duration::from_millis(args.sample_timeout_ms),
        kill_threshold_secs: args.kill_threshold,
        retention: RetentionConfig::new(args.retention_days),
        ..EngineConfig::default()
    };

    // One engine per scope; each keeps its own source connection so
    // tenants' passes can run on separate workers.
    let mut workers: Vec<Worker> = Vec::new();
    for scope in scopes {
        let source = match build_source(&args) {
            Ok(source) => source,
            Err(e) => {
                error!("Lock source unavailable: {}", e);
                print_pg_warning(&e);
                std::process::exit(1);
            }
        };

        let mut engine = Engine::new(source, config.clone(), Box::new(SystemClock::new()));

        let archive = segment_path(&args.output_dir, &scope);
        if archive.exists() {
            match segment::read_segment(&archive) {
                Ok((history, interner)) => {
                    info!(
                        tenant = %scope.label(),
                        rows = history.total_rows(),
                        "resuming from archive segment"
                    );
                    engine = engine.with_store(FindingsStore::from_history(history), interner);
                }
                Err(e) => {
                    warn!(tenant = %scope.label(), "ignoring unreadable archive: {}", e);
                }
            }
        }

        workers.push(Worker {
            scope,
            engine,
            archive,
        });
    }

    let interval = Duration::from_secs(args.interval);

    // Setup graceful shutdown: the running flag stops the scheduler, the
    // per-engine cancel flags abort in-flight passes.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let cancel_flags: Vec<_> = workers.iter().map(|w| w.engine.cancel_flag()).collect();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
        for flag in &cancel_flags {
            flag.store(true, Ordering::SeqCst);
        }
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut last_retention_hour: Option<u32> = None;
    let mut pass_count: u64 = 0;

    info!("Starting monitoring loop");

    while running.load(Ordering::SeqCst) {
        let current_hour = Utc::now().hour();
        pass_count += 1;

        // All scopes sample concurrently; each worker touches only its own
        // tenant's findings.
        std::thread::scope(|s| {
            for worker in &mut workers {
                let pass = pass_count;
                s.spawn(move || {
                    match worker.engine.run_once(&worker.scope) {
                        Ok(outcome) => {
                            info!(
                                "Pass #{} [{}]: {}",
                                pass,
                                outcome.tenant,
                                describe_outcome(&outcome)
                            );
                        }
                        Err(PassError::Cancelled) => {
                            info!(tenant = %worker.scope.label(), "pass cancelled");
                        }
                        Err(e) => {
                            error!(tenant = %worker.scope.label(), "failed pass: {}", e);
                        }
                    }
                });
            }
        });

        // Retention runs on its own schedule: once per hour change.
        if last_retention_hour != Some(current_hour) {
            last_retention_hour = Some(current_hour);

            for worker in &mut workers {
                let result = worker.engine.run_retention();
                if result.total() > 0 {
                    info!(
                        tenant = %worker.scope.label(),
                        closed = result.total(),
                        "retention closed stale findings"
                    );
                }
                worker.flush_archive();
            }
            release_memory_to_os();
            debug!("Memory released after retention");
        }

        // Log memory metrics every 60 passes.
        if pass_count.is_multiple_of(60) {
            for worker in &workers {
                let serialized = bincode::serialize(worker.engine.store().history())
                    .map(|s| s.len())
                    .unwrap_or(0);
                info!(
                    "Memory stats [{}]: interner={} strings, history={} rows ({})",
                    worker.scope.label(),
                    worker.engine.interner().len(),
                    worker.engine.store().history().total_rows(),
                    format_size(serialized as u64)
                );
            }
        }

        // Sleep with periodic checks for shutdown signal.
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    // Graceful shutdown: persist every worker's findings.
    info!("Shutting down...");
    for worker in &workers {
        worker.flush_archive();
    }
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
    eprintln!("{YELLOW}  Configure connection with environment variables:");
    eprintln!("    export PGHOST=localhost");
    eprintln!("    export PGPORT=5432");
    eprintln!("    export PGUSER=postgres");
    eprintln!("    export PGPASSWORD=secret");
    eprintln!("    export PGDATABASE=postgres");
    eprintln!();
    eprintln!("  Or run with --mock to exercise the pipeline offline.{RESET}");
}
