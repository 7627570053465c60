//! Load generator for the connection pool.
//!
//! Drives a pool backed by the in-memory mock driver from many threads and
//! prints the resulting status and metrics.
//!
//! Run with `cargo run -p beecp-stress -- <command>`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use beecp_pool::{ConnectionPool, PoolConfig, PoolMetrics};
use beecp_testing::{MOCK_DRIVER_NAME, MOCK_URL, mock_registry};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beecp-stress", about = "Load generator for the beecp pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one load scenario
    Run {
        #[command(flatten)]
        load: Load,
        /// Hand returned connections to waiters in arrival order
        #[arg(long)]
        fair: bool,
    },
    /// Run the same scenario in unfair and fair mode and compare
    Compare {
        #[command(flatten)]
        load: Load,
    },
}

#[derive(Args, Clone)]
struct Load {
    /// Number of borrowing threads
    #[arg(long, default_value_t = 16)]
    threads: usize,
    /// Borrows per thread
    #[arg(long, default_value_t = 200)]
    iterations: usize,
    /// Maximum number of pooled connections
    #[arg(long, default_value_t = 4)]
    max_size: usize,
    /// Borrow wait bound in milliseconds
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,
    /// How long each borrower holds its connection, in milliseconds
    #[arg(long, default_value_t = 1)]
    hold_ms: u64,
    /// Run a prepared statement on every borrow
    #[arg(long)]
    prepare: bool,
}

struct Outcome {
    elapsed: Duration,
    failures: usize,
    metrics: PoolMetrics,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { load, fair } => {
            println!("Running {} mode...", mode(fair));
            let outcome = run(&load, fair)?;
            report(fair, &outcome);
        }
        Command::Compare { load } => {
            let unfair = run(&load, false)?;
            report(false, &unfair);
            let fair = run(&load, true)?;
            report(true, &fair);
            println!(
                "fair/unfair time ratio: {:.2}",
                fair.elapsed.as_secs_f64() / unfair.elapsed.as_secs_f64().max(f64::EPSILON)
            );
        }
    }

    Ok(())
}

fn mode(fair: bool) -> &'static str {
    if fair { "fair" } else { "unfair" }
}

fn run(load: &Load, fair: bool) -> Result<Outcome> {
    let (registry, _) = mock_registry();
    let config = PoolConfig::new(MOCK_DRIVER_NAME, MOCK_URL, "stress", "stress")
        .pool_max_size(load.max_size)
        .fair_mode(fair)
        .borrower_max_wait_time(Duration::from_millis(load.wait_ms));
    let pool = Arc::new(
        ConnectionPool::initialize(config, &registry).context("failed to initialize pool")?,
    );

    let started = Instant::now();
    let handles = (0..load.threads)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let load = load.clone();
            thread::Builder::new()
                .name(format!("borrower-{worker}"))
                .spawn(move || borrower(&pool, &load))
                .context("failed to spawn borrower thread")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut failures = 0;
    for handle in handles {
        failures += handle
            .join()
            .map_err(|_| anyhow!("borrower thread panicked"))?;
    }
    let elapsed = started.elapsed();

    let status = pool.status();
    if status.in_use != 0 || status.waiting != 0 {
        return Err(anyhow!(
            "pool did not settle: {} in use, {} waiting",
            status.in_use,
            status.waiting
        ));
    }
    let metrics = pool.metrics();
    pool.shutdown();

    Ok(Outcome {
        elapsed,
        failures,
        metrics,
    })
}

/// Returns the number of failed borrows.
fn borrower(pool: &ConnectionPool, load: &Load) -> usize {
    let hold = Duration::from_millis(load.hold_ms);
    let mut failures = 0;

    for _ in 0..load.iterations {
        let conn = match pool.borrow() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "borrow failed");
                failures += 1;
                continue;
            }
        };
        if load.prepare {
            if let Err(e) = exercise(&conn) {
                tracing::warn!(error = %e, connection_id = conn.id(), "statement failed");
            }
        }
        if !hold.is_zero() {
            thread::sleep(hold);
        }
        if let Err(e) = conn.close() {
            tracing::warn!(error = %e, "close failed");
        }
    }

    failures
}

fn exercise(conn: &beecp_pool::ConnectionProxy) -> beecp_pool::Result<()> {
    let mut stmt = conn.prepare_statement("select * from accounts where id = ?")?;
    stmt.bind(1, 1.into())?;
    let mut rows = stmt.execute_query()?;
    while rows.next()? {}
    rows.close()?;
    stmt.close()
}

fn report(fair: bool, outcome: &Outcome) {
    let m = &outcome.metrics;
    println!("== {} ==", mode(fair));
    println!("  elapsed:            {:?}", outcome.elapsed);
    println!("  borrows ok:         {}", m.borrows_successful);
    println!("  borrows timed out:  {}", m.borrows_timed_out);
    println!("  borrows failed:     {}", outcome.failures);
    println!("  handoffs:           {}", m.handoffs);
    println!("  connections opened: {}", m.connections_created);
    println!("  success rate:       {:.1}%", m.borrow_success_rate() * 100.0);
}
