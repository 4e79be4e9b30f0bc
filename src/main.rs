use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Args;
use netprobe::{CheckContext, CheckError, Checker, ProcessEnv, Registry};

/// One check outcome, as printed with `--json`
#[derive(Debug, Serialize)]
struct ProbeReport<'a> {
    round: u64,
    name: &'a str,
    ok: bool,
    latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_tracing(&args);

    let registry = Registry::default();
    let mut checkers: Vec<Arc<dyn Checker>> = Vec::new();
    for target in args.target_specs() {
        let checker = registry
            .build(&target.name, &target.address, args.timeout, &ProcessEnv)
            .with_context(|| format!("Failed to set up check for {}", target.address))?;
        debug!(check = %checker, address = %target.address, "Configured check");
        checkers.push(Arc::from(checker));
    }

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let mut failures = 0usize;
    let mut round = 0u64;
    loop {
        round += 1;
        failures += run_round(&args, &checkers, &cancel, round).await?;

        if cancel.is_cancelled() || (args.count != 0 && round >= args.count) {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(args.interval) => {}
        }
    }

    if failures > 0 {
        warn!(failures, rounds = round, "Some checks failed");
        std::process::exit(1);
    }
    Ok(())
}

/// Install the log subscriber; RUST_LOG wins over `-v`
fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run every checker once, concurrently. Returns the number of failures.
async fn run_round(
    args: &Args,
    checkers: &[Arc<dyn Checker>],
    cancel: &CancellationToken,
    round: u64,
) -> Result<usize> {
    let mut tasks = JoinSet::new();
    for (index, checker) in checkers.iter().enumerate() {
        let checker = Arc::clone(checker);
        let ctx = CheckContext::with_token(cancel.child_token()).with_timeout(args.deadline);
        tasks.spawn(async move {
            let started = Instant::now();
            let result = checker.check(&ctx).await;
            (index, started.elapsed(), result)
        });
    }

    let mut outcomes = Vec::with_capacity(checkers.len());
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.context("Check task failed")?);
    }
    outcomes.sort_by_key(|(index, _, _)| *index);

    let mut failures = 0;
    for (index, latency, result) in outcomes {
        if result.is_err() {
            failures += 1;
        }
        report(args, round, checkers[index].name(), latency, result)?;
    }
    Ok(failures)
}

fn report(
    args: &Args,
    round: u64,
    name: &str,
    latency: Duration,
    result: Result<(), CheckError>,
) -> Result<()> {
    let latency_ms = latency.as_secs_f64() * 1000.0;

    if args.json {
        let line = ProbeReport {
            round,
            name,
            ok: result.is_ok(),
            latency_ms,
            kind: result.as_ref().err().map(CheckError::kind),
            error: result.as_ref().err().map(ToString::to_string),
        };
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    match result {
        Ok(()) => info!(check = name, round, "check passed in {latency_ms:.3} ms"),
        Err(e) => warn!(check = name, round, kind = e.kind(), "check failed: {e}"),
    }
    Ok(())
}
