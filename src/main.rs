//! vibetx - runs a periodic-commit workload under a live-query monitor

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use std::sync::Arc;
use std::time::Duration;
use vibetx::bridge::ExecutionBinding;
use vibetx::config::KernelConfig;
use vibetx::context::{
    ContextError, KernelQueryService, TransactionalContext, TransactionalContextFactory,
};
use vibetx::guard::TerminationGuard;
use vibetx::query::{QueryParameters, Value};
use vibetx::transaction::{
    AccessMode, TerminationReason, TransactionError, TransactionManager, TransactionType,
};

/// Periodic-commit workload runner
#[derive(ClapParser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rows written per transaction before rotating
    #[arg(short, long, default_value = "1000")]
    batch_size: u64,

    /// Number of batches to run
    #[arg(short = 'n', long, default_value = "20")]
    batches: u64,

    /// Simulated work per batch, in milliseconds
    #[arg(long, default_value = "100")]
    batch_delay_ms: u64,

    /// Transaction timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Maximum concurrent transactions
    #[arg(short = 'c', long)]
    max_transactions: Option<usize>,

    /// Monitor sampling period in milliseconds
    #[arg(long, default_value = "250")]
    monitor_interval_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Default)]
struct WorkloadReport {
    rows: u64,
    committed: u64,
    lost: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = KernelConfig::default();
    if let Some(ms) = args.timeout_ms {
        config = config.with_transaction_timeout(Duration::from_millis(ms));
    }
    if let Some(limit) = args.max_transactions {
        config = config.with_max_concurrent_transactions(limit);
    }
    log::debug!("kernel config: {:?}", config);

    let manager = Arc::new(TransactionManager::with_config(config));
    let factory = Arc::new(TransactionalContextFactory::new(
        Arc::new(KernelQueryService::new(Arc::clone(&manager))),
        Arc::new(TerminationGuard::new()),
    ));

    let mut workload = {
        let factory = Arc::clone(&factory);
        let args = args.clone();
        tokio::task::spawn_blocking(move || run_workload(&factory, &args))
    };
    let monitor = tokio::spawn(monitor(
        Arc::clone(&manager),
        Duration::from_millis(args.monitor_interval_ms),
    ));

    let outcome = tokio::select! {
        result = &mut workload => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            log::info!("interrupted, killing running queries");
            for snapshot in manager.list_queries() {
                manager.kill_query(snapshot.query_id, TerminationReason::Killed);
            }
            workload.await
        }
    };
    monitor.abort();

    match outcome.context("Workload task failed")? {
        Ok(report) => log::info!(
            "wrote {} rows: {} batches committed, {} lost",
            report.rows,
            report.committed,
            report.lost
        ),
        Err(err) => log::error!("query aborted: {}", err),
    }
    log::debug!("cleaned up {} finished transactions", manager.cleanup_finished());

    Ok(())
}

fn run_workload(
    factory: &TransactionalContextFactory,
    args: &Args,
) -> std::result::Result<WorkloadReport, ContextError> {
    let mut binding = ExecutionBinding::new();
    let mut parameters = QueryParameters::new();
    parameters.insert("batchSize".to_string(), Value::Integer(args.batch_size as i64));
    parameters.insert("source".to_string(), Value::String("file:///rows.csv".to_string()));

    let mut ctx = factory.new_context(
        &mut binding,
        TransactionType::Implicit,
        AccessMode::Write,
        "USING PERIODIC COMMIT LOAD CSV FROM $source AS row CREATE (:Row {value: row[0]})",
        parameters,
    )?;
    let mut report = WorkloadReport::default();

    for batch in 0..args.batches {
        for _ in 0..args.batch_size {
            if let Err(err) = ctx.check() {
                return Err(abandon(ctx, err));
            }
            report.rows += 1;
        }
        std::thread::sleep(Duration::from_millis(args.batch_delay_ms));

        match ctx.commit_and_restart_tx() {
            Ok(()) => report.committed += 1,
            Err(
                err @ ContextError::TransactionCommitFailed {
                    source: TransactionError::Terminated(_, TerminationReason::Killed),
                    ..
                },
            ) => return Err(abandon(ctx, err)),
            Err(err @ ContextError::TransactionCommitFailed { .. }) => {
                log::warn!("batch {} was not committed: {}", batch, err);
                report.lost += 1;
            }
            Err(err) => return Err(abandon(ctx, err)),
        }
    }

    ctx.close(true)?;
    Ok(report)
}

/// Rolls back a query that is being given up on and hands back `err`.
fn abandon(ctx: TransactionalContext<'_>, err: ContextError) -> ContextError {
    if let Err(close_err) = ctx.close(false) {
        log::warn!("{}: rollback after failure also failed: {}", err, close_err);
    }
    err
}

async fn monitor(manager: Arc<TransactionManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;

        let expired = manager.terminate_expired();
        if expired > 0 {
            log::warn!("terminated {} timed out transaction(s)", expired);
        }
        for snapshot in manager.list_queries() {
            log::info!(
                "{} running in {} for {}ms: {}",
                snapshot.query_id,
                snapshot.transaction_id,
                snapshot.elapsed_millis,
                snapshot.query_text
            );
        }
        manager.cleanup_finished();
    }
}
