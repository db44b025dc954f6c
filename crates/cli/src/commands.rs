//! Subcommand implementations

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use rxflow_core::{BatchCoordinator, BatchError};
use rxflow_domain::constants::{DEFAULT_DEPENDENCY, MAX_WORKERS};
use rxflow_domain::{BatchResult, CheckpointRecord, Config};
use rxflow_infra::{open_repository, HttpClient, TransportRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::RunArgs;
use crate::pipeline::{derive_batch_id, read_items, HttpLookupPipeline};

/// How a finished command should exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Interrupted,
}

pub async fn run(
    config: &Config,
    args: RunArgs,
    cancel: CancellationToken,
) -> anyhow::Result<Outcome> {
    let items = read_items(&args.items)?;
    let batch_id = args.batch_id.clone().unwrap_or_else(|| derive_batch_id(&args.items, &args.url));
    let dependency = args.dependency.as_deref().unwrap_or(DEFAULT_DEPENDENCY);
    let workers = args.workers.unwrap_or(config.batch.workers);
    if !(1..=MAX_WORKERS).contains(&workers) {
        bail!("--workers must be between 1 and {MAX_WORKERS}, got {workers}");
    }

    let registry = TransportRegistry::from_config(config)?;
    let transport = registry.require(dependency)?;
    let repository = open_repository(&config.checkpoint)?;
    let pipeline = Arc::new(HttpLookupPipeline::new(transport, HttpClient::new()?, args.url.clone()));
    let coordinator =
        BatchCoordinator::new(repository, &batch_id, args.items.to_string_lossy().into_owned());

    info!(%batch_id, dependency, items = items.len(), workers, "starting batch");
    let result = if workers > 1 {
        coordinator.run_concurrent(items, pipeline, workers, &cancel).await
    } else {
        coordinator.run(&items, pipeline.as_ref(), &cancel).await
    };

    for stats in registry.stats() {
        info!(
            dependency = %stats.name,
            breaker = ?stats.breaker.state,
            rejected = stats.breaker.rejected_calls,
            minute_used = stats.limiter.minute_used,
            daily_used = stats.limiter.daily_used,
            "transport usage"
        );
    }

    match result {
        Ok(result) => {
            print_result(&result, args.json)?;
            Ok(Outcome::Done)
        }
        Err(BatchError::Interrupted(result)) => {
            warn!(%batch_id, "batch interrupted, re-run the same command to resume");
            print_result(&result, args.json)?;
            Ok(Outcome::Interrupted)
        }
        Err(err) => Err(err).context("batch run failed"),
    }
}

pub async fn status(config: &Config, batch_id: &str, json: bool) -> anyhow::Result<Outcome> {
    let repository = open_repository(&config.checkpoint)?;
    let record = repository
        .load(batch_id)
        .await?
        .ok_or_else(|| anyhow!("no checkpoint named {batch_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(Outcome::Done)
}

pub async fn list(config: &Config) -> anyhow::Result<Outcome> {
    let repository = open_repository(&config.checkpoint)?;
    let records = repository.list().await?;
    if records.is_empty() {
        println!("No checkpoints in {}", config.checkpoint.path);
    }
    for record in records {
        println!(
            "{:<32} {:<12} {:>6}/{:<6} updated {}",
            record.batch_id,
            record.status.to_string(),
            record.processed_count(),
            record.total,
            record.updated_at.to_rfc3339()
        );
    }
    Ok(Outcome::Done)
}

pub async fn delete(config: &Config, batch_id: &str) -> anyhow::Result<Outcome> {
    let repository = open_repository(&config.checkpoint)?;
    if repository.delete(batch_id).await? {
        println!("Deleted checkpoint {batch_id}");
    } else {
        println!("No checkpoint named {batch_id}");
    }
    Ok(Outcome::Done)
}

fn print_result(result: &BatchResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("Batch {} {}", result.batch_id, result.status);
    println!(
        "  {}/{} processed: {} succeeded, {} failed, {} skipped",
        result.processed(),
        result.total,
        result.successful,
        result.failed,
        result.skipped
    );
    for error in &result.errors {
        println!("  failed {}: {}", error.item_id, error.reason);
    }
    Ok(())
}

fn print_record(record: &CheckpointRecord) {
    print_result(&record.summary(), false).ok();
    println!("  source:    {}", record.source);
    println!("  started:   {}", record.started_at.to_rfc3339());
    println!("  updated:   {}", record.updated_at.to_rfc3339());
    if let Some(completed) = record.completed_at {
        println!("  completed: {}", completed.to_rfc3339());
    }
    for skipped in &record.skipped {
        println!("  skipped {}: {}", skipped.item_id, skipped.reason);
    }
}
