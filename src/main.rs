use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedstash::feed::{load_subscriptions, Collaborators, CycleOutcome, HttpFetcher};
use feedstash::storage::{RecordStore, Storage};
use feedstash::{Config, EnginePool, EngineReport, PoolOptions};

#[derive(Parser, Debug)]
#[command(
    name = "feedstash",
    version,
    about = "Incremental RSS content mirror with conditional fetching"
)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", default_value = "feedstash.toml")]
    config: PathBuf,

    /// Feed list, plain text or OPML (overrides `feeds_file`)
    #[arg(long, value_name = "FILE")]
    feeds: Option<PathBuf>,

    /// Data directory (overrides `data_dir`)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Run feeds concurrently
    #[arg(long, conflicts_with = "sequential")]
    parallel: bool,

    /// Run feeds one after another
    #[arg(long)]
    sequential: bool,

    /// Clear the gone status of every feed before fetching
    #[arg(long)]
    reset_gone: bool,

    /// Write merged item records as JSON lines
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Delete every per-feed store after persisting the merged store
    #[arg(long)]
    purge_feeds: bool,

    /// Delete the merged store at the end of the run
    #[arg(long)]
    purge_merged: bool,
}

/// Write every item of `store` to `path`, one JSON object per line.
fn export_items(store: &RecordStore, path: &Path) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file '{}'", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    let mut count = 0;
    for item in store.items().context("Merged store is not open")? {
        serde_json::to_writer(&mut out, &item).context("Failed to serialize item")?;
        out.write_all(b"\n")?;
        count += 1;
    }
    out.flush()
        .with_context(|| format!("Failed to write export file '{}'", path.display()))?;
    Ok(count)
}

fn describe(report: &EngineReport) -> String {
    match &report.outcome {
        Ok(CycleOutcome::Fetched(tally)) => format!(
            "{} new, {} updated, {} unchanged, {} failed, {} dropped",
            tally.created, tally.updated, tally.unchanged, tally.page_failures, tally.dropped
        ),
        Ok(CycleOutcome::NotModified) => "not modified".to_string(),
        Ok(CycleOutcome::Skipped) => "skipped (gone)".to_string(),
        Ok(CycleOutcome::Unreachable(reason)) => format!("unreachable: {}", reason),
        Ok(CycleOutcome::HttpError(status)) => format!("HTTP {}", status),
        Ok(CycleOutcome::Unreadable(reason)) => format!("unreadable: {}", reason),
        Err(reason) => format!("error: {}", reason),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    if let Some(feeds) = args.feeds {
        config.feeds_file = feeds;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if args.parallel {
        config.parallel = true;
    } else if args.sequential {
        config.parallel = false;
    }

    let subscriptions = load_subscriptions(&config.feeds_file, config.allow_private_hosts)
        .await
        .with_context(|| {
            format!(
                "Failed to load feed list '{}'",
                config.feeds_file.display()
            )
        })?;
    if subscriptions.is_empty() {
        eprintln!(
            "Warning: No valid feeds found in {}",
            config.feeds_file.display()
        );
    }

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory '{}'",
            config.data_dir.display()
        )
    })?;

    let fetcher = Arc::new(HttpFetcher::new(&config).context("Failed to build HTTP client")?);
    let collaborators = Collaborators::new(fetcher.clone(), fetcher);
    let options = PoolOptions {
        gone_policy: config.gone_policy,
        max_concurrent: config.max_concurrent_feeds,
    };

    let mut pool = EnginePool::open(
        subscriptions,
        Storage::new(&config.data_dir),
        collaborators,
        options,
    )
    .await
    .context("Failed to open feed stores")?;

    if args.reset_gone {
        let reset = pool.reset_gone_all().await.context("Failed to reset gone feeds")?;
        println!("Reset {} gone feed(s)", reset);
    }

    let reports = pool.run_all(config.parallel).await;
    for report in &reports {
        println!("{}  [{:?}]  {}", report.url, report.status, describe(report));
    }

    let merge = pool.merge_all().await.context("Failed to merge feed stores")?;
    if !merge.unavailable.is_empty() {
        eprintln!(
            "Warning: {} feed store(s) could not be merged",
            merge.unavailable.len()
        );
    }

    if let Some(path) = &args.export {
        let merged = pool.merged().await.context("Failed to open merged store")?;
        let count = export_items(merged, path)?;
        println!("Exported {} item(s) to {}", count, path.display());
    }

    let persisted = pool.persist().await.context("Failed to save merged store")?;
    for (identity, error) in &persisted.failures {
        eprintln!("Warning: failed to save feed {}: {}", identity, error);
    }
    println!(
        "Saved {} merged record(s) and {} feed store(s)",
        persisted.merged_records, persisted.engines_saved
    );

    if args.purge_feeds {
        let purged = pool
            .purge_engines()
            .await
            .context("Failed to purge feed stores")?;
        println!("Purged {} feed store(s)", purged);
    }
    if args.purge_merged {
        pool.purge_merged()
            .await
            .context("Failed to purge merged store")?;
        println!("Purged merged store");
    }

    Ok(())
}
