mod db;
mod error;
mod fetch;
mod model;
mod parser;
mod pipeline;
mod scheduler;
mod settings;
mod stats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::SqliteStore;
use crate::fetch::HttpFetcher;
use crate::model::ScrapMode;
use crate::pipeline::{LadderPipeline, PipelineOptions};
use crate::settings::Settings;
use crate::stats::StatsScraper;

#[derive(Parser)]
#[command(name = "ladder_scraper", about = "World ladder and server stats scraper")]
struct Cli {
    /// Settings file (JSON or TOML). Defaults to ./ladder.{json,toml} if present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured world and the stats pages on their intervals
    Run,
    /// Scrape the ladder of one world
    Ladder {
        world: String,
        #[arg(short, long, value_enum, default_value_t = ScrapMode::Full)]
        mode: ScrapMode,
        /// Scrape once and exit instead of repeating every interval
        #[arg(long)]
        once: bool,
    },
    /// Sample server and world statistics
    Stats {
        #[arg(long)]
        once: bool,
    },
    /// Show the stored state and level history of one character
    Character { world: String, id: i64 },
    /// Row counts per table
    Summary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let store = Arc::new(SqliteStore::open(&settings.database_path)?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing up...");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Run => {
            let pipeline = Arc::new(ladder_pipeline(&settings, &store, &cancel, false)?);
            let stats = Arc::new(StatsScraper::new(&settings, Arc::clone(&store))?);

            let mut tasks = Vec::new();
            for world in &settings.worlds {
                tasks.push(scheduler::start_periodic(
                    Arc::clone(&pipeline),
                    world.name.clone(),
                    world.mode,
                    settings.ladder_interval(),
                    cancel.clone(),
                ));
            }
            tasks.push(start_stats(stats, &settings, cancel.clone()));

            info!("Scheduled {} worlds and stats; Ctrl-C to stop", settings.worlds.len());
            for task in tasks {
                task.await.context("scheduler task failed")?;
            }
        }
        Commands::Ladder { world, mode, once } => {
            let pipeline = Arc::new(ladder_pipeline(&settings, &store, &cancel, once)?);
            if once {
                let r = pipeline.run(&world, mode).await;
                println!(
                    "{} ({}{}): {}/{} pages ({} downloaded), {} entries, {} snapshots, {} rows skipped, {} pages failed",
                    r.world,
                    r.mode,
                    if r.cancelled { ", cancelled" } else { "" },
                    r.pages_extracted,
                    r.total_pages,
                    r.pages_fetched,
                    r.entries,
                    r.snapshots,
                    r.rows_skipped,
                    r.pages_failed + r.pages_unparsed
                );
            } else {
                scheduler::start_periodic(pipeline, world, mode, settings.ladder_interval(), cancel)
                    .await
                    .context("scheduler task failed")?;
            }
        }
        Commands::Stats { once } => {
            let stats = Arc::new(StatsScraper::new(&settings, Arc::clone(&store))?);
            if once {
                let r = stats.scrape().await;
                println!(
                    "General stats: {}, worlds: {}, active characters: {}",
                    if r.general { "saved" } else { "failed" },
                    r.worlds,
                    r.active_nicks
                );
            } else {
                start_stats(stats, &settings, cancel)
                    .await
                    .context("scheduler task failed")?;
            }
        }
        Commands::Character { world, id } => {
            match store.find_ladder_entry(&world, id)? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => println!("No stored entry for character {} on {}.", id, world),
            }
            let history = store.level_history(&world, id)?;
            if !history.is_empty() {
                println!("\n{:<25} | {:>5}", "Captured", "Level");
                println!("{}", "-".repeat(33));
                for snap in &history {
                    let level = snap.level.map(|l| l.to_string()).unwrap_or_else(|| "-".into());
                    println!("{:<25} | {:>5}", snap.captured_at.format("%Y-%m-%d %H:%M:%S"), level);
                }
            }
        }
        Commands::Summary => {
            let s = store.summary()?;
            println!("Ladder entries:     {}", s.ladder_entries);
            println!("Level snapshots:    {}", s.level_snapshots);
            println!("General stats:      {}", s.general_stats);
            println!("World stats:        {}", s.world_stats);
            println!("Character activity: {}", s.character_activity);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn ladder_pipeline(
    settings: &Settings,
    store: &Arc<SqliteStore>,
    cancel: &CancellationToken,
    show_progress: bool,
) -> anyhow::Result<LadderPipeline> {
    let fetcher = Arc::new(HttpFetcher::new(settings)?);
    let options = PipelineOptions {
        show_progress,
        ..PipelineOptions::from_settings(settings)
    };
    Ok(LadderPipeline::new(fetcher, store.clone(), options, cancel.clone()))
}

fn start_stats(
    stats: Arc<StatsScraper>,
    settings: &Settings,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = settings.stats_interval();
    tokio::spawn(async move {
        scheduler::every("stats", interval, cancel, || {
            let stats = Arc::clone(&stats);
            async move {
                stats.scrape().await;
            }
        })
        .await;
    })
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
