use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::ScrapMode;

const ENV_PREFIX: &str = "LADDER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Ladder pages live at `<ladder_url><world>?page=<n>`.
    pub ladder_url: String,
    pub stats_url: String,
    pub worlds_stats_url: String,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub queue_capacity: usize,
    pub ladder_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub worlds: Vec<WorldSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorldSettings {
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: ScrapMode,
}

fn default_mode() -> ScrapMode {
    ScrapMode::Full
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/ladder.sqlite"),
            ladder_url: "https://www.margonem.pl/ladder/players,".into(),
            stats_url: "https://www.margonem.pl/".into(),
            worlds_stats_url: "https://www.margonem.pl/stats".into(),
            user_agent: concat!("ladder_scraper/", env!("CARGO_PKG_VERSION")).into(),
            fetch_timeout_secs: 30,
            max_retries: 3,
            base_backoff_ms: 2000,
            queue_capacity: 16,
            ladder_interval_secs: 3600,
            stats_interval_secs: 600,
            worlds: vec![WorldSettings {
                name: "Telawel".into(),
                mode: ScrapMode::Full,
            }],
        }
    }
}

impl Settings {
    /// Defaults, then the optional settings file, then `LADDER_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("ladder").required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read settings")?
            .try_deserialize::<Settings>()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.queue_capacity > 0, "queue_capacity must be at least 1");
        anyhow::ensure!(self.ladder_interval_secs > 0, "ladder_interval_secs must be positive");
        anyhow::ensure!(self.stats_interval_secs > 0, "stats_interval_secs must be positive");
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn ladder_interval(&self) -> Duration {
        Duration::from_secs(self.ladder_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
