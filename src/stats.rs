use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use scraper::Html;
use tracing::{error, info};

use crate::db::SqliteStore;
use crate::fetch::{get_text, http_client};
use crate::parser::stats::{character_activity, general_stats, world_stats};
use crate::settings::Settings;

/// Samples the single-page statistics: server totals, per-world load, and
/// who is online right now.
pub struct StatsScraper {
    client: reqwest::Client,
    store: Arc<SqliteStore>,
    stats_url: String,
    worlds_stats_url: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StatsReport {
    pub general: bool,
    pub worlds: usize,
    pub active_nicks: usize,
}

impl StatsScraper {
    pub fn new(settings: &Settings, store: Arc<SqliteStore>) -> Result<Self> {
        Ok(Self {
            client: http_client(&settings.user_agent, settings.fetch_timeout())?,
            store,
            stats_url: settings.stats_url.clone(),
            worlds_stats_url: settings.worlds_stats_url.clone(),
        })
    }

    /// One sample of every statistic. Failures are logged per page.
    pub async fn scrape(&self) -> StatsReport {
        let mut report = StatsReport::default();

        let started = Instant::now();
        info!("Processing general stats started...");
        match get_text(&self.client, &self.stats_url).await {
            Ok(body) => match self.record_general(Utc::now(), &body) {
                Ok(()) => {
                    report.general = true;
                    info!(
                        "Processing general stats finished in {:.1}s",
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => error!("Saving general stats failed: {:#}", e),
            },
            Err(e) => error!("Downloading general stats failed: {:#}", e),
        }

        let started = Instant::now();
        info!("Processing worlds stats started...");
        match get_text(&self.client, &self.worlds_stats_url).await {
            Ok(body) => match self.record_worlds(Utc::now(), &body) {
                Ok((worlds, nicks)) => {
                    report.worlds = worlds;
                    report.active_nicks = nicks;
                    info!(
                        "Processing worlds stats finished in {:.1}s: {} worlds, {} active characters",
                        started.elapsed().as_secs_f64(),
                        worlds,
                        nicks
                    );
                }
                Err(e) => error!("Saving worlds stats failed: {:#}", e),
            },
            Err(e) => error!("Downloading worlds stats failed: {:#}", e),
        }

        report
    }

    fn record_general(&self, at: DateTime<Utc>, body: &str) -> Result<()> {
        let stats = general_stats(&Html::parse_document(body));
        self.store.insert_general_stats(at, &stats)
    }

    /// World rows and active nicknames both come from the worlds page.
    fn record_worlds(&self, at: DateTime<Utc>, body: &str) -> Result<(usize, usize)> {
        let (worlds, activity) = {
            let doc = Html::parse_document(body);
            (world_stats(&doc), character_activity(&doc))
        };
        let w = self.store.insert_world_stats(at, &worlds)?;
        let a = self.store.insert_character_activity(at, &activity)?;
        Ok((w, a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> (StatsScraper, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let scraper = StatsScraper::new(&Settings::default(), Arc::clone(&store)).unwrap();
        (scraper, store)
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn records_general_stats() {
        let (scraper, store) = scraper();
        scraper.record_general(Utc::now(), &fixture("stats_main")).unwrap();
        assert_eq!(store.summary().unwrap().general_stats, 1);
    }

    #[test]
    fn records_worlds_and_activity_from_one_page() {
        let (scraper, store) = scraper();
        let (worlds, nicks) = scraper.record_worlds(Utc::now(), &fixture("stats_worlds")).unwrap();
        assert_eq!((worlds, nicks), (2, 4));

        // a second sample appends
        scraper.record_worlds(Utc::now(), &fixture("stats_worlds")).unwrap();
        let summary = store.summary().unwrap();
        assert_eq!((summary.world_stats, summary.character_activity), (4, 8));
    }
}
