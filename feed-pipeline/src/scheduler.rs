use std::sync::Arc;
use std::time::Duration;

use interfaces::traits::FeedTransport;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dedup::DedupCache;
use crate::orchestrator::{Admission, Orchestrator};
use crate::types::{DiscoveredItem, FeedSource};

/// Counters for one pass over all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sources_polled: usize,
    pub sources_failed: usize,
    pub items_discovered: usize,
    /// Items the dedup cache had already seen, or that could not be checked.
    pub items_skipped: usize,
    pub items_admitted: usize,
    pub items_duplicate: usize,
}

/// Polls every configured source and admits unseen items.
pub struct FeedScheduler {
    sources: Vec<FeedSource>,
    transport: Arc<dyn FeedTransport>,
    dedup: DedupCache,
    orchestrator: Orchestrator,
    interval: Duration,
}

impl FeedScheduler {
    pub fn new(
        sources: Vec<FeedSource>,
        transport: Arc<dyn FeedTransport>,
        dedup: DedupCache,
        orchestrator: Orchestrator,
        interval: Duration,
    ) -> Self {
        Self {
            sources,
            transport,
            dedup,
            orchestrator,
            interval,
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Polls once immediately, then every interval, until `shutdown` fires.
    ///
    /// A slow cycle pushes the next tick back instead of bunching ticks up.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Feed scheduler started with {} sources, interval {:?}",
            self.sources.len(),
            self.interval
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutting down feed scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_all().await;
                }
            }
        }
    }

    /// One sequential pass over all sources. Never fails as a whole.
    pub async fn poll_all(&self) -> CycleReport {
        info!("Starting feed processing cycle ({} sources)", self.sources.len());
        let mut report = CycleReport::default();

        for source in &self.sources {
            report.sources_polled += 1;
            let items = match self.transport.fetch_entries(&source.source_url).await {
                Ok(items) => items,
                Err(e) => {
                    report.sources_failed += 1;
                    warn!("Failed to process feed {} ({}): {:#}", source.title, source.source_url, e);
                    continue;
                }
            };
            debug!("Feed {} returned {} items", source.title, items.len());
            report.items_discovered += items.len();

            for item in items {
                self.process_item(item, &mut report).await;
            }
        }

        info!(
            "Completed feed processing cycle: {} sources ({} failed), {} items, {} new, {} skipped, {} duplicate",
            report.sources_polled,
            report.sources_failed,
            report.items_discovered,
            report.items_admitted,
            report.items_skipped,
            report.items_duplicate
        );
        report
    }

    async fn process_item(&self, item: DiscoveredItem, report: &mut CycleReport) {
        match self.dedup.seen(&item.link).await {
            Ok(true) => {
                report.items_skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                // Left unmarked so the next tick tries again.
                report.items_skipped += 1;
                warn!("Dedup lookup failed for {}: {}", item.link, e);
                return;
            }
        }

        self.dedup.mark_seen(&item.link).await;

        let link = item.link.clone();
        match self.orchestrator.admit(item).await {
            Ok(Admission::Started { key }) => {
                report.items_admitted += 1;
                info!("New link {} admitted as {}", link, key);
            }
            Ok(Admission::Duplicate { run }) => {
                report.items_duplicate += 1;
                debug!("Link {} already has run in state {}", link, run.state.label());
            }
            Err(e) => error!("Failed to admit {}: {}", link, e),
        }
    }
}
