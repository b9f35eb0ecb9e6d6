// Tour price search orchestration
// Drives one search per destination to completion: start the backend job, poll it, cache the outcome.
// A newer start() supersedes anything still in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::api::{ApiError, SearchApi};
use crate::cache::{CacheStats, CachedResults, ResultCache};
use crate::cancellation::CancellationController;
use crate::clock::{Scheduler, TokioScheduler};
use crate::enrichment::EnrichmentLoader;
use crate::retry::{PollStep, RetryBudget, RetryConfig};
use crate::state::{
    Binding, Continuation, SearchFailure, SearchSnapshot, SearchStatus, SearchStore, Transition,
};
use crate::types::{
    join_hotels, sorted_by_price, CountriesMap, GeoResponse, HotelsMap, SearchToken,
    TourWithHotel,
};

#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    pub retry: RetryConfig,
}

struct Inner {
    api: Arc<dyn SearchApi>,
    scheduler: Arc<dyn Scheduler>,
    store: Arc<SearchStore>,
    cache: ResultCache,
    enrichment: EnrichmentLoader,
    cancellation: CancellationController,
    config: SearchConfig,
}

/// Entry point for the presentation layer.
///
/// Cheap to clone; clones share state, cache and enrichment.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

impl SearchOrchestrator {
    pub fn new(api: Arc<dyn SearchApi>, config: SearchConfig) -> Self {
        Self::with_scheduler(api, Arc::new(TokioScheduler), config)
    }

    pub fn with_scheduler(
        api: Arc<dyn SearchApi>,
        scheduler: Arc<dyn Scheduler>,
        config: SearchConfig,
    ) -> Self {
        let store = Arc::new(SearchStore::new());
        Self {
            inner: Arc::new(Inner {
                cache: ResultCache::new(),
                enrichment: EnrichmentLoader::new(api.clone()),
                cancellation: CancellationController::new(api.clone(), store.clone()),
                api,
                scheduler,
                store,
                config,
            }),
        }
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.inner.store.snapshot()
    }

    // One snapshot per applied transition
    pub fn subscribe(&self) -> broadcast::Receiver<SearchSnapshot> {
        self.inner.store.subscribe()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn cached(&self, destination_id: &str) -> Option<CachedResults> {
        self.inner.cache.get(destination_id)
    }

    pub fn hotels_for(&self, destination_id: &str) -> Option<HotelsMap> {
        self.inner.enrichment.hotels_for(destination_id)
    }

    // Results of a successful search joined with whatever hotel metadata is loaded
    pub fn tours_with_hotels(&self) -> Vec<TourWithHotel> {
        let snapshot = self.snapshot();
        let destination_id = match (&snapshot.status, &snapshot.last_destination_id) {
            (SearchStatus::Success, Some(id)) => id,
            _ => return Vec::new(),
        };
        let hotels = self.hotels_for(destination_id).unwrap_or_default();
        join_hotels(&snapshot.results, &hotels)
    }

    pub async fn destinations(&self) -> Result<CountriesMap, ApiError> {
        self.inner.api.list_destinations().await
    }

    pub async fn search_places(&self, query: &str) -> Result<GeoResponse, ApiError> {
        self.inner.api.search_places(query).await
    }

    pub fn spawn_start(&self, destination_id: &str) -> JoinHandle<()> {
        let this = self.clone();
        let destination_id = destination_id.to_string();
        tokio::spawn(async move { this.start(&destination_id).await })
    }

    pub async fn retry_last(&self) {
        match self.inner.store.last_destination_id() {
            Some(destination_id) => self.start(&destination_id).await,
            None => debug!("retry requested before any search, ignoring"),
        }
    }

    /// Runs a search for `destination_id` until it finishes or is superseded.
    pub async fn start(&self, destination_id: &str) {
        let inner = &self.inner;

        inner.cancellation.invalidate_active();

        if let Some(cached) = inner.cache.get(destination_id) {
            debug!(destination_id, empty = cached.is_empty(), "serving search from cache");
            inner.store.apply(Transition::Completed {
                destination_id: destination_id.to_string(),
                results: cached.offers().to_vec(),
            });
            inner.enrichment.ensure_loaded(destination_id).await;
            return;
        }

        inner.store.apply(Transition::Started {
            destination_id: destination_id.to_string(),
        });
        info!(destination_id, "starting price search");

        let pending = Continuation::pending(destination_id);
        let started = match inner.api.start_search(destination_id).await {
            Ok(started) => started,
            Err(err) => {
                let failure = SearchFailure::StartFailure(err.to_string());
                if inner.store.apply_if_current(&pending, Transition::Failed(failure)) {
                    warn!(destination_id, error = %err, "price search could not be started");
                } else {
                    debug!(destination_id, "start failed for a superseded search");
                }
                return;
            }
        };

        match inner.store.bind_token(&pending, started.token.clone()) {
            Binding::Stale => {
                debug!(destination_id, token = %started.token, "search superseded before polling");
                inner.cancellation.release_orphan(started.token);
            }
            Binding::Bound { displaced } => {
                if let Some(displaced) = displaced {
                    inner.cancellation.release_orphan(displaced);
                }
                self.poll_until_done(destination_id, started.token, started.wait_until)
                    .await;
            }
        }
    }

    async fn poll_until_done(
        &self,
        destination_id: &str,
        token: SearchToken,
        wait_until: DateTime<Utc>,
    ) {
        let inner = &self.inner;
        let continuation = Continuation::bound(token.clone());
        let mut budget = RetryBudget::new(&inner.config.retry);
        let mut next_wait = Some(wait_until);

        loop {
            if let Some(deadline) = next_wait.take() {
                inner.scheduler.sleep_until(deadline).await;
                if !inner.store.is_current(&continuation) {
                    debug!(%token, "stale after wait, abandoning");
                    return;
                }
            }

            let outcome = inner.api.poll_search(&token).await;
            if !inner.store.is_current(&continuation) {
                debug!(%token, "stale after poll, abandoning");
                return;
            }

            match budget.next_step(outcome) {
                PollStep::Completed(prices) => {
                    let results = sorted_by_price(prices);
                    let applied = inner.store.apply_if_current(
                        &continuation,
                        Transition::Completed {
                            destination_id: destination_id.to_string(),
                            results: results.clone(),
                        },
                    );
                    if !applied {
                        return;
                    }
                    info!(destination_id, offers = results.len(), "price search finished");
                    inner
                        .cache
                        .put(destination_id, CachedResults::from_offers(results));
                    inner.enrichment.ensure_loaded(destination_id).await;
                    return;
                }
                PollStep::RetryAt(at) => {
                    debug!(%token, %at, "results not ready yet");
                    next_wait = Some(at);
                }
                PollStep::Backoff(delay) => {
                    debug!(%token, remaining = budget.remaining(), ?delay, "poll failed, backing off");
                    inner.scheduler.sleep(delay).await;
                    if !inner.store.is_current(&continuation) {
                        debug!(%token, "stale after backoff, abandoning");
                        return;
                    }
                }
                PollStep::Exhausted(err) => {
                    let failure = SearchFailure::PollExhausted(err.to_string());
                    if inner
                        .store
                        .apply_if_current(&continuation, Transition::Failed(failure))
                    {
                        warn!(destination_id, error = %err, "price search failed after retries");
                    }
                    return;
                }
            }
        }
    }
}
