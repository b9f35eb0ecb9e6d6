// Completed search results, memoized per destination for the lifetime of the process
// Entries never expire: an empty result is remembered as such and counts as a hit

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::types::PriceOffer;

#[derive(Debug, Clone, PartialEq)]
pub enum CachedResults {
    Offers(Vec<PriceOffer>),
    Empty,
}

impl CachedResults {
    pub fn from_offers(offers: Vec<PriceOffer>) -> Self {
        if offers.is_empty() {
            CachedResults::Empty
        } else {
            CachedResults::Offers(offers)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CachedResults::Empty)
    }

    pub fn offers(&self) -> &[PriceOffer] {
        match self {
            CachedResults::Offers(offers) => offers,
            CachedResults::Empty => &[],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub empty_count: usize,
}

#[derive(Default)]
pub struct ResultCache {
    store: DashMap<String, CachedResults>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination_id: &str) -> Option<CachedResults> {
        match self.store.get(destination_id) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // Unconditional overwrite, an earlier empty marker included
    pub fn put(&self, destination_id: &str, results: CachedResults) {
        self.store.insert(destination_id.to_string(), results);
    }

    pub fn contains(&self, destination_id: &str) -> bool {
        self.store.contains_key(destination_id)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items_count: self.store.len(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            empty_count: self.store.iter().filter(|e| e.value().is_empty()).count(),
        }
    }
}
