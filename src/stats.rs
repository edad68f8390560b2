use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected during an ingestion run
#[derive(Default, Debug)]
pub struct IngestStats {
    pub records_processed: AtomicU64,
    pub articles_stored: AtomicU64,
    pub records_skipped: AtomicU64,
    pub redirects_found: AtomicU64,
    pub redirects_resolved: AtomicU64,
    pub redirects_dropped: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processed(&self, count: u64) {
        self.records_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_articles(&self) {
        self.articles_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects(&self) {
        self.redirects_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolved(&self) {
        self.redirects_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.redirects_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    pub fn articles(&self) -> u64 {
        self.articles_stored.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.records_skipped.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects_found.load(Ordering::Relaxed)
    }

    pub fn resolved(&self) -> u64 {
        self.redirects_resolved.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.redirects_dropped.load(Ordering::Relaxed)
    }
}
