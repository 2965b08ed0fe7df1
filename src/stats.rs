use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected while the pipeline runs
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub records_seen: AtomicU64,
    pub articles_submitted: AtomicU64,
    pub articles_rendered: AtomicU64,
    pub minimal_pages: AtomicU64,
    pub redirects_found: AtomicU64,
    pub disambiguations_found: AtomicU64,
    pub stubs_found: AtomicU64,
    pub links_found: AtomicU64,
    pub categories_found: AtomicU64,
    pub render_failures: AtomicU64,
    pub caller_runs: AtomicU64,
    pub rows_written: AtomicU64,
    pub write_errors: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_seen(&self) {
        self.records_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_submitted(&self) {
        self.articles_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rendered(&self) {
        self.articles_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_minimal(&self) {
        self.minimal_pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects(&self) {
        self.redirects_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_disambiguations(&self) {
        self.disambiguations_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stubs(&self) {
        self.stubs_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_links(&self, count: u64) {
        self.links_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_categories(&self, count: u64) {
        self.categories_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_caller_runs(&self, count: u64) {
        self.caller_runs.store(count, Ordering::Relaxed);
    }

    pub fn add_rows(&self, count: u64) {
        self.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_write_errors(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn seen(&self) -> u64 {
        self.records_seen.load(Ordering::Relaxed)
    }

    pub fn submitted(&self) -> u64 {
        self.articles_submitted.load(Ordering::Relaxed)
    }

    pub fn rendered(&self) -> u64 {
        self.articles_rendered.load(Ordering::Relaxed)
    }

    pub fn minimal(&self) -> u64 {
        self.minimal_pages.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects_found.load(Ordering::Relaxed)
    }

    pub fn disambiguations(&self) -> u64 {
        self.disambiguations_found.load(Ordering::Relaxed)
    }

    pub fn stubs(&self) -> u64 {
        self.stubs_found.load(Ordering::Relaxed)
    }

    pub fn links(&self) -> u64 {
        self.links_found.load(Ordering::Relaxed)
    }

    pub fn categories(&self) -> u64 {
        self.categories_found.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.render_failures.load(Ordering::Relaxed)
    }

    pub fn caller_runs(&self) -> u64 {
        self.caller_runs.load(Ordering::Relaxed)
    }

    pub fn rows(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}
