//! Per-domain, process-local ledger of URLs seen during extraction passes.
//!
//! Sets only grow until a domain is cleared or the whole stash is flushed.
//! Nothing here is persisted or shared across processes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Default)]
struct DomainLedger {
    valid_blog_urls: HashSet<String>,
    internal_urls: HashSet<String>,
    selected_urls: HashSet<String>,
    current_page: u32,
}

/// Counts for one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    pub valid_blog_urls: usize,
    pub internal_urls: usize,
    pub selected_urls: usize,
    pub current_page: u32,
}

/// In-memory dedup ledger keyed by domain.
#[derive(Debug, Default)]
pub struct ContentStash {
    domains: Mutex<HashMap<String, DomainLedger>>,
}

impl ContentStash {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DomainLedger>> {
        self.domains.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned content stash mutex");
            poisoned.into_inner()
        })
    }

    fn with_domain<T>(&self, domain: &str, f: impl FnOnce(&mut DomainLedger) -> T) -> T {
        let mut domains = self.lock();
        let ledger = domains.entry(domain.to_ascii_lowercase()).or_default();
        f(ledger)
    }

    fn read_domain<T>(&self, domain: &str, f: impl FnOnce(&DomainLedger) -> T) -> Option<T> {
        self.lock().get(&domain.to_ascii_lowercase()).map(f)
    }

    /// Returns `true` if the URL was not already recorded.
    pub fn add_valid_blog_url(&self, domain: &str, url: &str) -> bool {
        self.with_domain(domain, |d| d.valid_blog_urls.insert(url.to_string()))
    }

    pub fn is_valid_blog_url(&self, domain: &str, url: &str) -> bool {
        self.read_domain(domain, |d| d.valid_blog_urls.contains(url))
            .unwrap_or(false)
    }

    /// Returns `true` if the URL was not already recorded.
    pub fn add_internal_url(&self, domain: &str, url: &str) -> bool {
        self.with_domain(domain, |d| d.internal_urls.insert(url.to_string()))
    }

    pub fn is_known_internal_url(&self, domain: &str, url: &str) -> bool {
        self.read_domain(domain, |d| d.internal_urls.contains(url))
            .unwrap_or(false)
    }

    /// Returns `true` if the URL was not already selected.
    pub fn add_selected_url(&self, domain: &str, url: &str) -> bool {
        self.with_domain(domain, |d| d.selected_urls.insert(url.to_string()))
    }

    pub fn is_selected_url(&self, domain: &str, url: &str) -> bool {
        self.read_domain(domain, |d| d.selected_urls.contains(url))
            .unwrap_or(false)
    }

    /// Advance the pagination cursor and return the new page number.
    pub fn increment_page(&self, domain: &str) -> u32 {
        self.with_domain(domain, |d| {
            d.current_page += 1;
            d.current_page
        })
    }

    pub fn current_page(&self, domain: &str) -> u32 {
        self.read_domain(domain, |d| d.current_page).unwrap_or(0)
    }

    pub fn domain_stats(&self, domain: &str) -> DomainStats {
        self.read_domain(domain, |d| DomainStats {
            valid_blog_urls: d.valid_blog_urls.len(),
            internal_urls: d.internal_urls.len(),
            selected_urls: d.selected_urls.len(),
            current_page: d.current_page,
        })
        .unwrap_or_default()
    }

    pub fn clear_domain_data(&self, domain: &str) {
        if self.lock().remove(&domain.to_ascii_lowercase()).is_some() {
            tracing::debug!(%domain, "Cleared content stash for domain");
        }
    }

    pub fn flush_all(&self) {
        let mut domains = self.lock();
        let count = domains.len();
        domains.clear();
        tracing::debug!(domains = count, "Flushed content stash");
    }

    pub fn domain_count(&self) -> usize {
        self.lock().len()
    }
}
