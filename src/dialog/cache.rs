//! Template cache with LRU eviction and TTL support
//!
//! Backs `CachedFetcher`: once a URL resolved successfully its body is served
//! from here until it expires or is evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Cache entry with expiration time
#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    created_at: Instant,
    access_count: u64,
    last_used: u64,
}

impl CacheEntry {
    fn new(body: String, tick: u64) -> Self {
        Self {
            body,
            created_at: Instant::now(),
            access_count: 0,
            last_used: tick,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    fn access(&mut self, tick: u64) -> &str {
        self.access_count += 1;
        self.last_used = tick;
        &self.body
    }
}

/// Template bodies keyed by URL
#[derive(Debug)]
pub struct TemplateCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
    // Logical clock for LRU ordering; Instant can tie on fast machines.
    tick: u64,
    hits: u64,
    misses: u64,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::with_settings(256, Duration::from_secs(300))
    }

    pub fn with_settings(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            ttl,
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Store a template body, evicting the least recently used entry when full
    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        let url = url.into();
        trace!("Caching template for url: {}", url);

        self.clean_expired();

        if !self.entries.contains_key(&url) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        self.tick += 1;
        self.entries.insert(url, CacheEntry::new(body.into(), self.tick));
    }

    pub fn get(&mut self, url: &str) -> Option<String> {
        self.tick += 1;
        let tick = self.tick;

        match self.entries.get_mut(url) {
            Some(entry) if entry.is_expired(self.ttl) => {
                trace!("Cache entry expired for url: {}", url);
                self.entries.remove(url);
                self.misses += 1;
                None
            }
            Some(entry) => {
                trace!("Cache hit for url: {} (access count: {})", url, entry.access_count + 1);
                self.hits += 1;
                Some(entry.access(tick).to_string())
            }
            None => {
                trace!("Cache miss for url: {}", url);
                self.misses += 1;
                None
            }
        }
    }

    pub fn remove(&mut self, url: &str) -> Option<String> {
        self.entries.remove(url).map(|entry| entry.body)
    }

    pub fn clear(&mut self) {
        debug!("Clearing template cache ({} entries)", self.entries.len());
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            hit_rate: self.hit_rate(),
        }
    }

    fn clean_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|url, entry| {
            let keep = !entry.is_expired(ttl);
            if !keep {
                trace!("Removed expired cache entry: {}", url);
            }
            keep
        });
    }

    fn evict_lru(&mut self) {
        if let Some(lru_url) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(url, _)| url.clone())
        {
            self.entries.remove(&lru_url);
            trace!("Evicted LRU cache entry: {}", lru_url);
        }
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}
