//! Template resolution
//!
//! Turns a `TemplateSpec` into markup ready to compile. Inline markup resolves
//! without suspending; URLs go through a `TemplateFetcher`.

use super::cache::{CacheStats, TemplateCache};
use super::types::{DialogError, DialogResult, TemplateSpec};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Markup produced by the resolver, tagged with its escaping policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub markup: String,
    /// Already-safe markup; the renderer must not escape interpolations
    pub plain: bool,
}

/// Fetch capability for URL templates
#[async_trait]
pub trait TemplateFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl<T: TemplateFetcher + ?Sized> TemplateFetcher for Arc<T> {
    async fn get(&self, url: &str) -> Result<String> {
        (**self).get(url).await
    }
}

/// Cache-first wrapper around another fetcher
///
/// Only successful fetches are cached; failures always reach the inner fetcher
/// again on the next request.
pub struct CachedFetcher<F> {
    inner: F,
    cache: Mutex<TemplateCache>,
}

impl<F: TemplateFetcher> CachedFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self::with_cache(inner, TemplateCache::new())
    }

    pub fn with_cache(inner: F, cache: TemplateCache) -> Self {
        Self {
            inner,
            cache: Mutex::new(cache),
        }
    }

    /// Seed the cache, as if `url` had already been fetched
    pub fn put(&self, url: impl Into<String>, body: impl Into<String>) {
        self.cache().insert(url, body);
    }

    pub fn invalidate(&self, url: &str) {
        self.cache().remove(url);
    }

    pub fn stats(&self) -> CacheStats {
        self.cache().stats()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, TemplateCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<F: TemplateFetcher> TemplateFetcher for CachedFetcher<F> {
    async fn get(&self, url: &str) -> Result<String> {
        if let Some(body) = self.cache().get(url) {
            return Ok(body);
        }

        let body = self.inner.get(url).await?;
        self.cache().insert(url, body.clone());
        Ok(body)
    }
}

/// Serves templates from a directory on disk
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a template URL onto a path below the root, refusing to escape it
    fn resolve_path(&self, url: &str) -> Result<PathBuf> {
        let relative = Path::new(url.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(anyhow!("template path '{}' leaves the template root", url));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl TemplateFetcher for FsFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        let path = self.resolve_path(url)?;
        trace!("Reading template from {}", path.display());
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

/// Fetches templates over HTTP, optionally relative to a base URL
pub struct HttpFetcher {
    client: Client,
    base_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("modalstack/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl TemplateFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        let absolute = self.absolute_url(url);
        debug!("Fetching template from {}", absolute);

        let response = self.client.get(&absolute).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {} for {}", status, absolute));
        }
        Ok(response.text().await?)
    }
}

/// Produces markup for any `TemplateSpec`
#[derive(Clone)]
pub struct TemplateResolver {
    fetcher: Arc<dyn TemplateFetcher>,
}

impl TemplateResolver {
    pub fn new(fetcher: Arc<dyn TemplateFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve a template spec; never retries
    pub async fn resolve(&self, spec: &TemplateSpec) -> DialogResult<ResolvedTemplate> {
        match spec {
            TemplateSpec::Literal { markup, plain } => Ok(ResolvedTemplate {
                markup: markup.clone(),
                plain: *plain,
            }),
            TemplateSpec::Url(url) => match self.fetcher.get(url).await {
                Ok(markup) => {
                    trace!("Resolved template '{}' ({} bytes)", url, markup.len());
                    // Fetched markup comes from the application itself
                    Ok(ResolvedTemplate { markup, plain: true })
                }
                Err(source) => {
                    warn!("Template fetch failed for '{}': {}", url, source);
                    Err(DialogError::TemplateFetch {
                        url: url.clone(),
                        source,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake fetchers shared by the dialog tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// In-memory backend whose responses can be held back until `flush`
    #[derive(Default)]
    pub struct FakeBackend {
        responses: Mutex<HashMap<String, String>>,
        gated: std::sync::atomic::AtomicBool,
        gate: Notify,
        pub requests: AtomicUsize,
    }

    impl FakeBackend {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Hold every response until `flush` is called
        pub fn gated() -> Arc<Self> {
            let backend = Self::default();
            backend.gated.store(true, Ordering::SeqCst);
            Arc::new(backend)
        }

        pub fn when_get(&self, url: &str, body: &str) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_string());
        }

        /// Release every request currently waiting
        pub fn flush(&self) {
            self.gate.notify_waiters();
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        /// Yield until at least `count` requests are parked on the gate
        pub async fn wait_for_requests(&self, count: usize) {
            while self.request_count() < count {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl TemplateFetcher for FakeBackend {
        async fn get(&self, url: &str) -> Result<String> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.gated.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("404 Not Found: {}", url))
        }
    }
}
