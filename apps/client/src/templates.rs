//! Template catalog with a short-lived in-memory cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::JobApi;
use crate::clock::Clock;
use crate::models::Template;

pub const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(300);

struct Cached {
    fetched_at: i64,
    templates: Vec<Template>,
}

pub struct TemplateCatalog {
    api: Arc<dyn JobApi>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl TemplateCatalog {
    pub fn new(api: Arc<dyn JobApi>, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(api, clock, TEMPLATE_CACHE_TTL)
    }

    pub fn with_ttl(api: Arc<dyn JobApi>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            api,
            clock,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Returns the available templates, refetching once the cache is stale.
    /// A failed fetch keeps serving whatever was cached before.
    pub async fn templates(&self) -> Vec<Template> {
        let now = self.clock.now_ms();
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            let age = now.saturating_sub(cached.fetched_at);
            if !cached.templates.is_empty() && age < self.ttl.as_millis() as i64 {
                debug!("Serving {} cached templates", cached.templates.len());
                return cached.templates.clone();
            }
        }

        match self.api.list_templates().await {
            Ok(templates) => {
                *cache = Some(Cached {
                    fetched_at: now,
                    templates: templates.clone(),
                });
                templates
            }
            Err(e) => {
                warn!("Failed to fetch templates: {e}");
                cache
                    .as_ref()
                    .map(|c| c.templates.clone())
                    .unwrap_or_default()
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}
