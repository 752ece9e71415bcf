//! Model selection and the TTL-cached, fetch-coalesced model catalog.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{CatalogConfig, ProviderDefaults};
use crate::errors::ProviderError;
use crate::model::{
    BackendKind, FieldUpdate, ModelSelection, ModelSelectionUpdate, ModelSettings,
    ReasoningEffort,
};

/// Source of the provider-reported model list.
#[async_trait::async_trait]
pub trait ModelCatalogSource: Send + Sync {
    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError>;
}

type CatalogFetch = Shared<BoxFuture<'static, Arc<Vec<String>>>>;

struct CachedCatalog {
    models: Arc<Vec<String>>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CatalogState {
    cached: Option<CachedCatalog>,
    in_flight: Option<CatalogFetch>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Active model/effort selection plus the catalog of valid models for one
/// backend instance.
///
/// Locks are never held across an await; concurrent refreshes share one
/// in-flight fetch.
pub struct ModelManager {
    kind: BackendKind,
    defaults: ModelSelection,
    extra_models: Vec<String>,
    config: CatalogConfig,
    source: Arc<dyn ModelCatalogSource>,
    selection: Mutex<ModelSelection>,
    catalog: Mutex<CatalogState>,
}

impl ModelManager {
    pub fn new(
        kind: BackendKind,
        defaults: &ProviderDefaults,
        config: CatalogConfig,
        source: Arc<dyn ModelCatalogSource>,
    ) -> Self {
        let default_effort = defaults
            .effort
            .filter(|effort| kind.effort_options().contains(effort));
        Self {
            kind,
            defaults: ModelSelection {
                model: defaults.model.clone(),
                effort: default_effort,
            },
            extra_models: defaults.extra_models.clone(),
            config,
            source,
            selection: Mutex::new(ModelSelection::default()),
            catalog: Mutex::new(CatalogState::default()),
        }
    }

    /// The current overrides (`None` = provider default).
    pub fn selection(&self) -> ModelSelection {
        lock(&self.selection).clone()
    }

    /// Model to use for the next run: the override, else the default.
    pub fn effective_model(&self) -> Option<String> {
        self.selection().model.or_else(|| self.defaults.model.clone())
    }

    pub fn effective_effort(&self) -> Option<ReasoningEffort> {
        self.selection().effort.or(self.defaults.effort)
    }

    /// Applies a partial update. Never fails.
    ///
    /// Models are stored verbatim (already trimmed) without catalog
    /// membership checks. Efforts outside this backend's options leave the
    /// previous value untouched.
    pub fn update_selection(&self, update: &ModelSelectionUpdate) {
        let mut selection = lock(&self.selection);
        match &update.model {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => selection.model = None,
            FieldUpdate::Set(model) => selection.model = Some(model.clone()),
        }
        match &update.effort {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => selection.effort = None,
            FieldUpdate::Set(raw) => match raw.parse::<ReasoningEffort>() {
                Ok(effort) if self.kind.effort_options().contains(&effort) => {
                    selection.effort = Some(effort);
                }
                _ => debug!(backend = %self.kind, effort = %raw, "ignoring invalid effort"),
            },
        }
    }

    /// Sorted, de-duplicated catalog. Served from cache while fresh.
    pub async fn available_models(&self) -> Vec<String> {
        let fetch = {
            let mut state = lock(&self.catalog);
            if let Some(cached) = &state.cached
                && cached.fetched_at.elapsed() < self.config.ttl
            {
                return cached.models.as_ref().clone();
            }
            match &state.in_flight {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = self.start_fetch();
                    state.in_flight = Some(fetch.clone());
                    fetch
                }
            }
        };

        let models = fetch.clone().await;

        let mut state = lock(&self.catalog);
        if state
            .in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&fetch))
        {
            state.in_flight = None;
            state.cached = Some(CachedCatalog {
                models: models.clone(),
                fetched_at: Instant::now(),
            });
        }
        models.as_ref().clone()
    }

    pub async fn settings(&self) -> ModelSettings {
        let available_models = self.available_models().await;
        let selection = self.selection();
        ModelSettings {
            model: selection.model,
            default_model: self.defaults.model.clone(),
            available_models,
            effort: selection.effort,
            default_effort: self.defaults.effort,
            effort_options: self.kind.effort_options().to_vec(),
        }
    }

    fn start_fetch(&self) -> CatalogFetch {
        let source = self.source.clone();
        let extras = self.extra_models.clone();
        let timeout: Duration = self.config.fetch_timeout;
        let kind = self.kind;
        async move {
            let remote = match tokio::time::timeout(timeout, source.fetch_models()).await {
                Ok(Ok(models)) => {
                    debug!(backend = %kind, count = models.len(), "fetched model catalog");
                    models
                }
                Ok(Err(err)) => {
                    warn!(backend = %kind, error = %err, "model catalog fetch failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(backend = %kind, timeout_ms = timeout.as_millis() as u64, "model catalog fetch timed out");
                    Vec::new()
                }
            };
            Arc::new(merge_models(remote, &extras))
        }
        .boxed()
        .shared()
    }
}

/// Union of remote and static models, trimmed, de-duplicated and sorted.
pub fn merge_models(remote: Vec<String>, extras: &[String]) -> Vec<String> {
    remote
        .into_iter()
        .chain(extras.iter().cloned())
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
