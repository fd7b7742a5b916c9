//! Assembly and lifecycle of the shared components.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use guildkeep_auth::AuthorizationEngine;
use guildkeep_core::{
    ConfigError, DocumentStore, GuildDirectory, GuildkeepConfig, GuildkeepResult,
    PositionRoleBinding, RoleGrantLedger,
};
use guildkeep_storage::{
    ApiFetcher, BoundedCache, HttpJsonFetcher, LiveDocumentCache, ReadThroughCache, SweeperHandle,
};
use guildkeep_tasks::SequencedExecutor;

/// Collection name of the position binding mirror.
pub const BINDINGS_COLLECTION: &str = "position_bindings";

/// The running set of components every feature module shares.
pub struct Infrastructure {
    config: GuildkeepConfig,
    bindings: Arc<LiveDocumentCache<PositionRoleBinding>>,
    engine: Arc<AuthorizationEngine>,
    executor: SequencedExecutor<String>,
    sweepers: Mutex<Vec<SweeperHandle>>,
}

impl Debug for Infrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Infrastructure")
            .field("bindings", &self.bindings)
            .field("executor", &self.executor)
            .finish()
    }
}

impl Infrastructure {
    /// Validate `config` and start the binding mirror. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        config: GuildkeepConfig,
        binding_store: Arc<dyn DocumentStore<PositionRoleBinding>>,
        directory: Arc<dyn GuildDirectory>,
    ) -> GuildkeepResult<Self> {
        Self::start_with_ledger(config, binding_store, directory, None)
    }

    /// Like [`start`](Self::start), with a ledger for temporary role grants.
    pub fn start_with_ledger(
        config: GuildkeepConfig,
        binding_store: Arc<dyn DocumentStore<PositionRoleBinding>>,
        directory: Arc<dyn GuildDirectory>,
        ledger: Option<Arc<dyn RoleGrantLedger>>,
    ) -> GuildkeepResult<Self> {
        config.validate()?;

        let bindings = LiveDocumentCache::open(
            BINDINGS_COLLECTION,
            binding_store,
            config.live_cache.clone(),
        );
        let mut engine = AuthorizationEngine::new(Arc::clone(&bindings), directory, config.auth.clone());
        if let Some(ledger) = ledger {
            engine = engine.with_ledger(ledger);
        }

        tracing::info!(
            admin_users = config.auth.admin_users.len(),
            ready_timeout_ms = config.live_cache.ready_timeout.as_millis() as u64,
            "Guildkeep infrastructure started"
        );

        Ok(Self {
            config,
            bindings,
            engine: Arc::new(engine),
            executor: SequencedExecutor::new(),
            sweepers: Mutex::new(Vec::new()),
        })
    }

    /// Wait up to the configured ready timeout for the binding mirror.
    pub async fn ready(&self) -> bool {
        let ready = self.bindings.wait_until_ready().await;
        if !ready {
            tracing::warn!("Position bindings not ready within timeout");
        }
        ready
    }

    pub fn config(&self) -> &GuildkeepConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<AuthorizationEngine> {
        &self.engine
    }

    pub fn bindings(&self) -> &Arc<LiveDocumentCache<PositionRoleBinding>> {
        &self.bindings
    }

    /// Executor for per-key serialized work (keyed by e.g. guild or user id).
    pub fn executor(&self) -> &SequencedExecutor<String> {
        &self.executor
    }

    /// Read-through cache in front of `fetcher`, bounded by the API cache
    /// settings. Its sweeper stops on [`shutdown`](Self::shutdown).
    pub fn api_cache<K, V, F>(&self, fetcher: Arc<F>) -> ReadThroughCache<K, V, F>
    where
        K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
        V: Clone + Send + Sync + 'static,
        F: ApiFetcher<K, V>,
    {
        let settings = &self.config.api_cache;
        let cache = Arc::new(BoundedCache::from_config(settings));
        let sweeper = cache.start_sweeper(settings.sweep_interval);
        self.sweepers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sweeper);
        ReadThroughCache::new(cache, fetcher)
    }

    /// HTTP JSON fetcher using the configured timeout and user agent.
    pub fn http_fetcher<V>(&self, url_template: &str) -> Result<HttpJsonFetcher<V>, ConfigError> {
        HttpJsonFetcher::new(url_template, &self.config.http)
    }

    /// Stop every sweeper and the binding change loop.
    pub async fn shutdown(self) {
        let sweepers = std::mem::take(
            &mut *self
                .sweepers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let sweeper_count = sweepers.len();
        for sweeper in sweepers {
            sweeper.shutdown().await;
        }
        self.bindings.shutdown().await;
        tracing::info!(sweepers = sweeper_count, "Guildkeep infrastructure stopped");
    }
}
