//! In-memory mirror of the backend module catalog.
//!
//! [`ModuleRegistryCache`] holds the last successfully fetched
//! [`CatalogSnapshot`]. Each refresh replaces the snapshot wholesale behind an
//! `Arc`, so readers never observe a half-updated list. A failed refresh
//! leaves the previous snapshot in place.
//!
//! Refreshes are serialized. A timer tick uses [`ModuleRegistryCache::try_refresh`]
//! and is skipped while another refresh is outstanding; a forced
//! [`ModuleRegistryCache::refresh`] waits its turn.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::transport::BackendTransport;
use super::types::AiModule;
use crate::config::PollingConfig;
use crate::error::Result;

/// Immutable view of the catalog at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogSnapshot {
    /// Increases by one on every successful refresh. `0` before the first.
    pub generation: u64,
    /// Wall-clock time of the fetch, for display.
    pub fetched_at: Option<DateTime<Utc>>,
    pub modules: Vec<AiModule>,
}

impl CatalogSnapshot {
    /// Snapshot with the given modules, for tests and fakes.
    pub fn new(generation: u64, modules: Vec<AiModule>) -> Self {
        Self {
            generation,
            fetched_at: None,
            modules,
        }
    }

    pub fn module(&self, id: &str) -> Option<&AiModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// At least one module is downloading or retrying.
    pub fn any_transferring(&self) -> bool {
        self.modules.iter().any(|m| m.state.is_transferring())
    }
}

/// Catalog polling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Interval while nothing transfers.
    pub base: Duration,
    /// Interval while a module is downloading or retrying.
    pub active: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            active: Duration::from_secs(2),
        }
    }
}

impl From<&PollingConfig> for PollSchedule {
    fn from(config: &PollingConfig) -> Self {
        Self {
            base: config.base_interval(),
            active: config.active_interval(),
        }
    }
}

impl PollSchedule {
    /// Delay before the next tick given the latest snapshot.
    pub fn next_interval(&self, snapshot: &CatalogSnapshot) -> Duration {
        if snapshot.any_transferring() {
            self.active
        } else {
            self.base
        }
    }
}

/// Last-known module catalog with serialized refreshes.
pub struct ModuleRegistryCache {
    transport: Arc<dyn BackendTransport>,
    current: RwLock<Arc<CatalogSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ModuleRegistryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistryCache")
            .field("generation", &self.snapshot().generation)
            .finish_non_exhaustive()
    }
}

impl ModuleRegistryCache {
    pub fn new(transport: Arc<dyn BackendTransport>) -> Self {
        Self {
            transport,
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The transport this cache fetches through.
    pub fn transport(&self) -> &Arc<dyn BackendTransport> {
        &self.transport
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Look up one module in the current snapshot.
    pub fn module(&self, id: &str) -> Option<AiModule> {
        self.snapshot().module(id).cloned()
    }

    /// Fetch the catalog, waiting for any outstanding refresh first.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_locked().await
    }

    /// Fetch the catalog unless another refresh is outstanding.
    ///
    /// Returns `None` when the tick is skipped.
    pub async fn try_refresh(&self) -> Option<Result<Arc<CatalogSnapshot>>> {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!("catalog refresh already in flight, skipping tick");
            return None;
        };
        Some(self.fetch_locked().await)
    }

    async fn fetch_locked(&self) -> Result<Arc<CatalogSnapshot>> {
        let modules = match self.transport.fetch_catalog().await {
            Ok(modules) => modules,
            Err(e) => {
                warn!(error = %e, "catalog refresh failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = Arc::new(CatalogSnapshot {
            generation: current.generation.saturating_add(1),
            fetched_at: Some(Utc::now()),
            modules,
        });
        *current = Arc::clone(&snapshot);
        debug!(
            generation = snapshot.generation,
            modules = snapshot.modules.len(),
            "catalog refreshed"
        );
        Ok(snapshot)
    }
}
