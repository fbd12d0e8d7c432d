//! Download lifecycle reconciliation.
//!
//! [`DownloadReconciler`] compares each catalog snapshot with the previous
//! one and turns terminal state *transitions* into one-shot
//! [`DownloadEvent`]s. Steady progress is reported but never notified.
//! The diff depends only on consecutive snapshots, so requests issued while a
//! refresh is in flight cannot confuse it.
//!
//! | Previous | Current | Event |
//! |----------|---------|-------|
//! | `Downloading` / `Retrying` | `Completed` | [`DownloadEvent::Succeeded`] |
//! | `Downloading` / `Retrying` | `Idle` with `downloaded` | [`DownloadEvent::Succeeded`] |
//! | `Downloading` / `Retrying` | `Failed` | [`DownloadEvent::Failed`] |
//! | anything but `Cancelled` | `Cancelled` | [`DownloadEvent::Cancelled`] |
//! | absent | anything | none |
//!
//! Events go to registered callbacks first, then to the [`NotificationBus`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::error::{FreddieError, Result};
use crate::notify::{NotificationBus, Severity};
use crate::registry::{
    AiModule, CatalogSnapshot, DownloadAck, DownloadState, ModuleId, ModuleRegistryCache,
};

/// One-shot terminal transition of a module download.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Succeeded { module: AiModule },
    Failed { module: AiModule, reason: String },
    Cancelled { module: AiModule },
}

impl DownloadEvent {
    pub fn module(&self) -> &AiModule {
        match self {
            Self::Succeeded { module } | Self::Failed { module, .. } | Self::Cancelled { module } => {
                module
            }
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module().id
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Succeeded { .. } => Severity::Success,
            Self::Failed { .. } => Severity::Error,
            Self::Cancelled { .. } => Severity::Info,
        }
    }

    fn notification_text(&self) -> String {
        match self {
            Self::Succeeded { module } => {
                format!("{} downloaded successfully", module.display_name)
            }
            Self::Failed { module, reason } => {
                format!("Download of {} failed: {reason}", module.display_name)
            }
            Self::Cancelled { module } => {
                format!("Download of {} cancelled", module.display_name)
            }
        }
    }
}

/// Progress of a transferring module, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub module_id: ModuleId,
    /// `Downloading` or `Retrying`.
    pub state: DownloadState,
}

/// Result of diffing one snapshot against the previous one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileReport {
    /// Generation of the reconciled snapshot.
    pub generation: u64,
    /// The snapshot was not newer than the last one reconciled and was ignored.
    pub stale: bool,
    pub events: Vec<DownloadEvent>,
    pub progress: Vec<ProgressUpdate>,
    /// Modules that disappeared from the catalog.
    pub removed: Vec<ModuleId>,
}

/// How a poll obtains its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Timer tick: skipped if a refresh is outstanding.
    Tick,
    /// Out-of-band refresh: waits for any outstanding refresh.
    Forced,
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Reconciled(ReconcileReport),
    /// Another refresh was outstanding; nothing was fetched.
    Skipped,
    /// The refresh failed; the previous snapshot stays authoritative.
    Failed(FreddieError),
}

type EventCallback = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct DiffState {
    last_generation: u64,
    previous: HashMap<ModuleId, DownloadState>,
}

/// Turns catalog snapshots into download events and guards user requests.
pub struct DownloadReconciler {
    cache: Arc<ModuleRegistryCache>,
    bus: NotificationBus,
    state: Mutex<DiffState>,
    callbacks: RwLock<Vec<EventCallback>>,
}

impl std::fmt::Debug for DownloadReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadReconciler")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl DownloadReconciler {
    pub fn new(cache: Arc<ModuleRegistryCache>, bus: NotificationBus) -> Self {
        Self {
            cache,
            bus,
            state: Mutex::new(DiffState::default()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ModuleRegistryCache> {
        &self.cache
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Register a callback invoked synchronously once per event, in event order.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&DownloadEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        callbacks.push(Arc::new(callback));
    }

    /// Diff `snapshot` against the previous one and remember it.
    ///
    /// Does not invoke callbacks or publish notifications; see
    /// [`apply`](Self::apply).
    pub fn reconcile(&self, snapshot: &CatalogSnapshot) -> ReconcileReport {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if snapshot.generation <= state.last_generation {
            debug!(
                generation = snapshot.generation,
                last = state.last_generation,
                "ignoring stale catalog snapshot"
            );
            return ReconcileReport {
                generation: snapshot.generation,
                stale: true,
                ..ReconcileReport::default()
            };
        }

        let mut report = ReconcileReport {
            generation: snapshot.generation,
            ..ReconcileReport::default()
        };
        let mut next = HashMap::with_capacity(snapshot.modules.len());

        for module in &snapshot.modules {
            if module.state.is_transferring() {
                report.progress.push(ProgressUpdate {
                    module_id: module.id.clone(),
                    state: module.state.clone(),
                });
            }
            let previous = state.previous.get(&module.id);
            if let Some(event) = previous.and_then(|previous| transition(previous, module)) {
                report.events.push(event);
            }
            // An unrecognised status keeps the last known one, so a transfer
            // that passes through it still reports its terminal event.
            let remembered = match (&module.state, previous) {
                (DownloadState::Unknown { .. }, Some(known)) => known.clone(),
                (current, _) => current.clone(),
            };
            next.insert(module.id.clone(), remembered);
        }

        report.removed = state
            .previous
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        report.removed.sort();

        state.previous = next;
        state.last_generation = snapshot.generation;
        report
    }

    /// [`reconcile`](Self::reconcile) and dispatch the resulting events.
    pub fn apply(&self, snapshot: &CatalogSnapshot) -> ReconcileReport {
        let report = self.reconcile(snapshot);
        for id in &report.removed {
            debug!(module_id = %id, "module left the catalog");
        }
        self.dispatch(&report.events);
        report
    }

    /// Refresh the catalog, reconcile and dispatch.
    pub async fn poll_once(&self, mode: PollMode) -> PollOutcome {
        let fetched = self.fetch(mode).await;
        self.settle(fetched)
    }

    /// Fetch a snapshot. `None` when a tick is skipped.
    pub async fn fetch(&self, mode: PollMode) -> Option<Result<Arc<CatalogSnapshot>>> {
        match mode {
            PollMode::Tick => self.cache.try_refresh().await,
            PollMode::Forced => Some(self.cache.refresh().await),
        }
    }

    /// Reconcile and dispatch the result of [`fetch`](Self::fetch).
    pub fn settle(&self, fetched: Option<Result<Arc<CatalogSnapshot>>>) -> PollOutcome {
        match fetched {
            None => PollOutcome::Skipped,
            Some(Ok(snapshot)) => PollOutcome::Reconciled(self.apply(&snapshot)),
            Some(Err(e)) => PollOutcome::Failed(e),
        }
    }

    /// Ask the backend to download a module.
    ///
    /// `available_bytes` is the free space the caller is willing to spend.
    ///
    /// # Errors
    ///
    /// Validation failures ([`FreddieError::UnknownModule`],
    /// [`FreddieError::AlreadyDownloading`], [`FreddieError::AlreadyDownloaded`],
    /// [`FreddieError::InsufficientSpace`]) issue no request. Transport errors
    /// are returned as-is. Both are also published to the bus.
    pub async fn request_download(&self, module_id: &str, available_bytes: u64) -> Result<DownloadAck> {
        let module = self.require_module(module_id)?;
        if module.state.is_transferring() {
            return Err(self.reject(FreddieError::AlreadyDownloading(module.id)));
        }
        if module.downloaded {
            return Err(self.reject(FreddieError::AlreadyDownloaded(module.id)));
        }
        if module.size_bytes > available_bytes {
            return Err(self.reject(FreddieError::InsufficientSpace {
                module_id: module.id,
                required_bytes: module.size_bytes,
                available_bytes,
            }));
        }

        let ack = self
            .cache
            .transport()
            .start_download(&module.id)
            .await
            .map_err(|e| self.report_failure("start download", &module, e))?;

        info!(module_id = %module.id, ack = ?ack, "download requested");
        let text = match ack {
            DownloadAck::Started => format!("Download started for {}", module.display_name),
            DownloadAck::AlreadyDownloaded => {
                format!("{} is already downloaded", module.display_name)
            }
            DownloadAck::AlreadyDownloading => {
                format!("{} is already being downloaded", module.display_name)
            }
        };
        self.bus.info(text);
        Ok(ack)
    }

    /// Ask the backend to cancel a running download.
    ///
    /// Completion is observed as a `Cancelled` state on a later refresh.
    ///
    /// # Errors
    ///
    /// [`FreddieError::NotDownloading`] if the module is not transferring.
    pub async fn request_cancel(&self, module_id: &str) -> Result<()> {
        let module = self.require_module(module_id)?;
        if !module.state.is_transferring() {
            return Err(self.reject(FreddieError::NotDownloading(module.id)));
        }

        self.cache
            .transport()
            .cancel_download(&module.id)
            .await
            .map_err(|e| self.report_failure("cancel download", &module, e))?;
        info!(module_id = %module.id, "cancel requested");
        Ok(())
    }

    /// Ask the backend to delete a downloaded module, then refresh at once.
    ///
    /// A failure of the follow-up refresh is logged; the next tick retries.
    ///
    /// # Errors
    ///
    /// [`FreddieError::NotDownloaded`] if the module has no local payload.
    pub async fn request_delete(&self, module_id: &str) -> Result<()> {
        let module = self.require_module(module_id)?;
        if !module.downloaded {
            return Err(self.reject(FreddieError::NotDownloaded(module.id)));
        }

        self.cache
            .transport()
            .delete_module(&module.id)
            .await
            .map_err(|e| self.report_failure("delete module", &module, e))?;
        info!(module_id = %module.id, "module deleted");
        self.bus
            .success(format!("{} deleted successfully", module.display_name));

        if let PollOutcome::Failed(e) = self.poll_once(PollMode::Forced).await {
            warn!(module_id = %module.id, error = %e, "refresh after delete failed");
        }
        Ok(())
    }

    fn require_module(&self, module_id: &str) -> Result<AiModule> {
        self.cache
            .module(module_id)
            .ok_or_else(|| self.reject(FreddieError::UnknownModule(module_id.to_owned())))
    }

    /// Publish a validation failure and hand it back.
    fn reject(&self, err: FreddieError) -> FreddieError {
        let severity = match err {
            FreddieError::InsufficientSpace { .. } | FreddieError::UnknownModule(_) => {
                Severity::Error
            }
            _ => Severity::Warning,
        };
        debug!(code = err.code(), error = %err, "request rejected");
        self.bus.publish(err.to_string(), severity, None);
        err
    }

    fn report_failure(&self, action: &str, module: &AiModule, err: FreddieError) -> FreddieError {
        warn!(module_id = %module.id, action, error = %err, "backend request failed");
        self.bus.error(format!(
            "Failed to {action} for {}: {}",
            module.display_name,
            err.message()
        ));
        err
    }

    fn dispatch(&self, events: &[DownloadEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks: Vec<EventCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for event in events {
            info!(
                module_id = %event.module_id(),
                event = ?event.severity(),
                "download transition"
            );
            for callback in &callbacks {
                callback(event);
            }
            self.bus
                .publish(event.notification_text(), event.severity(), None);
        }
    }
}

/// Terminal event for a module whose previous state is known.
fn transition(previous: &DownloadState, module: &AiModule) -> Option<DownloadEvent> {
    let was_transferring = previous.is_transferring();
    match &module.state {
        DownloadState::Completed if was_transferring => Some(DownloadEvent::Succeeded {
            module: module.clone(),
        }),
        DownloadState::Idle if was_transferring && module.downloaded => {
            Some(DownloadEvent::Succeeded {
                module: module.clone(),
            })
        }
        DownloadState::Failed { reason } if was_transferring => Some(DownloadEvent::Failed {
            module: module.clone(),
            reason: reason.clone(),
        }),
        DownloadState::Cancelled if !matches!(previous, DownloadState::Cancelled) => {
            Some(DownloadEvent::Cancelled {
                module: module.clone(),
            })
        }
        _ => None,
    }
}
