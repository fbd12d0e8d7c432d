//! Background catalog polling.
//!
//! [`DownloadMonitor`] is the single logical timer that drives catalog
//! refreshes. It polls at [`PollSchedule::base`] while nothing transfers and
//! at [`PollSchedule::active`] while a module is downloading or retrying.
//! Failed refreshes are not retried early; the next tick is the retry. The
//! first failure of a run is published to the bus once; the run ends at the
//! next successful refresh.
//!
//! Teardown never aborts an in-flight request. A refresh that resolves after
//! the cancellation token fires is dropped without reconciling.
//!
//! ```rust,ignore
//! let monitor = DownloadMonitor::new(reconciler, PollSchedule::default(), cancel.child_token());
//! let handle = monitor.spawn();
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reconciler::{DownloadReconciler, PollMode, PollOutcome};
use crate::registry::PollSchedule;

/// Polls the catalog until cancelled.
pub struct DownloadMonitor {
    reconciler: Arc<DownloadReconciler>,
    schedule: PollSchedule,
    cancel: CancellationToken,
}

impl DownloadMonitor {
    /// Create a monitor. It runs until `cancel` is cancelled.
    pub fn new(
        reconciler: Arc<DownloadReconciler>,
        schedule: PollSchedule,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            schedule,
            cancel,
        }
    }

    /// Run on a new Tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll until the cancellation token is cancelled. The first poll is immediate.
    pub async fn run(self) {
        info!(
            base_ms = self.schedule.base.as_millis() as u64,
            active_ms = self.schedule.active.as_millis() as u64,
            "download monitor started"
        );
        let mut delay = Duration::ZERO;
        let mut failing = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let fetched = self.reconciler.fetch(PollMode::Tick).await;
            if self.cancel.is_cancelled() {
                debug!("dropping catalog refresh that resolved after teardown");
                break;
            }

            match self.reconciler.settle(fetched) {
                PollOutcome::Reconciled(report) => {
                    if failing {
                        info!("catalog reachable again");
                        failing = false;
                    }
                    debug!(
                        generation = report.generation,
                        events = report.events.len(),
                        transferring = report.progress.len(),
                        "poll reconciled"
                    );
                }
                PollOutcome::Skipped => debug!("poll skipped, refresh in flight"),
                PollOutcome::Failed(e) => {
                    warn!(error = %e, "poll failed, retrying next tick");
                    if !failing {
                        self.reconciler
                            .bus()
                            .error(format!("Failed to load AI models: {}", e.message()));
                        failing = true;
                    }
                }
            }

            delay = self
                .schedule
                .next_interval(&self.reconciler.cache().snapshot());
        }

        info!("download monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::{FreddieError, Result};
    use crate::notify::{BusEvent, NotificationBus, Severity};
    use crate::registry::{
        AiModule, BackendTransport, ChatRequest, DownloadAck, DownloadProgress, DownloadState,
        ModuleRegistryCache,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records fetch times and replays scripted states for module `m1`.
    struct Recording {
        states: Mutex<Vec<DownloadState>>,
        fetched_at: Mutex<Vec<Instant>>,
        latency: Duration,
    }

    impl Recording {
        fn new(mut states: Vec<DownloadState>, latency: Duration) -> Arc<Self> {
            states.reverse();
            Arc::new(Self {
                states: Mutex::new(states),
                fetched_at: Mutex::new(Vec::new()),
                latency,
            })
        }
    }

    #[async_trait]
    impl BackendTransport for Recording {
        async fn fetch_catalog(&self) -> Result<Vec<AiModule>> {
            self.fetched_at.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.latency).await;
            let state = {
                let mut states = self.states.lock().unwrap();
                if states.len() > 1 {
                    states.pop()
                } else {
                    states.last().cloned()
                }
            };
            Ok(vec![
                AiModule::new("m1", 10).with_state(state.unwrap_or(DownloadState::Idle)),
            ])
        }

        async fn start_download(&self, _: &str) -> Result<DownloadAck> {
            Err(FreddieError::Network("unused".into()))
        }

        async fn cancel_download(&self, _: &str) -> Result<()> {
            Err(FreddieError::Network("unused".into()))
        }

        async fn delete_module(&self, _: &str) -> Result<()> {
            Err(FreddieError::Network("unused".into()))
        }

        async fn chat(&self, _: &ChatRequest) -> Result<String> {
            Err(FreddieError::Network("unused".into()))
        }
    }

    fn downloading() -> DownloadState {
        DownloadState::Downloading(DownloadProgress::default())
    }

    fn reconciler_for(transport: Arc<Recording>) -> Arc<DownloadReconciler> {
        let cache = Arc::new(ModuleRegistryCache::new(transport));
        Arc::new(DownloadReconciler::new(cache, NotificationBus::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn interval_tightens_while_transferring() {
        let transport = Recording::new(
            vec![downloading(), downloading(), DownloadState::Completed],
            Duration::ZERO,
        );
        let reconciler = reconciler_for(Arc::clone(&transport));
        let cancel = CancellationToken::new();
        let handle =
            DownloadMonitor::new(reconciler, PollSchedule::default(), cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(9_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        let times = transport.fetched_at.lock().unwrap().clone();
        let gaps: Vec<u64> = times
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        // t=0 downloading, t=2 downloading, t=4 completed, t=9 completed
        assert_eq!(gaps, vec![2_000, 2_000, 5_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_notified_once() {
        let transport = Recording::new(
            vec![downloading(), downloading(), DownloadState::Completed],
            Duration::ZERO,
        );
        let reconciler = reconciler_for(transport);
        let count = Arc::new(Mutex::new(0));
        {
            let count = Arc::clone(&count);
            reconciler.on_event(move |_| *count.lock().unwrap() += 1);
        }
        let cancel = CancellationToken::new();
        let handle = DownloadMonitor::new(
            Arc::clone(&reconciler),
            PollSchedule::default(),
            cancel.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_after_teardown_is_dropped() {
        let transport = Recording::new(
            vec![downloading(), DownloadState::Completed],
            Duration::from_secs(1),
        );
        let reconciler = reconciler_for(Arc::clone(&transport));
        let count = Arc::new(Mutex::new(0));
        {
            let count = Arc::clone(&count);
            reconciler.on_event(move |_| *count.lock().unwrap() += 1);
        }
        let cancel = CancellationToken::new();
        let handle = DownloadMonitor::new(
            Arc::clone(&reconciler),
            PollSchedule::default(),
            cancel.clone(),
        )
        .spawn();

        // First poll resolves at t=1s, second request goes out at t=3s.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(transport.fetched_at.lock().unwrap().len(), 2);
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*count.lock().unwrap(), 0);
    }

    /// Fails or answers with an empty catalog per script entry; the last
    /// entry repeats.
    struct Scripted {
        failures: Mutex<Vec<bool>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut failures: Vec<bool>) -> Arc<Self> {
            failures.reverse();
            Arc::new(Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendTransport for Scripted {
        async fn fetch_catalog(&self) -> Result<Vec<AiModule>> {
            *self.calls.lock().unwrap() += 1;
            let fail = {
                let mut failures = self.failures.lock().unwrap();
                if failures.len() > 1 {
                    failures.pop().unwrap_or(false)
                } else {
                    failures.last().copied().unwrap_or(false)
                }
            };
            if fail {
                return Err(FreddieError::Network("connection refused".into()));
            }
            Ok(Vec::new())
        }
        async fn start_download(&self, _: &str) -> Result<DownloadAck> {
            Err(FreddieError::Network("unused".into()))
        }
        async fn cancel_download(&self, _: &str) -> Result<()> {
            Err(FreddieError::Network("unused".into()))
        }
        async fn delete_module(&self, _: &str) -> Result<()> {
            Err(FreddieError::Network("unused".into()))
        }
        async fn chat(&self, _: &ChatRequest) -> Result<String> {
            Err(FreddieError::Network("unused".into()))
        }
    }

    fn published_errors(rx: &mut tokio::sync::mpsc::UnboundedReceiver<BusEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BusEvent::Published(note) = event {
                if note.severity == Severity::Error {
                    out.push(note.message);
                }
            }
        }
        out
    }

    async fn run_for(transport: Arc<Scripted>, window: Duration) -> Vec<String> {
        let cache = Arc::new(ModuleRegistryCache::new(transport as Arc<dyn BackendTransport>));
        let reconciler = Arc::new(DownloadReconciler::new(cache, NotificationBus::new()));
        let mut rx = reconciler.bus().subscribe();
        let cancel = CancellationToken::new();
        let handle =
            DownloadMonitor::new(reconciler, PollSchedule::default(), cancel.clone()).spawn();

        tokio::time::sleep(window).await;
        cancel.cancel();
        handle.await.unwrap();
        published_errors(&mut rx)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_waits_for_next_tick() {
        let transport = Scripted::new(vec![true]);
        let errors = run_for(Arc::clone(&transport), Duration::from_millis(10_500)).await;
        // t=0, t=5, t=10
        assert_eq!(*transport.calls.lock().unwrap(), 3);
        assert_eq!(errors.len(), 1, "one notice per run of failures: {errors:?}");
        assert!(errors[0].starts_with("Failed to load AI models"));
    }

    #[tokio::test(start_paused = true)]
    async fn each_outage_is_reported_once() {
        let transport = Scripted::new(vec![true, true, false, true, true]);
        let errors = run_for(Arc::clone(&transport), Duration::from_millis(20_500)).await;
        assert_eq!(*transport.calls.lock().unwrap(), 5);
        assert_eq!(errors.len(), 2);
    }
}
