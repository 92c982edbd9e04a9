//! RFQ lifecycle poller.
//!
//! Fetches the document set on a fixed period, diffs it against the
//! installed snapshot and publishes both:
//! - the latest `PollState` (snapshot + refreshing flag) on a watch channel
//! - the resulting `ChangeEvent`s, in order, on an mpsc channel
//!
//! At most one fetch is in flight. Store failures are logged and absorbed:
//! the previous snapshot stays installed and the next tick retries. A manual
//! refresh runs a poll out of band without moving the timer.

use crate::diff::{diff, ChangeEvent};
use crate::rfq::Snapshot;
use crate::store::{DocumentStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What subscribers see.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    pub snapshot: Arc<Snapshot>,
    pub is_refreshing: bool,
    /// Generation of the fetch that produced `snapshot`; 0 before the first install.
    pub generation: u64,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PollState {
    pub fn has_snapshot(&self) -> bool {
        self.generation > 0
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Installed { events: usize },
    /// Another fetch was already in flight.
    Suppressed,
    /// A newer snapshot was installed while this fetch ran.
    Discarded,
    Failed(StoreError),
}

/// Requests an out-of-band poll. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    /// Requests coalesce: several calls before the poller wakes run one poll.
    pub fn refresh_now(&self) {
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn from_notify(notify: Arc<Notify>) -> Self {
        Self { notify }
    }
}

pub struct LifecyclePoller {
    store: Arc<dyn DocumentStore>,
    interval: Duration,
    state_tx: watch::Sender<PollState>,
    event_tx: mpsc::UnboundedSender<ChangeEvent>,
    in_flight: AtomicBool,
    next_generation: AtomicU64,
    refresh: Arc<Notify>,
}

/// Clears the in-flight flag even if the poll future is dropped mid-fetch.
struct InFlight<'a> {
    poller: &'a LifecyclePoller,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.poller.in_flight.store(false, Ordering::SeqCst);
        self.poller.state_tx.send_if_modified(|s| {
            let was = s.is_refreshing;
            s.is_refreshing = false;
            was
        });
    }
}

impl LifecyclePoller {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        interval: Duration,
        event_tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(PollState::default());
        Self {
            store,
            interval,
            state_tx,
            event_tx,
            in_flight: AtomicBool::new(false),
            next_generation: AtomicU64::new(0),
            refresh: Arc::new(Notify::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state_tx.borrow().snapshot.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.state_tx.borrow().is_refreshing
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            notify: self.refresh.clone(),
        }
    }

    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    /// One fetch → diff → install cycle.
    pub async fn poll_once(&self) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("poll already in flight, skipping");
            return PollOutcome::Suppressed;
        }
        let _guard = InFlight { poller: self };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state_tx.send_modify(|s| s.is_refreshing = true);

        match self.store.fetch_documents().await {
            Ok(snapshot) => self.install(generation, snapshot),
            Err(e) => {
                if e.is_auth() {
                    warn!(error = %e, "marketplace rejected credentials, keeping previous snapshot");
                } else {
                    warn!(error = %e, "RFQ fetch failed, keeping previous snapshot");
                }
                let message = e.to_string();
                self.state_tx.send_modify(|s| s.last_error = Some(message));
                PollOutcome::Failed(e)
            }
        }
    }

    fn install(&self, generation: u64, snapshot: Snapshot) -> PollOutcome {
        let mut events = Vec::new();
        let installed = self.state_tx.send_if_modified(|state| {
            if generation <= state.generation {
                return false;
            }
            let previous = state.has_snapshot().then(|| state.snapshot.clone());
            if let Some(prev) = &previous {
                for regression in snapshot.regressions(prev) {
                    warn!(%regression, "RFQ lifecycle moved backwards");
                }
            }
            events = diff(previous.as_deref(), &snapshot);

            state.snapshot = Arc::new(snapshot);
            state.generation = generation;
            state.last_polled_at = Some(Utc::now());
            state.last_error = None;
            true
        });

        if !installed {
            debug!(generation, "discarding stale RFQ snapshot");
            return PollOutcome::Discarded;
        }

        let count = events.len();
        debug!(generation, events = count, "installed RFQ snapshot");
        for event in events {
            // Receiver gone just means nobody is listening for alerts.
            let _ = self.event_tx.send(event);
        }
        PollOutcome::Installed { events: count }
    }

    /// Poll on the timer and on refresh requests until `shutdown` turns true
    /// (or its sender is dropped). The first poll runs immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval_ms(self.interval), "RFQ poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => debug!("manual RFQ refresh"),
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            tokio::select! {
                outcome = self.poll_once() => {
                    if let PollOutcome::Installed { events } = outcome {
                        if events > 0 {
                            info!(events, "RFQ changes detected");
                        }
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!("RFQ poller stopped");
    }

    /// Start the poll loop in a background task.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Saturates instead of truncating very long periods.
fn interval_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeKind;
    use crate::rfq::tests::{doc, step};
    use crate::rfq::RfqStatus;
    use crate::store::{QuoteAck, QuoteDecision};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Serves queued responses; repeats the last successful snapshot when empty.
    struct FakeStore {
        responses: Mutex<VecDeque<Result<Snapshot, StoreError>>>,
        last: Mutex<Snapshot>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeStore {
        fn new(responses: Vec<Result<Snapshot, StoreError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(Snapshot::default()),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn fetch_documents(&self) -> Result<Snapshot, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(s)) => {
                    *self.last.lock().unwrap() = s.clone();
                    Ok(s)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }

        async fn quote_action(
            &self,
            _decision: QuoteDecision,
            _rfq_id: &str,
            _quote_id: &str,
        ) -> Result<QuoteAck, StoreError> {
            Ok(QuoteAck { success: true, error: None })
        }
    }

    fn poller(store: Arc<FakeStore>) -> (Arc<LifecyclePoller>, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let p = LifecyclePoller::new(store, Duration::from_secs(10), tx);
        (Arc::new(p), rx)
    }

    fn with_exit_proposal() -> Snapshot {
        let mut r1 = doc("r1", RfqStatus::Active);
        r1.settlement_steps.insert("exit_proposal".into(), step("T"));
        Snapshot::from_documents(vec![doc("f1", RfqStatus::Finished), r1])
    }

    #[tokio::test]
    async fn test_first_poll_installs_without_events() {
        let store = Arc::new(FakeStore::new(vec![Ok(Snapshot::from_documents(vec![
            doc("f1", RfqStatus::Finished),
            doc("r1", RfqStatus::Active),
        ]))]));
        let (p, mut rx) = poller(store);

        assert!(matches!(p.poll_once().await, PollOutcome::Installed { events: 0 }));
        let snap = p.snapshot();
        assert_eq!(snap.documents()[0].id, "r1");
        assert!(!p.is_refreshing());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_change_published_after_second_poll() {
        let store = Arc::new(FakeStore::new(vec![
            Ok(Snapshot::from_documents(vec![doc("f1", RfqStatus::Finished), doc("r1", RfqStatus::Active)])),
            Ok(with_exit_proposal()),
        ]));
        let (p, mut rx) = poller(store);

        p.poll_once().await;
        assert!(matches!(p.poll_once().await, PollOutcome::Installed { events: 1 }));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.rfq_id, "r1");
        assert_eq!(
            event.kind,
            ChangeKind::NewSettlementStep { steps: vec!["exit_proposal".into()] }
        );
    }

    #[tokio::test]
    async fn test_identical_polls_are_quiet_and_stable() {
        let store = Arc::new(FakeStore::new(vec![Ok(with_exit_proposal()), Ok(with_exit_proposal())]));
        let (p, mut rx) = poller(store);

        p.poll_once().await;
        let first: Vec<String> = p.snapshot().iter().map(|d| d.id.clone()).collect();
        assert!(matches!(p.poll_once().await, PollOutcome::Installed { events: 0 }));
        let second: Vec<String> = p.snapshot().iter().map(|d| d.id.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["r1", "f1"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_snapshot() {
        let store = Arc::new(FakeStore::new(vec![
            Ok(with_exit_proposal()),
            Err(StoreError::Auth { status: 401, body: "bad key".into() }),
            Err(StoreError::Transport("connection reset".into())),
        ]));
        let (p, _rx) = poller(store);
        let state = p.subscribe();

        p.poll_once().await;
        assert!(matches!(p.poll_once().await, PollOutcome::Failed(StoreError::Auth { .. })));
        assert!(matches!(p.poll_once().await, PollOutcome::Failed(StoreError::Transport(_))));

        let s = state.borrow().clone();
        assert_eq!(s.snapshot.len(), 2);
        assert_eq!(s.generation, 1);
        assert!(s.last_error.unwrap().contains("connection reset"));
        assert!(!s.is_refreshing);
    }

    #[tokio::test]
    async fn test_concurrent_poll_is_suppressed() {
        let gate = Arc::new(Notify::new());
        let mut store = FakeStore::new(vec![Ok(with_exit_proposal())]);
        store.gate = Some(gate.clone());
        let store = Arc::new(store);
        let (p, _rx) = poller(store.clone());

        let first = p.poll_once();
        let second = async {
            tokio::task::yield_now().await;
            let outcome = p.poll_once().await;
            assert!(p.is_refreshing());
            gate.notify_one();
            outcome
        };
        let (a, b) = tokio::join!(first, second);

        assert!(matches!(a, PollOutcome::Installed { .. }));
        assert!(matches!(b, PollOutcome::Suppressed));
        assert_eq!(store.calls(), 1);
        assert!(!p.is_refreshing());
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let store = Arc::new(FakeStore::new(vec![]));
        let (p, _rx) = poller(store);

        assert!(matches!(p.install(2, with_exit_proposal()), PollOutcome::Installed { .. }));
        assert!(matches!(p.install(1, Snapshot::default()), PollOutcome::Discarded));
        assert_eq!(p.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_and_manual_refresh() {
        let store = Arc::new(FakeStore::new(vec![Ok(with_exit_proposal())]));
        let (p, _rx) = poller(store.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = p.clone().start(stop_rx);

        // Ticks at 0s, 10s, 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(store.calls(), 3);

        p.refresh_handle().refresh_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.calls(), 4);

        // Manual refresh did not push the next tick back to 35s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.calls(), 5);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_interval_ms_saturates() {
        assert_eq!(interval_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(interval_ms(Duration::MAX), u64::MAX);
    }
}
