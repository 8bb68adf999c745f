//! The sync coordinator: schedules cycles and reports status.
//!
//! The coordinator wraps a [`Reconciler`] with a small state machine
//! (idle, syncing, error, offline), single-flight enforcement, periodic
//! triggering, and a connectivity hook that forces an immediate cycle
//! on reconnect.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::reconcile::{CycleReport, Reconciler};
use crate::store::LocalStore;
use crate::transport::Authority;
use crate::{now_millis, Timestamp, Version};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Caught up, waiting for the next trigger
    Idle,
    /// A cycle is in flight
    Syncing,
    /// The last cycle produced a user-visible issue
    Error,
    /// The device reported itself offline; no cycles run
    Offline,
}

/// A point-in-time view of the engine, published over a watch channel
/// so UIs can subscribe instead of polling.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub state: SyncState,
    /// When the last clean cycle finished, milliseconds since the epoch
    pub last_synced_at: Option<Timestamp>,
    /// The first visible issue from the last cycle, for display
    pub last_error: Option<String>,
    pub watermark: Version,
    /// Change log entries still waiting to reach the authority
    pub pending: usize,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            last_synced_at: None,
            last_error: None,
            watermark: 0,
            pending: 0,
        }
    }
}

/// Reports connectivity transitions to the coordinator.
///
/// `next_change` resolves with `true` when the device comes online,
/// `false` when it goes offline, and `None` when the source is closed
/// (which stops the run loop).
#[async_trait]
pub trait Connectivity: Send {
    async fn next_change(&mut self) -> Option<bool>;
}

/// A connectivity source that never reports a transition. The run loop
/// relies on the periodic timer alone.
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn next_change(&mut self) -> Option<bool> {
        std::future::pending().await
    }
}

/// Connectivity fed over a channel, for platforms that surface network
/// reachability as events.
pub struct ChannelConnectivity(pub mpsc::Receiver<bool>);

#[async_trait]
impl Connectivity for ChannelConnectivity {
    async fn next_change(&mut self) -> Option<bool> {
        self.0.recv().await
    }
}

/// Drives the reconciler on a schedule and exposes engine status.
pub struct SyncCoordinator<S, A> {
    reconciler: Reconciler<S, A>,
    store: Arc<S>,
    authority: Arc<A>,
    config: SyncConfig,
    offline: AtomicBool,
    // try_lock on this gives single-flight without queueing triggers
    in_flight: Mutex<()>,
    status: watch::Sender<SyncStatus>,
}

impl<S: LocalStore + 'static, A: Authority + 'static> SyncCoordinator<S, A> {
    pub fn new(store: Arc<S>, authority: Arc<A>, config: SyncConfig) -> Self {
        let reconciler = Reconciler::new(store.clone(), authority.clone(), config.clone());
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            reconciler,
            store,
            authority,
            config,
            offline: AtomicBool::new(false),
            in_flight: Mutex::new(()),
            status,
        }
    }

    /// The current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status updates.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Run one cycle now, unless offline or one is already in flight.
    /// Returns the report when a cycle actually ran.
    pub async fn sync_now(&self) -> Option<CycleReport> {
        if self.offline.load(Ordering::SeqCst) {
            tracing::debug!("sync skipped: offline");
            return None;
        }
        // A trigger that arrives mid-cycle is dropped, not queued; the
        // running cycle already covers its work.
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("sync skipped: cycle already in flight");
            return None;
        };

        self.status.send_modify(|s| s.state = SyncState::Syncing);
        let report = self.reconciler.run_cycle().await;
        self.publish_outcome(&report).await;
        Some(report)
    }

    /// Clear the failed flag on stuck change log entries and run a
    /// cycle so they are attempted again.
    pub async fn retry_failed(&self) -> Result<Option<CycleReport>> {
        let retried = self.store.retry_failed().await?;
        tracing::info!(retried, "retrying failed changes");
        Ok(self.sync_now().await)
    }

    /// Mark the device offline. In-flight work is not interrupted, but
    /// no new cycles start until [`set_online`](Self::set_online).
    pub fn set_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
        self.status.send_modify(|s| s.state = SyncState::Offline);
        tracing::info!("sync paused: offline");
    }

    /// Mark the device online again. The caller decides whether to
    /// trigger an immediate cycle (the run loop does).
    pub fn set_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
        self.status.send_modify(|s| {
            if s.state == SyncState::Offline {
                s.state = SyncState::Idle;
            }
        });
    }

    async fn publish_outcome(&self, report: &CycleReport) {
        let pending = match self.store.pending_changes().await {
            Ok(entries) => entries.len(),
            Err(_) => self.status.borrow().pending,
        };
        let offline = self.offline.load(Ordering::SeqCst);
        self.status.send_modify(|s| {
            s.watermark = report.watermark;
            s.pending = pending;
            if report.is_clean() {
                s.last_synced_at = Some(now_millis());
                s.last_error = None;
                s.state = if offline {
                    SyncState::Offline
                } else {
                    SyncState::Idle
                };
            } else {
                s.last_error = report.first_visible().map(|i| i.message.clone());
                // connectivity loss mid-cycle outranks the cycle outcome
                s.state = if offline {
                    SyncState::Offline
                } else {
                    SyncState::Error
                };
            }
        });
    }

    /// Run the coordinator until the connectivity source closes.
    ///
    /// Waits for the authority to pass a health check before the first
    /// cycle, then syncs on a fixed interval and immediately on
    /// reconnect. Intended to be spawned:
    ///
    /// ```ignore
    /// tokio::spawn(coordinator.clone().run(AlwaysOnline));
    /// ```
    pub async fn run<C: Connectivity>(self: Arc<Self>, mut connectivity: C) {
        self.await_healthy(&mut connectivity).await;

        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sync_now().await;
                }
                change = connectivity.next_change() => match change {
                    Some(true) => {
                        self.set_online();
                        self.sync_now().await;
                    }
                    Some(false) => self.set_offline(),
                    None => {
                        tracing::debug!("connectivity source closed, stopping");
                        return;
                    }
                },
            }
        }
    }

    /// Block automatic syncing until the authority answers a health
    /// check, so a client started before its backend does not burn
    /// retry budget on change log entries.
    async fn await_healthy<C: Connectivity>(&self, connectivity: &mut C) {
        let mut delay = std::time::Duration::from_secs(1);
        loop {
            if self.offline.load(Ordering::SeqCst) {
                match connectivity.next_change().await {
                    Some(true) => self.set_online(),
                    Some(false) => continue,
                    None => return,
                }
            }
            match self.authority.health().await {
                Ok(()) => return,
                Err(err) => {
                    tracing::debug!(error = %err, "authority not reachable yet");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                change = connectivity.next_change() => match change {
                    Some(true) => self.set_online(),
                    Some(false) => self.set_offline(),
                    None => return,
                },
            }
            delay = (delay * 2).min(self.config.sync_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeOp;
    use crate::store::MemoryStore;
    use crate::testing::MockAuthority;
    use crate::{Conversation, Entity, SyncError};
    use std::time::Duration;

    fn coordinator(
        store: Arc<MemoryStore>,
        authority: Arc<MockAuthority>,
    ) -> SyncCoordinator<MemoryStore, MockAuthority> {
        let mut config = SyncConfig::new("device-1");
        config.sync_interval = Duration::from_millis(50);
        config.max_attempts = 2;
        SyncCoordinator::new(store, authority, config)
    }

    fn conv(id: &str, title: &str) -> Entity {
        Entity::from(Conversation::new(id, title, 1000))
    }

    #[tokio::test]
    async fn clean_cycle_lands_in_idle() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        let coord = coordinator(store.clone(), authority.clone());

        store
            .stage_upsert(conv("c1", "Trip"), ChangeOp::Create)
            .await
            .unwrap();

        let report = coord.sync_now().await.unwrap();
        assert!(report.is_clean());

        let status = coord.status();
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_synced_at.is_some());
        assert_eq!(status.last_error, None);
        assert_eq!(status.pending, 0);
        assert_eq!(status.watermark, 1);
    }

    #[tokio::test]
    async fn visible_issue_lands_in_error() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        let coord = coordinator(store.clone(), authority.clone());

        store
            .stage_upsert(conv("c1", "Trip"), ChangeOp::Create)
            .await
            .unwrap();
        authority
            .set_fail_push(Some(SyncError::Rejected {
                status: 400,
                message: "bad request".into(),
            }))
            .await;

        coord.sync_now().await.unwrap();

        let status = coord.status();
        assert_eq!(status.state, SyncState::Error);
        assert!(status.last_error.as_deref().unwrap().contains("bad request"));
        assert_eq!(status.pending, 1);
    }

    #[tokio::test]
    async fn offline_blocks_cycles() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        let coord = coordinator(store.clone(), authority.clone());

        coord.set_offline();
        assert_eq!(coord.status().state, SyncState::Offline);
        assert!(coord.sync_now().await.is_none());
        assert_eq!(authority.pull_calls.load(Ordering::SeqCst), 0);

        coord.set_online();
        assert_eq!(coord.status().state, SyncState::Idle);
        assert!(coord.sync_now().await.is_some());
    }

    #[tokio::test]
    async fn going_offline_mid_cycle_outranks_error() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        authority.set_latency(Duration::from_millis(50)).await;
        authority
            .set_fail_push(Some(SyncError::Rejected {
                status: 422,
                message: "nope".into(),
            }))
            .await;
        let coord = Arc::new(coordinator(store.clone(), authority.clone()));

        store
            .stage_upsert(conv("c1", "Trip"), ChangeOp::Create)
            .await
            .unwrap();

        let cycle = tokio::spawn({
            let coord = coord.clone();
            async move { coord.sync_now().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord.set_offline();
        let report = cycle.await.unwrap().unwrap();
        assert!(!report.is_clean());

        let status = coord.status();
        assert_eq!(status.state, SyncState::Offline);
        // the failure is still recorded for when the device comes back
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn concurrent_triggers_run_one_cycle() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        authority.set_latency(Duration::from_millis(50)).await;
        let coord = Arc::new(coordinator(store, authority.clone()));

        let a = tokio::spawn({
            let coord = coord.clone();
            async move { coord.sync_now().await }
        });
        // give the first trigger time to take the lock
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = coord.sync_now().await;

        assert!(a.await.unwrap().is_some());
        assert!(b.is_none());
        assert_eq!(authority.pull_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_failed_resyncs_stuck_entries() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        let coord = coordinator(store.clone(), authority.clone());

        store
            .stage_upsert(conv("c1", "Trip"), ChangeOp::Create)
            .await
            .unwrap();
        authority
            .set_fail_push(Some(SyncError::Rejected {
                status: 422,
                message: "nope".into(),
            }))
            .await;
        coord.sync_now().await.unwrap();
        assert_eq!(coord.status().state, SyncState::Error);

        authority.set_fail_push(None).await;
        let report = coord.retry_failed().await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(coord.status().state, SyncState::Idle);
        assert_eq!(coord.status().pending, 0);
    }

    #[tokio::test]
    async fn reconnect_triggers_immediate_cycle() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        authority.seed(conv("c1", "Trip")).await;
        let coord = Arc::new(coordinator(store.clone(), authority.clone()));

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(coord.clone().run(ChannelConnectivity(rx)));

        let mut status = coord.subscribe();
        // first tick of the interval fires immediately after the health gate
        status
            .wait_for(|s| s.watermark == 1)
            .await
            .unwrap();

        tx.send(false).await.unwrap();
        status
            .wait_for(|s| s.state == SyncState::Offline)
            .await
            .unwrap();

        authority.seed(conv("c2", "Plans")).await;
        tx.send(true).await.unwrap();
        status
            .wait_for(|s| s.watermark == 2)
            .await
            .unwrap();

        drop(tx);
        handle.await.unwrap();
        assert!(store
            .get(crate::EntityType::Conversation, "c2")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn status_updates_reach_subscribers() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(MockAuthority::new());
        authority.seed(conv("c1", "Trip")).await;
        let coord = coordinator(store, authority);

        let mut rx = coord.subscribe();
        coord.sync_now().await.unwrap();

        rx.changed().await.unwrap();
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.watermark, 1);
    }
}
