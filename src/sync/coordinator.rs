use chrono::{DateTime, Utc};
use rocket::tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use rocket::tokio::{self, time};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::data::SharedTracker;
use crate::tracker::{RemoteOutcome, Snapshot};

use super::remote::{Remote, RestRemote};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote answered with status {0}")]
    Status(u16),
    #[error("invalid remote configuration: {0}")]
    Config(String),
    #[error("snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("upload queue is closed")]
    QueueClosed,
    #[error("local state unavailable: {0}")]
    Local(String),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    #[default]
    Offline,
    Online,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    pub pushes_sent: u64,
    pub pushes_failed: u64,
    pub polls_failed: u64,
    pub notifications: u64,
    pub last_error: Option<String>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// Running counters of what the sync tasks did, for the status endpoint.
#[derive(Debug, Default)]
pub struct SyncStatus {
    report: Mutex<SyncReport>,
}

impl SyncStatus {
    pub fn new(mode: SyncMode) -> SyncStatus {
        SyncStatus {
            report: Mutex::new(SyncReport {
                mode,
                ..SyncReport::default()
            }),
        }
    }

    pub fn report(&self) -> SyncReport {
        self.update(|report| report.clone())
    }

    pub fn record_push(&self, result: &Result<(), SyncError>) {
        self.update(|report| match result {
            Ok(()) => {
                report.pushes_sent += 1;
                report.last_push_at = Some(Utc::now());
            }
            Err(e) => {
                report.pushes_failed += 1;
                report.last_error = Some(e.to_string());
            }
        })
    }

    pub fn record_poll<T>(&self, result: &Result<Option<T>, SyncError>) {
        self.update(|report| match result {
            Ok(notified) => {
                report.last_poll_at = Some(Utc::now());
                if notified.is_some() {
                    report.notifications += 1;
                }
            }
            Err(e) => {
                report.polls_failed += 1;
                report.last_error = Some(e.to_string());
            }
        })
    }

    fn update<R>(&self, f: impl FnOnce(&mut SyncReport) -> R) -> R {
        let mut report = self.report.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut report)
    }
}

/// Bookkeeping shared by the tracker's handle, the uploader and the
/// watcher, so the watcher can tell our own writes from other devices'.
#[derive(Debug, Default)]
pub struct PushLedger {
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    queued: u64,
    settled: u64,
    last_own: Option<Value>,
}

impl PushLedger {
    fn queued(&self) {
        self.update(|state| state.queued += 1)
    }

    /// One queued push finished; `document` is what reached the remote, if
    /// the write succeeded.
    fn settled(&self, document: Option<Value>) {
        self.update(|state| {
            state.settled += 1;
            if document.is_some() {
                state.last_own = document;
            }
        })
    }

    /// A mark to compare against after a fetch, or `None` while pushes are
    /// still queued or in flight.
    fn idle_mark(&self) -> Option<u64> {
        self.update(|state| (state.settled >= state.queued).then_some(state.queued))
    }

    /// Whether nothing was queued since `mark` was taken and nothing is
    /// pending, i.e. a document fetched in between is not older than our
    /// own latest write.
    fn still_idle(&self, mark: u64) -> bool {
        self.update(|state| state.queued == mark && state.settled >= state.queued)
    }

    fn is_own(&self, document: &Value) -> bool {
        self.update(|state| state.last_own.as_ref() == Some(document))
    }

    fn update<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

/// The tracker's side of the sync link: hands snapshots to the uploader.
#[derive(Debug, Clone)]
pub enum SyncHandle {
    Offline,
    Online {
        outbox: UnboundedSender<Snapshot>,
        ledger: Arc<PushLedger>,
    },
}

impl SyncHandle {
    pub fn online(outbox: UnboundedSender<Snapshot>, ledger: Arc<PushLedger>) -> SyncHandle {
        SyncHandle::Online { outbox, ledger }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, SyncHandle::Online { .. })
    }

    /// Queues `snapshot` for upload. Offline this does nothing.
    pub fn push(&self, snapshot: Snapshot) -> Result<(), SyncError> {
        let SyncHandle::Online { outbox, ledger } = self else {
            return Ok(());
        };

        ledger.queued();
        outbox.send(snapshot).map_err(|_| {
            ledger.settled(None);
            SyncError::QueueClosed
        })
    }
}

struct Worker {
    remote: Arc<dyn Remote>,
    outbox: UnboundedReceiver<Snapshot>,
    ledger: Arc<PushLedger>,
    interval: Duration,
}

/// A connected (or deliberately offline) coordinator, waiting for the
/// tracker to exist before its background tasks are started.
pub struct SyncLink {
    handle: SyncHandle,
    status: Arc<SyncStatus>,
    worker: Option<Worker>,
}

impl SyncLink {
    pub fn connect(config: Option<&RemoteConfig>) -> SyncLink {
        let Some(config) = config else {
            tracing::info!("no remote configured, running offline");
            return SyncLink::offline();
        };

        match RestRemote::new(config) {
            Ok(remote) => {
                tracing::info!(path = %config.path, "remote sync enabled");
                SyncLink::online(Arc::new(remote), config.poll_interval())
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote sync unavailable, running offline");
                SyncLink::offline()
            }
        }
    }

    pub fn offline() -> SyncLink {
        SyncLink {
            handle: SyncHandle::Offline,
            status: Arc::new(SyncStatus::new(SyncMode::Offline)),
            worker: None,
        }
    }

    pub fn online(remote: Arc<dyn Remote>, interval: Duration) -> SyncLink {
        let (sender, outbox) = mpsc::unbounded_channel();
        let ledger = Arc::new(PushLedger::default());

        SyncLink {
            handle: SyncHandle::online(sender, ledger.clone()),
            status: Arc::new(SyncStatus::new(SyncMode::Online)),
            worker: Some(Worker {
                remote,
                outbox,
                ledger,
                interval,
            }),
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> Arc<SyncStatus> {
        self.status.clone()
    }

    /// Starts the uploader and the watcher. Must run inside the runtime.
    pub fn spawn(self, tracker: SharedTracker) {
        let Some(worker) = self.worker else {
            return;
        };

        let watcher = Watcher::new(worker.ledger.clone());
        tokio::spawn(upload(
            worker.remote.clone(),
            worker.outbox,
            worker.ledger,
            self.status.clone(),
        ));
        tokio::spawn(watch(worker.remote, tracker, watcher, self.status, worker.interval));
    }
}

/// Overwrites the remote with `snapshot`, returning the document written.
pub async fn push_snapshot(remote: &dyn Remote, snapshot: &Snapshot) -> Result<Value, SyncError> {
    let document = serde_json::to_value(snapshot)?;
    remote.put(&document).await?;
    Ok(document)
}

/// Writes queued snapshots one at a time, in the order they were queued.
pub async fn upload(
    remote: Arc<dyn Remote>,
    mut outbox: UnboundedReceiver<Snapshot>,
    ledger: Arc<PushLedger>,
    status: Arc<SyncStatus>,
) {
    while let Some(snapshot) = outbox.recv().await {
        upload_one(remote.as_ref(), &snapshot, &ledger, &status).await;
    }

    tracing::debug!("upload queue closed");
}

async fn upload_one(remote: &dyn Remote, snapshot: &Snapshot, ledger: &PushLedger, status: &SyncStatus) {
    let result = push_snapshot(remote, snapshot).await;
    match result {
        Ok(document) => {
            ledger.settled(Some(document));
            status.record_push(&Ok(()));
        }
        Err(e) => {
            tracing::warn!(error = %e, "push to remote failed");
            ledger.settled(None);
            status.record_push(&Err(e));
        }
    }
}

pub async fn watch(
    remote: Arc<dyn Remote>,
    tracker: SharedTracker,
    mut watcher: Watcher,
    status: Arc<SyncStatus>,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let result = watcher.poll(remote.as_ref(), &tracker).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "polling remote failed");
        }
        status.record_poll(&result);
    }
}

/// Turns successive fetches of the remote document into change
/// notifications.
///
/// A document is only delivered when it is new to the watcher, is not a
/// copy of our own latest upload, and no local push was pending while it
/// was fetched. Anything older than our own writes would otherwise roll
/// local edits back.
#[derive(Debug, Default)]
pub struct Watcher {
    ledger: Arc<PushLedger>,
    last_seen: Option<Option<Value>>,
}

impl Watcher {
    pub fn new(ledger: Arc<PushLedger>) -> Watcher {
        Watcher {
            ledger,
            last_seen: None,
        }
    }

    pub async fn poll(
        &mut self,
        remote: &dyn Remote,
        tracker: &SharedTracker,
    ) -> Result<Option<RemoteOutcome>, SyncError> {
        let mark = self.ledger.idle_mark();
        let document = remote.fetch().await?;
        if self.last_seen.as_ref() == Some(&document) {
            return Ok(None);
        }

        if document.as_ref().map_or(false, |d| self.ledger.is_own(d)) {
            tracing::trace!("remote holds our own latest upload");
            self.last_seen = Some(document);
            return Ok(None);
        }

        let Some(mark) = mark else {
            tracing::debug!("local pushes pending, deferring remote document");
            return Ok(None);
        };

        let outcome = deliver(tracker, document.as_ref(), &self.ledger, mark)?;
        if outcome.is_some() {
            self.last_seen = Some(document);
        }

        Ok(outcome)
    }
}

fn deliver(
    tracker: &SharedTracker,
    document: Option<&Value>,
    ledger: &PushLedger,
    mark: u64,
) -> Result<Option<RemoteOutcome>, SyncError> {
    let mut tracker = tracker
        .lock()
        .map_err(|e| SyncError::Local(e.to_string()))?;

    // Mutations queue their push while holding the tracker lock, so this
    // check cannot race with a new local edit.
    if !ledger.still_idle(mark) {
        tracing::debug!("local edit while fetching, deferring remote document");
        return Ok(None);
    }

    tracker
        .receive_remote(document)
        .map(Some)
        .map_err(|e| SyncError::Local(e.to_string()))
}
