use crate::client::{StagingClient, upload_uri};
use crate::errors::StagingError;
use crate::observer::StagingObserver;
use crate::session::SessionManager;
use crate::store::ResourceStore;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;

/// How many error strings the status summary retains.
const LAST_ERRORS_KEPT: usize = 16;

/// Per-path replication driver.
///
/// Guarantees at most one in-flight remote upload per path, always uploads
/// the freshest content once an in-flight attempt finishes, retries failed
/// attempts up to the configured bound, and reports terminal outcomes
/// through the observer. The number of remote PUTs never exceeds the number
/// of local writes.
#[derive(Clone)]
pub struct UploadCoalescer {
    inner: Arc<Inner>,
}

struct Inner {
    store: ResourceStore,
    sessions: SessionManager,
    client: StagingClient,
    observer: Arc<dyn StagingObserver>,
    /// Admission control towards the staging service.
    uploads: Semaphore,
    /// Maximum upload attempts per cycle before declaring permanent failure.
    max_retries: u32,
    uploaded: AtomicU64,
    failed: AtomicU64,
    states: Mutex<HashMap<String, PathState>>,
    last_errors: Mutex<VecDeque<String>>,
}

/// Upload state of a single path.
///
/// `Uploading` means an attempt is in flight and the stored content has not
/// changed since the attempt's snapshot was taken; `UploadingStale` means
/// the content has changed and must be re-sent once the in-flight attempt
/// finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UploadFsm {
    Idle,
    Uploading,
    UploadingStale,
}

struct PathState {
    fsm: UploadFsm,
    /// Local content differs from what has been durably uploaded (or no
    /// successful upload has happened yet).
    dirty: bool,
}

/// Snapshot of replication progress, rendered as JSON by `GET /stage`.
#[derive(Debug, Serialize)]
pub struct StageStatus {
    pub session_id: Option<String>,
    pub uploaded: u64,
    pub failed: u64,
    pub pending: usize,
    pub active: bool,
    pub last_errors: Vec<String>,
}

impl UploadCoalescer {
    pub fn new(
        store: ResourceStore,
        sessions: SessionManager,
        client: StagingClient,
        observer: Arc<dyn StagingObserver>,
        max_retries: u32,
        max_connections: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sessions,
                client,
                observer,
                uploads: Semaphore::new(max_connections),
                max_retries,
                uploaded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                states: Mutex::new(HashMap::new()),
                last_errors: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// React to a local write to `path`.
    ///
    /// Idle paths start an upload cycle with the current content. Paths
    /// with an attempt in flight are only marked stale; the running cycle
    /// picks the new content up when the attempt completes, so no second
    /// attempt ever races the first.
    pub fn resource_written(&self, path: &str) {
        let spawn = {
            let mut states = self.inner.states.lock();
            let entry = states.entry(path.to_string()).or_insert(PathState {
                fsm: UploadFsm::Idle,
                dirty: false,
            });
            entry.dirty = true;
            match entry.fsm {
                UploadFsm::Idle => {
                    entry.fsm = UploadFsm::Uploading;
                    true
                }
                UploadFsm::Uploading => {
                    entry.fsm = UploadFsm::UploadingStale;
                    false
                }
                UploadFsm::UploadingStale => false,
            }
        };

        if spawn {
            self.spawn_cycle(path.to_string());
        }
    }

    /// Start an explicit staging run: re-trigger the upload cycle for every
    /// dirty path that is currently idle (typically ones parked by a
    /// permanent failure). Returns how many cycles were started.
    pub fn stage_all(&self) -> usize {
        let mut triggered = Vec::new();
        {
            let mut states = self.inner.states.lock();
            for path in self.inner.store.paths() {
                if let Some(entry) = states.get_mut(&path)
                    && entry.dirty
                    && entry.fsm == UploadFsm::Idle
                {
                    entry.fsm = UploadFsm::Uploading;
                    triggered.push(path);
                }
            }
        }

        let count = triggered.len();
        for path in triggered {
            self.spawn_cycle(path);
        }
        count
    }

    /// Whether any path currently has an attempt in flight.
    pub fn is_active(&self) -> bool {
        self.inner
            .states
            .lock()
            .values()
            .any(|entry| entry.fsm != UploadFsm::Idle)
    }

    pub fn status(&self) -> StageStatus {
        let pending = self
            .inner
            .states
            .lock()
            .values()
            .filter(|entry| entry.fsm != UploadFsm::Idle)
            .count();

        StageStatus {
            session_id: self.inner.sessions.session_id(),
            uploaded: self.inner.uploaded.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            pending,
            active: pending > 0,
            last_errors: self.inner.last_errors.lock().iter().cloned().collect(),
        }
    }

    fn spawn_cycle(&self, path: String) {
        let inner = self.inner.clone();
        tokio::spawn(run_cycles(inner, path));
    }
}

/// Drive upload cycles for one path until it settles back to idle.
///
/// One loop iteration per cycle: snapshot the current content, upload it
/// with retries, then decide under the state lock whether a newer write
/// superseded the snapshot. Exactly one such task exists per non-idle path;
/// the task only exits after writing `Idle` back, and writes only spawn a
/// task on the `Idle` to `Uploading` transition.
async fn run_cycles(inner: Arc<Inner>, path: String) {
    loop {
        let Some(snapshot) = inner.store.read(&path) else {
            // Cycles are only started for written paths and entries are
            // never removed, so this is unreachable; settle the state
            // machine rather than unwinding.
            inner.settle(&path);
            return;
        };

        let outcome = inner.upload_with_retries(&path, snapshot).await;

        let superseded = {
            let mut states = inner.states.lock();
            let Some(entry) = states.get_mut(&path) else {
                return;
            };
            match outcome {
                // Superseded mid-flight: go again with whatever content is
                // stored now.
                Ok(()) if entry.fsm == UploadFsm::UploadingStale => {
                    entry.fsm = UploadFsm::Uploading;
                    true
                }
                Ok(()) => {
                    entry.dirty = false;
                    entry.fsm = UploadFsm::Idle;
                    false
                }
                Err(_) => {
                    // Retry bound exhausted. The path stays dirty and is
                    // only retried once a fresh local write (or an explicit
                    // staging run) arrives.
                    entry.fsm = UploadFsm::Idle;
                    false
                }
            }
        };

        if !superseded {
            return;
        }
    }
}

impl Inner {
    /// One upload cycle: issue the same content snapshot until it succeeds
    /// or the retry bound is exhausted.
    async fn upload_with_retries(
        &self,
        path: &str,
        snapshot: Bytes,
    ) -> Result<(), StagingError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.attempt(path, snapshot.clone()).await {
                Ok(()) => {
                    self.uploaded.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(error) => {
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    self.record_error(&error);
                    if attempts >= self.max_retries {
                        self.observer
                            .resource_abandoned(&self.remote_uri(path), &error);
                        return Err(error);
                    }
                }
            }
        }
    }

    /// A single request/response cycle for one content snapshot.
    async fn attempt(&self, path: &str, snapshot: Bytes) -> Result<(), StagingError> {
        // A failed bootstrap fails this attempt and consumes retry budget;
        // the session manager has already reset itself, so the next attempt
        // re-runs the bootstrap.
        let session_id = match self.sessions.ensure().await {
            Ok(id) => id,
            Err(error) => {
                self.observer.resource_failed(path, &error);
                return Err(error);
            }
        };

        let uri = upload_uri(&session_id, path);

        let Ok(_permit) = self.uploads.acquire().await else {
            let error = StagingError::Transport {
                uri: uri.clone(),
                message: "upload pool closed".to_string(),
            };
            self.observer.resource_failed(&uri, &error);
            return Err(error);
        };

        self.observer.resource_create(&uri);
        match self.client.upload_resource(&session_id, path, snapshot).await {
            Ok(()) => {
                self.observer.resource_succeeded(&uri);
                Ok(())
            }
            Err(error) => {
                self.observer.resource_failed(&uri, &error);
                Err(error)
            }
        }
    }

    fn remote_uri(&self, path: &str) -> String {
        match self.sessions.session_id() {
            Some(session_id) => upload_uri(&session_id, path),
            None => path.to_string(),
        }
    }

    fn record_error(&self, error: &StagingError) {
        let mut last_errors = self.last_errors.lock();
        if last_errors.len() == LAST_ERRORS_KEPT {
            last_errors.pop_front();
        }
        last_errors.push_back(error.to_string());
    }

    fn settle(&self, path: &str) {
        if let Some(entry) = self.states.lock().get_mut(path) {
            entry.fsm = UploadFsm::Idle;
        }
    }
}
