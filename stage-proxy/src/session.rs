use crate::client::StagingClient;
use crate::errors::StagingError;
use crate::observer::StagingObserver;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lazily creates and owns the remote staging session for this process.
///
/// The first caller of [`ensure`](SessionManager::ensure) triggers the
/// remote "start" call; callers arriving while creation is in flight are
/// parked on oneshot waiters and resolved together, so the remote service
/// never sees two concurrent "start" calls from one proxy. A failed
/// creation fails every parked waiter and resets to `Absent`, which lets
/// the next trigger retry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client: StagingClient,
    observer: Arc<dyn StagingObserver>,
    state: Mutex<SessionState>,
}

enum SessionState {
    Absent,
    Creating(Vec<oneshot::Sender<Result<String, StagingError>>>),
    Ready(String),
}

impl SessionManager {
    pub fn new(client: StagingClient, observer: Arc<dyn StagingObserver>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                observer,
                state: Mutex::new(SessionState::Absent),
            }),
        }
    }

    /// Session id once a session has been created; never triggers creation.
    pub fn session_id(&self) -> Option<String> {
        match &*self.inner.state.lock() {
            SessionState::Ready(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Return the session id, creating the remote session first if needed.
    ///
    /// At most one `create_session` call is in flight at any time; every
    /// concurrent caller observes the outcome of that single call.
    pub async fn ensure(&self) -> Result<String, StagingError> {
        let waiter = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                SessionState::Ready(id) => return Ok(id.clone()),
                SessionState::Creating(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                SessionState::Absent => {
                    *state = SessionState::Creating(Vec::new());
                    None
                }
            }
        };

        match waiter {
            Some(rx) => match rx.await {
                Ok(result) => result,
                // The creating task can only vanish if the runtime is
                // shutting down; surface it as a failed creation.
                Err(_) => Err(StagingError::Transport {
                    uri: String::new(),
                    message: "session creation was abandoned".to_string(),
                }),
            },
            None => self.create().await,
        }
    }

    async fn create(&self) -> Result<String, StagingError> {
        let profile_id = self.inner.client.profile_id().to_string();
        self.inner.observer.staging_create(&profile_id);

        let result = self.inner.client.create_session().await;

        let waiters = {
            let mut state = self.inner.state.lock();
            let waiters = match std::mem::replace(&mut *state, SessionState::Absent) {
                SessionState::Creating(waiters) => waiters,
                _ => Vec::new(),
            };
            if let Ok(id) = &result {
                *state = SessionState::Ready(id.clone());
            }
            waiters
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        match &result {
            Ok(id) => self.inner.observer.staging_succeeded(&profile_id, id),
            Err(error) => self.inner.observer.staging_failed(&profile_id, error),
        }

        result
    }
}
