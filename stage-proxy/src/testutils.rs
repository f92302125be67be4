use crate::config::StagingConfig;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

const PROFILES_PREFIX: &str = "/service/local/staging/profiles/";
const DEPLOY_PREFIX: &str = "/service/local/staging/deployByRepositoryId/";

/// Poll `condition` until it holds, panicking after ten seconds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

/// In-process staging service double.
///
/// Speaks just enough of the staging protocol for the proxy: `POST
/// {profiles}/{id}/start` answers 201 with a session id payload, `PUT
/// {deploy}/{session}/{path}` records the uploaded body. Both can be
/// scripted to fail a number of upcoming requests with a 500, and to delay
/// their responses so tests can land writes mid-flight.
#[derive(Clone)]
pub struct MockStagingServer {
    port: u16,
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    create_calls: AtomicUsize,
    put_calls: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_puts: AtomicUsize,
    session_seq: AtomicUsize,
    omit_session_id: AtomicUsize,
    create_delay: Mutex<Duration>,
    put_delay: Mutex<Duration>,
    /// Successfully uploaded bodies per path, oldest first.
    versions: Mutex<HashMap<String, Vec<Bytes>>>,
    last_headers: Mutex<HashMap<String, String>>,
}

impl MockStagingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock staging server");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(MockState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let io = TokioIo::new(stream);
                let conn_state = accept_state.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(conn_state.clone(), req));
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        Self { port, state }
    }

    /// Staging config pointing the proxy at this mock.
    pub fn staging_config(&self) -> StagingConfig {
        StagingConfig {
            url: url::Url::parse(&format!("http://127.0.0.1:{}", self.port)).expect("mock url"),
            profile_id: "my_profile".to_string(),
            username: "deployer".to_string(),
            password: "hunter2".to_string(),
            max_retries: 8,
            max_connections: 1,
        }
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.state.put_calls.load(Ordering::SeqCst)
    }

    /// Reject the next `n` session creations with a 500. Pass 0 to clear.
    pub fn fail_next_creates(&self, n: usize) {
        self.state.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` uploads with a 500. Pass 0 to clear.
    pub fn fail_next_puts(&self, n: usize) {
        self.state.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Answer the next creation with 201 but no session id in the body.
    pub fn respond_created_without_session_id(&self) {
        self.state.omit_session_id.store(1, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.state.create_delay.lock() = delay;
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.state.put_delay.lock() = delay;
    }

    /// Successfully uploaded bodies for `path` (leading slash), oldest first.
    pub fn versions(&self, path: &str) -> Vec<Bytes> {
        self.state
            .versions
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Headers of the most recent request, lowercase names.
    pub fn last_headers(&self) -> HashMap<String, String> {
        self.state.last_headers.lock().clone()
    }
}

async fn handle(
    state: Arc<MockState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    {
        let mut headers = state.last_headers.lock();
        headers.clear();
        for (name, value) in req.headers() {
            headers.insert(
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            );
        }
    }

    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    if method == Method::POST
        && path.starts_with(PROFILES_PREFIX)
        && path.ends_with("/start")
    {
        state.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *state.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&state.fail_creates) {
            return Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
        if state.omit_session_id.swap(0, Ordering::SeqCst) > 0 {
            let mut response = status_response(StatusCode::CREATED);
            *response.body_mut() = Full::new(Bytes::from_static(b"<promoteResponse/>"));
            return Ok(response);
        }
        let session_id = format!(
            "test-{}",
            1000 + state.session_seq.fetch_add(1, Ordering::SeqCst)
        );
        let payload = format!(
            "<promoteResponse><data><stagedRepositoryId>{session_id}</stagedRepositoryId></data></promoteResponse>"
        );
        let mut response = status_response(StatusCode::CREATED);
        *response.body_mut() = Full::new(Bytes::from(payload));
        return Ok(response);
    }

    if method == Method::PUT
        && let Some(rest) = path.strip_prefix(DEPLOY_PREFIX)
        && let Some((_session_id, resource_path)) = rest.split_once('/')
    {
        state.put_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *state.put_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&state.fail_puts) {
            return Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
        state
            .versions
            .lock()
            .entry(format!("/{resource_path}"))
            .or_default()
            .push(body);
        return Ok(status_response(StatusCode::CREATED));
    }

    Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
