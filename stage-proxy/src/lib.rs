pub mod client;
pub mod coalescer;
pub mod config;
pub mod errors;
pub mod observer;
pub mod service;
pub mod session;
pub mod store;
#[cfg(test)]
mod testutils;

use crate::client::StagingClient;
use crate::coalescer::{StageStatus, UploadCoalescer};
use crate::config::{Config, StagingConfig};
use crate::errors::ProxyError;
use crate::observer::{LogObserver, StagingObserver};
use crate::service::ProxyService;
use crate::session::SessionManager;
use crate::store::ResourceStore;
use bytes::Bytes;
use std::sync::Arc;

/// Handle over the proxy's components: the resource store, the session
/// manager and the upload coalescer. Cheap to clone; all clones share
/// state.
#[derive(Clone)]
pub struct Proxy {
    store: ResourceStore,
    coalescer: UploadCoalescer,
}

impl Proxy {
    pub fn new(staging: &StagingConfig) -> Self {
        Self::with_observer(staging, Arc::new(LogObserver))
    }

    pub fn with_observer(staging: &StagingConfig, observer: Arc<dyn StagingObserver>) -> Self {
        let store = ResourceStore::new();
        let client = StagingClient::new(staging);
        let sessions = SessionManager::new(client.clone(), observer.clone());
        let coalescer = UploadCoalescer::new(
            store.clone(),
            sessions,
            client,
            observer,
            staging.max_retries,
            staging.max_connections,
        );

        Self { store, coalescer }
    }

    /// Buffer `content` at `path` and schedule its replication. Returns
    /// immediately; replication happens in the background.
    pub fn write(&self, path: &str, content: Bytes) {
        self.store.write(path, content);
        self.coalescer.resource_written(path);
    }

    /// Last locally written content for `path`, never touching the network.
    pub fn read(&self, path: &str) -> Option<Bytes> {
        self.store.read(path)
    }

    pub fn status(&self) -> StageStatus {
        self.coalescer.status()
    }

    pub fn is_staging_active(&self) -> bool {
        self.coalescer.is_active()
    }

    /// Re-trigger replication for every dirty path that is currently idle.
    pub fn stage_all(&self) -> usize {
        self.coalescer.stage_all()
    }
}

/// Run the proxy until the listener fails.
pub async fn run(config: Config) -> Result<(), ProxyError> {
    let proxy = Proxy::new(&config.staging);
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        profile_id = %config.staging.profile_id,
        "staging proxy listening"
    );
    shared::http::run_http_service(
        &config.listener.host,
        config.listener.port,
        ProxyService::new(proxy),
    )
    .await
}
