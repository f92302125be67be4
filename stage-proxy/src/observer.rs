use crate::errors::StagingError;

/// Notification surface for session and upload lifecycle events.
///
/// Every hook defaults to a no-op so callers compose only the hooks they
/// need; running without a listener never changes proxy behavior.
#[allow(unused_variables)]
pub trait StagingObserver: Send + Sync {
    /// A session creation request is about to be issued.
    fn staging_create(&self, profile_id: &str) {}

    /// The remote service issued a session id.
    fn staging_succeeded(&self, profile_id: &str, session_id: &str) {}

    /// Session creation failed; a later trigger will retry it.
    fn staging_failed(&self, profile_id: &str, error: &StagingError) {}

    /// An upload attempt is about to be issued.
    fn resource_create(&self, uri: &str) {}

    /// An upload attempt completed successfully.
    fn resource_succeeded(&self, uri: &str) {}

    /// An upload attempt failed; it may still be retried.
    fn resource_failed(&self, uri: &str, error: &StagingError) {}

    /// An upload cycle exhausted its retry bound. The path will not be
    /// retried until a fresh local write arrives.
    fn resource_abandoned(&self, uri: &str, error: &StagingError) {}
}

/// Observer that discards every event.
pub struct NoopObserver;

impl StagingObserver for NoopObserver {}

/// Observer that emits tracing events for every hook.
pub struct LogObserver;

impl StagingObserver for LogObserver {
    fn staging_create(&self, profile_id: &str) {
        tracing::info!(profile_id, "creating staging session");
    }

    fn staging_succeeded(&self, profile_id: &str, session_id: &str) {
        tracing::info!(profile_id, session_id, "staging session created");
    }

    fn staging_failed(&self, profile_id: &str, error: &StagingError) {
        tracing::warn!(profile_id, %error, "staging session creation failed");
    }

    fn resource_create(&self, uri: &str) {
        tracing::debug!(uri, "uploading resource");
    }

    fn resource_succeeded(&self, uri: &str) {
        tracing::debug!(uri, "resource uploaded");
    }

    fn resource_failed(&self, uri: &str, error: &StagingError) {
        tracing::warn!(uri, %error, "resource upload failed");
    }

    fn resource_abandoned(&self, uri: &str, error: &StagingError) {
        tracing::error!(uri, %error, "resource upload abandoned after retries");
    }
}
