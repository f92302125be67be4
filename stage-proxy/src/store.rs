use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory map from logical path to the latest content written to it.
///
/// Only the most recent value is retained; replication reads a snapshot of
/// whatever is current when an upload attempt starts. Entries live for the
/// process lifetime. Writes and reads never touch the network, which is
/// what decouples client-visible latency from replication latency.
#[derive(Clone, Default)]
pub struct ResourceStore {
    resources: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the content stored at `path`, creating the entry on first
    /// write. Returns immediately.
    pub fn write(&self, path: &str, content: Bytes) {
        self.resources.write().insert(path.to_string(), content);
    }

    pub fn read(&self, path: &str) -> Option<Bytes> {
        self.resources.read().get(path).cloned()
    }

    /// Paths of every resource written so far.
    pub fn paths(&self) -> Vec<String> {
        self.resources.read().keys().cloned().collect()
    }
}
