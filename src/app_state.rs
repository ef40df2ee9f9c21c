use std::sync::Arc;

use crate::services::{cleanup::CleanupQueue, queue::JobQueue, storage::Storage};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub queue: JobQueue,
    pub cleanup: CleanupQueue,
}

impl AppState {
    pub fn new(storage: Arc<Storage>, queue: JobQueue, cleanup: CleanupQueue) -> Self {
        Self {
            storage,
            queue,
            cleanup,
        }
    }
}
