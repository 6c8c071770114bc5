// Background tasks — detached units of work with an optional join point
//
// Failover re-dispatch, scratch deletion and operator notices run here.
// Their failures are logged inside the task and never reach the caller
// that launched them. `drain` exists for shutdown and tests.

use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch `task` detached. Must be called inside a tokio runtime.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            task.await;
            debug!("Background task {} finished", label);
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks not yet observed as finished
    pub fn pending(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// Wait for every task, including tasks spawned while waiting
    pub async fn drain(&self) {
        loop {
            let batch = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                return;
            }
            for result in join_all(batch).await {
                if let Err(e) = result {
                    warn!("Background task panicked or was cancelled: {}", e);
                }
            }
        }
    }
}
