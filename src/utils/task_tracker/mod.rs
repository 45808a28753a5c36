//! Named background tasks that can be aborted one at a time or all together.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Tracked {
    id: u64,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<String, Tracked>>>;

#[derive(Default)]
pub struct TaskTracker {
    tasks: TaskMap,
    next_id: AtomicU64,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task under `name`. It drops out of the tracker when it finishes;
    /// a running task with the same name is aborted first.
    pub async fn spawn<F>(&self, name: String, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        let task_name = name.clone();

        // Held across the spawn so the entry exists before the task can remove it
        let mut guard = self.tasks.lock().await;
        if let Some(old) = guard.remove(&name) {
            warn!("replacing running task '{}'", name);
            old.handle.abort();
        }
        let handle = tokio::spawn(async move {
            future.await;
            let mut tasks = tasks.lock().await;
            // A replacement registered under the same name stays tracked
            if tasks.get(&task_name).is_some_and(|t| t.id == id) {
                tasks.remove(&task_name);
            }
            debug!("task '{}' finished", task_name);
        });
        guard.insert(name, Tracked { id, handle });
    }

    /// Abort one task by name. Returns whether it was still running.
    pub async fn abort(&self, name: &str) -> bool {
        let Some(task) = self.tasks.lock().await.remove(name) else {
            return false;
        };
        task.handle.abort();
        debug!("aborted task '{}'", name);
        true
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tasks.lock().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn abort_all(&self) {
        let drained: Vec<(String, Tracked)> = self.tasks.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        for (name, task) in &drained {
            task.handle.abort();
            debug!("aborted task '{}'", name);
        }
        info!("aborted {} tracked tasks", drained.len());
    }
}

#[cfg(test)]
mod tests;
