//! Periodic background tasks
//!
//! Monitoring sweeps, cache auto-tuning, and alert pruning all run on
//! intervals spawned through this module so shutdown can stop them in one
//! place.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn a task that runs `tick` on a fixed interval
///
/// The immediate first tick is skipped, so the first run happens one full
/// interval after spawning.
pub fn spawn_interval<F, Fut>(name: &str, every: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let name = name.to_string();
    tokio::spawn(async move {
        debug!("Task {} starting with interval: {:?}", name, every);

        let mut interval_timer = tokio::time::interval(every);
        // Skip the immediate first tick
        interval_timer.tick().await;

        loop {
            interval_timer.tick().await;
            debug!("Task {} fired", name);
            tick().await;
        }
    })
}

/// Tracks spawned background tasks so they can be stopped together
pub struct TaskManager {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Spawn a named interval task and track its handle
    pub fn spawn<F, Fut>(&mut self, name: &str, every: Duration, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = spawn_interval(name, every, tick);
        self.handles.push((name.to_string(), handle));
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.handles.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Stop all tracked tasks
    pub fn stop_all(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            debug!("Stopping task {}", name);
            handle.abort();
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_interval_skips_immediate_tick() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let handle = spawn_interval("tick-test", Duration::from_millis(50), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Well inside the first interval: nothing should have fired yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fired.load(Ordering::SeqCst) >= 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_manager_stops_tasks() {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();

        let mut manager = TaskManager::new();
        manager.spawn("counter", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(manager.task_names(), vec!["counter"]);

        tokio::time::sleep(Duration::from_millis(55)).await;
        manager.stop_all();
        let at_stop = fired.load(Ordering::SeqCst);
        assert!(at_stop >= 1, "task should have fired before stop");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), at_stop, "no fires after stop");
    }
}
