//! Task spawning abstraction for runtime independence.
//!
//! This module provides a [`TaskSpawner`] trait that allows the core library
//! to spawn background tasks without hard-coding a specific async runtime
//! handle into every service constructor. The session controller's
//! drain/release timers (§4.5, §5) are the main users: both are long-lived
//! one-shot tasks racing a cancellation signal, and [`TaskSpawnerExt::spawn_labeled`]
//! gives them a name in the logs so a stuck shutdown can be traced to whichever
//! timer is still outstanding.

use std::future::Future;
use std::pin::Pin;

/// Abstraction for spawning background tasks.
///
/// Allows core services to spawn asynchronous work without knowing the
/// underlying runtime. Implementations should ensure tasks are properly
/// tracked and can complete even if the spawner is dropped. Object-safe
/// so the session controller can hold its spawner as `Arc<dyn TaskSpawner>`
/// rather than carrying a generic parameter through every collaborator.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     spawner: Arc<dyn TaskSpawner>,
/// }
///
/// impl MyService {
///     fn start_background_work(&self) {
///         self.spawner.spawn(async {
///             // Background work here
///         });
///     }
/// }
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a boxed future as a background task.
    ///
    /// The task runs independently of the caller and will continue until
    /// completion. The spawner does not provide a way to cancel or join
    /// the spawned task. Prefer the generic [`TaskSpawnerExt::spawn`]
    /// helper over calling this directly.
    fn spawn_boxed(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Ergonomic, generic entry points layered over [`TaskSpawner`].
///
/// Kept separate from `TaskSpawner` itself because a method generic over
/// its argument type can't appear in a trait's vtable; blanket-implemented
/// for every spawner, including `dyn TaskSpawner`.
pub trait TaskSpawnerExt: TaskSpawner {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_boxed(Box::pin(future));
    }

    /// Spawns a future, logging its label when it starts and when it
    /// finishes. Used for the drain/release timers, whose label names
    /// which lifecycle transition they're waiting to fire.
    fn spawn_labeled<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            log::debug!("[task] {label} started");
            future.await;
            log::debug!("[task] {label} finished");
        });
    }
}

impl<T: TaskSpawner + ?Sized> TaskSpawnerExt for T {}

/// Tokio-based spawner for standalone server and general use.
///
/// Uses a Tokio runtime handle to spawn tasks. This is the default
/// implementation for non-Tauri environments.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn_boxed(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        // Give the task time to execute
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawn_labeled_runs_the_future() {
        let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn_labeled("test_timer", async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(executed.load(Ordering::SeqCst));
    }
}
