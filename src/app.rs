use std::sync::Arc;

use crate::context::Context;
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::system::IntoSystemDescriptor;
use crate::task::Task;
use crate::thread_pool::ThreadPool;

/// Facade combining a [`Context`] (used as the global context), a
/// [`Scheduler`], and a [`ThreadPool`] behind the registration surface a host
/// application actually calls.
///
/// `App` is the only place in this crate that owns all three pieces at once;
/// everything else (`Scheduler`, `ThreadPool`, `Context`) is usable
/// standalone for a host that wants to wire them together differently.
pub struct App {
    global: Arc<Context>,
    scheduler: Scheduler,
    pool: Arc<ThreadPool>,
}

impl App {
    /// Builds an app with a thread pool sized to
    /// `std::thread::available_parallelism()`.
    pub fn new() -> Self {
        Self::with_thread_pool(ThreadPool::new())
    }

    /// Builds an app with a caller-provided thread pool, for callers that
    /// need a specific worker count.
    pub fn with_thread_pool(pool: ThreadPool) -> Self {
        Self { global: Arc::new(Context::new()), scheduler: Scheduler::new(), pool: Arc::new(pool) }
    }

    /// Constructs a `T` in the global context. Fails if one is already
    /// present.
    pub fn emplace_global<T: Send + Sync + 'static>(&self, value: T) -> Result<(), SchedulerError> {
        self.global.emplace(value)
    }

    /// Registers `system` into the stage identified by the marker type `S`.
    pub fn register_system<S: 'static, Marker>(&self, system: impl IntoSystemDescriptor<Marker>) {
        self.scheduler.register_system::<S, Marker>(system);
    }

    /// Enqueues the stage identified by `S` for the next `run_scheduler`
    /// call.
    pub fn schedule<S: 'static>(&self) {
        self.scheduler.schedule::<S>();
    }

    /// Runs every enqueued stage to completion. The returned `Task` must be
    /// driven (via `sync_wait` or otherwise) before this `App` is dropped.
    pub fn run_scheduler(&self) -> Task<Result<(), SchedulerError>> {
        let local = Arc::new(Context::new());
        self.scheduler.run_all(Arc::clone(&self.pool), local, Arc::clone(&self.global))
    }

    /// Number of worker threads backing this app's thread pool.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Returns a clone of a value previously stored in the global context.
    pub fn global<T: Clone + Send + Sync + 'static>(&self) -> Result<T, SchedulerError> {
        self.global.get::<T>()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Res, ResMut};
    use crate::sync::sync_wait;

    struct UpdateStage;

    #[test]
    fn end_to_end_run_mutates_a_global_resource() {
        let app = App::new();
        app.emplace_global(0i32).unwrap();

        fn increment(mut value: ResMut<i32>) {
            *value += 1;
        }

        app.register_system::<UpdateStage, _>(increment as fn(ResMut<i32>));
        app.schedule::<UpdateStage>();

        sync_wait(app.run_scheduler()).unwrap();
        assert_eq!(app.global::<i32>().unwrap(), 1);
    }

    #[test]
    fn emplace_global_twice_fails() {
        let app = App::new();
        app.emplace_global(1i32).unwrap();
        assert!(app.emplace_global(2i32).is_err());
    }

    #[test]
    fn scheduling_with_no_registered_systems_is_a_noop() {
        let app = App::new();
        struct EmptyStage;
        app.schedule::<EmptyStage>();
        assert!(sync_wait(app.run_scheduler()).is_ok());
    }

    #[test]
    fn system_can_read_what_another_run_wrote() {
        let app = App::new();
        app.emplace_global(10i32).unwrap();

        fn double(mut value: ResMut<i32>) {
            *value *= 2;
        }
        fn assert_is(value: Res<i32>) {
            assert_eq!(*value, 20);
        }

        app.register_system::<UpdateStage, _>(double as fn(ResMut<i32>));
        app.register_system::<UpdateStage, _>(assert_is as fn(Res<i32>));
        app.schedule::<UpdateStage>();

        sync_wait(app.run_scheduler()).unwrap();
    }
}
