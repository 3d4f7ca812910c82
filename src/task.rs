use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

/// A lazy, single-shot unit of asynchronous work.
///
/// `Task<T>` is a thin, type-erased wrapper over a boxed `Future`. Building
/// one does nothing: like any `Future`, it only makes progress when polled,
/// which is how the spec's "creating a Task does not start it" contract
/// falls directly out of the host language's `Future` rather than needing
/// separate bookkeeping. A `Task` is move-only (it owns a `Box`) and carries
/// at most one continuation at a time, because that is simply what
/// `Future::poll`'s `Waker` argument already guarantees — only the most
/// recently supplied waker is remembered by whatever leaf future is doing
/// the actual waiting.
///
/// A `Task` that is dropped before it completes is cancelled: nothing polls
/// it again and its state is freed. This crate does not surface a
/// `CancelledError` for that case (see `ThreadPool`'s module docs for the
/// chosen shutdown policy); the only documented way to observe cancellation
/// is to never let the `Task` itself be dropped before `sync_wait`,
/// `when_all`, or `ThreadPool::spawn_tracked` drive it to completion.
#[must_use = "tasks do nothing unless awaited, sync_wait-ed, or spawned onto a pool"]
pub struct Task<T> {
    inner: Pin<Box<dyn Future<Output = T> + Send>>,
}

impl<T> Task<T> {
    /// Wraps any `Send` future as a `Task`.
    pub fn new(future: impl Future<Output = T> + Send + 'static) -> Self {
        Self { inner: Box::pin(future) }
    }

    /// Builds an already-complete task, for systems that return eagerly
    /// rather than as a coroutine.
    pub fn ready(value: T) -> Self
    where
        T: Send + 'static,
    {
        Self::new(std::future::ready(value))
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<T> {
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::sync_wait;

    #[test]
    fn ready_task_completes_immediately() {
        assert_eq!(sync_wait(Task::ready(7)), 7);
    }

    #[test]
    fn new_task_runs_its_future() {
        let task = Task::new(async { 1 + 1 });
        assert_eq!(sync_wait(task), 2);
    }

    #[test]
    fn task_chains_through_nested_awaits() {
        async fn inner() -> i32 {
            21
        }

        let task = Task::new(async { inner().await * 2 });
        assert_eq!(sync_wait(task), 42);
    }
}
