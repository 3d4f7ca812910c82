use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Wake, Waker};
use std::thread::{self, Thread};

use parking_lot::Mutex;

use crate::task::Task;
use crate::thread_pool::is_pool_worker;

/// Blocks the calling thread until `task` completes, returning its output.
///
/// This is the bridge between the synchronous and asynchronous halves of the
/// crate: the scheduler's own `run_all` is itself a `Task`, and an
/// application's `main` needs a way to drive it without a general-purpose
/// async runtime. The implementation is the smallest possible executor: a
/// `Waker` that unparks this thread, a poll loop, and `thread::park` while
/// waiting for the next wake.
///
/// # Panics
///
/// In debug builds, panics if called from a thread pool worker: blocking a
/// worker can deadlock the pool if the awaited task needs another worker
/// slot to make progress and all of them are blocked the same way.
pub fn sync_wait<T>(task: Task<T>) -> T {
    debug_assert!(
        !is_pool_worker(),
        "sync_wait must not be called from a thread pool worker thread"
    );

    let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
    let mut cx = TaskContext::from_waker(&waker);
    let mut task = Box::pin(task);

    loop {
        match task.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => thread::park(),
        }
    }
}

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Runs every task in `tasks` to completion and returns their outputs in
/// input order.
///
/// Unlike polling each task to completion one at a time, `when_all` polls
/// every still-pending task on each wake, so tasks that make progress on
/// different threads (e.g. via `ThreadPool::spawn_tracked`) run genuinely
/// concurrently rather than being driven to completion sequentially.
pub fn when_all<T: Send + 'static>(tasks: Vec<Task<T>>) -> Task<Vec<T>> {
    let len = tasks.len();
    Task::new(WhenAll { slots: tasks.into_iter().map(Some).collect(), results: (0..len).map(|_| None).collect() })
}

struct WhenAll<T> {
    slots: Vec<Option<Task<T>>>,
    results: Vec<Option<T>>,
}

// `Task<T>` owns a `Pin<Box<dyn Future>>`; moving the `Box` never moves the
// future it points to, so `Task<T>` (and therefore `WhenAll<T>`) is `Unpin`
// regardless of what the wrapped future itself requires.
impl<T> Future for WhenAll<T> {
    type Output = Vec<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Vec<T>> {
        let this = self.get_mut();
        let mut all_ready = true;

        for index in 0..this.slots.len() {
            if let Some(task) = &mut this.slots[index] {
                match Pin::new(task).poll(cx) {
                    Poll::Ready(value) => {
                        this.results[index] = Some(value);
                        this.slots[index] = None;
                    }
                    Poll::Pending => all_ready = false,
                }
            }
        }

        if all_ready {
            Poll::Ready(this.results.iter_mut().map(|slot| slot.take().expect("all slots ready")).collect())
        } else {
            Poll::Pending
        }
    }
}

/// A multi-waiter, one-shot broadcast event.
///
/// Where `Task` carries at most one continuation, many driver tasks may need
/// to wait on a single predecessor step finishing — exactly the shape of the
/// scheduler's dependency edges, where one step can have several
/// dependents. `CompletionToken` covers that fan-out: `fire()` is called
/// once by the step's driver when it finishes, and wakes every task that had
/// registered via `wait()` up to that point (and any call to `wait()` after
/// `fire()` resolves immediately).
pub struct CompletionToken {
    fired: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl CompletionToken {
    pub fn new() -> Self {
        Self { fired: AtomicBool::new(false), wakers: Mutex::new(Vec::new()) }
    }

    /// Whether `fire` has already been called.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Marks this token as fired and wakes every task currently waiting on
    /// it. Idempotent: firing an already-fired token is a no-op beyond the
    /// (already empty) waker drain.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);

        for waker in std::mem::take(&mut *self.wakers.lock()) {
            waker.wake();
        }
    }

    /// Returns a future that resolves once this token has fired, taking a
    /// shared reference so the same token can be awaited by any number of
    /// independent tasks. Requires an `Arc` since the returned future must
    /// be `'static` to be usable inside a `Task`.
    pub fn wait(self: &Arc<Self>) -> Wait {
        Wait { token: Arc::clone(self) }
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`CompletionToken::wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct Wait {
    token: Arc<CompletionToken>,
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<()> {
        if self.token.is_fired() {
            return Poll::Ready(());
        }

        let mut wakers = self.token.wakers.lock();

        // Re-check under the lock: `fire` may have run, and drained an empty
        // waker list, between our first check above and taking this lock.
        if self.token.is_fired() {
            return Poll::Ready(());
        }

        wakers.push(cx.waker().clone());
        Poll::Pending
    }
}
