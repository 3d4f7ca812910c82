use std::cell::Cell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Wake, Waker};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::sync::CompletionToken;
use crate::task::Task;

thread_local! {
    static IS_POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is one of this pool's workers. `sync_wait`
/// asserts against this in debug builds: blocking a worker thread can
/// deadlock the pool if the task being waited on needs another worker to
/// make progress and none are free.
pub(crate) fn is_pool_worker() -> bool {
    IS_POOL_WORKER.with(|cell| cell.get())
}

type BoxedJob = Box<dyn FnOnce() + Send>;

/// A fixed-size worker pool that async systems can hop onto.
///
/// The queue is a plain `VecDeque` behind a mutex and a condvar: `enqueue`
/// locks, pushes, unlocks, then wakes exactly one waiter (never all of
/// them), so scheduling N independent pieces of work wakes at most N idle
/// threads rather than thundering every worker for each one. Workers park on
/// the condvar when the queue is empty and loop while `running` or the queue
/// is non-empty, so a shutdown mid-burst still drains whatever was already
/// enqueued.
///
/// # Teardown
///
/// Dropping the pool sets `running = false`, wakes every worker, and joins
/// them. This crate requires the queue to be empty by the time teardown
/// starts (debug-asserted) — enqueuing after shutdown, or dropping the pool
/// with work still outstanding, is a programmer error. Callers must drive
/// every `Task` obtained from this pool (directly or via the scheduler's
/// `run_all`) to completion before dropping the `ThreadPool` that runs it.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

struct Shared {
    mutex: Mutex<Inner>,
    condvar: Condvar,
}

struct Inner {
    queue: VecDeque<BoxedJob>,
    running: bool,
}

impl ThreadPool {
    /// Builds a pool sized to `std::thread::available_parallelism()`,
    /// falling back to a single worker if that cannot be determined. Per the
    /// scheduler's contract, platform-detected sizing is a convenience, not
    /// a requirement — `with_worker_count` is always available.
    pub fn new() -> Self {
        let count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_worker_count(count)
    }

    /// Builds a pool with exactly `count` workers.
    pub fn with_worker_count(count: usize) -> Self {
        assert!(count > 0, "thread pool cannot have 0 workers");

        let shared = Arc::new(Shared {
            mutex: Mutex::new(Inner { queue: VecDeque::new(), running: true }),
            condvar: Condvar::new(),
        });

        let workers = (0..count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("weft-worker-{index}"))
                    .spawn(move || Self::run_worker(shared))
                    .expect("failed to spawn thread pool worker")
            })
            .collect();

        log::debug!("thread pool started with {count} workers");

        Self { shared, workers }
    }

    /// Number of worker threads in this pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn run_worker(shared: Arc<Shared>) {
        IS_POOL_WORKER.with(|cell| cell.set(true));

        let mut guard = shared.mutex.lock();

        while guard.running || !guard.queue.is_empty() {
            if let Some(job) = guard.queue.pop_front() {
                parking_lot::MutexGuard::unlocked(&mut guard, job);
            } else {
                shared.condvar.wait(&mut guard);
            }
        }
    }

    fn enqueue(&self, job: BoxedJob) {
        let mut guard = self.shared.mutex.lock();
        assert!(guard.running, "cannot enqueue work onto a thread pool that is shutting down");
        guard.queue.push_back(job);
        drop(guard);

        // Wake exactly one worker: enough parallelism to make progress,
        // without thundering every thread for one job.
        self.shared.condvar.notify_one();
    }

    /// Returns an awaitable that, the first time it is polled, enqueues a
    /// job that reschedules the calling task's continuation onto this pool,
    /// freeing whatever thread is currently running it. The second poll
    /// (which happens once a worker picks up that job) completes
    /// immediately.
    pub fn schedule(&self) -> Schedule {
        Schedule { shared: Arc::clone(&self.shared), enqueued: false }
    }

    /// Runs `future` to completion on this pool, without tracking its
    /// result. This is the "eject"/detach operation for a `Task`: if the
    /// pool is torn down before the job runs, it is simply dropped and
    /// never polled, i.e. silently cancelled.
    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        let job = Arc::new(PoolJob { shared: Arc::clone(&self.shared), future: Mutex::new(Some(Box::pin(future))) });
        PoolJob::schedule(job);
    }

    /// Runs `future` to completion on this pool and returns a `Task` that
    /// resolves with its output. Unlike `spawn`, the result is observable by
    /// awaiting the returned `Task` (exactly once — `Task` is single
    /// consumer).
    pub fn spawn_tracked<T: Send + 'static>(&self, future: impl Future<Output = T> + Send + 'static) -> Task<T> {
        let token = Arc::new(CompletionToken::new());
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

        let token_for_job = Arc::clone(&token);
        let slot_for_job = Arc::clone(&slot);
        self.spawn(async move {
            let value = future.await;
            *slot_for_job.lock() = Some(value);
            token_for_job.fire();
        });

        Task::new(async move {
            token.wait().await;
            slot.lock().take().expect("completion token fired before result was stored")
        })
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.mutex.lock();
            guard.running = false;
            debug_assert!(guard.queue.is_empty(), "thread pool dropped with work still in flight");
        }

        self.shared.condvar.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        log::debug!("thread pool shut down");
    }
}

/// A single polled, self-requeueing unit of work. Each time the inner future
/// wakes, the job re-enqueues itself onto the pool rather than the worker
/// polling in a tight loop, so a future that is `Pending` waiting on another
/// thread does not occupy a worker at all.
struct PoolJob {
    shared: Arc<Shared>,
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
}

impl PoolJob {
    fn schedule(job: Arc<PoolJob>) {
        let shared = Arc::clone(&job.shared);
        let job_for_closure = Arc::clone(&job);

        let boxed: BoxedJob = Box::new(move || PoolJob::poll_once(job_for_closure));

        let mut guard = shared.mutex.lock();
        if !guard.running {
            // Pool shutting down: drop the job instead of enqueueing, matching
            // the documented "enqueue after shutdown is a programmer error"/
            // cancel-on-teardown policy.
            return;
        }
        guard.queue.push_back(boxed);
        drop(guard);
        shared.condvar.notify_one();
    }

    fn poll_once(job: Arc<PoolJob>) {
        let mut slot = job.future.lock();
        let Some(mut future) = slot.take() else { return };
        drop(slot);

        let waker = Waker::from(Arc::clone(&job));
        let mut cx = TaskContext::from_waker(&waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {}
            Poll::Pending => {
                *job.future.lock() = Some(future);
            }
        }
    }
}

impl Wake for PoolJob {
    fn wake(self: Arc<Self>) {
        PoolJob::schedule(self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        PoolJob::schedule(Arc::clone(self));
    }
}

/// Awaitable returned by [`ThreadPool::schedule`].
#[must_use = "futures do nothing unless awaited"]
pub struct Schedule {
    shared: Arc<Shared>,
    enqueued: bool,
}

impl Future for Schedule {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<()> {
        if self.enqueued {
            return Poll::Ready(());
        }

        self.enqueued = true;

        let waker = cx.waker().clone();
        let wake_job: BoxedJob = Box::new(move || waker.wake());

        let mut guard = self.shared.mutex.lock();
        guard.queue.push_back(wake_job);
        drop(guard);
        self.shared.condvar.notify_one();

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::sync_wait;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn spawn_tracked_returns_result() {
        let pool = ThreadPool::with_worker_count(2);
        let task = pool.spawn_tracked(async { 1 + 1 });
        assert_eq!(sync_wait(task), 2);
    }

    #[test]
    fn two_independent_jobs_run_concurrently() {
        let pool = ThreadPool::with_worker_count(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let a = {
            let counter = Arc::clone(&counter);
            pool.spawn_tracked(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        let b = {
            let counter = Arc::clone(&counter);
            pool.spawn_tracked(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        sync_wait(crate::sync::when_all(vec![a, b]));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn schedule_resumes_on_a_worker() {
        let pool = ThreadPool::with_worker_count(1);
        let task = pool.spawn_tracked({
            let pool_handle = pool.shared.clone();
            async move {
                let schedule = Schedule { shared: pool_handle, enqueued: false };
                schedule.await;
                true
            }
        });
        assert!(sync_wait(task));
    }
}
