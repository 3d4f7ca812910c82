use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context as TaskContext, Poll};

use crate::context::Context;
use crate::error::{SchedulerError, SystemPanic};
use crate::query::{Query, QueryDataAccess};
use crate::task::Task;

type Invoker = dyn Fn(&Context, &Context) -> Task<Result<(), SystemPanic>> + Send + Sync;

/// A registered unit of work: a stable identity, its aggregated data-access
/// set, and a boxed closure that fetches queries and invokes the user
/// function.
///
/// `SystemDescriptor` never exposes the original callable back out; once
/// wrapped, the scheduler only ever needs `data_access` (for planning) and
/// `invoke` (for execution).
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct SystemDescriptor {
    handle: usize,
    access: Vec<QueryDataAccess>,
    #[derivative(Debug = "ignore")]
    invoker: Box<Invoker>,
}

impl SystemDescriptor {
    pub fn new<Marker>(system: impl IntoSystemDescriptor<Marker>) -> Self {
        system.into_system_descriptor()
    }

    /// A stable identity for this system, used as a visible label (logs,
    /// `SystemPanic::system_handle`) and for reflexive equality.
    pub fn handle(&self) -> usize {
        self.handle
    }

    /// This system's aggregated data-access set, in query-declaration order.
    pub fn data_access(&self) -> &[QueryDataAccess] {
        &self.access
    }

    /// Whether `self` and `other` must not run concurrently: true iff any of
    /// their access records conflict per `QueryDataAccess::conflicts_with`.
    pub fn has_dependency(&self, other: &SystemDescriptor) -> bool {
        self.access.iter().any(|a| other.access.iter().any(|b| a.conflicts_with(b)))
    }

    /// Fetches this system's queries and invokes it, catching any panic
    /// rather than letting it unwind across the thread pool worker.
    pub fn invoke(&self, local: &Context, global: &Context) -> Task<Result<(), SystemPanic>> {
        (self.invoker)(local, global)
    }
}

/// Converts a plain function or closure into a [`SystemDescriptor`].
///
/// Implemented by `macro_rules!` for every arity 0..=8 of `Fn(Q0, ..., Qn)`
/// and `Fn(Q0, ..., Qn) -> Task<()>`, where each `Qi: Query`. `Marker` exists
/// only to let both return-type shapes implement this trait for the same
/// argument list without conflicting.
pub trait IntoSystemDescriptor<Marker> {
    fn into_system_descriptor(self) -> SystemDescriptor;
}

fn catch_and_wrap(handle: usize, run: impl FnOnce() + std::panic::UnwindSafe) -> Result<(), SystemPanic> {
    std::panic::catch_unwind(run).map_err(|payload| SystemPanic::from_payload(0, handle, payload))
}

static NEXT_SYSTEM_HANDLE: AtomicUsize = AtomicUsize::new(0);

/// Allocates a fresh, process-lifetime-stable identity for a system.
///
/// `&self` (the closure/fn item being wrapped) cannot supply this: its
/// address is a transient stack slot of the `into_system_descriptor` call
/// (and the value is moved into the invoker closure immediately after), so
/// two unrelated systems can easily collide on the same address. A
/// monotonic counter, same shape as `StageId`, gives every descriptor a
/// handle that is unique and stable for the program's lifetime instead.
fn next_system_handle() -> usize {
    NEXT_SYSTEM_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Wraps an (`Unpin`) future so a panic raised during any single `poll` call
/// is caught instead of unwinding across the driver that's polling it.
/// `Task<T>` is always `Unpin` (it owns a `Pin<Box<_>>`), so this works for
/// every `Task<()>` a system returns.
struct CatchUnwind<F> {
    inner: F,
}

impl<F: Future<Output = ()> + Unpin> Future for CatchUnwind<F> {
    type Output = Result<(), Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| Pin::new(&mut self.inner).poll(cx))) {
            Ok(Poll::Ready(())) => Poll::Ready(Ok(())),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

macro_rules! impl_into_system_descriptor {
    ($($q:ident),*) => {
        #[allow(unused_parens, non_snake_case)]
        impl<Func, $($q: Query),*> IntoSystemDescriptor<fn($($q),*)> for Func
        where
            Func: Fn($($q),*) + Send + Sync + 'static,
        {
            fn into_system_descriptor(self) -> SystemDescriptor {
                let handle = next_system_handle();
                let mut access = Vec::new();
                $(access.extend($q::data_access());)*

                SystemDescriptor {
                    handle,
                    access,
                    invoker: Box::new(move |local: &Context, global: &Context| {
                        let fetched: Result<($($q),*), SchedulerError> = (|| {
                            Ok(($($q::fetch(local, global)?),*))
                        })();

                        match fetched {
                            Ok(($($q),*)) => {
                                let func = &self;
                                Task::ready(catch_and_wrap(handle, AssertUnwindSafe(|| {
                                    func($($q),*);
                                })))
                            }
                            Err(_err) => {
                                // A missing context entry is a setup bug, not a
                                // run-time race (contexts never shrink mid-run);
                                // surface it the same way a panic would.
                                Task::ready(Err(SystemPanic::from_payload(
                                    0,
                                    handle,
                                    Box::new(format!("{_err}")),
                                )))
                            }
                        }
                    }),
                }
            }
        }

        #[allow(unused_parens, non_snake_case)]
        impl<Func, $($q: Query),*> IntoSystemDescriptor<fn($($q),*) -> Task<()>> for Func
        where
            Func: Fn($($q),*) -> Task<()> + Send + Sync + 'static,
        {
            fn into_system_descriptor(self) -> SystemDescriptor {
                let handle = next_system_handle();
                let mut access = Vec::new();
                $(access.extend($q::data_access());)*

                SystemDescriptor {
                    handle,
                    access,
                    invoker: Box::new(move |local: &Context, global: &Context| {
                        let fetched: Result<($($q),*), SchedulerError> = (|| {
                            Ok(($($q::fetch(local, global)?),*))
                        })();

                        match fetched {
                            Ok(($($q),*)) => {
                                let inner = self($($q),*);
                                Task::new(async move {
                                    match (CatchUnwind { inner }).await {
                                        Ok(()) => Ok(()),
                                        Err(payload) => Err(SystemPanic::from_payload(0, handle, payload)),
                                    }
                                })
                            }
                            Err(_err) => Task::ready(Err(SystemPanic::from_payload(
                                0,
                                handle,
                                Box::new(format!("{_err}")),
                            ))),
                        }
                    }),
                }
            }
        }
    };
}

impl_into_system_descriptor!();
impl_into_system_descriptor!(Q0);
impl_into_system_descriptor!(Q0, Q1);
impl_into_system_descriptor!(Q0, Q1, Q2);
impl_into_system_descriptor!(Q0, Q1, Q2, Q3);
impl_into_system_descriptor!(Q0, Q1, Q2, Q3, Q4);
impl_into_system_descriptor!(Q0, Q1, Q2, Q3, Q4, Q5);
impl_into_system_descriptor!(Q0, Q1, Q2, Q3, Q4, Q5, Q6);
impl_into_system_descriptor!(Q0, Q1, Q2, Q3, Q4, Q5, Q6, Q7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Res;
    use crate::sync::sync_wait;

    #[test]
    fn zero_arity_system_runs() {
        let descriptor = SystemDescriptor::new(|| {});
        let ctx = Context::new();
        assert!(sync_wait(descriptor.invoke(&ctx, &ctx)).is_ok());
    }

    #[test]
    fn one_arity_system_fetches_resource() {
        let ctx = Context::new();
        ctx.emplace(7i32).unwrap();

        fn read_it(value: Res<i32>) {
            assert_eq!(*value, 7);
        }

        let descriptor = SystemDescriptor::new(read_it as fn(Res<i32>));
        assert!(sync_wait(descriptor.invoke(&ctx, &ctx)).is_ok());
    }

    #[test]
    fn panicking_system_is_caught() {
        let descriptor = SystemDescriptor::new(|| panic!("boom"));
        let ctx = Context::new();
        let result = sync_wait(descriptor.invoke(&ctx, &ctx));
        assert!(matches!(result, Err(SystemPanic { .. })));
    }

    #[test]
    fn conflicting_systems_report_dependency() {
        fn reader(_value: Res<i32>) {}
        fn writer(_value: crate::query::ResMut<i32>) {}

        let a = SystemDescriptor::new(reader as fn(Res<i32>));
        let b = SystemDescriptor::new(writer as fn(crate::query::ResMut<i32>));
        assert!(a.has_dependency(&b));
    }

    #[test]
    fn disjoint_systems_report_no_dependency() {
        fn uses_i32(_value: Res<i32>) {}
        fn uses_u64(_value: Res<u64>) {}

        let a = SystemDescriptor::new(uses_i32 as fn(Res<i32>));
        let b = SystemDescriptor::new(uses_u64 as fn(Res<u64>));
        assert!(!a.has_dependency(&b));
    }
}
