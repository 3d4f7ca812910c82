use std::any::TypeId;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::context::Context;
use crate::error::SchedulerError;

/// One record of a system's declared data access.
///
/// Two records conflict iff they share both `category` and `type_id` and at
/// least one has `read_only == false`, and neither is `thread_safe`. This is
/// the entire coupling point between the scheduler and whatever resource or
/// component storage a host application builds on top of it: the scheduler
/// itself never inspects what `category`/`type_id` *mean*, only whether two
/// records collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryDataAccess {
    pub category: &'static str,
    pub type_id: TypeId,
    pub read_only: bool,
    pub thread_safe: bool,
}

impl QueryDataAccess {
    pub const fn new(category: &'static str, type_id: TypeId, read_only: bool, thread_safe: bool) -> Self {
        Self { category, type_id, read_only, thread_safe }
    }

    /// Whether `self` and `other` conflict per the rule above.
    pub fn conflicts_with(&self, other: &QueryDataAccess) -> bool {
        self.category == other.category
            && self.type_id == other.type_id
            && (!self.read_only || !other.read_only)
            && !(self.thread_safe && other.thread_safe)
    }
}

/// A small value type a system receives as a parameter.
///
/// A query knows how to materialize itself from the pair of contexts the
/// scheduler hands to every system invocation, and declares, statically, the
/// set of accesses that materialization will perform. The scheduler uses
/// `data_access` verbatim for conflict analysis; it never calls `fetch`
/// before a step's predecessors have completed.
pub trait Query: Send + 'static {
    /// Builds an instance of this query from the run's two contexts.
    fn fetch(local: &Context, global: &Context) -> Result<Self, SchedulerError>
    where
        Self: Sized;

    /// The access records this query performs when fetched.
    fn data_access() -> Vec<QueryDataAccess>;
}

/// Shared, read-only access to a resource of type `T` in the global context.
///
/// Holds a raw pointer into the context's storage rather than a clone: a
/// system (and any task it returns) may run for an arbitrary duration after
/// being fetched, so the query must observe live writes made by anything
/// that completes later in the same context generation, and a clone
/// couldn't. This is sound only under the scheduler's contract that a
/// context is never structurally mutated (no `emplace`) while a run is in
/// flight — see [`Context::get_raw`].
pub struct Res<T: 'static> {
    ptr: *const T,
    _marker: PhantomData<T>,
}

unsafe impl<T: Sync> Send for Res<T> {}
unsafe impl<T: Sync> Sync for Res<T> {}

impl<T> Deref for Res<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: see the struct's documentation and `Context::get_raw`.
        unsafe { &*self.ptr }
    }
}

impl<T: Send + Sync + 'static> Query for Res<T> {
    fn fetch(_local: &Context, global: &Context) -> Result<Self, SchedulerError> {
        let ptr = unsafe { global.get_raw::<T>()? };
        Ok(Self { ptr, _marker: PhantomData })
    }

    fn data_access() -> Vec<QueryDataAccess> {
        vec![QueryDataAccess::new("resources", TypeId::of::<T>(), true, false)]
    }
}

/// Exclusive, mutable access to a resource of type `T` in the global context.
///
/// See [`Res`] for why this holds a raw pointer instead of a reference or a
/// clone.
pub struct ResMut<T: 'static> {
    ptr: *mut T,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for ResMut<T> {}
unsafe impl<T: Send> Sync for ResMut<T> {}

impl<T> Deref for ResMut<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T> DerefMut for ResMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.ptr }
    }
}

impl<T: Send + Sync + 'static> Query for ResMut<T> {
    fn fetch(_local: &Context, global: &Context) -> Result<Self, SchedulerError> {
        let ptr = unsafe { global.get_raw_mut::<T>()? };
        Ok(Self { ptr, _marker: PhantomData })
    }

    fn data_access() -> Vec<QueryDataAccess> {
        vec![QueryDataAccess::new("resources", TypeId::of::<T>(), false, false)]
    }
}

/// Shared, read-only access to a resource of type `T` in the per-run local
/// context, freshly reset at the start of every `run_all`.
pub struct LocalRes<T: 'static> {
    ptr: *const T,
    _marker: PhantomData<T>,
}

unsafe impl<T: Sync> Send for LocalRes<T> {}
unsafe impl<T: Sync> Sync for LocalRes<T> {}

impl<T> Deref for LocalRes<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T: Send + Sync + 'static> Query for LocalRes<T> {
    fn fetch(local: &Context, _global: &Context) -> Result<Self, SchedulerError> {
        let ptr = unsafe { local.get_raw::<T>()? };
        Ok(Self { ptr, _marker: PhantomData })
    }

    fn data_access() -> Vec<QueryDataAccess> {
        vec![QueryDataAccess::new("local", TypeId::of::<T>(), true, false)]
    }
}

/// Marks a type as safe to access concurrently from multiple systems even
/// when written, bypassing conflict detection for it (e.g. a resource with
/// its own internal synchronization). Mirrors the `thread_safe` bit on
/// [`QueryDataAccess`].
pub trait ThreadSafe {}

/// A read-only [`Res`]-style query whose underlying type opts into
/// [`ThreadSafe`], so it never serializes against other accesses of the same
/// type regardless of read/write mix.
pub struct Shared<T: 'static> {
    ptr: *const T,
    _marker: PhantomData<T>,
}

unsafe impl<T> Send for Shared<T> {}
unsafe impl<T> Sync for Shared<T> {}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T: Send + Sync + ThreadSafe + 'static> Query for Shared<T> {
    fn fetch(_local: &Context, global: &Context) -> Result<Self, SchedulerError> {
        let ptr = unsafe { global.get_raw::<T>()? };
        Ok(Self { ptr, _marker: PhantomData })
    }

    fn data_access() -> Vec<QueryDataAccess> {
        vec![QueryDataAccess::new("resources", TypeId::of::<T>(), false, true)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_categories_never_conflict() {
        let a = QueryDataAccess::new("resources", TypeId::of::<i32>(), false, false);
        let b = QueryDataAccess::new("components", TypeId::of::<i32>(), false, false);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn read_read_never_conflicts() {
        let a = QueryDataAccess::new("resources", TypeId::of::<i32>(), true, false);
        let b = QueryDataAccess::new("resources", TypeId::of::<i32>(), true, false);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn write_anything_conflicts() {
        let w = QueryDataAccess::new("resources", TypeId::of::<i32>(), false, false);
        let r = QueryDataAccess::new("resources", TypeId::of::<i32>(), true, false);
        assert!(w.conflicts_with(&r));
        assert!(r.conflicts_with(&w));
    }

    #[test]
    fn thread_safe_skips_edge_even_for_writes() {
        let a = QueryDataAccess::new("resources", TypeId::of::<i32>(), false, true);
        let b = QueryDataAccess::new("resources", TypeId::of::<i32>(), false, true);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn one_sided_thread_safe_still_conflicts() {
        let a = QueryDataAccess::new("resources", TypeId::of::<i32>(), false, true);
        let b = QueryDataAccess::new("resources", TypeId::of::<i32>(), false, false);
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn res_and_res_mut_roundtrip() {
        let ctx = Context::new();
        ctx.emplace(10i32).unwrap();

        {
            let mut w = ResMut::<i32>::fetch(&ctx, &ctx).unwrap();
            *w += 5;
        }

        let r = Res::<i32>::fetch(&ctx, &ctx).unwrap();
        assert_eq!(*r, 15);
    }
}
