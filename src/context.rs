use std::any::{Any, TypeId};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::SchedulerError;

/// Type-keyed heterogeneous map of shared resources.
///
/// A `Context` never iterates and never removes entries; it lives for as
/// long as the scheduler that owns it. The scheduler hands each system two
/// of these: a per-run `local` context (reset at the start of every
/// `run_all`) and a long-lived `global` one populated before any run via
/// `App::emplace_global`.
///
/// # Mutation during a run
///
/// `emplace` takes an exclusive lock; it must only be called before a run
/// starts (the scheduler never calls it concurrently with `run_all`). Reads
/// (`get`/`get_mut`) are safe to call from any number of concurrent driver
/// tasks.
#[derive(Default)]
pub struct Context {
    values: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a `T` in place. Fails if a `T` is already present.
    pub fn emplace<T: Send + Sync + 'static>(&self, value: T) -> Result<(), SchedulerError> {
        let mut values = self.values.write();

        if values.contains_key(&TypeId::of::<T>()) {
            return Err(SchedulerError::ContextDuplicate { type_name: std::any::type_name::<T>() });
        }

        values.insert(TypeId::of::<T>(), Box::new(value));
        Ok(())
    }

    /// Removes every value from the context. Used by the executor to reset
    /// the per-run local context between runs; never called on the global
    /// context.
    pub fn clear(&self) {
        self.values.write().clear();
    }

    /// Returns a clone of `T`. Fails if `T` is absent.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Result<T, SchedulerError> {
        let values = self.values.read();

        values
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
            .ok_or(SchedulerError::ContextMissing { type_name: std::any::type_name::<T>() })
    }

    /// Runs `f` with a shared reference to the stored `T`, without cloning.
    /// Fails if `T` is absent.
    pub fn with<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, SchedulerError> {
        let values = self.values.read();

        let value = values
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .ok_or(SchedulerError::ContextMissing { type_name: std::any::type_name::<T>() })?;

        Ok(f(value))
    }

    /// Runs `f` with an exclusive reference to the stored `T`, without
    /// cloning. Fails if `T` is absent.
    pub fn with_mut<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, SchedulerError> {
        let mut values = self.values.write();

        let value = values
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
            .ok_or(SchedulerError::ContextMissing { type_name: std::any::type_name::<T>() })?;

        Ok(f(value))
    }

    /// Whether a `T` is currently present.
    pub fn contains<T: 'static>(&self) -> bool {
        self.values.read().contains_key(&TypeId::of::<T>())
    }

    /// Returns a raw pointer to the stored `T`.
    ///
    /// # Safety
    ///
    /// The pointer is valid only as long as the entry is not removed
    /// (`clear`) or the `Context` itself dropped. No `emplace` call may
    /// race with a live pointer obtained from this method — callers (the
    /// `Res`/`ResMut` query types) rely on the scheduler's contract that
    /// a context is never structurally mutated while a run is in flight.
    /// The pointer outlives the read lock: `Box<dyn Any>`'s heap allocation
    /// does not move when the surrounding hash map rehashes.
    pub(crate) unsafe fn get_raw<T: Send + Sync + 'static>(&self) -> Result<*const T, SchedulerError> {
        let values = self.values.read();

        values
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .map(|r| r as *const T)
            .ok_or(SchedulerError::ContextMissing { type_name: std::any::type_name::<T>() })
    }

    /// Mutable counterpart of [`Context::get_raw`]; same safety contract.
    pub(crate) unsafe fn get_raw_mut<T: Send + Sync + 'static>(&self) -> Result<*mut T, SchedulerError> {
        let mut values = self.values.write();

        values
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
            .map(|r| r as *mut T)
            .ok_or(SchedulerError::ContextMissing { type_name: std::any::type_name::<T>() })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("len", &self.values.read().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emplace_then_get_roundtrips() {
        let ctx = Context::new();
        ctx.emplace(42i32).unwrap();
        assert_eq!(ctx.get::<i32>().unwrap(), 42);
    }

    #[test]
    fn emplace_twice_fails() {
        let ctx = Context::new();
        ctx.emplace(1i32).unwrap();
        assert!(matches!(ctx.emplace(2i32), Err(SchedulerError::ContextDuplicate { .. })));
    }

    #[test]
    fn get_missing_fails() {
        let ctx = Context::new();
        assert!(matches!(ctx.get::<i32>(), Err(SchedulerError::ContextMissing { .. })));
    }

    #[test]
    fn with_mut_mutates_in_place() {
        let ctx = Context::new();
        ctx.emplace(0i32).unwrap();
        ctx.with_mut::<i32, _>(|v| *v += 1).unwrap();
        assert_eq!(ctx.get::<i32>().unwrap(), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let ctx = Context::new();
        ctx.emplace(1i32).unwrap();
        ctx.clear();
        assert!(!ctx.contains::<i32>());
    }
}
