use std::any::Any;

/// Everything that can go wrong inside the scheduler.
///
/// Planner and context errors are surfaced synchronously at the `run_all`
/// call site, before any system runs. `SystemPanic` is discovered only once
/// the offending driver task has actually run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A query fetch required a type that was present in neither context.
    #[error("context is missing a value of type `{type_name}`")]
    ContextMissing { type_name: &'static str },

    /// `Context::emplace::<T>` was called twice for the same `T`.
    #[error("context already has a value of type `{type_name}`")]
    ContextDuplicate { type_name: &'static str },

    /// The planner produced a cyclic step graph. This should be unreachable
    /// given the forward-only construction in `scheduler::plan`; if it is
    /// ever observed it indicates a bug in the planner, not in user code.
    #[error("dependency planner produced a cyclic schedule (this is a bug)")]
    PlanCycle,

    /// A system panicked while running.
    #[error(transparent)]
    SystemPanic(#[from] SystemPanic),

    /// The thread pool was torn down with this task still in flight.
    #[error("scheduler was shut down while work was still in flight")]
    CancelledAtShutdown,
}

/// Payload carried by [`SchedulerError::SystemPanic`].
pub struct SystemPanic {
    /// Index of the step whose system panicked, within the `Steps` vector
    /// that was executing.
    pub step_index: usize,
    /// Stable identity of the system that panicked.
    pub system_handle: usize,
    /// The panic payload, downcast to a displayable message when possible.
    pub message: String,
}

impl SystemPanic {
    pub(crate) fn from_payload(step_index: usize, system_handle: usize, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "system panicked with a non-string payload".to_owned()
        };

        Self { step_index, system_handle, message }
    }
}

impl std::fmt::Debug for SystemPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemPanic")
            .field("step_index", &self.step_index)
            .field("system_handle", &self.system_handle)
            .field("message", &self.message)
            .finish()
    }
}

impl std::fmt::Display for SystemPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "system at step {} panicked: {}", self.step_index, self.message)
    }
}

impl std::error::Error for SystemPanic {}

pub type Result<T> = std::result::Result<T, SchedulerError>;
