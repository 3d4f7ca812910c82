//! Parallel system scheduler for ECS-flavored application frameworks.
//!
//! Systems declare the data they touch (`Query` + `QueryDataAccess`),
//! register into named stages, and get run by [`Scheduler`] with maximum
//! parallelism subject to those declared accesses - two systems only ever
//! serialize against each other if their access sets actually conflict. The
//! scheduler itself is storage-agnostic: it knows nothing about components
//! or entities, only about type-keyed resources in a [`Context`].
//!
//! ```no_run
//! use weft::{App, Res, ResMut};
//!
//! struct UpdateStage;
//!
//! fn spend(mut counter: ResMut<u32>) {
//!     *counter += 1;
//! }
//!
//! fn print_it(counter: Res<u32>) {
//!     println!("counter is now {}", *counter);
//! }
//!
//! let app = App::new();
//! app.emplace_global(0u32).unwrap();
//! app.register_system::<UpdateStage, _>(spend as fn(ResMut<u32>));
//! app.register_system::<UpdateStage, _>(print_it as fn(Res<u32>));
//! app.schedule::<UpdateStage>();
//! weft::sync_wait(app.run_scheduler()).unwrap();
//! ```

mod app;
mod context;
mod error;
mod query;
mod scheduler;
mod stage;
mod sync;
mod system;
mod task;
mod thread_pool;

pub use app::App;
pub use context::Context;
pub use error::{SchedulerError, SystemPanic};
pub use query::{LocalRes, Query, QueryDataAccess, Res, ResMut, Shared, ThreadSafe};
pub use scheduler::{Scheduler, Step, Steps};
pub use stage::{Stage, StageId};
pub use sync::{sync_wait, when_all, CompletionToken};
pub use system::{IntoSystemDescriptor, SystemDescriptor};
pub use task::Task;
pub use thread_pool::{Schedule, ThreadPool};

pub use weft_macros::system;
