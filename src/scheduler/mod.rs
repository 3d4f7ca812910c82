//! The dependency planner and run-all executor (components C7/C8).

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use bit_set::BitSet;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::context::Context;
use crate::error::SchedulerError;
use crate::stage::{Stage, StageId};
use crate::sync::{when_all, CompletionToken};
use crate::system::{IntoSystemDescriptor, SystemDescriptor};
use crate::task::Task;
use crate::thread_pool::ThreadPool;

/// One system in a planned run, alongside the indices (into the same
/// `Steps` vector) of every other step it must wait for.
pub struct Step {
    pub(crate) system: Arc<SystemDescriptor>,
    pub(crate) predecessors: SmallVec<[u32; 4]>,
}

/// A fully planned, topologically ordered run. Immutable once produced by
/// [`Scheduler::plan`].
pub type Steps = Vec<Step>;

/// The exact sequence of stages enqueued for one run, used as the plan
/// cache key. Two runs that enqueue the same stages in the same order reuse
/// the same compiled `Steps`.
type StageSeqKey = Vec<StageId>;

/// Owns every registered [`Stage`] and the plan cache built from them.
///
/// A `Scheduler` does not own a `Context` or a `ThreadPool` — see `App` for
/// the facade that wires all three together. Stages are addressed by a
/// marker type parameter (`register_system::<UpdateStage>(...)`) rather than
/// by value, so the scheduler keeps a `TypeId -> StageId` table alongside
/// the `StageId -> Stage` table that actually owns the systems.
pub struct Scheduler {
    stage_ids: RwLock<HashMap<TypeId, StageId>>,
    definitions: RwLock<HashMap<StageId, Stage>>,
    pending: Mutex<Vec<StageId>>,
    plan_cache: RwLock<HashMap<StageSeqKey, Arc<OnceLock<Arc<Steps>>>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            stage_ids: RwLock::new(HashMap::new()),
            definitions: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            plan_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `system` into the stage identified by the marker type `S`,
    /// creating that stage on first use.
    pub fn register_system<S: 'static, Marker>(&self, system: impl IntoSystemDescriptor<Marker>) {
        let id = self.stage_id_for::<S>();
        let mut definitions = self.definitions.write();
        definitions
            .get_mut(&id)
            .expect("stage_id_for always creates its entry before returning")
            .add_system(SystemDescriptor::new(system));
    }

    /// Appends the stage identified by `S` to the pending run sequence,
    /// creating an empty stage if `S` has never been registered into.
    pub fn schedule<S: 'static>(&self) {
        let id = self.stage_id_for::<S>();
        self.pending.lock().push(id);
    }

    fn stage_id_for<S: 'static>(&self) -> StageId {
        let type_id = TypeId::of::<S>();

        if let Some(&id) = self.stage_ids.read().get(&type_id) {
            return id;
        }

        let mut stage_ids = self.stage_ids.write();
        *stage_ids.entry(type_id).or_insert_with(|| {
            let stage = Stage::new();
            let id = stage.id();
            self.definitions.write().insert(id, stage);
            id
        })
    }

    /// Drains the pending stage sequence, plans (or reuses a cached plan
    /// for) it, and runs every step on `pool`, using `local` as the per-run
    /// scratch context and `global` as the long-lived one. `local` is
    /// cleared before the run starts.
    pub fn run_all(&self, pool: Arc<ThreadPool>, local: Arc<Context>, global: Arc<Context>) -> Task<Result<(), SchedulerError>> {
        let key: StageSeqKey = std::mem::take(&mut *self.pending.lock());

        let steps = self.plan(key);

        local.clear();

        Task::new(Self::drive(steps, pool, local, global))
    }

    fn plan(&self, key: StageSeqKey) -> Arc<Steps> {
        if let Some(entry) = self.plan_cache.read().get(&key) {
            if let Some(steps) = entry.get() {
                log::trace!("plan cache hit for {} stage(s)", key.len());
                return Arc::clone(steps);
            }
        }

        // The write lock is held across the (fast, CPU-only) build so two
        // callers racing on a cold key never do the work twice.
        let mut cache = self.plan_cache.write();
        let entry = Arc::clone(cache.entry(key.clone()).or_insert_with(|| Arc::new(OnceLock::new())));
        drop(cache);

        if let Some(steps) = entry.get() {
            return Arc::clone(steps);
        }

        log::debug!("plan cache miss for {} stage(s); compiling", key.len());

        let systems = self.flatten(&key);
        let steps = Arc::new(Self::build_steps(systems));

        entry.set(Arc::clone(&steps)).ok();
        steps
    }

    fn flatten(&self, key: &[StageId]) -> Vec<Arc<SystemDescriptor>> {
        let definitions = self.definitions.read();
        let mut systems = Vec::new();

        for stage_id in key {
            if let Some(stage) = definitions.get(stage_id) {
                systems.extend(stage.systems().iter().cloned());
            }
        }

        systems
    }

    /// Flatten → build conflict matrix → transitively reduce → emit.
    ///
    /// The matrix is `n` `BitSet` rows rather than a dense `Vec<bool>`: row
    /// `i` only ever needs bits `0..i` (edges only point from a later step
    /// to an earlier one), so a sparse set costs less both to store and to
    /// scan than a full `n * n` grid.
    fn build_steps(systems: Vec<Arc<SystemDescriptor>>) -> Steps {
        let n = systems.len();
        let mut rows: Vec<BitSet> = (0..n).map(|_| BitSet::with_capacity(n)).collect();

        for i in 0..n {
            for j in 0..i {
                if systems[i].has_dependency(&systems[j]) {
                    rows[i].insert(j);
                }
            }
        }

        let mut redundant_edges = 0usize;

        // Transitive reduction: if step i depends on j, then any step k that
        // already depends on i does not also need a direct edge to j - it
        // will observe j's completion transitively through i.
        for i in 0..n {
            for j in 0..i {
                if !rows[i].contains(j) {
                    continue;
                }

                for k in (i + 1)..n {
                    if rows[k].contains(i) && rows[k].remove(j) {
                        redundant_edges += 1;
                    }
                }
            }
        }

        if redundant_edges > 0 {
            log::trace!("transitive reduction pruned {redundant_edges} redundant edge(s) over {n} step(s)");
        }

        systems
            .into_iter()
            .zip(rows)
            .enumerate()
            .map(|(i, (system, row))| {
                let predecessors: SmallVec<[u32; 4]> = row.iter().map(|j| j as u32).collect();
                debug_assert!(predecessors.iter().all(|&p| (p as usize) < i), "planner produced a forward edge");
                Step { system, predecessors }
            })
            .collect()
    }

    async fn drive(steps: Arc<Steps>, pool: Arc<ThreadPool>, local: Arc<Context>, global: Arc<Context>) -> Result<(), SchedulerError> {
        let tokens: Vec<Arc<CompletionToken>> = (0..steps.len()).map(|_| Arc::new(CompletionToken::new())).collect();
        let mut drivers = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let system = Arc::clone(&step.system);
            let predecessor_tokens: Vec<Arc<CompletionToken>> =
                step.predecessors.iter().map(|&p| Arc::clone(&tokens[p as usize])).collect();
            let own_token = Arc::clone(&tokens[index]);
            let local = Arc::clone(&local);
            let global = Arc::clone(&global);

            let driver = pool.spawn_tracked(async move {
                if !predecessor_tokens.is_empty() {
                    let waits = predecessor_tokens.iter().map(|token| Task::new(token.wait())).collect();
                    when_all(waits).await;
                }

                let result = system.invoke(&local, &global).await;
                own_token.fire();
                (index, result)
            });

            drivers.push(driver);
        }

        let results = when_all(drivers).await;
        let mut first_panic = None;

        for (index, result) in results {
            if let Err(panic) = result {
                log::warn!("system panicked at step {index}: {panic}");
                if first_panic.is_none() {
                    first_panic = Some(panic);
                }
            }
        }

        match first_panic {
            Some(panic) => Err(SchedulerError::SystemPanic(panic)),
            None => Ok(()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(Scheduler: Send, Sync);
