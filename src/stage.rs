use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::system::SystemDescriptor;

static NEXT_STAGE_ID: AtomicUsize = AtomicUsize::new(0);

/// Stable identity for a [`Stage`], assigned from a process-wide counter.
/// Two stages are the same stage iff their ids match; this is what the plan
/// cache's stage-sequence key is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An ordered, append-only collection of systems.
///
/// A `Stage` groups systems that conceptually belong to the same phase of a
/// frame (e.g. "update", "render"); insertion order within a stage seeds the
/// planner's deterministic tie-breaking when two systems have no data
/// conflict. `add_system_before`/`add_system_after` are pure authoring sugar:
/// they resolve to an insertion index immediately, so the planner only ever
/// sees the final flat order and never needs to know a hint was used.
pub struct Stage {
    id: StageId,
    systems: Vec<Arc<SystemDescriptor>>,
}

impl Stage {
    pub fn new() -> Self {
        Self { id: StageId::next(), systems: Vec::new() }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn systems(&self) -> &[Arc<SystemDescriptor>] {
        &self.systems
    }

    /// Appends `system` to the end of this stage.
    pub fn add_system(&mut self, system: SystemDescriptor) -> &mut Self {
        self.systems.push(Arc::new(system));
        self
    }

    /// Inserts `system` immediately before the first system whose handle
    /// equals `anchor`'s. Appends to the end if no such system is found.
    pub fn add_system_before(&mut self, anchor: &SystemDescriptor, system: SystemDescriptor) -> &mut Self {
        let index = self.index_of(anchor.handle()).unwrap_or(self.systems.len());
        self.systems.insert(index, Arc::new(system));
        self
    }

    /// Inserts `system` immediately after the first system whose handle
    /// equals `anchor`'s. Appends to the end if no such system is found.
    pub fn add_system_after(&mut self, anchor: &SystemDescriptor, system: SystemDescriptor) -> &mut Self {
        let index = self.index_of(anchor.handle()).map(|i| i + 1).unwrap_or(self.systems.len());
        self.systems.insert(index, Arc::new(system));
        self
    }

    fn index_of(&self, handle: usize) -> Option<usize> {
        self.systems.iter().position(|s| s.handle() == handle)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_stages_have_distinct_ids() {
        let a = Stage::new();
        let b = Stage::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn add_system_appends_in_order() {
        let mut stage = Stage::new();
        stage.add_system(SystemDescriptor::new(|| {}));
        stage.add_system(SystemDescriptor::new(|| {}));
        assert_eq!(stage.systems().len(), 2);
    }

    #[test]
    fn add_system_before_inserts_at_anchor() {
        let mut stage = Stage::new();
        stage.add_system(SystemDescriptor::new(|| {}));
        let anchor_handle = stage.systems()[0].handle();

        let anchor = Arc::clone(&stage.systems()[0]);
        stage.add_system_before(&anchor, SystemDescriptor::new(|| {}));

        assert_eq!(stage.systems().len(), 2);
        assert_eq!(stage.systems()[1].handle(), anchor_handle);
    }

    #[test]
    fn add_system_after_missing_anchor_appends() {
        let mut stage = Stage::new();
        let orphan = SystemDescriptor::new(|| {});
        stage.add_system_after(&orphan, SystemDescriptor::new(|| {}));
        assert_eq!(stage.systems().len(), 1);
    }
}
