// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Turn phases and the shared handle used to queue them.
//!
//! Every component that defers work (graph remote coalescing, local sync,
//! orphan cleanup) schedules a [`Phase`] on a [`Scheduler`] clone. The owner of
//! the turn drains phases in fixed order with [`Scheduler::next_phase`] until
//! the queue is idle.
use std::cell::Cell;
use std::rc::Rc;

/// Deferred work phases, drained in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Apply buffered remote relationship operations.
    Coalesce,
    /// Replay local edits on top of refreshed canonical state.
    Sync,
    /// Release unloaded records whose whole related closure is unused.
    Destroy,
}

impl Phase {
    /// All phases in drain order.
    pub const ALL: [Phase; 3] = [Phase::Coalesce, Phase::Sync, Phase::Destroy];

    const fn bit(self) -> u8 {
        match self {
            Phase::Coalesce => 0b001,
            Phase::Sync => 0b010,
            Phase::Destroy => 0b100,
        }
    }
}

/// Cheaply clonable handle over the set of queued phases.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queued: Rc<Cell<u8>>,
}

impl Scheduler {
    /// Idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `phase`. Returns `false` when it was already queued.
    pub fn schedule(&self, phase: Phase) -> bool {
        let queued = self.queued.get();
        if queued & phase.bit() != 0 {
            return false;
        }
        self.queued.set(queued | phase.bit());
        true
    }

    /// Returns `true` while `phase` is queued.
    pub fn is_scheduled(&self, phase: Phase) -> bool {
        self.queued.get() & phase.bit() != 0
    }

    /// Returns `true` when nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.queued.get() == 0
    }

    /// Dequeues `phase` if it is queued. Returns whether it was.
    pub fn take(&self, phase: Phase) -> bool {
        let queued = self.queued.get();
        self.queued.set(queued & !phase.bit());
        queued & phase.bit() != 0
    }

    /// Dequeues the earliest queued phase.
    pub fn next_phase(&self) -> Option<Phase> {
        let queued = self.queued.get();
        let next = Phase::ALL.into_iter().find(|p| queued & p.bit() != 0)?;
        self.queued.set(queued & !next.bit());
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_drain_in_fixed_order() {
        let scheduler = Scheduler::new();
        let handle = scheduler.clone();
        assert!(handle.schedule(Phase::Destroy));
        assert!(handle.schedule(Phase::Coalesce));
        assert!(!handle.schedule(Phase::Coalesce));
        assert!(scheduler.is_scheduled(Phase::Coalesce));
        assert_eq!(scheduler.next_phase(), Some(Phase::Coalesce));
        assert!(handle.schedule(Phase::Sync));
        assert_eq!(scheduler.next_phase(), Some(Phase::Sync));
        assert!(scheduler.take(Phase::Destroy));
        assert!(!scheduler.take(Phase::Destroy));
        assert_eq!(scheduler.next_phase(), None);
        assert!(scheduler.is_idle());
    }
}
