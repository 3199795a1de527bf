//! Fixed-size pool of execution units and their idle/busy partition.
//!
//! The pool owns every unit handle; nothing else may send a unit work. A
//! unit is *starting* from spawn until its readiness event and is counted
//! as busy for the whole of that window, so `idle + busy == POOL_SIZE`
//! holds from construction onward. A slot lost to a failed respawn is the
//! one exception, and it is reported loudly rather than silently absorbed.

use std::collections::{HashMap, VecDeque};

use crate::inflight::InFlightTable;
use crate::pending::PendingQueue;
use crate::protocol::{UnitId, WorkItem};
use crate::request::HighlightRequest;
use crate::unit::{ExecutionUnit, PostError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitState {
    /// Spawned but not yet ready; counted as busy (never dispatched to).
    Starting,
    Idle,
    Busy,
}

struct UnitEntry {
    handle: Box<dyn ExecutionUnit>,
    state: UnitState,
    /// Bumped on every dispatch; stale deadline timers carry an old value
    /// and are ignored.
    generation: u64,
}

/// Outcome of releasing a unit that just finished (or just became ready).
pub(crate) enum Released {
    /// Queue was empty; the unit is back in the idle set.
    Idle,
    /// The queue head was dispatched to the unit, which stays busy.
    Redispatched { generation: u64 },
    /// Posting the queue head failed; the request is handed back so the
    /// caller can requeue it and replace the broken unit.
    DispatchFailed {
        request: HighlightRequest,
        error: PostError,
    },
}

pub(crate) struct Pool {
    units: HashMap<UnitId, UnitEntry>,
    idle: VecDeque<UnitId>,
    size: usize,
}

impl Pool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            units: HashMap::with_capacity(size),
            idle: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Track a freshly-spawned unit. It stays out of the idle set until its
    /// readiness event arrives.
    pub(crate) fn insert_starting(&mut self, id: UnitId, handle: Box<dyn ExecutionUnit>) {
        let previous = self.units.insert(
            id,
            UnitEntry {
                handle,
                state: UnitState::Starting,
                generation: 0,
            },
        );
        debug_assert!(previous.is_none(), "unit id collision");
    }

    pub(crate) fn state(&self, id: UnitId) -> Option<UnitState> {
        self.units.get(&id).map(|e| e.state)
    }

    pub(crate) fn generation(&self, id: UnitId) -> Option<u64> {
        self.units.get(&id).map(|e| e.generation)
    }

    /// Remove and return one unit from the idle set, if any. Selection
    /// order among units is arbitrary; fairness applies to requests, not
    /// units.
    pub(crate) fn acquire_idle(&mut self) -> Option<UnitId> {
        self.idle.pop_front()
    }

    /// Move an acquired unit to busy. Precondition: the unit was idle.
    pub(crate) fn mark_busy(&mut self, id: UnitId) {
        if let Some(entry) = self.units.get_mut(&id) {
            debug_assert_eq!(entry.state, UnitState::Idle, "mark_busy on non-idle unit");
            entry.state = UnitState::Busy;
        } else {
            debug_assert!(false, "mark_busy on unknown unit");
            tracing::error!(unit = %id, "Bug: mark_busy on unknown unit");
        }
    }

    /// Post a work item to a unit, bumping its dispatch generation.
    pub(crate) fn post(&mut self, id: UnitId, work: WorkItem) -> Result<u64, PostError> {
        let entry = self.units.get_mut(&id).ok_or(PostError::Disconnected)?;
        entry.generation += 1;
        entry.handle.post(work)?;
        Ok(entry.generation)
    }

    /// Release a unit that finished serving (or just signalled readiness).
    ///
    /// If the pending queue is non-empty its head is dispatched immediately
    /// and the unit stays busy; the queue is never allowed to hold requests
    /// while a unit sits idle. Otherwise the unit joins the idle set.
    pub(crate) fn release(
        &mut self,
        id: UnitId,
        queue: &mut PendingQueue,
        inflight: &mut InFlightTable,
    ) -> Released {
        let Some(entry) = self.units.get_mut(&id) else {
            debug_assert!(false, "release of unknown unit");
            tracing::error!(unit = %id, "Bug: release of unknown unit");
            return Released::Idle;
        };

        match queue.dequeue() {
            Some(request) => {
                entry.generation += 1;
                match entry.handle.post(request.work_item()) {
                    Ok(()) => {
                        entry.state = UnitState::Busy;
                        let generation = entry.generation;
                        tracing::debug!(unit = %id, name = %request.name(), "Re-dispatched queued request");
                        inflight.bind(id, request);
                        Released::Redispatched { generation }
                    }
                    Err(error) => Released::DispatchFailed { request, error },
                }
            }
            None => {
                entry.state = UnitState::Idle;
                self.idle.push_back(id);
                Released::Idle
            }
        }
    }

    /// Stop tracking a unit (crash, timeout, replacement) and hand its
    /// handle back for termination.
    pub(crate) fn remove(&mut self, id: UnitId) -> Option<Box<dyn ExecutionUnit>> {
        let entry = self.units.remove(&id)?;
        self.idle.retain(|u| *u != id);
        Some(entry.handle)
    }

    /// Remove every unit (shutdown path).
    pub(crate) fn drain(&mut self) -> Vec<Box<dyn ExecutionUnit>> {
        self.idle.clear();
        self.units.drain().map(|(_, e)| e.handle).collect()
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Busy includes starting units: they are unavailable for dispatch.
    pub(crate) fn busy_count(&self) -> usize {
        self.units.len() - self.idle.len()
    }

    /// Number of tracked units; below `size` only after a failed respawn.
    pub(crate) fn tracked(&self) -> usize {
        self.units.len()
    }
}
