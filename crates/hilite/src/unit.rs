//! Execution unit capability interface.
//!
//! The scheduler never hard-wires a concurrency primitive: anything that can
//! accept one work message at a time and post events back qualifies — a
//! tokio task (the shipped [`crate::worker`] implementation), an OS thread,
//! or a subprocess. Events flow to the scheduler over an mpsc channel handed
//! to the factory at spawn time; `UnitEvent::Ready` with no preceding post
//! is the readiness signal.

use tokio::sync::mpsc;

use crate::protocol::{UnitEvent, UnitId, WorkItem};

/// Channel on which a unit posts its events, tagged with its own id.
pub type UnitEventSender = mpsc::Sender<(UnitId, UnitEvent)>;

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    /// The unit's inbox is gone; it will never serve this work item.
    #[error("execution unit disconnected")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn execution unit: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// An independently-scheduled worker accepting one work message at a time.
///
/// Exclusively owned by the pool, which is the only component allowed to
/// send it work. `post` must not block and must only be called when the
/// unit is idle or freshly freed.
pub trait ExecutionUnit: Send {
    /// Send exactly one unit of work. The unit eventually posts exactly one
    /// terminal event for it on its event channel.
    fn post(&mut self, work: WorkItem) -> Result<(), PostError>;

    /// Release the unit's resources. Used at scheduler shutdown or on fatal
    /// failure; no further events are expected afterward.
    fn terminate(self: Box<Self>);
}

/// Extension point for different unit spawn strategies.
///
/// Injected at scheduler construction so there is no module-level singleton
/// deciding what a worker is. Called once per pool slot at startup and again
/// whenever a failed unit is replaced.
pub trait UnitFactory: Send + Sync {
    fn spawn(&self, id: UnitId, events: UnitEventSender)
    -> Result<Box<dyn ExecutionUnit>, SpawnError>;
}
