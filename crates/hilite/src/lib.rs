//! hilite: background worker-pool scheduler for syntax highlighting.
//!
//! A fixed pool of execution units tokenizes file content off the caller's
//! task; excess requests queue FIFO and unordered completions are routed
//! back to the exact caller that submitted them. The entry point is
//! [`Scheduler::start`] with a [`UnitFactory`] (usually
//! [`TokenizerUnitFactory`] around a [`Tokenizer`] implementation), then
//! [`Scheduler::highlight`] per file.

mod inflight;
mod pending;
mod pool;
mod request;

pub mod protocol;
pub mod scheduler;
pub mod unit;
pub mod worker;

pub use scheduler::{
    DEFAULT_POOL_SIZE, PendingHighlight, PoolStats, Scheduler, SchedulerConfig,
};

pub use protocol::{Range, UnitEvent, UnitId, WorkItem};
pub use request::HighlightError;
pub use unit::{ExecutionUnit, PostError, SpawnError, UnitEventSender, UnitFactory};
pub use worker::{TokenizeError, Tokenizer, TokenizerUnitFactory};
