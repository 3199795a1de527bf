//! Highlight request lifecycle.
//!
//! A request carries the content to highlight and the completion handle of
//! the caller awaiting it. `resolve` and `reject` consume the request, so a
//! completion handle is invoked at most once by construction; the scheduler
//! guarantees it is invoked at least once (every path out of the event loop
//! either resolves, rejects, or rejects-on-shutdown).

use tokio::sync::oneshot;

use crate::protocol::{Range, WorkItem};

/// Errors surfaced to a `highlight()` caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HighlightError {
    /// The work item failed inside the execution unit (tokenizer error or
    /// malformed result). Only this request is affected; the unit survives.
    #[error("highlighting failed: {0}")]
    UnitFailed(String),

    /// The execution unit died while serving this request.
    #[error("execution unit crashed: {0}")]
    UnitCrashed(String),

    /// The request exceeded the configured deadline. Only possible when a
    /// request timeout is enabled on the scheduler.
    #[error("highlight request timed out")]
    Timeout,

    /// The scheduler was shut down (or dropped) before the request settled.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

pub(crate) type ReplySender = oneshot::Sender<Result<Vec<Range>, HighlightError>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Vec<Range>, HighlightError>>;

/// One caller's highlighting need: the content plus the completion handle.
pub(crate) struct HighlightRequest {
    name: String,
    content: String,
    reply: ReplySender,
}

impl HighlightRequest {
    pub(crate) fn new(name: String, content: String) -> (Self, ReplyReceiver) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                name,
                content,
                reply,
            },
            rx,
        )
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Work message for the wire. Cloned rather than moved: the request
    /// stays alive in the in-flight table until the unit replies.
    pub(crate) fn work_item(&self) -> WorkItem {
        WorkItem {
            name: self.name.clone(),
            content: self.content.clone(),
        }
    }

    /// Resolve the caller with the ranges the serving unit emitted.
    ///
    /// A dropped receiver is not an error: the caller abandoned the future,
    /// which does not cancel the work (there is no cancellation path).
    pub(crate) fn resolve(self, ranges: Vec<Range>) {
        if self.reply.send(Ok(ranges)).is_err() {
            tracing::trace!(name = %self.name, "Caller dropped before resolution");
        }
    }

    pub(crate) fn reject(self, error: HighlightError) {
        if self.reply.send(Err(error)).is_err() {
            tracing::trace!(name = %self.name, "Caller dropped before rejection");
        }
    }
}

impl std::fmt::Debug for HighlightRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightRequest")
            .field("name", &self.name)
            .field("content_len", &self.content.len())
            .finish()
    }
}
