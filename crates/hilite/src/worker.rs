//! Task-backed execution unit running an injected tokenizer.
//!
//! This is the unit side of the protocol: the scheduler side (dispatch,
//! routing) is in scheduler.rs. Each unit is a tokio task that sends
//! `Ready` once, then serves work items one at a time, replying with
//! exactly one terminal event per item. Tokenizer panics are contained by
//! running each item in its own task and surface as `Crashed`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{Range, UnitEvent, UnitId, WorkItem};
use crate::unit::{ExecutionUnit, PostError, SpawnError, UnitEventSender, UnitFactory};

/// Tokenization errors.
///
/// These reject the single work item that produced them; the unit survives.
#[derive(Debug, thiserror::Error)]
pub enum TokenizeError {
    /// No mode/grammar available for the content.
    #[error("unsupported content: {message}")]
    Unsupported { message: String },

    /// The tokenizer rejected or choked on the content.
    #[error("tokenizer error: {message}")]
    Failed { message: String },
}

impl TokenizeError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// The highlighting logic executed inside a unit - opaque to the scheduler.
///
/// Implementations decide which spans of `content` are keywords, comments,
/// strings and so on; the scheduler only moves the resulting ranges around.
#[async_trait::async_trait]
pub trait Tokenizer: Send + Sync + 'static {
    async fn tokenize(&self, name: &str, content: &str) -> Result<Vec<Range>, TokenizeError>;
}

/// Spawns tokio-task units around a shared tokenizer.
pub struct TokenizerUnitFactory<T> {
    tokenizer: Arc<T>,
}

impl<T: Tokenizer> TokenizerUnitFactory<T> {
    pub fn new(tokenizer: T) -> Self {
        Self {
            tokenizer: Arc::new(tokenizer),
        }
    }
}

impl<T: Tokenizer> UnitFactory for TokenizerUnitFactory<T> {
    fn spawn(
        &self,
        id: UnitId,
        events: UnitEventSender,
    ) -> Result<Box<dyn ExecutionUnit>, SpawnError> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let tokenizer = Arc::clone(&self.tokenizer);

        let task = tokio::spawn(async move {
            run_unit(id, tokenizer, work_rx, events).await;
        });

        Ok(Box::new(TaskUnit { work_tx, task }))
    }
}

struct TaskUnit {
    work_tx: mpsc::UnboundedSender<WorkItem>,
    task: tokio::task::JoinHandle<()>,
}

impl ExecutionUnit for TaskUnit {
    fn post(&mut self, work: WorkItem) -> Result<(), PostError> {
        self.work_tx.send(work).map_err(|_| PostError::Disconnected)
    }

    fn terminate(self: Box<Self>) {
        self.task.abort();
    }
}

/// Unit event loop: announce readiness, then serve work items until the
/// scheduler drops the inbox.
async fn run_unit<T: Tokenizer>(
    id: UnitId,
    tokenizer: Arc<T>,
    mut work_rx: mpsc::UnboundedReceiver<WorkItem>,
    events: UnitEventSender,
) {
    if events.send((id, UnitEvent::Ready)).await.is_err() {
        tracing::debug!(unit = %id, "Scheduler gone before readiness");
        return;
    }

    while let Some(work) = work_rx.recv().await {
        let tokenizer = Arc::clone(&tokenizer);

        // Separate task so a panicking tokenizer surfaces as a JoinError
        // instead of killing the unit loop silently.
        let outcome =
            tokio::spawn(async move { tokenizer.tokenize(&work.name, &work.content).await }).await;

        let event = match outcome {
            Ok(Ok(ranges)) => UnitEvent::Done { ranges },
            Ok(Err(e)) => UnitEvent::Failed {
                error: e.to_string(),
            },
            Err(join_err) => {
                let error = if join_err.is_panic() {
                    "tokenizer panicked".to_string()
                } else {
                    format!("tokenizer task failed: {join_err}")
                };
                UnitEvent::Crashed { error }
            }
        };

        let crashed = matches!(event, UnitEvent::Crashed { .. });
        if events.send((id, event)).await.is_err() {
            tracing::debug!(unit = %id, "Scheduler gone, unit exiting");
            return;
        }
        if crashed {
            // Exactly-once contract: after Crashed this unit sends nothing
            // further and must be replaced by the pool.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTokenizer;

    #[async_trait::async_trait]
    impl Tokenizer for EchoTokenizer {
        async fn tokenize(&self, _name: &str, content: &str) -> Result<Vec<Range>, TokenizeError> {
            Ok(vec![Range::new(0, content.len() as u32, "plain")])
        }
    }

    struct FailingTokenizer;

    #[async_trait::async_trait]
    impl Tokenizer for FailingTokenizer {
        async fn tokenize(&self, name: &str, _content: &str) -> Result<Vec<Range>, TokenizeError> {
            Err(TokenizeError::unsupported(name.to_string()))
        }
    }

    struct PanickingTokenizer;

    #[async_trait::async_trait]
    impl Tokenizer for PanickingTokenizer {
        async fn tokenize(&self, _name: &str, _content: &str) -> Result<Vec<Range>, TokenizeError> {
            panic!("grammar blew up");
        }
    }

    fn work(name: &str, content: &str) -> WorkItem {
        WorkItem {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn unit_signals_ready_then_serves_work() {
        let factory = TokenizerUnitFactory::new(EchoTokenizer);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let id = UnitId::new();

        let mut unit = factory.spawn(id, events_tx).unwrap();

        let (from, event) = events_rx.recv().await.unwrap();
        assert_eq!(from, id);
        assert!(matches!(event, UnitEvent::Ready));

        unit.post(work("a.rs", "fn a")).unwrap();
        let (from, event) = events_rx.recv().await.unwrap();
        assert_eq!(from, id);
        match event {
            UnitEvent::Done { ranges } => {
                assert_eq!(ranges, vec![Range::new(0, 4, "plain")]);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unit_serves_multiple_items_in_order() {
        let factory = TokenizerUnitFactory::new(EchoTokenizer);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let id = UnitId::new();

        let mut unit = factory.spawn(id, events_tx).unwrap();
        let _ready = events_rx.recv().await.unwrap();

        unit.post(work("a", "x")).unwrap();
        unit.post(work("b", "xy")).unwrap();

        let lengths: Vec<u32> = [events_rx.recv().await, events_rx.recv().await]
            .into_iter()
            .map(|msg| match msg.unwrap().1 {
                UnitEvent::Done { ranges } => ranges[0].length,
                other => panic!("expected Done, got {other:?}"),
            })
            .collect();
        assert_eq!(lengths, vec![1, 2]);
    }

    #[tokio::test]
    async fn tokenizer_error_becomes_failed_event() {
        let factory = TokenizerUnitFactory::new(FailingTokenizer);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let id = UnitId::new();

        let mut unit = factory.spawn(id, events_tx).unwrap();
        let _ready = events_rx.recv().await.unwrap();

        unit.post(work("nope.bin", "")).unwrap();
        match events_rx.recv().await.unwrap().1 {
            UnitEvent::Failed { error } => assert!(error.contains("nope.bin")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tokenizer_panic_becomes_crashed_event() {
        let factory = TokenizerUnitFactory::new(PanickingTokenizer);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let id = UnitId::new();

        let mut unit = factory.spawn(id, events_tx).unwrap();
        let _ready = events_rx.recv().await.unwrap();

        unit.post(work("a", "")).unwrap();
        match events_rx.recv().await.unwrap().1 {
            UnitEvent::Crashed { error } => assert!(error.contains("panicked")),
            other => panic!("expected Crashed, got {other:?}"),
        }

        // The unit is dead: the channel closes without further events.
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn terminate_stops_the_task() {
        let factory = TokenizerUnitFactory::new(EchoTokenizer);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let id = UnitId::new();

        let unit = factory.spawn(id, events_tx).unwrap();
        let _ready = events_rx.recv().await.unwrap();

        unit.terminate();
        assert!(events_rx.recv().await.is_none());
    }
}
