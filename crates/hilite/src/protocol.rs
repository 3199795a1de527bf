//! Wire message types for scheduler-unit communication.
//!
//! There is deliberately no request identifier on the wire: each execution
//! unit serves at most one work item at a time, so "the unit that replied"
//! unambiguously names "the request that completed". If units ever pipeline
//! multiple work items, both `WorkItem` and the reply messages need an id
//! and the in-flight table becomes one-to-many.

use serde::{Deserialize, Serialize};

/// Unique identifier for an execution unit.
///
/// UUID v4 avoids confusion with pool indices and prevents accidental reuse
/// after a unit is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(uuid::Uuid);

impl UnitId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A highlight span produced by the tokenizer running inside a unit.
///
/// The scheduler never inspects ranges; it only routes them back to the
/// caller that submitted the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    /// Offset of the first highlighted character.
    pub start: u32,
    /// Number of characters covered by the span.
    pub length: u32,
    /// Style classification applied to the span.
    pub class_name: String,
}

impl Range {
    pub fn new(start: u32, length: u32, class_name: impl Into<String>) -> Self {
        Self {
            start,
            length,
            class_name: class_name.into(),
        }
    }
}

/// One unit of work posted to an execution unit.
///
/// Must only be posted to an idle or freshly-freed unit; the unit replies
/// with exactly one terminal [`UnitEvent`] per work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// File name or identifier of the content (used for mode selection
    /// inside the tokenizer, opaque to the scheduler).
    pub name: String,
    /// Text body to highlight.
    pub content: String,
}

/// Messages from a unit to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitEvent {
    /// First message after spawn, with no preceding work item: the unit has
    /// finished starting up and is now idle and eligible for work.
    Ready,

    /// Terminal reply to a posted work item.
    Done { ranges: Vec<Range> },

    /// The work item failed inside the unit (malformed payload, tokenizer
    /// error). The unit itself survives and may serve further work.
    Failed { error: String },

    /// The unit is dead and will send nothing further. Any bound request
    /// must be rejected and the pool slot replaced.
    Crashed { error: String },
}

impl UnitEvent {
    /// Terminal replies settle the in-flight request for the sending unit;
    /// `Ready` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitEvent::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_display_roundtrip() {
        let id = UnitId::new();
        let parsed = UnitId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn range_serializes_camel_case() {
        let range = Range::new(4, 7, "keyword");
        insta::assert_json_snapshot!(range, @r#"
        {
          "start": 4,
          "length": 7,
          "className": "keyword"
        }
        "#);
    }

    #[test]
    fn range_deserializes_camel_case() {
        let range: Range =
            serde_json::from_str(r#"{"start":0,"length":3,"className":"comment"}"#).unwrap();
        assert_eq!(range, Range::new(0, 3, "comment"));
    }

    #[test]
    fn work_item_serializes() {
        let work = WorkItem {
            name: "main.rs".to_string(),
            content: "fn main() {}".to_string(),
        };
        insta::assert_json_snapshot!(work, @r#"
        {
          "name": "main.rs",
          "content": "fn main() {}"
        }
        "#);
    }

    #[test]
    fn unit_event_ready_serializes() {
        insta::assert_json_snapshot!(UnitEvent::Ready, @r#"
        {
          "type": "ready"
        }
        "#);
    }

    #[test]
    fn unit_event_done_serializes() {
        let event = UnitEvent::Done {
            ranges: vec![Range::new(0, 2, "keyword")],
        };
        insta::assert_json_snapshot!(event, @r#"
        {
          "type": "done",
          "ranges": [
            {
              "start": 0,
              "length": 2,
              "className": "keyword"
            }
          ]
        }
        "#);
    }

    #[test]
    fn unit_event_failed_serializes() {
        let event = UnitEvent::Failed {
            error: "unknown mode".to_string(),
        };
        insta::assert_json_snapshot!(event, @r#"
        {
          "type": "failed",
          "error": "unknown mode"
        }
        "#);
    }

    #[test]
    fn unit_event_crashed_serializes() {
        let event = UnitEvent::Crashed {
            error: "tokenizer panicked".to_string(),
        };
        insta::assert_json_snapshot!(event, @r#"
        {
          "type": "crashed",
          "error": "tokenizer panicked"
        }
        "#);
    }

    #[test]
    fn terminal_classification() {
        assert!(!UnitEvent::Ready.is_terminal());
        assert!(UnitEvent::Done { ranges: vec![] }.is_terminal());
        assert!(
            UnitEvent::Failed {
                error: "e".to_string()
            }
            .is_terminal()
        );
        assert!(
            UnitEvent::Crashed {
                error: "e".to_string()
            }
            .is_terminal()
        );
    }
}
