//! Shared value types for the lens code-intelligence bridge.
//!
//! These types cross crate boundaries: [`Position`] and [`Range`] travel from
//! the action surface into protocol parameters unchanged, and every action
//! invocation resolves to a [`ResultEnvelope`] regardless of outcome.

use serde::{Deserialize, Serialize};

/// A zero-indexed position inside a text document.
///
/// Both axes are zero-indexed, matching the wire protocol. Display layers are
/// responsible for any 1-indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open span between two positions in a document.
///
/// The server is authoritative for `start <= end`; this layer passes ranges
/// through without reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Whether the range is ordered in document order.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }
}

/// How the caller should treat the envelope content.
///
/// Currently only raw passthrough exists; the enum leaves room for richer
/// hints without changing the envelope shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayHint {
    Raw,
}

/// The uniform success-or-failure payload returned for every action.
///
/// Failures are encoded as textual content, never as a separate error channel,
/// so callers handle exactly one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub content: String,
    #[serde(rename = "displayHint")]
    pub display_hint: DisplayHint,
}

impl ResultEnvelope {
    /// Wrap an already-serialized payload.
    #[must_use]
    pub fn raw(content: String) -> Self {
        Self {
            content,
            display_hint: DisplayHint::Raw,
        }
    }

    /// Build the failure envelope for `action`, e.g. `"getHover failed: ..."`.
    #[must_use]
    pub fn failure(action: &str, message: &str) -> Self {
        Self::raw(format!("{action} failed: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering_is_line_major() {
        assert!(Position::new(1, 0) > Position::new(0, 99));
        assert!(Position::new(3, 4) < Position::new(3, 5));
        assert_eq!(Position::new(2, 2), Position::new(2, 2));
    }

    #[test]
    fn test_range_is_ordered() {
        let ordered = Range::new(Position::new(1, 0), Position::new(2, 0));
        let reversed = Range::new(Position::new(2, 0), Position::new(1, 0));
        let empty = Range::new(Position::new(5, 3), Position::new(5, 3));
        assert!(ordered.is_ordered());
        assert!(!reversed.is_ordered());
        assert!(empty.is_ordered());
    }

    #[test]
    fn test_position_wire_shape() {
        let pos = Position::new(10, 4);
        let json = serde_json::to_value(pos).unwrap();
        assert_eq!(json, serde_json::json!({ "line": 10, "character": 4 }));
    }

    #[test]
    fn test_range_roundtrip() {
        let range = Range::new(Position::new(0, 0), Position::new(3, 17));
        let json = serde_json::to_value(range).unwrap();
        let back: Range = serde_json::from_value(json).unwrap();
        assert_eq!(back, range);
    }

    #[test]
    fn test_envelope_failure_format() {
        let envelope = ResultEnvelope::failure("getHover", "server is not running");
        assert_eq!(envelope.content, "getHover failed: server is not running");
        assert_eq!(envelope.display_hint, DisplayHint::Raw);
    }

    #[test]
    fn test_envelope_serializes_camel_case_hint() {
        let envelope = ResultEnvelope::raw("[]".to_string());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["displayHint"], "raw");
        assert_eq!(json["content"], "[]");
    }
}
