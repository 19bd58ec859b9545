//! Action catalog: the closed set of supported actions and their contracts.
//!
//! Each action declares the parameter shape it requires. Validation checks
//! the whole request in one pass and reports every missing or wrong-typed
//! field together, so a caller can fix a request in one round trip.

use std::path::PathBuf;

use lens_types::{Position, Range};
use serde::{Deserialize, Serialize};

/// The closed enumeration of supported actions.
///
/// An unknown name fails deserialization before it can reach dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    FindReferences,
    GoToDefinition,
    GetHover,
    PrepareRename,
    PrepareCallHierarchy,
    GoToImplementation,
    RenameSymbol,
    GetDiagnostics,
    GetDocumentSymbols,
    FormatDocument,
    GetWorkspaceSymbols,
    GetCodeActions,
    GetIncomingCalls,
    GetOutgoingCalls,
}

/// The parameter shape an action requires.
enum Shape {
    /// file_path + line + character
    Position,
    /// file_path + line + character + newName
    Rename,
    /// file_path
    Document,
    /// file_path + formattingOptions
    Format,
    /// query (empty text is valid)
    Query,
    /// file_path + start/end coordinates + context
    RangeContext,
    /// opaque call-hierarchy item
    Item,
}

impl Action {
    /// The wire name, as it appears in requests and envelopes.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FindReferences => "findReferences",
            Self::GoToDefinition => "goToDefinition",
            Self::GetHover => "getHover",
            Self::PrepareRename => "prepareRename",
            Self::PrepareCallHierarchy => "prepareCallHierarchy",
            Self::GoToImplementation => "goToImplementation",
            Self::RenameSymbol => "renameSymbol",
            Self::GetDiagnostics => "getDiagnostics",
            Self::GetDocumentSymbols => "getDocumentSymbols",
            Self::FormatDocument => "formatDocument",
            Self::GetWorkspaceSymbols => "getWorkspaceSymbols",
            Self::GetCodeActions => "getCodeActions",
            Self::GetIncomingCalls => "getIncomingCalls",
            Self::GetOutgoingCalls => "getOutgoingCalls",
        }
    }

    fn shape(self) -> Shape {
        match self {
            Self::FindReferences
            | Self::GoToDefinition
            | Self::GetHover
            | Self::PrepareRename
            | Self::PrepareCallHierarchy
            | Self::GoToImplementation => Shape::Position,
            Self::RenameSymbol => Shape::Rename,
            Self::GetDiagnostics | Self::GetDocumentSymbols => Shape::Document,
            Self::FormatDocument => Shape::Format,
            Self::GetWorkspaceSymbols => Shape::Query,
            Self::GetCodeActions => Shape::RangeContext,
            Self::GetIncomingCalls | Self::GetOutgoingCalls => Shape::Item,
        }
    }
}

/// One incoming action request: an action name plus a flat bag of fields.
///
/// Fields stay raw JSON so validation can report every problem at once
/// instead of stopping at the first type mismatch.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
    #[serde(default)]
    pub file_path: Option<serde_json::Value>,
    #[serde(default)]
    pub line: Option<serde_json::Value>,
    #[serde(default)]
    pub character: Option<serde_json::Value>,
    #[serde(default)]
    pub query: Option<serde_json::Value>,
    #[serde(default)]
    pub start_line: Option<serde_json::Value>,
    #[serde(default)]
    pub start_char: Option<serde_json::Value>,
    #[serde(default)]
    pub end_line: Option<serde_json::Value>,
    #[serde(default)]
    pub end_char: Option<serde_json::Value>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default, rename = "newName")]
    pub new_name: Option<serde_json::Value>,
    #[serde(default)]
    pub item: Option<serde_json::Value>,
    #[serde(default, rename = "formattingOptions")]
    pub formatting_options: Option<serde_json::Value>,
}

/// A validated, typed invocation ready for dispatch.
#[derive(Debug, Clone)]
pub enum Invocation {
    Position {
        file_path: PathBuf,
        position: Position,
    },
    Rename {
        file_path: PathBuf,
        position: Position,
        new_name: String,
    },
    Document {
        file_path: PathBuf,
    },
    Format {
        file_path: PathBuf,
        options: serde_json::Value,
    },
    Query {
        query: String,
    },
    RangeContext {
        file_path: PathBuf,
        range: Range,
        context: serde_json::Value,
    },
    Item {
        item: serde_json::Value,
    },
}

/// Aggregated validation failure: every missing or wrong-typed field.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid parameters: {}", issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

/// Outcome of type-checking one field in isolation.
enum Field<T> {
    Absent,
    Invalid,
    Present(T),
}

#[derive(Default)]
struct Validator {
    issues: Vec<String>,
}

impl Validator {
    fn text(&mut self, name: &str, value: &Option<serde_json::Value>) -> Field<String> {
        match value {
            None => Field::Absent,
            Some(serde_json::Value::String(s)) => Field::Present(s.clone()),
            Some(_) => {
                self.issues.push(format!("{name} must be a string"));
                Field::Invalid
            }
        }
    }

    fn coordinate(&mut self, name: &str, value: &Option<serde_json::Value>) -> Field<u32> {
        match value {
            None => Field::Absent,
            Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => Field::Present(n),
                None => {
                    self.issues
                        .push(format!("{name} must be a non-negative integer"));
                    Field::Invalid
                }
            },
        }
    }

    fn object(&mut self, name: &str, value: &Option<serde_json::Value>) -> Field<serde_json::Value> {
        match value {
            None => Field::Absent,
            Some(v @ serde_json::Value::Object(_)) => Field::Present(v.clone()),
            Some(_) => {
                self.issues.push(format!("{name} must be an object"));
                Field::Invalid
            }
        }
    }

    fn require<T>(&mut self, name: &str, field: Field<T>) -> Option<T> {
        match field {
            Field::Present(value) => Some(value),
            Field::Absent => {
                self.issues.push(format!("{name} is required"));
                None
            }
            // The type issue was recorded when the field was checked.
            Field::Invalid => None,
        }
    }
}

impl ActionRequest {
    /// Validate against the action's contract.
    ///
    /// Checks every field: required ones must be present and well-typed, and
    /// any other supplied field must still carry its declared type. All
    /// problems are reported together.
    pub fn validate(&self) -> Result<Invocation, ValidationError> {
        let mut v = Validator::default();

        // Type-check everything that was supplied, needed or not.
        let file_path = v.text("file_path", &self.file_path);
        let line = v.coordinate("line", &self.line);
        let character = v.coordinate("character", &self.character);
        let query = v.text("query", &self.query);
        let start_line = v.coordinate("start_line", &self.start_line);
        let start_char = v.coordinate("start_char", &self.start_char);
        let end_line = v.coordinate("end_line", &self.end_line);
        let end_char = v.coordinate("end_char", &self.end_char);
        let new_name = v.text("newName", &self.new_name);
        let context = v.object("context", &self.context);
        let item = v.object("item", &self.item);
        let formatting_options = v.object("formattingOptions", &self.formatting_options);

        let invocation = match self.action.shape() {
            Shape::Position => {
                let file_path = v.require("file_path", file_path);
                let line = v.require("line", line);
                let character = v.require("character", character);
                match (file_path, line, character) {
                    (Some(file_path), Some(line), Some(character)) => Some(Invocation::Position {
                        file_path: PathBuf::from(file_path),
                        position: Position::new(line, character),
                    }),
                    _ => None,
                }
            }
            Shape::Rename => {
                let file_path = v.require("file_path", file_path);
                let line = v.require("line", line);
                let character = v.require("character", character);
                let new_name = v.require("newName", new_name);
                match (file_path, line, character, new_name) {
                    (Some(file_path), Some(line), Some(character), Some(new_name)) => {
                        Some(Invocation::Rename {
                            file_path: PathBuf::from(file_path),
                            position: Position::new(line, character),
                            new_name,
                        })
                    }
                    _ => None,
                }
            }
            Shape::Document => v.require("file_path", file_path).map(|file_path| {
                Invocation::Document {
                    file_path: PathBuf::from(file_path),
                }
            }),
            Shape::Format => {
                let file_path = v.require("file_path", file_path);
                let options = v.require("formattingOptions", formatting_options);
                match (file_path, options) {
                    (Some(file_path), Some(options)) => Some(Invocation::Format {
                        file_path: PathBuf::from(file_path),
                        options,
                    }),
                    _ => None,
                }
            }
            Shape::Query => v
                .require("query", query)
                .map(|query| Invocation::Query { query }),
            Shape::RangeContext => {
                let file_path = v.require("file_path", file_path);
                let start_line = v.require("start_line", start_line);
                let start_char = v.require("start_char", start_char);
                let end_line = v.require("end_line", end_line);
                let end_char = v.require("end_char", end_char);
                let context = v.require("context", context);
                match (file_path, start_line, start_char, end_line, end_char, context) {
                    (
                        Some(file_path),
                        Some(start_line),
                        Some(start_char),
                        Some(end_line),
                        Some(end_char),
                        Some(context),
                    ) => Some(Invocation::RangeContext {
                        file_path: PathBuf::from(file_path),
                        range: Range::new(
                            Position::new(start_line, start_char),
                            Position::new(end_line, end_char),
                        ),
                        context,
                    }),
                    _ => None,
                }
            }
            Shape::Item => v.require("item", item).map(|item| Invocation::Item { item }),
        };

        match invocation {
            Some(invocation) if v.issues.is_empty() => Ok(invocation),
            _ => Err(ValidationError { issues: v.issues }),
        }
    }
}
