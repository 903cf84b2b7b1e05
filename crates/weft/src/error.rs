//! Runtime error types.
//!
//! Every failure inside a step is represented as a [`RunError`] carrying a
//! kind tag from the taxonomy, a human-readable message, and an optional
//! source location. Errors are never silently recovered: the stepper records
//! the error into the state (freezing both stacks) and surfaces it to the
//! driver.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Source location in the original program text.
///
/// Lines and columns are 1-based, matching what the parser reports. Locations
/// are best-effort: AST nodes built programmatically may not carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Error-kind tags for the runtime taxonomy.
///
/// Uses strum derives so the tag renders as a stable string in diagnostics
/// (e.g. `ErrorKind::Type` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Runtime type failures: expected boolean/number/json/array, non-finite
    /// number, invalid JSON string, element type mismatch.
    #[strum(serialize = "TypeError")]
    Type,
    /// Lookup of an identifier that is not bound on the scope chain.
    #[strum(serialize = "ReferenceError")]
    Reference,
    /// Writes to constants, functions, models, imports, or unknown names.
    #[strum(serialize = "AssignmentError")]
    Assignment,
    /// Out-of-range indexes, inverted slice bounds, inverted ranges.
    #[strum(serialize = "StructuralError")]
    Structural,
    /// External collaborator failures: tools, providers, host-escape blocks,
    /// unresolved imports.
    #[strum(serialize = "ResourceError")]
    Resource,
    /// Violations of the pause/resume protocol: resume without a matching
    /// pending bundle, stack underflow, tool-round overflow.
    #[strum(serialize = "ProtocolError")]
    Protocol,
}

/// A runtime error produced during stepping or resuming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<CodeLoc>,
}

impl RunError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
        }
    }

    /// Attaches a source location if one is not already present.
    #[must_use]
    pub fn with_loc(mut self, loc: Option<CodeLoc>) -> Self {
        if self.loc.is_none() {
            self.loc = loc;
        }
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    pub fn assignment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Assignment, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Structural, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {} ({loc})", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RunError {}
