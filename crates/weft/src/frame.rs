//! Call frames and the ordered entry log.
//!
//! A [`Frame`] owns a locals table (always the *current* value of each
//! variable) and an append-only [`FrameEntry`] history (value *snapshots* at
//! the moment of each write). The two never alias: entries hold deep copies,
//! so mutating a live variable cannot rewrite history.
//!
//! The only operations allowed to rewrite the log are the retention modes
//! applied at scope exit: `forget` drops a scope's slice, `compress` replaces
//! it with a single summary entry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::Display;

use crate::{
    error::{RunError, RunResult},
    types::{TypeAnnotation, coerce},
    value::{Json, Value},
};

/// Name of the program-level frame.
pub const ENTRY_FRAME: &str = "<entry>";

/// Where a bound value came from, when it came from outside the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Ai,
    User,
}

/// Which LLM primitive produced a prompt entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AiOperation {
    Do,
    Vibe,
    Ask,
}

/// The dynamic scope kinds that bracket entry-log slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    For,
    While,
    If,
    Block,
}

/// A tool invocation made by a model during a single LLM round trip.
///
/// Exactly one of `result`/`error` is set once the call has executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptToolCall {
    pub name: String,
    pub args: IndexMap<String, Json>,
    pub result: Option<Json>,
    pub error: Option<String>,
}

/// A variable binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub value: Value,
    pub annotation: Option<TypeAnnotation>,
    pub is_const: bool,
}

impl Variable {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            annotation: None,
            is_const: false,
        }
    }

    #[must_use]
    pub fn typed(value: Value, annotation: Option<TypeAnnotation>) -> Self {
        Self {
            value,
            annotation,
            is_const: false,
        }
    }

    #[must_use]
    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }
}

/// One event in a frame's ordered history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameEntry {
    /// Emitted on declaration and on every reassignment. `value` is a deep
    /// copy taken at the point of write.
    Variable {
        name: String,
        value: Value,
        annotation: Option<TypeAnnotation>,
        is_const: bool,
        source: Option<EntrySource>,
    },
    /// Emitted when an LLM invocation resolves.
    Prompt {
        ai_type: AiOperation,
        prompt: String,
        response: Option<Value>,
        tool_calls: Vec<PromptToolCall>,
    },
    ScopeEnter {
        scope: ScopeKind,
        label: Option<String>,
    },
    ScopeExit {
        scope: ScopeKind,
        label: Option<String>,
    },
    /// Product of a `compress` retention operation.
    Summary { text: String },
    /// A tool invoked at the language level (outside any LLM round trip).
    ToolCall {
        tool_name: String,
        args: IndexMap<String, Json>,
        result: Option<Json>,
        error: Option<String>,
    },
}

/// A scope that has been entered but not yet exited, with the index of its
/// `ScopeEnter` entry so retention modes know which slice they own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenScope {
    pub kind: ScopeKind,
    pub label: Option<String>,
    pub entry_index: usize,
}

/// A call-stack entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    locals: IndexMap<String, Variable>,
    entries: Vec<FrameEntry>,
    /// Instruction-stack length to restore when this frame returns.
    /// `None` for the entry frame.
    pub return_to: Option<usize>,
    /// Declared return type of the function this frame executes.
    pub return_type: Option<TypeAnnotation>,
    /// Entry-logged scopes currently open, innermost last.
    open_scopes: Vec<OpenScope>,
    /// Lexical scopes for block-scoped locals; names declared while a scope
    /// is open are removed from `locals` when it closes.
    lexical_scopes: Vec<SmallVec<[String; 4]>>,
}

impl Frame {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locals: IndexMap::new(),
            entries: Vec::new(),
            return_to: None,
            return_type: None,
            open_scopes: Vec::new(),
            lexical_scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    #[must_use]
    pub fn locals(&self) -> &IndexMap<String, Variable> {
        &self.locals
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.locals.get(name)
    }

    pub fn append_entry(&mut self, entry: FrameEntry) {
        self.entries.push(entry);
    }

    /// Declares a new variable, snapshotting its value into the log.
    pub fn declare(&mut self, name: &str, variable: Variable, source: Option<EntrySource>) -> RunResult<()> {
        if self.locals.contains_key(name) {
            return Err(RunError::assignment(format!(
                "Variable '{name}' is already declared"
            )));
        }
        self.entries.push(FrameEntry::Variable {
            name: name.to_owned(),
            value: variable.value.clone(),
            annotation: variable.annotation.clone(),
            is_const: variable.is_const,
            source,
        });
        if let Some(scope) = self.lexical_scopes.last_mut() {
            scope.push(name.to_owned());
        }
        self.locals.insert(name.to_owned(), variable);
        Ok(())
    }

    /// Reassigns an existing variable in this frame, returning the stored
    /// value (which may differ from the input when the annotation coerced it).
    ///
    /// Returns `Ok(None)` when the name is not bound here so the caller can
    /// continue down the scope chain. Constants, models, functions, and
    /// imports refuse the write; annotated variables re-check their type.
    pub fn try_assign(&mut self, name: &str, value: Value, source: Option<EntrySource>) -> RunResult<Option<Value>> {
        let Some(variable) = self.locals.get_mut(name) else {
            return Ok(None);
        };
        if variable.is_const {
            return Err(RunError::assignment(reassignment_message(name, &variable.value)));
        }
        let value = match &variable.annotation {
            Some(annotation) => coerce(value, annotation).map_err(RunError::from)?,
            None => value,
        };
        variable.value = value.clone();
        let annotation = variable.annotation.clone();
        let is_const = variable.is_const;
        self.entries.push(FrameEntry::Variable {
            name: name.to_owned(),
            value: value.clone(),
            annotation,
            is_const,
            source,
        });
        Ok(Some(value))
    }

    /// Updates a variable's value in place without logging a snapshot.
    ///
    /// This is the path for mutating methods (`push`/`pop`): mutation is not
    /// reassignment, so no entry is emitted — prior snapshots are deep copies
    /// and stay intact. Constants refuse mutation.
    ///
    /// Returns `Ok(false)` when the name is not bound in this frame.
    pub fn try_mutate(&mut self, name: &str, value: Value) -> RunResult<bool> {
        let Some(variable) = self.locals.get_mut(name) else {
            return Ok(false);
        };
        if variable.is_const {
            return Err(RunError::assignment(format!("Cannot mutate constant '{name}'")));
        }
        let value = match &variable.annotation {
            Some(annotation) => coerce(value, annotation).map_err(RunError::from)?,
            None => value,
        };
        variable.value = value;
        Ok(true)
    }

    // --- lexical blocks -----------------------------------------------------

    /// Opens a locals-only block (loop iteration bodies). Nothing is logged.
    pub fn enter_block(&mut self) {
        self.lexical_scopes.push(SmallVec::new());
    }

    /// Closes the innermost lexical block, dropping its locals. Snapshots in
    /// the entry log are untouched.
    pub fn exit_block(&mut self) -> RunResult<()> {
        let Some(names) = self.lexical_scopes.pop() else {
            return Err(RunError::protocol("exit_block without a matching enter_block"));
        };
        for name in names {
            self.locals.shift_remove(&name);
        }
        Ok(())
    }

    // --- logged scopes ------------------------------------------------------

    /// Opens an entry-logged dynamic scope.
    pub fn enter_scope(&mut self, kind: ScopeKind, label: Option<String>) {
        self.open_scopes.push(OpenScope {
            kind,
            label: label.clone(),
            entry_index: self.entries.len(),
        });
        self.entries.push(FrameEntry::ScopeEnter { scope: kind, label });
        self.enter_block();
    }

    /// Closes the innermost scope, keeping its entries and appending the
    /// matching `ScopeExit`.
    pub fn exit_scope_verbose(&mut self) -> RunResult<()> {
        let scope = self.close_scope()?;
        self.entries.push(FrameEntry::ScopeExit {
            scope: scope.kind,
            label: scope.label,
        });
        Ok(())
    }

    /// Closes the innermost scope and removes its `ScopeEnter` and every
    /// entry appended since it.
    pub fn exit_scope_forget(&mut self) -> RunResult<()> {
        let scope = self.close_scope()?;
        self.entries.truncate(scope.entry_index);
        Ok(())
    }

    /// Closes the innermost scope for compression. Entries are left in place
    /// until the summary arrives; returns the scope so the pending bundle can
    /// record which slice to replace.
    pub fn begin_compress(&mut self) -> RunResult<OpenScope> {
        self.close_scope()
    }

    /// Replaces the slice from the scope's `ScopeEnter` to the end of the log
    /// with a single summary entry.
    pub fn apply_summary(&mut self, enter_index: usize, text: String) {
        self.entries.truncate(enter_index);
        self.entries.push(FrameEntry::Summary { text });
    }

    fn close_scope(&mut self) -> RunResult<OpenScope> {
        let Some(scope) = self.open_scopes.pop() else {
            return Err(RunError::protocol("scope_exit without a matching scope_enter"));
        };
        self.exit_block()?;
        Ok(scope)
    }
}

/// The reassignment error message names what kind of binding refused the
/// write.
fn reassignment_message(name: &str, value: &Value) -> String {
    match value {
        Value::Model(_) => format!("Cannot assign to model '{name}'"),
        Value::Tool(_) => format!("Cannot assign to tool '{name}'"),
        Value::VibeFunction(_) => format!("Cannot assign to function '{name}'"),
        Value::TsFunction(_) => format!("Cannot assign to imported name '{name}'"),
        _ => format!("Cannot assign to constant '{name}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_rejects_duplicates() {
        let mut frame = Frame::new(ENTRY_FRAME);
        frame.declare("x", Variable::new(Value::Number(1.0)), None).unwrap();
        let err = frame
            .declare("x", Variable::new(Value::Number(2.0)), None)
            .unwrap_err();
        assert!(err.message.contains("already declared"));
    }

    #[test]
    fn entries_snapshot_values_at_write_time() {
        let mut frame = Frame::new(ENTRY_FRAME);
        frame
            .declare("items", Variable::new(Value::Array(vec![Value::Number(1.0)])), None)
            .unwrap();
        frame
            .try_assign(
                "items",
                Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
                None,
            )
            .unwrap();

        let FrameEntry::Variable { value, .. } = &frame.entries()[0] else {
            panic!("expected variable entry");
        };
        assert_eq!(value, &Value::Array(vec![Value::Number(1.0)]));
    }

    #[test]
    fn const_refuses_reassignment() {
        let mut frame = Frame::new(ENTRY_FRAME);
        frame
            .declare("CONFIG", Variable::new(Value::Text("original".into())).constant(), None)
            .unwrap();
        let err = frame
            .try_assign("CONFIG", Value::Text("x".into()), None)
            .unwrap_err();
        assert_eq!(err.message, "Cannot assign to constant 'CONFIG'");
    }

    #[test]
    fn forget_drops_scope_slice_inclusive() {
        let mut frame = Frame::new(ENTRY_FRAME);
        frame.declare("sum", Variable::new(Value::Number(0.0)), None).unwrap();
        frame.enter_scope(ScopeKind::For, Some("i".into()));
        frame.declare("i", Variable::new(Value::Number(1.0)), None).unwrap();
        frame.try_assign("sum", Value::Number(1.0), None).unwrap();
        frame.exit_scope_forget().unwrap();

        assert_eq!(frame.entries().len(), 1);
        let FrameEntry::Variable { name, value, .. } = &frame.entries()[0] else {
            panic!("expected variable entry");
        };
        assert_eq!(name, "sum");
        assert_eq!(value, &Value::Number(0.0));
        // the loop variable's binding is gone along with its lexical scope
        assert!(frame.get("i").is_none());
    }

    #[test]
    fn compress_replaces_slice_with_summary() {
        let mut frame = Frame::new(ENTRY_FRAME);
        frame.enter_scope(ScopeKind::While, None);
        frame.declare("n", Variable::new(Value::Number(3.0)), None).unwrap();
        let scope = frame.begin_compress().unwrap();
        frame.apply_summary(scope.entry_index, "three rounds".into());

        assert_eq!(frame.entries().len(), 1);
        assert_eq!(
            frame.entries()[0],
            FrameEntry::Summary {
                text: "three rounds".into()
            }
        );
    }

    #[test]
    fn block_exit_drops_block_locals_only() {
        let mut frame = Frame::new(ENTRY_FRAME);
        frame.declare("outer", Variable::new(Value::Number(1.0)), None).unwrap();
        frame.enter_block();
        frame.declare("inner", Variable::new(Value::Number(2.0)), None).unwrap();
        frame.exit_block().unwrap();

        assert!(frame.get("outer").is_some());
        assert!(frame.get("inner").is_none());
        // both declarations remain in the log
        assert_eq!(frame.entries().len(), 2);
    }
}
