//! Context projection.
//!
//! Pure functions from the call-stack entry logs to the prompt context handed
//! to a model. Projection never mutates state: it maps each [`FrameEntry`]
//! into a [`ContextEntry`] annotated with its frame, filtering out entries
//! that are configuration rather than data (model and prompt variables).
//!
//! The rendered format is normative — tests assert exact strings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    frame::{AiOperation, EntrySource, Frame, FrameEntry, PromptToolCall, ScopeKind},
    types::TypeAnnotation,
    value::{Json, Value},
};

/// A projected entry, ready for serialization into a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub frame_name: String,
    /// 0-based position of the owning frame from the bottom of the stack.
    pub frame_depth: usize,
    pub kind: ContextEntryKind,
}

/// The projected payload. Mirrors [`FrameEntry`] minus the filtered variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextEntryKind {
    Variable {
        name: String,
        /// Rendered type: the annotation when present, otherwise the value's
        /// own type name.
        type_name: String,
        value: Value,
        source: Option<EntrySource>,
    },
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
    Summary {
        text: String,
    },
    ToolCall {
        tool_name: String,
        args: IndexMap<String, Json>,
        result: Option<Json>,
        error: Option<String>,
    },
}

/// Projects one frame's entries with frame attribution.
///
/// Variables annotated `model` or `prompt` are filtered out: they are
/// instructions to the machinery, not data the model should see.
#[must_use]
pub fn project_frame(frame: &Frame, depth: usize) -> Vec<ContextEntry> {
    project_entries(frame.entries(), &frame.name, depth)
}

/// Projects an arbitrary entry slice (used for the compress bundle, which
/// owns only the slice from its `ScopeEnter` onward).
#[must_use]
pub fn project_entries(entries: &[FrameEntry], frame_name: &str, depth: usize) -> Vec<ContextEntry> {
    entries
        .iter()
        .filter_map(|entry| {
            let kind = match entry {
                FrameEntry::Variable {
                    name,
                    value,
                    annotation,
                    source,
                    ..
                } => {
                    if matches!(annotation, Some(TypeAnnotation::Model | TypeAnnotation::Prompt)) {
                        return None;
                    }
                    // tool and function bindings are configuration too, even
                    // though they carry no annotation
                    if matches!(
                        value,
                        Value::Model(_) | Value::Tool(_) | Value::VibeFunction(_) | Value::TsFunction(_)
                    ) {
                        return None;
                    }
                    ContextEntryKind::Variable {
                        name: name.clone(),
                        type_name: annotation
                            .as_ref()
                            .map_or_else(|| value.type_name().to_owned(), ToString::to_string),
                        value: value.clone(),
                        source: *source,
                    }
                }
                FrameEntry::Prompt {
                    ai_type,
                    prompt,
                    response,
                    tool_calls,
                } => ContextEntryKind::Prompt {
                    ai_type: *ai_type,
                    prompt: prompt.clone(),
                    response: response.clone(),
                    tool_calls: tool_calls.clone(),
                },
                FrameEntry::ScopeEnter { scope, label } => ContextEntryKind::ScopeEnter {
                    scope: *scope,
                    label: label.clone(),
                },
                FrameEntry::ScopeExit { scope, label } => ContextEntryKind::ScopeExit {
                    scope: *scope,
                    label: label.clone(),
                },
                FrameEntry::Summary { text } => ContextEntryKind::Summary { text: text.clone() },
                FrameEntry::ToolCall {
                    tool_name,
                    args,
                    result,
                    error,
                } => ContextEntryKind::ToolCall {
                    tool_name: tool_name.clone(),
                    args: args.clone(),
                    result: result.clone(),
                    error: error.clone(),
                },
            };
            Some(ContextEntry {
                frame_name: frame_name.to_owned(),
                frame_depth: depth,
                kind,
            })
        })
        .collect()
}

/// Projects only the current (top-of-stack) frame.
#[must_use]
pub fn build_local_context(call_stack: &[Frame]) -> Vec<ContextEntry> {
    match call_stack.last() {
        Some(frame) => project_frame(frame, call_stack.len() - 1),
        None => Vec::new(),
    }
}

/// Projects every frame in stack order, bottom first.
#[must_use]
pub fn build_global_context(call_stack: &[Frame]) -> Vec<ContextEntry> {
    call_stack
        .iter()
        .enumerate()
        .flat_map(|(depth, frame)| project_frame(frame, depth))
        .collect()
}

/// Options for [`format_context_for_ai`].
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// When false, prompt entries (`-->` lines and their tool calls) are
    /// omitted — the rendered context carries data only.
    pub include_instructions: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            include_instructions: true,
        }
    }
}

/// The rendered context: the text block plus a name → rendered-value map of
/// the variables it mentions (latest snapshot wins).
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedContext {
    pub text: String,
    pub variables: IndexMap<String, String>,
}

/// Renders projected entries as the indented tree supplied to models.
///
/// Layout, spelled out because tests pin it:
/// - two spaces of indentation per frame depth; entry lines one level deeper
///   than their frame header;
/// - frame headers: `<name> (entry)` at depth 0, `(current scope)` for the
///   deepest frame, `(depth N)` otherwise;
/// - `- name (type): value` for variables, `<-- ...` when the value came
///   from the model or the user;
/// - `--> <op>: "<prompt>"` for prompts, with `[tool]` / `[result]` /
///   `[error]` lines for embedded tool calls;
/// - `==> <kind> <label>` / `<== <kind> <label>` scope markers;
/// - `[summary] <text>` for compression products.
#[must_use]
pub fn format_context_for_ai(entries: &[ContextEntry], options: FormatOptions) -> FormattedContext {
    let mut text = String::new();
    let mut variables = IndexMap::new();
    let max_depth = entries.iter().map(|e| e.frame_depth).max().unwrap_or(0);
    let mut current_frame: Option<(usize, &str)> = None;

    for entry in entries {
        if !options.include_instructions && matches!(entry.kind, ContextEntryKind::Prompt { .. }) {
            continue;
        }
        let depth = entry.frame_depth;
        if current_frame != Some((depth, entry.frame_name.as_str())) {
            current_frame = Some((depth, entry.frame_name.as_str()));
            let role = if depth == max_depth {
                "(current scope)".to_owned()
            } else if depth == 0 {
                "(entry)".to_owned()
            } else {
                format!("(depth {depth})")
            };
            push_line(&mut text, depth + 1, &format!("{} {role}", entry.frame_name));
        }
        let indent = depth + 2;
        match &entry.kind {
            ContextEntryKind::Variable {
                name,
                type_name,
                value,
                source,
            } => {
                let marker = if source.is_some() { "<--" } else { "-" };
                let rendered = value.render();
                push_line(&mut text, indent, &format!("{marker} {name} ({type_name}): {rendered}"));
                variables.insert(name.clone(), rendered);
            }
            ContextEntryKind::Prompt {
                ai_type,
                prompt,
                tool_calls,
                ..
            } => {
                push_line(&mut text, indent, &format!("--> {ai_type}: {}", quote(prompt)));
                for call in tool_calls {
                    push_tool_lines(&mut text, indent, &call.name, &call.args, call.result.as_ref(), call.error.as_deref());
                }
            }
            ContextEntryKind::ScopeEnter { scope, label } => {
                push_line(&mut text, indent, &scope_marker("==>", *scope, label.as_deref()));
            }
            ContextEntryKind::ScopeExit { scope, label } => {
                push_line(&mut text, indent, &scope_marker("<==", *scope, label.as_deref()));
            }
            ContextEntryKind::Summary { text: summary } => {
                push_line(&mut text, indent, &format!("[summary] {summary}"));
            }
            ContextEntryKind::ToolCall {
                tool_name,
                args,
                result,
                error,
            } => {
                push_tool_lines(&mut text, indent, tool_name, args, result.as_ref(), error.as_deref());
            }
        }
    }

    // drop the trailing newline so the block composes cleanly
    if text.ends_with('\n') {
        text.pop();
    }
    FormattedContext { text, variables }
}

fn push_line(out: &mut String, indent: usize, line: &str) {
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push_str(line);
    out.push('\n');
}

fn push_tool_lines(
    out: &mut String,
    indent: usize,
    name: &str,
    args: &IndexMap<String, Json>,
    result: Option<&Json>,
    error: Option<&str>,
) {
    let args_json = Json::Object(args.clone()).to_compact_string();
    push_line(out, indent, &format!("[tool] {name}({args_json})"));
    if let Some(error) = error {
        push_line(out, indent, &format!("[error] {error}"));
    } else if let Some(result) = result {
        push_line(out, indent, &format!("[result] {}", result.to_compact_string()));
    }
}

fn scope_marker(arrow: &str, scope: ScopeKind, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{arrow} {scope} {label}"),
        None => format!("{arrow} {scope}"),
    }
}

/// JSON string quoting: stable escapes for quotes and newlines keep the
/// context block line-oriented.
fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("{text:?}"))
}
