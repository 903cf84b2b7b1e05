//! The instruction model.
//!
//! Execution is driven by an explicit stack of tagged instructions rather
//! than tree-walking: each statement or composite expression *lowers* into a
//! sequence of instructions pushed onto the stack (reversed, so the top is
//! the next to run). This makes every suspension point a plain data boundary
//! — the whole continuation is a serializable `Vec<Instruction>`.
//!
//! Operand discipline: instructions consume their inputs from the value
//! stack and push their outputs back onto it. `PopDiscard` moves a finished
//! expression result into `last_result`.

use serde::{Deserialize, Serialize};

use crate::{
    ast::{BinaryOp, ContextMode, Expr, Statement, UnaryOp},
    frame::{AiOperation, ScopeKind},
    types::TypeAnnotation,
    value::Value,
};

/// One slot of a lowered template literal.
///
/// `Name` slots resolve directly against the scope chain at build time so an
/// undefined simple name can stay literal; `Stack` slots take the value of an
/// already-evaluated interpolation expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSlot {
    Text(String),
    Name { raw: String, name: String },
    Stack,
}

/// A single instruction. The stack executes in LIFO order (top = next).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Lower a statement into further instructions.
    ExecStatement(Statement),
    /// Evaluate an expression; leaves exactly one value on the value stack.
    ExecExpression(Expr),
    /// Push a literal value.
    PushValue(Value),
    /// Pop the top value into `last_result`.
    PopDiscard,
    /// Pop a value and bind it as a new variable in the current frame.
    DeclareVar {
        name: String,
        annotation: Option<TypeAnnotation>,
        is_const: bool,
    },
    /// Pop a value, write it through the scope chain, and push it back
    /// (assignment is an expression).
    AssignVar { name: String },
    /// Pop an evaluated config object and bind it as an immutable model.
    DeclareModel { name: String },
    /// Pop rhs then lhs, push the combined result. `And`/`Or` never reach
    /// this instruction; they lower through `LogicalBranch`.
    BinaryOp(BinaryOp),
    /// Pop the lhs of a short-circuit operator; either settle the result or
    /// schedule the rhs followed by `LogicalRhs`.
    LogicalBranch { op: BinaryOp, rhs: Expr },
    /// Validates the rhs of a short-circuit operator evaluated to a boolean.
    LogicalRhs,
    UnaryOp(UnaryOp),
    /// Pop index then target, push the element.
    Index,
    /// Pop (end?)(start?) then target, push the inclusive slice.
    Slice { has_start: bool, has_end: bool },
    /// Pop `len` values (evaluated left to right), push an array.
    BuildArray { len: usize },
    /// Pop one value per key (evaluated in key order), push a JSON object.
    BuildObject { keys: Vec<String> },
    /// Pop end then start, push the inclusive integer range as an array.
    BuildRange,
    /// Assemble a template literal from literal, name, and stack slots.
    BuildTemplate { layout: Vec<TemplateSlot> },
    /// Pop a JSON object, push the named member.
    MemberGet { property: String },
    /// Pop `argc` arguments then the receiver; dispatch a member method.
    /// `target_var` carries the receiver's name when it was a plain
    /// identifier so mutating methods write back through the scope chain.
    CallMethod {
        method: String,
        argc: usize,
        target_var: Option<String>,
    },
    /// Pop `argc` arguments and invoke the named callable: a declared
    /// function pushes a frame; a tool or imported function suspends.
    Invoke { name: String, argc: usize },
    /// Pop a model (if present) then the prompt; suspend for the provider
    /// (`do`/`vibe`) or the user (`ask`).
    AiOp {
        op: AiOperation,
        has_model: bool,
        mode: ContextMode,
        expected: Option<TypeAnnotation>,
    },
    /// Suspend for the host-language evaluator.
    CallTsBlock {
        code: String,
        expected: Option<TypeAnnotation>,
    },
    /// Pop the loop source, validate it, and start iteration.
    ForInit {
        var: String,
        body: Vec<Statement>,
        mode: ContextMode,
    },
    /// Advance to the next iteration or close the loop scope.
    ForNext {
        var: String,
        body: Vec<Statement>,
        mode: ContextMode,
        items: Vec<Value>,
        index: usize,
    },
    /// Pop the condition; on true run the body and re-test, on false close
    /// the loop scope.
    WhileBranch {
        cond: Expr,
        body: Vec<Statement>,
        mode: ContextMode,
    },
    /// Pop the condition and run one of the branches.
    IfBranch {
        then_branch: Vec<Statement>,
        else_branch: Option<Vec<Statement>>,
    },
    /// Open / close a locals-only lexical block (loop iteration bodies).
    EnterBlock,
    ExitBlock,
    /// Open / close an entry-logged dynamic scope.
    ScopeEnter {
        scope: ScopeKind,
        label: Option<String>,
    },
    ScopeExit {
        scope: ScopeKind,
        label: Option<String>,
        mode: ContextMode,
    },
    /// Pop the return value (when present), type-check it against the
    /// frame's declared return type, pop the frame.
    Return { has_value: bool },
}

impl Instruction {
    /// Short tag for tracing.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ExecStatement(_) => "exec_statement",
            Self::ExecExpression(_) => "exec_expression",
            Self::PushValue(_) => "push_value",
            Self::PopDiscard => "pop_discard",
            Self::DeclareVar { .. } => "declare_var",
            Self::AssignVar { .. } => "assign_var",
            Self::DeclareModel { .. } => "declare_model",
            Self::BinaryOp(_) => "binary_op",
            Self::LogicalBranch { .. } => "logical_branch",
            Self::LogicalRhs => "logical_rhs",
            Self::UnaryOp(_) => "unary_op",
            Self::Index => "index",
            Self::Slice { .. } => "slice",
            Self::BuildArray { .. } => "build_array",
            Self::BuildObject { .. } => "build_object",
            Self::BuildRange => "build_range",
            Self::BuildTemplate { .. } => "build_template",
            Self::MemberGet { .. } => "member_get",
            Self::CallMethod { .. } => "call_method",
            Self::Invoke { .. } => "invoke",
            Self::AiOp { op: AiOperation::Do, .. } => "ai_do",
            Self::AiOp { op: AiOperation::Vibe, .. } => "ai_vibe",
            Self::AiOp { op: AiOperation::Ask, .. } => "ai_ask",
            Self::CallTsBlock { .. } => "call_ts_block",
            Self::ForInit { .. } => "for_init",
            Self::ForNext { .. } => "for_next",
            Self::WhileBranch { .. } => "while_test",
            Self::IfBranch { .. } => "if_test",
            Self::EnterBlock => "enter_block",
            Self::ExitBlock => "exit_block",
            Self::ScopeEnter { .. } => "scope_enter",
            Self::ScopeExit { .. } => "scope_exit",
            Self::Return { .. } => "return",
        }
    }
}
