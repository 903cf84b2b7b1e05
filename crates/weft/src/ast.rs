//! Abstract syntax consumed by the interpreter.
//!
//! The parser collaborator produces this tree; the interpreter never sees
//! source text. Constructors keep programmatic construction (tests, embedders)
//! terse: every statement defaults to no source location, and `Statement::at`
//! attaches one.

use serde::{Deserialize, Serialize};

use crate::{
    error::CodeLoc,
    types::TypeAnnotation,
    value::ToolParam,
};

/// Retention / context mode attached to loops, calls, and AI operations.
///
/// On a scope exit, `Default` behaves as `verbose`. On an AI call it selects
/// which context projection rides along with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextMode {
    Default,
    Verbose,
    Forget,
    Compress { prompt: Option<String> },
}

/// Binary operators. `And`/`Or` short-circuit and are lowered specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// `and`/`or` evaluate their right operand lazily.
    #[must_use]
    pub fn is_short_circuit(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// One segment of a backtick template literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    /// Literal text between interpolations.
    Text(String),
    /// A `${expr}` interpolation. The raw source text is kept so an undefined
    /// simple-name interpolation can be left literal.
    Expr { raw: String, expr: Expr },
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Boolean(bool),
    Number(f64),
    /// A plain string literal; `{name}` interpolation happens at evaluation.
    Str(String),
    /// A backtick template literal with `${expr}` interpolations.
    Template(Vec<TemplatePart>),
    Identifier(String),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Assign {
        name: String,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        mode: Option<ContextMode>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `do "prompt" model mode` — a direct model instruction.
    Do {
        prompt: Box<Expr>,
        model: Option<Box<Expr>>,
        mode: ContextMode,
    },
    /// `vibe "prompt" model mode` — a generative model call with tools.
    Vibe {
        prompt: Box<Expr>,
        model: Option<Box<Expr>>,
        mode: ContextMode,
    },
    /// `ask "prompt"` — a question to the user.
    Ask { prompt: Box<Expr> },
    /// An opaque host-language escape block.
    TsBlock { code: String },
}

impl Expr {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    #[must_use]
    pub fn number(value: f64) -> Self {
        Self::Number(value)
    }

    #[must_use]
    pub fn ident(name: impl Into<String>) -> Self {
        Self::Identifier(name.into())
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    #[must_use]
    pub fn index(object: Self, index: Self) -> Self {
        Self::Index {
            object: Box::new(object),
            index: Box::new(index),
        }
    }

    #[must_use]
    pub fn slice(object: Self, start: Option<Self>, end: Option<Self>) -> Self {
        Self::Slice {
            object: Box::new(object),
            start: start.map(Box::new),
            end: end.map(Box::new),
        }
    }

    #[must_use]
    pub fn member(object: Self, property: impl Into<String>) -> Self {
        Self::Member {
            object: Box::new(object),
            property: property.into(),
        }
    }

    #[must_use]
    pub fn call(callee: Self, args: Vec<Self>) -> Self {
        Self::Call {
            callee: Box::new(callee),
            args,
            mode: None,
        }
    }

    #[must_use]
    pub fn assign(name: impl Into<String>, value: Self) -> Self {
        Self::Assign {
            name: name.into(),
            value: Box::new(value),
        }
    }

    #[must_use]
    pub fn do_op(prompt: Self, model: Option<Self>, mode: ContextMode) -> Self {
        Self::Do {
            prompt: Box::new(prompt),
            model: model.map(Box::new),
            mode,
        }
    }

    #[must_use]
    pub fn vibe(prompt: Self, model: Option<Self>, mode: ContextMode) -> Self {
        Self::Vibe {
            prompt: Box::new(prompt),
            model: model.map(Box::new),
            mode,
        }
    }

    #[must_use]
    pub fn ask(prompt: Self) -> Self {
        Self::Ask {
            prompt: Box::new(prompt),
        }
    }
}

/// A function parameter with optional annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeAnnotation>,
}

impl Param {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
        }
    }

    #[must_use]
    pub fn typed(name: impl Into<String>, annotation: TypeAnnotation) -> Self {
        Self {
            name: name.into(),
            annotation: Some(annotation),
        }
    }
}

/// A declared function.
///
/// `mode` is the function-level context mode: parsed and carried, not applied
/// at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Vec<Statement>,
    pub mode: ContextMode,
}

/// Statement payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Let {
        name: String,
        annotation: Option<TypeAnnotation>,
        init: Expr,
    },
    Const {
        name: String,
        annotation: Option<TypeAnnotation>,
        init: Expr,
    },
    Model {
        name: String,
        config: Expr,
    },
    ToolDecl {
        name: String,
        description: String,
        params: Vec<ToolParam>,
    },
    Function(FunctionDecl),
    Import {
        module: String,
        names: Vec<String>,
    },
    Export(Box<Statement>),
    Return {
        value: Option<Expr>,
    },
    If {
        cond: Expr,
        then_branch: Vec<Statement>,
        else_branch: Option<Vec<Statement>>,
    },
    ForIn {
        var: String,
        iterable: Expr,
        body: Vec<Statement>,
        mode: ContextMode,
    },
    While {
        cond: Expr,
        body: Vec<Statement>,
        mode: ContextMode,
    },
    Block(Vec<Statement>),
    Expression(Expr),
}

/// A statement with an optional source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StmtKind,
    pub loc: Option<CodeLoc>,
}

impl Statement {
    #[must_use]
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, loc: None }
    }

    #[must_use]
    pub fn at(mut self, loc: CodeLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    #[must_use]
    pub fn let_(name: impl Into<String>, init: Expr) -> Self {
        Self::new(StmtKind::Let {
            name: name.into(),
            annotation: None,
            init,
        })
    }

    #[must_use]
    pub fn let_typed(name: impl Into<String>, annotation: TypeAnnotation, init: Expr) -> Self {
        Self::new(StmtKind::Let {
            name: name.into(),
            annotation: Some(annotation),
            init,
        })
    }

    #[must_use]
    pub fn const_(name: impl Into<String>, init: Expr) -> Self {
        Self::new(StmtKind::Const {
            name: name.into(),
            annotation: None,
            init,
        })
    }

    #[must_use]
    pub fn model(name: impl Into<String>, config: Expr) -> Self {
        Self::new(StmtKind::Model {
            name: name.into(),
            config,
        })
    }

    #[must_use]
    pub fn expression(expr: Expr) -> Self {
        Self::new(StmtKind::Expression(expr))
    }

    #[must_use]
    pub fn return_(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return { value })
    }
}

/// A complete program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    #[must_use]
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}
