#![doc = include_str!("../../../README.md")]

pub mod ast;
mod context;
mod error;
mod frame;
mod instruction;
pub mod provider;
mod run;
mod snapshot;
mod state;
mod step;
pub mod tools;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    ast::{BinaryOp, ContextMode, Expr, FunctionDecl, Param, Program, Statement, StmtKind, TemplatePart, UnaryOp},
    context::{
        ContextEntry, ContextEntryKind, FormatOptions, FormattedContext, build_global_context, build_local_context,
        format_context_for_ai, project_entries, project_frame,
    },
    error::{CodeLoc, ErrorKind, RunError, RunResult},
    frame::{
        AiOperation, ENTRY_FRAME, EntrySource, Frame, FrameEntry, OpenScope, PromptToolCall, ScopeKind, Variable,
    },
    instruction::{Instruction, TemplateSlot},
    provider::{
        AiInteraction, AiProvider, AiRequest, AiResponse, ProviderMessage, ProviderToolCall, Role, TsEvaluator, Usage,
    },
    run::{Host, PauseRequest, RunHandle, RunProgress, Runner},
    snapshot::{SNAPSHOT_VERSION, SnapshotError},
    state::{
        ImportBinding, ImportedModule, PendingAi, PendingCompress, PendingTool, PendingTs, RunOptions, RuntimeState,
        Status, TsCallKind,
    },
    tools::{ToolContext, ToolExecutor, ToolLoopOutcome, ToolRegistry, ToolRound, check_args, execute_with_tools},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, StepTracer, TraceEvent},
    types::{TypeAnnotation, TypeError, TypeErrorKind, coerce, typecheck},
    value::{
        FunctionId, ImportId, Json, ModelConfig, ToolBinding, ToolParam, ToolParamSchema, ToolParamType, Value,
        format_number,
    },
};
