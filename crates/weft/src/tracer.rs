//! Execution tracing infrastructure.
//!
//! Trait-based tracing with zero-cost abstraction: the stepper is generic
//! over [`StepTracer`], so the default [`NoopTracer`] monomorphizes every
//! hook away. Concrete implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! Independently of tracers, the state records compact [`TraceEvent`]s into
//! its own execution log when `RunOptions::record_trace` is set — those
//! survive serialization; tracers do not.

use serde::{Deserialize, Serialize};

use crate::{error::RunError, state::Status};

/// A compact, serializable record of one execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Step {
        index: u64,
        instruction: String,
        value_stack: usize,
        frames: usize,
    },
    /// A call frame was pushed.
    FramePush { name: String, depth: usize },
    /// A call frame was popped.
    FramePop { depth: usize },
    /// Execution paused for an external collaborator.
    Pause { status: String },
    /// A runtime error froze the state.
    Error { message: String },
}

/// Hook points for observing execution.
///
/// Every method has a default no-op body; implementations override only what
/// they need.
pub trait StepTracer {
    /// Called before each instruction dispatch.
    #[inline(always)]
    fn on_step(&mut self, _index: u64, _instruction: &'static str, _value_stack: usize, _frames: usize) {}

    /// Called when a function call pushes a frame.
    #[inline(always)]
    fn on_frame_push(&mut self, _name: &str, _depth: usize) {}

    /// Called when a return pops a frame.
    #[inline(always)]
    fn on_frame_pop(&mut self, _depth: usize) {}

    /// Called when the state parks a pending bundle.
    #[inline(always)]
    fn on_pause(&mut self, _status: Status) {}

    /// Called when a step fails.
    #[inline(always)]
    fn on_error(&mut self, _error: &RunError) {}
}

/// A tracer that does nothing; all hooks compile to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl StepTracer for NoopTracer {}

/// Tracer printing a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [   12] binary_op            stack=2  frames=1
///   >>> call greet             depth=2
///   <<< return                 depth=1
///   ... pause awaiting_ai
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl StepTracer for StderrTracer {
    fn on_step(&mut self, index: u64, instruction: &'static str, value_stack: usize, frames: usize) {
        eprintln!("[{index:>5}] {instruction:<20} stack={value_stack}  frames={frames}");
    }

    fn on_frame_push(&mut self, name: &str, depth: usize) {
        eprintln!("  >>> call {name:<16} depth={depth}");
    }

    fn on_frame_pop(&mut self, depth: usize) {
        eprintln!("  <<< return               depth={depth}");
    }

    fn on_pause(&mut self, status: Status) {
        eprintln!("  ... pause {status}");
    }

    fn on_error(&mut self, error: &RunError) {
        eprintln!("  !!! {error}");
    }
}

/// Tracer that records every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl StepTracer for RecordingTracer {
    fn on_step(&mut self, index: u64, instruction: &'static str, value_stack: usize, frames: usize) {
        self.events.push(TraceEvent::Step {
            index,
            instruction: instruction.to_owned(),
            value_stack,
            frames,
        });
    }

    fn on_frame_push(&mut self, name: &str, depth: usize) {
        self.events.push(TraceEvent::FramePush {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_frame_pop(&mut self, depth: usize) {
        self.events.push(TraceEvent::FramePop { depth });
    }

    fn on_pause(&mut self, status: Status) {
        self.events.push(TraceEvent::Pause {
            status: status.to_string(),
        });
    }

    fn on_error(&mut self, error: &RunError) {
        self.events.push(TraceEvent::Error {
            message: error.message.clone(),
        });
    }
}
