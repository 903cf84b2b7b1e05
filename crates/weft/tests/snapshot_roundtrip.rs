//! Snapshot serialization: round-trip identity, resume-after-load, and
//! step equivalence between an original and its reloaded copy.

mod common;

use common::model_stmt;
use pretty_assertions::assert_eq;
use weft::{
    BinaryOp, ContextMode, Expr, Program, RunOptions, RuntimeState, SnapshotError, Statement, Status, StmtKind, Value,
};

fn paused_state() -> RuntimeState {
    let program = Program::new(vec![
        model_stmt("m"),
        Statement::let_("greeting", Expr::text("hello")),
        Statement::let_(
            "answer",
            Expr::do_op(Expr::text("q"), Some(Expr::ident("m")), ContextMode::Default),
        ),
        Statement::expression(Expr::ident("answer")),
    ]);
    let mut state = RuntimeState::new(program, RunOptions::default());
    state.run_until_pause();
    assert_eq!(state.status(), Status::AwaitingAi);
    state
}

// =============================================================================
// 1. Round-trip identity
// =============================================================================

/// `load(dump(s))` reproduces the state exactly, pending bundle included.
#[test]
fn dump_load_is_identity() {
    let state = paused_state();
    let bytes = state.dump().expect("dump succeeds");
    let restored = RuntimeState::load(&bytes).expect("load succeeds");
    assert_eq!(state, restored);
}

/// A freshly initialized state round-trips too (instruction stack intact).
#[test]
fn initial_state_round_trips() {
    let program = Program::new(vec![
        Statement::let_("x", Expr::number(1.0)),
        Statement::expression(Expr::binary(BinaryOp::Add, Expr::ident("x"), Expr::number(1.0))),
    ]);
    let state = RuntimeState::new(program, RunOptions::default());
    let restored = RuntimeState::load(&state.dump().unwrap()).unwrap();
    assert_eq!(state, restored);
    assert_eq!(state.instructions(), restored.instructions());
}

// =============================================================================
// 2. Resuming across the serialization boundary
// =============================================================================

/// A run paused, shipped through bytes, and resumed elsewhere finishes with
/// the same result as one resumed in place.
#[test]
fn resume_after_reload_matches_resume_in_place() {
    let mut original = paused_state();
    let mut reloaded = RuntimeState::load(&original.dump().unwrap()).unwrap();

    original
        .resume_with_ai(Value::Text("42".into()), None, vec![])
        .unwrap();
    original.run_until_pause();
    reloaded
        .resume_with_ai(Value::Text("42".into()), None, vec![])
        .unwrap();
    reloaded.run_until_pause();

    assert_eq!(original.status(), Status::Completed);
    assert_eq!(reloaded.status(), Status::Completed);
    assert_eq!(original.last_result(), reloaded.last_result());
    assert_eq!(original.call_stack(), reloaded.call_stack());
}

/// Stepping a reloaded snapshot tracks the original step for step.
#[test]
fn step_equivalence_through_the_boundary() {
    let program = Program::new(vec![
        Statement::let_("sum", Expr::number(0.0)),
        Statement::new(StmtKind::ForIn {
            var: "i".into(),
            iterable: Expr::number(4.0),
            body: vec![Statement::expression(Expr::assign(
                "sum",
                Expr::binary(BinaryOp::Add, Expr::ident("sum"), Expr::ident("i")),
            ))],
            mode: ContextMode::Verbose,
        }),
        Statement::expression(Expr::ident("sum")),
    ]);
    let mut state = RuntimeState::new(program, RunOptions::default());

    while state.status() == Status::Running {
        let mut twin = RuntimeState::load(&state.dump().unwrap()).unwrap();
        let original = state.step();
        let twinned = twin.step();
        assert_eq!(original.is_ok(), twinned.is_ok());
        assert_eq!(state, twin);
    }
    assert_eq!(state.status(), Status::Completed);
    assert_eq!(state.last_result(), &Value::Number(10.0));
}

// =============================================================================
// 3. Envelope validation
// =============================================================================

/// An unknown schema version is refused outright.
#[test]
fn unknown_version_is_refused() {
    let state = paused_state();
    let mut bytes = state.dump().unwrap();
    // the envelope leads with the version; bump it
    bytes[0] = bytes[0].wrapping_add(1);
    match RuntimeState::load(&bytes) {
        Err(SnapshotError::UnsupportedVersion(_)) => {}
        other => panic!("expected version error, got {other:?}"),
    }
}

/// Garbage bytes fail to decode, not panic.
#[test]
fn garbage_fails_to_decode() {
    assert!(matches!(
        RuntimeState::load(&[0x01, 0xff, 0xfe, 0x00]),
        Err(SnapshotError::Decode(_) | SnapshotError::UnsupportedVersion(_))
    ));
}

/// `duplicate` is semantically the serialize/deserialize clone.
#[test]
fn duplicate_matches_round_trip() {
    let state = paused_state();
    let cloned = state.duplicate();
    let round_tripped = RuntimeState::load(&state.dump().unwrap()).unwrap();
    assert_eq!(cloned, round_tripped);
}
