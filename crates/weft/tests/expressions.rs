//! Expression semantics: operators, interpolation, indexing and slicing,
//! loop bounds, and the type-check boundary behaviors.

mod common;

use common::eval_program;
use pretty_assertions::assert_eq;
use weft::{
    BinaryOp, ContextMode, ErrorKind, Expr, Statement, StmtKind, TemplatePart, TypeAnnotation, UnaryOp, Value,
};

fn eval_expr(expr: Expr) -> Result<Value, weft::RunError> {
    eval_program(vec![Statement::expression(expr)]).0
}

// =============================================================================
// 1. Arithmetic, comparison, logic
// =============================================================================

#[test]
fn arithmetic_evaluates_with_precedence_encoded_in_the_tree() {
    // (2 + 3) * 4
    let expr = Expr::binary(
        BinaryOp::Mul,
        Expr::binary(BinaryOp::Add, Expr::number(2.0), Expr::number(3.0)),
        Expr::number(4.0),
    );
    assert_eq!(eval_expr(expr).unwrap(), Value::Number(20.0));
}

#[test]
fn modulo_and_division() {
    assert_eq!(
        eval_expr(Expr::binary(BinaryOp::Mod, Expr::number(7.0), Expr::number(3.0))).unwrap(),
        Value::Number(1.0)
    );
    let err = eval_expr(Expr::binary(BinaryOp::Div, Expr::number(1.0), Expr::number(0.0))).unwrap_err();
    assert_eq!(err.message, "division by zero");
}

#[test]
fn arithmetic_rejects_text_operands() {
    let err = eval_expr(Expr::binary(BinaryOp::Add, Expr::text("2"), Expr::number(2.0))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn comparison_and_structural_equality() {
    assert_eq!(
        eval_expr(Expr::binary(BinaryOp::Lt, Expr::number(1.0), Expr::number(2.0))).unwrap(),
        Value::Boolean(true)
    );
    assert_eq!(
        eval_expr(Expr::binary(
            BinaryOp::Eq,
            Expr::Array(vec![Expr::number(1.0)]),
            Expr::Array(vec![Expr::number(1.0)]),
        ))
        .unwrap(),
        Value::Boolean(true)
    );
}

/// `false and X` never evaluates X — here X would divide by zero.
#[test]
fn and_short_circuits() {
    let poison = Expr::binary(
        BinaryOp::Eq,
        Expr::binary(BinaryOp::Div, Expr::number(1.0), Expr::number(0.0)),
        Expr::number(1.0),
    );
    assert_eq!(
        eval_expr(Expr::binary(BinaryOp::And, Expr::Boolean(false), poison.clone())).unwrap(),
        Value::Boolean(false)
    );
    assert_eq!(
        eval_expr(Expr::binary(BinaryOp::Or, Expr::Boolean(true), poison)).unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn logic_rejects_truthiness_coercion() {
    let err = eval_expr(Expr::binary(BinaryOp::And, Expr::number(1.0), Expr::Boolean(true))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    // ... on the right-hand side as well
    let err = eval_expr(Expr::binary(BinaryOp::And, Expr::Boolean(true), Expr::number(1.0))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

/// Double negation restores the original number.
#[test]
fn double_negation_round_trips() {
    let expr = Expr::unary(UnaryOp::Neg, Expr::unary(UnaryOp::Neg, Expr::number(7.25)));
    assert_eq!(eval_expr(expr).unwrap(), Value::Number(7.25));
}

// =============================================================================
// 2. Interpolation
// =============================================================================

/// `"Hello {x}"` and `` `Hello ${x}` `` agree when `x` is defined.
#[test]
fn plain_and_template_interpolation_agree_when_defined() {
    let (plain, _) = eval_program(vec![
        Statement::let_("x", Expr::text("world")),
        Statement::expression(Expr::text("Hello {x}!")),
    ]);
    let (template, _) = eval_program(vec![
        Statement::let_("x", Expr::text("world")),
        Statement::expression(Expr::Template(vec![
            TemplatePart::Text("Hello ".into()),
            TemplatePart::Expr {
                raw: "x".into(),
                expr: Expr::ident("x"),
            },
            TemplatePart::Text("!".into()),
        ])),
    ]);
    assert_eq!(plain.unwrap(), Value::Text("Hello world!".into()));
    assert_eq!(template.unwrap(), Value::Text("Hello world!".into()));
}

/// ... and disagree when `x` is undefined: each leaves its own syntax.
#[test]
fn interpolation_of_undefined_names_stays_literal() {
    assert_eq!(
        eval_expr(Expr::text("Hello {name}!")).unwrap(),
        Value::Text("Hello {name}!".into())
    );
    let template = Expr::Template(vec![
        TemplatePart::Text("Hello ".into()),
        TemplatePart::Expr {
            raw: "name".into(),
            expr: Expr::ident("name"),
        },
        TemplatePart::Text("!".into()),
    ]);
    assert_eq!(eval_expr(template).unwrap(), Value::Text("Hello ${name}!".into()));
}

#[test]
fn template_expressions_evaluate_and_render() {
    let template = Expr::Template(vec![
        TemplatePart::Text("sum=".into()),
        TemplatePart::Expr {
            raw: "1 + 2".into(),
            expr: Expr::binary(BinaryOp::Add, Expr::number(1.0), Expr::number(2.0)),
        },
    ]);
    assert_eq!(eval_expr(template).unwrap(), Value::Text("sum=3".into()));
}

#[test]
fn interpolated_containers_render_as_compact_json() {
    let (result, _) = eval_program(vec![
        Statement::let_("items", Expr::Array(vec![Expr::number(1.0), Expr::number(2.0)])),
        Statement::expression(Expr::text("got {items}")),
    ]);
    assert_eq!(result.unwrap(), Value::Text("got [1,2]".into()));
}

// =============================================================================
// 3. Indexing and slicing
// =============================================================================

fn array123() -> Expr {
    Expr::Array(vec![Expr::number(1.0), Expr::number(2.0), Expr::number(3.0)])
}

#[test]
fn indexing_bounds_checks() {
    assert_eq!(
        eval_expr(Expr::index(array123(), Expr::number(1.0))).unwrap(),
        Value::Number(2.0)
    );
    let err = eval_expr(Expr::index(array123(), Expr::number(3.0))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Structural);
    let err = eval_expr(Expr::index(array123(), Expr::number(-1.0))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Structural);
    let err = eval_expr(Expr::index(array123(), Expr::number(0.5))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn slicing_is_inclusive_on_both_bounds() {
    assert_eq!(
        eval_expr(Expr::slice(array123(), Some(Expr::number(0.0)), Some(Expr::number(1.0)))).unwrap(),
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
    );
    // a == b yields a single element
    assert_eq!(
        eval_expr(Expr::slice(array123(), Some(Expr::number(1.0)), Some(Expr::number(1.0)))).unwrap(),
        Value::Array(vec![Value::Number(2.0)])
    );
}

#[test]
fn slice_defaults_cover_the_whole_array() {
    assert_eq!(
        eval_expr(Expr::slice(array123(), None, None)).unwrap(),
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)])
    );
    assert_eq!(
        eval_expr(Expr::slice(array123(), None, Some(Expr::number(1.0)))).unwrap(),
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
    );
    assert_eq!(
        eval_expr(Expr::slice(array123(), Some(Expr::number(2.0)), None)).unwrap(),
        Value::Array(vec![Value::Number(3.0)])
    );
    // an empty array with both bounds omitted is the whole (empty) array
    assert_eq!(
        eval_expr(Expr::slice(Expr::Array(vec![]), None, None)).unwrap(),
        Value::Array(vec![])
    );
}

#[test]
fn inverted_slice_bounds_error() {
    let err = eval_expr(Expr::slice(array123(), Some(Expr::number(2.0)), Some(Expr::number(1.0)))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Structural);
    assert!(err.message.contains("slice start (2) is greater than end (1)"));
}

#[test]
fn range_expression_is_inclusive() {
    let range = Expr::Range {
        start: Box::new(Expr::number(1.0)),
        end: Box::new(Expr::number(3.0)),
    };
    assert_eq!(
        eval_expr(range).unwrap(),
        Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)])
    );
    let inverted = Expr::Range {
        start: Box::new(Expr::number(3.0)),
        end: Box::new(Expr::number(1.0)),
    };
    let err = eval_expr(inverted).unwrap_err();
    assert!(err.message.contains("range start (3) is greater than end (1)"));
}

// =============================================================================
// 4. Member methods
// =============================================================================

#[test]
fn array_methods_len_push_pop() {
    let (result, runner) = eval_program(vec![
        Statement::let_("items", Expr::Array(vec![Expr::number(1.0)])),
        Statement::expression(Expr::call(Expr::member(Expr::ident("items"), "push"), vec![Expr::number(2.0)])),
        Statement::expression(Expr::call(Expr::member(Expr::ident("items"), "len"), vec![])),
    ]);
    assert_eq!(result.unwrap(), Value::Number(2.0));
    assert_eq!(
        runner.state().call_stack()[0].get("items").map(|v| v.value.clone()),
        Some(Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]))
    );

    let (popped, runner) = eval_program(vec![
        Statement::let_("items", Expr::Array(vec![Expr::number(1.0), Expr::number(2.0)])),
        Statement::expression(Expr::call(Expr::member(Expr::ident("items"), "pop"), vec![])),
    ]);
    assert_eq!(popped.unwrap(), Value::Number(2.0));
    assert_eq!(
        runner.state().call_stack()[0].get("items").map(|v| v.value.clone()),
        Some(Value::Array(vec![Value::Number(1.0)]))
    );
}

#[test]
fn pop_from_empty_array_errors() {
    let (result, _) = eval_program(vec![
        Statement::let_("items", Expr::Array(vec![])),
        Statement::expression(Expr::call(Expr::member(Expr::ident("items"), "pop"), vec![])),
    ]);
    assert_eq!(result.unwrap_err().kind, ErrorKind::Structural);
}

#[test]
fn string_len_counts_characters() {
    let (result, _) = eval_program(vec![
        Statement::let_("s", Expr::text("hello")),
        Statement::expression(Expr::call(Expr::member(Expr::ident("s"), "len"), vec![])),
    ]);
    assert_eq!(result.unwrap(), Value::Number(5.0));
}

#[test]
fn unknown_method_is_a_type_error() {
    let err = eval_expr(Expr::call(Expr::member(Expr::text("x"), "push"), vec![Expr::number(1.0)])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("unknown method 'push' on text"));
}

#[test]
fn member_access_reads_json_objects() {
    let (result, _) = eval_program(vec![
        Statement::let_(
            "obj",
            Expr::Object(vec![("inner".to_owned(), Expr::number(42.0))]),
        ),
        Statement::expression(Expr::member(Expr::ident("obj"), "inner")),
    ]);
    assert_eq!(result.unwrap(), Value::Number(42.0));

    let (missing, _) = eval_program(vec![
        Statement::let_("obj", Expr::Object(vec![])),
        Statement::expression(Expr::member(Expr::ident("obj"), "nope")),
    ]);
    assert_eq!(missing.unwrap_err().kind, ErrorKind::Structural);
}

// =============================================================================
// 5. Loop bounds and condition typing
// =============================================================================

fn counting_loop(bound: Expr) -> Vec<Statement> {
    vec![
        Statement::let_("count", Expr::number(0.0)),
        Statement::new(StmtKind::ForIn {
            var: "i".into(),
            iterable: bound,
            body: vec![Statement::expression(Expr::assign(
                "count",
                Expr::binary(BinaryOp::Add, Expr::ident("count"), Expr::number(1.0)),
            ))],
            mode: ContextMode::Default,
        }),
        Statement::expression(Expr::ident("count")),
    ]
}

#[test]
fn for_over_zero_never_enters_the_body() {
    let (result, _) = eval_program(counting_loop(Expr::number(0.0)));
    assert_eq!(result.unwrap(), Value::Number(0.0));
}

#[test]
fn for_over_integer_runs_the_inclusive_range() {
    let (result, _) = eval_program(counting_loop(Expr::number(3.0)));
    assert_eq!(result.unwrap(), Value::Number(3.0));
}

#[test]
fn for_over_negative_or_fractional_bound_errors() {
    let (result, _) = eval_program(counting_loop(Expr::number(-2.0)));
    assert_eq!(result.unwrap_err().kind, ErrorKind::Structural);
    let (result, _) = eval_program(counting_loop(Expr::number(3.5)));
    assert_eq!(result.unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn while_requires_boolean_condition() {
    let (result, _) = eval_program(vec![Statement::new(StmtKind::While {
        cond: Expr::number(1.0),
        body: vec![],
        mode: ContextMode::Default,
    })]);
    assert_eq!(result.unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn while_counts_down() {
    let (result, _) = eval_program(vec![
        Statement::let_("n", Expr::number(3.0)),
        Statement::new(StmtKind::While {
            cond: Expr::binary(BinaryOp::Gt, Expr::ident("n"), Expr::number(0.0)),
            body: vec![Statement::expression(Expr::assign(
                "n",
                Expr::binary(BinaryOp::Sub, Expr::ident("n"), Expr::number(1.0)),
            ))],
            mode: ContextMode::Default,
        }),
        Statement::expression(Expr::ident("n")),
    ]);
    assert_eq!(result.unwrap(), Value::Number(0.0));
}

#[test]
fn if_requires_boolean_and_branches() {
    let (result, _) = eval_program(vec![
        Statement::let_("x", Expr::number(0.0)),
        Statement::new(StmtKind::If {
            cond: Expr::Boolean(true),
            then_branch: vec![Statement::expression(Expr::assign("x", Expr::number(1.0)))],
            else_branch: Some(vec![Statement::expression(Expr::assign("x", Expr::number(2.0)))]),
        }),
        Statement::expression(Expr::ident("x")),
    ]);
    assert_eq!(result.unwrap(), Value::Number(1.0));

    let (result, _) = eval_program(vec![Statement::new(StmtKind::If {
        cond: Expr::text("true"),
        then_branch: vec![],
        else_branch: None,
    })]);
    assert_eq!(result.unwrap_err().kind, ErrorKind::Type);
}

// =============================================================================
// 6. Annotation boundaries
// =============================================================================

/// A `json` variable assigned the literal string `"42"` errors: primitive
/// JSON documents are not objects or arrays.
#[test]
fn json_variable_rejects_primitive_document() {
    let (result, _) = eval_program(vec![Statement::let_typed(
        "data",
        TypeAnnotation::Json,
        Expr::text("42"),
    )]);
    let err = result.unwrap_err();
    assert!(err.message.contains("expected JSON object or array"), "{err}");
}

/// A `boolean` variable assigned `"true"` errors.
#[test]
fn boolean_variable_rejects_string() {
    let (result, _) = eval_program(vec![Statement::let_typed(
        "flag",
        TypeAnnotation::Boolean,
        Expr::text("true"),
    )]);
    let err = result.unwrap_err();
    assert!(err.message.contains("expected boolean, got string"), "{err}");
}

/// A `json` variable assigned valid object text parses into a tree.
#[test]
fn json_variable_parses_object_text() {
    let (result, runner) = eval_program(vec![
        Statement::let_typed("data", TypeAnnotation::Json, Expr::text(r#"{"a":1}"#)),
        Statement::expression(Expr::member(Expr::ident("data"), "a")),
    ]);
    assert_eq!(result.unwrap(), Value::Number(1.0));
    assert!(matches!(
        runner.state().call_stack()[0].get("data").map(|v| &v.value),
        Some(Value::Json(_))
    ));
}

#[test]
fn typed_array_elements_are_checked() {
    let (result, _) = eval_program(vec![Statement::let_typed(
        "xs",
        TypeAnnotation::Array(Box::new(TypeAnnotation::Number)),
        Expr::Array(vec![Expr::number(1.0), Expr::text("two")]),
    )]);
    let err = result.unwrap_err();
    assert!(err.message.contains("array element 1"), "{err}");
}
