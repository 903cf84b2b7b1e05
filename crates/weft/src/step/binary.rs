//! Binary and unary operator evaluation.
//!
//! Arithmetic and ordering require number operands; `==`/`!=` compare any
//! two values structurally; the boolean operators never reach this module
//! (they lower through `LogicalBranch` for short-circuiting).

use crate::{
    ast::{BinaryOp, UnaryOp},
    error::{RunError, RunResult},
    value::Value,
};

/// Applies a strict (non-short-circuit) binary operator.
pub(super) fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = numeric_operands(op, lhs, rhs)?;
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(RunError::structural("division by zero"));
                    }
                    a / b
                }
                BinaryOp::Mod => {
                    if b == 0.0 {
                        return Err(RunError::structural("division by zero"));
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Ok(Value::Number(result))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (a, b) = numeric_operands(op, lhs, rhs)?;
            let result = match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::Ge => a >= b,
                _ => unreachable!(),
            };
            Ok(Value::Boolean(result))
        }
        BinaryOp::Eq => Ok(Value::Boolean(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Boolean(lhs != rhs)),
        BinaryOp::And | BinaryOp::Or => Err(RunError::protocol(
            "short-circuit operator reached strict evaluation",
        )),
    }
}

/// Applies a unary operator.
pub(super) fn apply_unary(op: UnaryOp, operand: &Value) -> RunResult<Value> {
    match op {
        UnaryOp::Neg => match operand {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(RunError::type_error(format!(
                "unary minus requires a number, got {}",
                other.type_name()
            ))),
        },
        UnaryOp::Not => match operand {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(RunError::type_error(format!(
                "'not' requires a boolean, got {}",
                other.type_name()
            ))),
        },
    }
}

fn numeric_operands(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<(f64, f64)> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(RunError::type_error(format!(
            "operator '{}' requires number operands, got {} and {}",
            op_symbol(op),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_requires_numbers() {
        let err = apply_binary(BinaryOp::Add, &Value::Text("a".into()), &Value::Number(1.0)).unwrap_err();
        assert!(err.message.contains("operator '+'"));
    }

    #[test]
    fn division_by_zero_is_structural() {
        let err = apply_binary(BinaryOp::Div, &Value::Number(1.0), &Value::Number(0.0)).unwrap_err();
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn equality_is_structural_across_variants() {
        assert_eq!(
            apply_binary(
                BinaryOp::Eq,
                &Value::Array(vec![Value::Number(1.0)]),
                &Value::Array(vec![Value::Number(1.0)])
            )
            .unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Ne, &Value::Text("a".into()), &Value::Text("b".into())).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn double_negation_restores_number() {
        let once = apply_unary(UnaryOp::Neg, &Value::Number(4.5)).unwrap();
        let twice = apply_unary(UnaryOp::Neg, &once).unwrap();
        assert_eq!(twice, Value::Number(4.5));
    }
}
