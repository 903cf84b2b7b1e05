//! Type annotations and the runtime type checker.
//!
//! Annotations are optional on declarations, parameters, and returns. Checks
//! are eager: assignment, argument binding, function return, host-escape
//! completion, loop-variable binding, and condition acceptance all go through
//! [`typecheck`] (or [`coerce`], which additionally performs the one legal
//! conversion — JSON-parsing a text value into a `json` destination).

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    error::RunError,
    value::{Json, Value},
};

/// A declared type.
///
/// `Model` never appears in source annotations — it is attached implicitly to
/// `model` declarations so context projection can filter them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    Text,
    Json,
    Prompt,
    Boolean,
    Number,
    Model,
    Array(Box<TypeAnnotation>),
}

impl TypeAnnotation {
    /// Parses the wire form emitted by the parser: a base type name with any
    /// number of `[]` suffixes.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut depth = 0usize;
        let mut base = text.trim();
        while let Some(stripped) = base.strip_suffix("[]") {
            base = stripped;
            depth += 1;
        }
        let mut annotation = match base {
            "text" => Self::Text,
            "json" => Self::Json,
            "prompt" => Self::Prompt,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            other => return Err(format!("unknown type '{other}'")),
        };
        for _ in 0..depth {
            annotation = Self::Array(Box::new(annotation));
        }
        Ok(annotation)
    }

    /// `prompt` is `text` for assignment purposes; only context projection
    /// treats it specially.
    #[must_use]
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Prompt)
    }
}

impl std::fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
            Self::Prompt => f.write_str("prompt"),
            Self::Boolean => f.write_str("boolean"),
            Self::Number => f.write_str("number"),
            Self::Model => f.write_str("model"),
            Self::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// The specific way a type check failed.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum TypeErrorKind {
    ExpectedBoolean,
    ExpectedNumber,
    ExpectedJsonObjectOrArray,
    InvalidJsonString,
    ArrayElementMismatch(usize),
    ExpectedArray,
    ExpectedText,
    ExpectedModel,
    NonFinite,
}

/// A failed type check: kind plus a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub message: String,
}

impl TypeError {
    fn new(kind: TypeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TypeError> for RunError {
    fn from(err: TypeError) -> Self {
        Self::type_error(err.message)
    }
}

/// Checks a value against an annotation without converting it.
pub fn typecheck(value: &Value, annotation: &TypeAnnotation) -> Result<(), TypeError> {
    match annotation {
        TypeAnnotation::Boolean => match value {
            Value::Boolean(_) => Ok(()),
            other => Err(TypeError::new(
                TypeErrorKind::ExpectedBoolean,
                format!("expected boolean, got {}", describe(other)),
            )),
        },
        TypeAnnotation::Number => match value {
            Value::Number(n) if n.is_finite() => Ok(()),
            Value::Number(_) => Err(TypeError::new(
                TypeErrorKind::NonFinite,
                "expected a finite number",
            )),
            other => Err(TypeError::new(
                TypeErrorKind::ExpectedNumber,
                format!("expected number, got {}", describe(other)),
            )),
        },
        TypeAnnotation::Text | TypeAnnotation::Prompt => match value {
            Value::Text(_) => Ok(()),
            other => Err(TypeError::new(
                TypeErrorKind::ExpectedText,
                format!("expected text, got {}", describe(other)),
            )),
        },
        TypeAnnotation::Json => match value {
            Value::Json(json) if json.is_container() => Ok(()),
            Value::Json(_) => Err(TypeError::new(
                TypeErrorKind::ExpectedJsonObjectOrArray,
                "expected JSON object or array",
            )),
            Value::Text(text) => match Json::parse(text) {
                Ok(json) if json.is_container() => Ok(()),
                Ok(_) => Err(TypeError::new(
                    TypeErrorKind::ExpectedJsonObjectOrArray,
                    "expected JSON object or array",
                )),
                Err(err) => Err(TypeError::new(
                    TypeErrorKind::InvalidJsonString,
                    format!("invalid JSON string: {err}"),
                )),
            },
            other => Err(TypeError::new(
                TypeErrorKind::ExpectedJsonObjectOrArray,
                format!("expected JSON object or array, got {}", describe(other)),
            )),
        },
        TypeAnnotation::Model => match value {
            Value::Model(_) => Ok(()),
            other => Err(TypeError::new(
                TypeErrorKind::ExpectedModel,
                format!("expected model, got {}", describe(other)),
            )),
        },
        TypeAnnotation::Array(element) => match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    typecheck(item, element).map_err(|inner| {
                        TypeError::new(
                            TypeErrorKind::ArrayElementMismatch(index),
                            format!("array element {index}: {}", inner.message),
                        )
                    })?;
                }
                Ok(())
            }
            other => Err(TypeError::new(
                TypeErrorKind::ExpectedArray,
                format!("expected array, got {}", describe(other)),
            )),
        },
    }
}

/// Checks a value against an annotation, applying the one legal conversion:
/// a text value bound to a `json` destination is parsed and must yield an
/// object or array. All other annotations return the value unchanged.
pub fn coerce(value: Value, annotation: &TypeAnnotation) -> Result<Value, TypeError> {
    match (annotation, value) {
        (TypeAnnotation::Json, Value::Text(text)) => match Json::parse(&text) {
            Ok(json) if json.is_container() => Ok(Value::Json(json)),
            Ok(_) => Err(TypeError::new(
                TypeErrorKind::ExpectedJsonObjectOrArray,
                "expected JSON object or array",
            )),
            Err(err) => Err(TypeError::new(
                TypeErrorKind::InvalidJsonString,
                format!("invalid JSON string: {err}"),
            )),
        },
        (TypeAnnotation::Array(element), Value::Array(items)) => {
            let coerced = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    coerce(item, element).map_err(|inner| {
                        TypeError::new(
                            TypeErrorKind::ArrayElementMismatch(index),
                            format!("array element {index}: {}", inner.message),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(coerced))
        }
        (annotation, value) => {
            typecheck(&value, annotation)?;
            Ok(value)
        }
    }
}

/// How a value is described in type-error messages. Text values say "string"
/// because that is what the user wrote.
fn describe(value: &Value) -> &'static str {
    match value {
        Value::Text(_) => "string",
        other => other.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_array_suffixes() {
        assert_eq!(TypeAnnotation::parse("text").unwrap(), TypeAnnotation::Text);
        assert_eq!(
            TypeAnnotation::parse("number[][]").unwrap(),
            TypeAnnotation::Array(Box::new(TypeAnnotation::Array(Box::new(TypeAnnotation::Number))))
        );
        assert!(TypeAnnotation::parse("integer").is_err());
    }

    #[test]
    fn display_round_trips() {
        for text in ["text", "json", "prompt", "boolean", "number", "text[]", "json[][]"] {
            assert_eq!(TypeAnnotation::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn boolean_rejects_true_string() {
        let err = typecheck(&Value::Text("true".into()), &TypeAnnotation::Boolean).unwrap_err();
        assert_eq!(err.kind, TypeErrorKind::ExpectedBoolean);
        assert_eq!(err.message, "expected boolean, got string");
    }

    #[test]
    fn number_rejects_non_finite() {
        let err = typecheck(&Value::Number(f64::NAN), &TypeAnnotation::Number).unwrap_err();
        assert_eq!(err.kind, TypeErrorKind::NonFinite);
    }

    #[test]
    fn json_rejects_primitive_document() {
        let err = coerce(Value::Text("42".into()), &TypeAnnotation::Json).unwrap_err();
        assert_eq!(err.kind, TypeErrorKind::ExpectedJsonObjectOrArray);
    }

    #[test]
    fn json_parses_object_text() {
        let value = coerce(Value::Text(r#"{"a":1}"#.into()), &TypeAnnotation::Json).unwrap();
        assert!(matches!(value, Value::Json(Json::Object(_))));
    }

    #[test]
    fn json_reports_invalid_document() {
        let err = coerce(Value::Text("not json".into()), &TypeAnnotation::Json).unwrap_err();
        assert_eq!(err.kind, TypeErrorKind::InvalidJsonString);
    }

    #[test]
    fn prompt_accepts_text() {
        assert!(typecheck(&Value::Text("hi".into()), &TypeAnnotation::Prompt).is_ok());
    }

    #[test]
    fn array_annotation_checks_elements() {
        let good = Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert!(typecheck(&good, &TypeAnnotation::Array(Box::new(TypeAnnotation::Number))).is_ok());

        let bad = Value::Array(vec![Value::Number(1.0), Value::Text("x".into())]);
        let err = typecheck(&bad, &TypeAnnotation::Array(Box::new(TypeAnnotation::Number))).unwrap_err();
        assert_eq!(err.kind, TypeErrorKind::ArrayElementMismatch(1));
    }
}
