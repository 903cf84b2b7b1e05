//! Runtime values.
//!
//! [`Value`] is the tagged union every expression evaluates to. Values are
//! owned trees: cloning a value is a deep copy, which is what gives frame
//! entries their snapshot semantics — once a value is appended to the log,
//! later mutation of the live variable cannot reach it.
//!
//! The `json` semantic type is carried by [`Json`], a self-describing tree
//! (unlike `serde_json::Value`, it round-trips through non-self-describing
//! formats such as postcard). Object keys preserve insertion order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::RunError;

/// Identifier of a function declared in the program, indexing the state's
/// function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(u32);

impl FunctionId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("function table exceeds u32"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of an imported host-language function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportId(u32);

impl ImportId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("import table exceeds u32"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A JSON tree with insertion-ordered object keys.
///
/// Top-level `json`-typed variables only ever hold the `Object` or `Array`
/// variants; the primitive variants exist because they occur nested inside
/// those trees and because indexing into a tree must be able to surface them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Json {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Json>),
    Object(IndexMap<String, Json>),
}

impl Json {
    /// Parses a JSON document from text.
    pub fn parse(text: &str) -> Result<Self, String> {
        let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Ok(Self::from_serde(parsed))
    }

    /// Converts from a `serde_json::Value` (host boundary representation).
    #[must_use]
    pub fn from_serde(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from_serde).collect()),
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from_serde(v))).collect())
            }
        }
    }

    /// Converts to a `serde_json::Value` (host boundary representation).
    #[must_use]
    pub fn to_serde(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_serde).collect()),
            Self::Object(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_serde())).collect())
            }
        }
    }

    /// Renders the tree as compact JSON text.
    ///
    /// Number rendering matches the interpreter's number formatting: values
    /// with no fractional part print without a decimal point.
    #[must_use]
    pub fn to_compact_string(&self) -> String {
        let mut out = String::new();
        self.write_compact(&mut out);
        out
    }

    fn write_compact(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Number(n) => out.push_str(&format_number(*n)),
            Self::String(s) => {
                out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}")));
            }
            Self::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_compact(out);
                }
                out.push(']');
            }
            Self::Object(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).unwrap_or_else(|_| format!("{key:?}")));
                    out.push(':');
                    value.write_compact(out);
                }
                out.push('}');
            }
        }
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }
}

/// Configuration of a declared model, as written in the program.
///
/// `name` is required; the endpoint fields default to empty so a provider can
/// substitute its own. Keys beyond the three well-known ones are preserved in
/// `options` and passed through to the provider untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub api_key: String,
    pub url: String,
    pub options: IndexMap<String, Json>,
}

impl ModelConfig {
    /// Builds a model configuration from an evaluated object literal.
    pub fn from_object(map: &IndexMap<String, Json>) -> Result<Self, RunError> {
        let mut name = None;
        let mut api_key = String::new();
        let mut url = String::new();
        let mut options = IndexMap::new();
        for (key, value) in map {
            match (key.as_str(), value) {
                ("name", Json::String(s)) => name = Some(s.clone()),
                ("apiKey", Json::String(s)) => api_key = s.clone(),
                ("url", Json::String(s)) => url = s.clone(),
                ("name" | "apiKey" | "url", other) => {
                    return Err(RunError::type_error(format!(
                        "model field '{key}' must be text, got {}",
                        other.to_compact_string()
                    )));
                }
                _ => {
                    options.insert(key.clone(), value.clone());
                }
            }
        }
        let Some(name) = name else {
            return Err(RunError::type_error("model declaration requires a 'name' field"));
        };
        Ok(Self {
            name,
            api_key,
            url,
            options,
        })
    }
}

/// Scalar categories a tool parameter can declare, matching the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ToolParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ToolParamType {
    /// Checks a JSON argument against this declared type.
    #[must_use]
    pub fn accepts(self, value: &Json) -> bool {
        match self {
            Self::String => matches!(value, Json::String(_)),
            Self::Number => matches!(value, Json::Number(_)),
            Self::Boolean => matches!(value, Json::Bool(_)),
            Self::Object => matches!(value, Json::Object(_)),
            Self::Array => matches!(value, Json::Array(_)),
        }
    }
}

/// Wire-format wrapper: a parameter's type is an object `{ "type": "..." }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParamSchema {
    #[serde(rename = "type")]
    pub kind: ToolParamType,
}

/// A single typed parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    #[serde(rename = "type")]
    pub schema: ToolParamSchema,
    pub required: bool,
    pub description: Option<String>,
}

impl ToolParam {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ToolParamType) -> Self {
        Self {
            name: name.into(),
            schema: ToolParamSchema { kind },
            required: true,
            description: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A tool declaration: the typed, named callable an LLM may invoke.
///
/// This is the schema only — execution lives with the host's registered
/// executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParam>,
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
    Boolean(bool),
    Json(Json),
    Array(Vec<Value>),
    Model(ModelConfig),
    Tool(ToolBinding),
    VibeFunction(FunctionId),
    TsFunction(ImportId),
}

impl Value {
    /// The semantic type name used in diagnostics and context rendering.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Json(_) => "json",
            Self::Array(_) => "array",
            Self::Model(_) => "model",
            Self::Tool(_) => "tool",
            Self::VibeFunction(_) => "function",
            Self::TsFunction(_) => "function",
        }
    }

    /// Converts the value to a JSON tree.
    ///
    /// Models, tools, and functions have no JSON form and produce a type
    /// error naming the offending variant.
    pub fn to_json(&self) -> Result<Json, RunError> {
        match self {
            Self::Null => Ok(Json::Null),
            Self::Text(s) => Ok(Json::String(s.clone())),
            Self::Number(n) => Ok(Json::Number(*n)),
            Self::Boolean(b) => Ok(Json::Bool(*b)),
            Self::Json(json) => Ok(json.clone()),
            Self::Array(items) => Ok(Json::Array(
                items.iter().map(Self::to_json).collect::<Result<_, _>>()?,
            )),
            Self::Model(_) | Self::Tool(_) | Self::VibeFunction(_) | Self::TsFunction(_) => Err(
                RunError::type_error(format!("a {} value cannot be converted to JSON", self.type_name())),
            ),
        }
    }

    /// Lifts a JSON tree into a value: containers become `Json`, primitives
    /// become their value-system counterparts.
    #[must_use]
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Boolean(b),
            Json::Number(n) => Self::Number(n),
            Json::String(s) => Self::Text(s),
            container @ (Json::Array(_) | Json::Object(_)) => Self::Json(container),
        }
    }

    /// Renders the value the way context projection and interpolation show it:
    /// text raw, numbers without trailing `.0`, containers as compact JSON.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Text(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::Boolean(b) => b.to_string(),
            Self::Json(json) => json.to_compact_string(),
            Self::Array(items) => match self.to_json() {
                Ok(json) => json.to_compact_string(),
                // Arrays of non-JSON values (models, tools) fall back to a tag list.
                Err(_) => format!(
                    "[{}]",
                    items.iter().map(|v| v.render()).collect::<Vec<_>>().join(",")
                ),
            },
            Self::Model(config) => format!("<model {}>", config.name),
            Self::Tool(binding) => format!("<tool {}>", binding.name),
            Self::VibeFunction(_) => "<function>".to_owned(),
            Self::TsFunction(_) => "<imported function>".to_owned(),
        }
    }

    /// Returns the number as a usable array index / loop bound, rejecting
    /// non-integers.
    pub fn as_integer(&self, what: &str) -> Result<i64, RunError> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(*n as i64),
            Self::Number(n) => Err(RunError::type_error(format!("{what} must be an integer, got {n}"))),
            other => Err(RunError::type_error(format!(
                "{what} must be a number, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Formats a number the way the language shows it: integral values print
/// without a decimal point, everything else uses the shortest float form.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_drops_integral_fraction() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn json_round_trips_through_serde() {
        let json = Json::parse(r#"{"a":1,"b":[true,null,"x"]}"#).unwrap();
        let back = Json::from_serde(json.to_serde());
        assert_eq!(json, back);
    }

    #[test]
    fn json_compact_string_preserves_key_order() {
        let json = Json::parse(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(json.to_compact_string(), r#"{"b":2,"a":1}"#);
    }

    #[test]
    fn compact_string_renders_integral_numbers_bare() {
        let json = Json::parse(r#"{"a":2,"b":3}"#).unwrap();
        assert_eq!(json.to_compact_string(), r#"{"a":2,"b":3}"#);
    }

    #[test]
    fn model_config_requires_name() {
        let map: IndexMap<String, Json> = [("url".to_owned(), Json::String("u".to_owned()))]
            .into_iter()
            .collect();
        assert!(ModelConfig::from_object(&map).is_err());
    }

    #[test]
    fn model_config_keeps_unknown_keys_as_options() {
        let map: IndexMap<String, Json> = [
            ("name".to_owned(), Json::String("t".to_owned())),
            ("temperature".to_owned(), Json::Number(0.2)),
        ]
        .into_iter()
        .collect();
        let config = ModelConfig::from_object(&map).unwrap();
        assert_eq!(config.name, "t");
        assert_eq!(config.options.get("temperature"), Some(&Json::Number(0.2)));
    }

    #[test]
    fn value_render_shows_text_raw_and_containers_compact() {
        assert_eq!(Value::Text("hi".into()).render(), "hi");
        assert_eq!(Value::Number(4.0).render(), "4");
        assert_eq!(
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]).render(),
            "[1,2]"
        );
    }
}
