//! Shared fixtures for the integration tests: a scripted provider, native
//! math tools, and AST shorthand for the programs the scenarios exercise.
#![allow(dead_code)]

use std::collections::VecDeque;

use indexmap::IndexMap;
use similar::TextDiff;
use weft::{
    AiProvider, AiRequest, AiResponse, Expr, Host, Json, Program, RunError, RunOptions, Runner, Statement, StmtKind,
    ToolContext, ToolParam, ToolParamType, ToolRegistry, TsEvaluator, Value,
};

/// Provider that replays queued responses and user answers, capturing every
/// request for later assertions.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    pub responses: VecDeque<AiResponse>,
    pub user_answers: VecDeque<String>,
    pub requests: Vec<AiRequest>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<AiResponse>) -> Self {
        Self {
            responses: responses.into(),
            user_answers: VecDeque::new(),
            requests: Vec::new(),
        }
    }

    pub fn with_user_answers(mut self, answers: Vec<&str>) -> Self {
        self.user_answers = answers.into_iter().map(str::to_owned).collect();
        self
    }
}

impl AiProvider for ScriptedProvider {
    fn execute(&mut self, request: &AiRequest) -> Result<AiResponse, String> {
        self.requests.push(request.clone());
        self.responses
            .pop_front()
            .ok_or_else(|| "no scripted response left".to_owned())
    }

    fn ask_user(&mut self, _prompt: &str) -> Result<String, String> {
        self.user_answers
            .pop_front()
            .ok_or_else(|| "no scripted user answer left".to_owned())
    }
}

/// Host-language evaluator that replays queued values and records what it
/// was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedTs {
    pub results: VecDeque<Value>,
    pub blocks: Vec<(String, IndexMap<String, Json>)>,
    pub calls: Vec<(String, String, Vec<Value>)>,
}

impl ScriptedTs {
    pub fn new(results: Vec<Value>) -> Self {
        Self {
            results: results.into(),
            blocks: Vec::new(),
            calls: Vec::new(),
        }
    }
}

impl TsEvaluator for ScriptedTs {
    fn evaluate(&mut self, code: &str, bindings: &IndexMap<String, Json>) -> Result<Value, String> {
        self.blocks.push((code.to_owned(), bindings.clone()));
        self.results
            .pop_front()
            .ok_or_else(|| "no scripted ts result left".to_owned())
    }

    fn call_function(&mut self, module: &str, name: &str, args: &[Value]) -> Result<Value, String> {
        self.calls.push((module.to_owned(), name.to_owned(), args.to_vec()));
        self.results
            .pop_front()
            .ok_or_else(|| "no scripted ts result left".to_owned())
    }
}

fn number_arg(args: &IndexMap<String, Json>, name: &str) -> Result<f64, String> {
    match args.get(name) {
        Some(Json::Number(n)) => Ok(*n),
        other => Err(format!("expected number argument '{name}', got {other:?}")),
    }
}

/// Registry with `add(a, b)` and `multiply(a, b)`.
pub fn math_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register("add", |args: &IndexMap<String, Json>, _ctx: &ToolContext| {
        Ok(Json::Number(number_arg(args, "a")? + number_arg(args, "b")?))
    });
    registry.register("multiply", |args: &IndexMap<String, Json>, _ctx: &ToolContext| {
        Ok(Json::Number(number_arg(args, "a")? * number_arg(args, "b")?))
    });
    registry
}

/// `model m = { name: "t", apiKey: "k", url: "u" }`
pub fn model_stmt(name: &str) -> Statement {
    Statement::model(
        name,
        Expr::Object(vec![
            ("name".to_owned(), Expr::text("t")),
            ("apiKey".to_owned(), Expr::text("k")),
            ("url".to_owned(), Expr::text("u")),
        ]),
    )
}

/// `tool <name>(a: number, b: number)`
pub fn math_tool_stmt(name: &str, description: &str) -> Statement {
    Statement::new(StmtKind::ToolDecl {
        name: name.to_owned(),
        description: description.to_owned(),
        params: vec![
            ToolParam::new("a", ToolParamType::Number),
            ToolParam::new("b", ToolParamType::Number),
        ],
    })
}

/// Runs a program to completion against the given provider and registry.
pub fn run_with(
    program: Program,
    provider: &mut ScriptedProvider,
    registry: &ToolRegistry,
) -> (Result<Value, RunError>, Runner) {
    let mut runner = Runner::new(program, RunOptions::default());
    let result = {
        let mut host = Host {
            provider,
            ts: None,
            tools: registry,
        };
        runner.run(&mut host)
    };
    (result, runner)
}

/// Runs a pure program (no providers consulted).
pub fn eval_program(statements: Vec<Statement>) -> (Result<Value, RunError>, Runner) {
    let mut provider = ScriptedProvider::default();
    let registry = ToolRegistry::new();
    run_with(Program::new(statements), &mut provider, &registry)
}

/// Asserts two context renderings are identical, printing a line diff on
/// mismatch.
pub fn assert_context_eq(expected: &str, actual: &str) {
    if expected != actual {
        let diff = TextDiff::from_lines(expected, actual);
        let mut rendered = String::new();
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                similar::ChangeTag::Delete => "-",
                similar::ChangeTag::Insert => "+",
                similar::ChangeTag::Equal => " ",
            };
            rendered.push_str(sign);
            rendered.push_str(change.value());
        }
        panic!("context mismatch:\n{rendered}");
    }
}
