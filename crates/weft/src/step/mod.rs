//! The stepper: single-instruction dispatch over the explicit stack.
//!
//! `step` executes exactly one instruction. Statements and composite
//! expressions lower into further instructions (pushed reversed, so source
//! order is preserved); leaf expressions resolve immediately onto the value
//! stack. Any error freezes the state with the failing instruction back on
//! top of the stack.

mod access;
mod binary;
mod strings;

use crate::{
    ast::{ContextMode, Expr, Statement, StmtKind},
    error::{RunError, RunResult},
    frame::{AiOperation, Frame, ScopeKind, Variable},
    instruction::Instruction,
    state::{PendingAi, PendingCompress, PendingTs, PendingTool, RuntimeState, Status, TsCallKind},
    tools::check_args,
    tracer::{NoopTracer, StepTracer, TraceEvent},
    types::{TypeAnnotation, coerce},
    value::{FunctionId, ImportId, Json, ModelConfig, Value},
};

impl RuntimeState {
    /// Executes exactly one instruction.
    ///
    /// An empty instruction stack completes the run. Stepping a non-running
    /// state is a protocol error and leaves the state untouched.
    pub fn step(&mut self) -> RunResult<()> {
        self.step_traced(&mut NoopTracer)
    }

    /// [`step`](Self::step) with tracing hooks.
    pub fn step_traced(&mut self, tracer: &mut impl StepTracer) -> RunResult<()> {
        if self.status() != Status::Running {
            return Err(RunError::protocol(format!(
                "step called while status is {}",
                self.status()
            )));
        }
        let Some(instruction) = self.instructions.pop() else {
            self.set_status(Status::Completed);
            return Ok(());
        };
        self.steps += 1;
        tracer.on_step(
            self.steps,
            instruction.tag(),
            self.value_stack.len(),
            self.call_stack.len(),
        );
        if self.options.record_trace {
            self.execution_log.push(TraceEvent::Step {
                index: self.steps,
                instruction: instruction.tag().to_owned(),
                value_stack: self.value_stack.len(),
                frames: self.call_stack.len(),
            });
        }
        // Resume provenance only survives into the binding that consumes it.
        if !matches!(
            instruction,
            Instruction::DeclareVar { .. } | Instruction::AssignVar { .. }
        ) {
            self.pending_source = None;
        }

        match self.dispatch(&instruction, tracer) {
            Ok(()) => {
                let status = self.status();
                if status != Status::Running {
                    tracer.on_pause(status);
                    if self.options.record_trace {
                        self.execution_log.push(TraceEvent::Pause {
                            status: status.to_string(),
                        });
                    }
                } else if self.instructions.is_empty() {
                    self.set_status(Status::Completed);
                }
                Ok(())
            }
            Err(err) => {
                // Freeze for post-mortem inspection: the failing instruction
                // goes back on top of the stack.
                self.instructions.push(instruction);
                let err = self.fail(err);
                tracer.on_error(&err);
                if self.options.record_trace {
                    self.execution_log.push(TraceEvent::Error {
                        message: err.message.clone(),
                    });
                }
                Err(err)
            }
        }
    }

    fn dispatch(&mut self, instruction: &Instruction, tracer: &mut impl StepTracer) -> RunResult<()> {
        match instruction {
            Instruction::ExecStatement(stmt) => self.lower_statement(stmt),
            Instruction::ExecExpression(expr) => self.eval_expression(expr),
            Instruction::PushValue(value) => {
                self.push_value(value.clone());
                Ok(())
            }
            Instruction::PopDiscard => {
                self.last_result = self.pop_value()?;
                Ok(())
            }
            Instruction::DeclareVar {
                name,
                annotation,
                is_const,
            } => {
                let value = self.pop_value()?;
                let source = self.pending_source.take();
                let value = match annotation {
                    Some(annotation) => coerce(value, annotation).map_err(RunError::from)?,
                    None => value,
                };
                let mut variable = Variable::typed(value, annotation.clone());
                if *is_const {
                    variable = variable.constant();
                }
                self.current_frame_mut()?.declare(name, variable, source)
            }
            Instruction::AssignVar { name } => {
                let value = self.pop_value()?;
                let source = self.pending_source.take();
                let stored = self.assign_through_chain(name, value, source)?;
                self.push_value(stored);
                Ok(())
            }
            Instruction::DeclareModel { name } => {
                let value = self.pop_value()?;
                let Value::Json(Json::Object(map)) = &value else {
                    return Err(RunError::type_error(format!(
                        "model '{name}' must be declared with an object literal"
                    )));
                };
                let config = ModelConfig::from_object(map)?;
                let variable = Variable::typed(Value::Model(config), Some(TypeAnnotation::Model)).constant();
                self.current_frame_mut()?.declare(name, variable, None)
            }
            Instruction::BinaryOp(op) => {
                let rhs = self.pop_value()?;
                let lhs = self.pop_value()?;
                let result = binary::apply_binary(*op, &lhs, &rhs)?;
                self.push_value(result);
                Ok(())
            }
            Instruction::LogicalBranch { op, rhs } => self.logical_branch(*op, rhs),
            Instruction::LogicalRhs => {
                let value = self.pop_value()?;
                let Value::Boolean(_) = value else {
                    return Err(RunError::type_error(format!(
                        "logical operators require boolean operands, got {}",
                        value.type_name()
                    )));
                };
                self.push_value(value);
                Ok(())
            }
            Instruction::UnaryOp(op) => {
                let operand = self.pop_value()?;
                let result = binary::apply_unary(*op, &operand)?;
                self.push_value(result);
                Ok(())
            }
            Instruction::Index => self.exec_index(),
            Instruction::Slice { has_start, has_end } => self.exec_slice(*has_start, *has_end),
            Instruction::BuildArray { len } => {
                let mut items = Vec::with_capacity(*len);
                for _ in 0..*len {
                    items.push(self.pop_value()?);
                }
                items.reverse();
                self.push_value(Value::Array(items));
                Ok(())
            }
            Instruction::BuildObject { keys } => {
                let mut values = Vec::with_capacity(keys.len());
                for _ in 0..keys.len() {
                    values.push(self.pop_value()?);
                }
                values.reverse();
                let mut map = indexmap::IndexMap::new();
                for (key, value) in keys.iter().zip(values) {
                    map.insert(key.clone(), value.to_json()?);
                }
                self.push_value(Value::Json(Json::Object(map)));
                Ok(())
            }
            Instruction::BuildRange => {
                let end = self.pop_value()?.as_integer("range end")?;
                let start = self.pop_value()?.as_integer("range start")?;
                if start > end {
                    return Err(RunError::structural(format!(
                        "range start ({start}) is greater than end ({end})"
                    )));
                }
                let items = (start..=end).map(|n| Value::Number(n as f64)).collect();
                self.push_value(Value::Array(items));
                Ok(())
            }
            Instruction::BuildTemplate { layout } => self.build_template(layout),
            Instruction::MemberGet { property } => self.exec_member_get(property),
            Instruction::CallMethod {
                method,
                argc,
                target_var,
            } => self.exec_call_method(method, *argc, target_var.as_deref()),
            Instruction::Invoke { name, argc } => self.exec_invoke(name, *argc, tracer),
            Instruction::AiOp {
                op,
                has_model,
                mode,
                expected,
            } => self.exec_ai_op(*op, *has_model, mode, expected.clone()),
            Instruction::CallTsBlock { code, expected } => {
                let bindings = self.capture_ts_bindings();
                self.suspend_ts(PendingTs {
                    kind: TsCallKind::Block { code: code.clone() },
                    bindings,
                    expected: expected.clone(),
                });
                Ok(())
            }
            Instruction::ForInit { var, body, mode } => self.exec_for_init(var, body, mode),
            Instruction::ForNext {
                var,
                body,
                mode,
                items,
                index,
            } => self.exec_for_next(var, body, mode, items, *index),
            Instruction::WhileBranch { cond, body, mode } => self.exec_while_branch(cond, body, mode),
            Instruction::IfBranch {
                then_branch,
                else_branch,
            } => self.exec_if_branch(then_branch, else_branch.as_deref()),
            Instruction::EnterBlock => {
                self.current_frame_mut()?.enter_block();
                Ok(())
            }
            Instruction::ExitBlock => self.current_frame_mut()?.exit_block(),
            Instruction::ScopeEnter { scope, label } => {
                self.current_frame_mut()?.enter_scope(*scope, label.clone());
                Ok(())
            }
            Instruction::ScopeExit { scope, label, mode } => self.exec_scope_exit(*scope, label.clone(), mode),
            Instruction::Return { has_value } => self.exec_return(*has_value, tracer),
        }
    }

    // --- lowering -----------------------------------------------------------

    /// Pushes a sequence so it executes in the given order.
    pub(crate) fn push_seq(&mut self, instructions: Vec<Instruction>) {
        self.instructions.extend(instructions.into_iter().rev());
    }

    fn lower_statement(&mut self, stmt: &Statement) -> RunResult<()> {
        if stmt.loc.is_some() {
            self.current_loc = stmt.loc;
        }
        match &stmt.kind {
            StmtKind::Let {
                name,
                annotation,
                init,
            } => {
                let mut seq = lower_initializer(init, annotation.as_ref());
                seq.push(Instruction::DeclareVar {
                    name: name.clone(),
                    annotation: annotation.clone(),
                    is_const: false,
                });
                self.push_seq(seq);
                Ok(())
            }
            StmtKind::Const {
                name,
                annotation,
                init,
            } => {
                let mut seq = lower_initializer(init, annotation.as_ref());
                seq.push(Instruction::DeclareVar {
                    name: name.clone(),
                    annotation: annotation.clone(),
                    is_const: true,
                });
                self.push_seq(seq);
                Ok(())
            }
            StmtKind::Model { name, config } => {
                self.push_seq(vec![
                    Instruction::ExecExpression(config.clone()),
                    Instruction::DeclareModel { name: name.clone() },
                ]);
                Ok(())
            }
            StmtKind::ToolDecl {
                name,
                description,
                params,
            } => {
                let binding = crate::value::ToolBinding {
                    name: name.clone(),
                    description: description.clone(),
                    parameters: params.clone(),
                };
                let variable = Variable::new(Value::Tool(binding)).constant();
                self.current_frame_mut()?.declare(name, variable, None)
            }
            StmtKind::Function(decl) => {
                let id = FunctionId::new(self.functions.len());
                self.functions.push(decl.clone());
                let variable = Variable::new(Value::VibeFunction(id)).constant();
                self.current_frame_mut()?.declare(&decl.name, variable, None)
            }
            StmtKind::Import { module, names } => {
                let Some(registered) = self.imported_modules.get(module) else {
                    return Err(RunError::resource(format!(
                        "module '{module}' is not registered with the runtime"
                    )));
                };
                let exports = registered.exports.clone();
                for name in names {
                    if !exports.contains(name) {
                        return Err(RunError::resource(format!(
                            "module '{module}' does not export '{name}'"
                        )));
                    }
                    let id = ImportId::new(self.import_bindings.len());
                    self.import_bindings.push(crate::state::ImportBinding {
                        module: module.clone(),
                        name: name.clone(),
                    });
                    let variable = Variable::new(Value::TsFunction(id)).constant();
                    self.current_frame_mut()?.declare(name, variable, None)?;
                }
                Ok(())
            }
            StmtKind::Export(inner) => {
                if let Some(name) = declared_name(inner) {
                    self.exports.push(name.to_owned());
                }
                self.instructions.push(Instruction::ExecStatement((**inner).clone()));
                Ok(())
            }
            StmtKind::Return { value } => {
                match value {
                    Some(expr) => self.push_seq(vec![
                        Instruction::ExecExpression(expr.clone()),
                        Instruction::Return { has_value: true },
                    ]),
                    None => self.instructions.push(Instruction::Return { has_value: false }),
                }
                Ok(())
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.push_seq(vec![
                    Instruction::ExecExpression(cond.clone()),
                    Instruction::IfBranch {
                        then_branch: then_branch.clone(),
                        else_branch: else_branch.clone(),
                    },
                ]);
                Ok(())
            }
            StmtKind::ForIn {
                var,
                iterable,
                body,
                mode,
            } => {
                self.push_seq(vec![
                    Instruction::ScopeEnter {
                        scope: ScopeKind::For,
                        label: Some(var.clone()),
                    },
                    Instruction::ExecExpression(iterable.clone()),
                    Instruction::ForInit {
                        var: var.clone(),
                        body: body.clone(),
                        mode: mode.clone(),
                    },
                ]);
                Ok(())
            }
            StmtKind::While { cond, body, mode } => {
                self.push_seq(vec![
                    Instruction::ScopeEnter {
                        scope: ScopeKind::While,
                        label: None,
                    },
                    Instruction::ExecExpression(cond.clone()),
                    Instruction::WhileBranch {
                        cond: cond.clone(),
                        body: body.clone(),
                        mode: mode.clone(),
                    },
                ]);
                Ok(())
            }
            StmtKind::Block(statements) => {
                let mut seq = vec![Instruction::ScopeEnter {
                    scope: ScopeKind::Block,
                    label: None,
                }];
                seq.extend(statements.iter().cloned().map(Instruction::ExecStatement));
                seq.push(Instruction::ScopeExit {
                    scope: ScopeKind::Block,
                    label: None,
                    mode: ContextMode::Default,
                });
                self.push_seq(seq);
                Ok(())
            }
            StmtKind::Expression(expr) => {
                self.push_seq(vec![
                    Instruction::ExecExpression(expr.clone()),
                    Instruction::PopDiscard,
                ]);
                Ok(())
            }
        }
    }

    // --- expressions --------------------------------------------------------

    fn eval_expression(&mut self, expr: &Expr) -> RunResult<()> {
        match expr {
            Expr::Null => {
                self.push_value(Value::Null);
                Ok(())
            }
            Expr::Boolean(b) => {
                self.push_value(Value::Boolean(*b));
                Ok(())
            }
            Expr::Number(n) => {
                self.push_value(Value::Number(*n));
                Ok(())
            }
            Expr::Str(raw) => {
                let text = self.interpolate_plain(raw);
                self.push_value(Value::Text(text));
                Ok(())
            }
            Expr::Template(parts) => {
                self.lower_template(parts);
                Ok(())
            }
            Expr::Identifier(name) => {
                let Some(variable) = self.lookup(name) else {
                    return Err(RunError::reference(format!("'{name}' is not defined")));
                };
                let value = variable.value.clone();
                self.push_value(value);
                Ok(())
            }
            Expr::Object(pairs) => {
                let mut seq: Vec<Instruction> = pairs
                    .iter()
                    .map(|(_, value)| Instruction::ExecExpression(value.clone()))
                    .collect();
                seq.push(Instruction::BuildObject {
                    keys: pairs.iter().map(|(key, _)| key.clone()).collect(),
                });
                self.push_seq(seq);
                Ok(())
            }
            Expr::Array(items) => {
                let mut seq: Vec<Instruction> = items
                    .iter()
                    .map(|item| Instruction::ExecExpression(item.clone()))
                    .collect();
                seq.push(Instruction::BuildArray { len: items.len() });
                self.push_seq(seq);
                Ok(())
            }
            Expr::Range { start, end } => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**start).clone()),
                    Instruction::ExecExpression((**end).clone()),
                    Instruction::BuildRange,
                ]);
                Ok(())
            }
            Expr::Assign { name, value } => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**value).clone()),
                    Instruction::AssignVar { name: name.clone() },
                ]);
                Ok(())
            }
            Expr::Call { callee, args, .. } => self.lower_call(callee, args),
            Expr::Member { object, property } => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**object).clone()),
                    Instruction::MemberGet {
                        property: property.clone(),
                    },
                ]);
                Ok(())
            }
            Expr::Index { object, index } => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**object).clone()),
                    Instruction::ExecExpression((**index).clone()),
                    Instruction::Index,
                ]);
                Ok(())
            }
            Expr::Slice { object, start, end } => {
                let mut seq = vec![Instruction::ExecExpression((**object).clone())];
                if let Some(start) = start {
                    seq.push(Instruction::ExecExpression((**start).clone()));
                }
                if let Some(end) = end {
                    seq.push(Instruction::ExecExpression((**end).clone()));
                }
                seq.push(Instruction::Slice {
                    has_start: start.is_some(),
                    has_end: end.is_some(),
                });
                self.push_seq(seq);
                Ok(())
            }
            Expr::Binary { op, left, right } if op.is_short_circuit() => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**left).clone()),
                    Instruction::LogicalBranch {
                        op: *op,
                        rhs: (**right).clone(),
                    },
                ]);
                Ok(())
            }
            Expr::Binary { op, left, right } => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**left).clone()),
                    Instruction::ExecExpression((**right).clone()),
                    Instruction::BinaryOp(*op),
                ]);
                Ok(())
            }
            Expr::Unary { op, operand } => {
                self.push_seq(vec![
                    Instruction::ExecExpression((**operand).clone()),
                    Instruction::UnaryOp(*op),
                ]);
                Ok(())
            }
            Expr::Do { prompt, model, mode } => {
                let seq = lower_ai(AiOperation::Do, prompt, model.as_deref(), mode, None);
                self.push_seq(seq);
                Ok(())
            }
            Expr::Vibe { prompt, model, mode } => {
                let seq = lower_ai(AiOperation::Vibe, prompt, model.as_deref(), mode, None);
                self.push_seq(seq);
                Ok(())
            }
            Expr::Ask { prompt } => {
                let seq = lower_ai(AiOperation::Ask, prompt, None, &ContextMode::Default, None);
                self.push_seq(seq);
                Ok(())
            }
            Expr::TsBlock { code } => {
                self.instructions.push(Instruction::CallTsBlock {
                    code: code.clone(),
                    expected: None,
                });
                Ok(())
            }
        }
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr]) -> RunResult<()> {
        match callee {
            Expr::Identifier(name) => {
                let mut seq: Vec<Instruction> = args
                    .iter()
                    .map(|arg| Instruction::ExecExpression(arg.clone()))
                    .collect();
                seq.push(Instruction::Invoke {
                    name: name.clone(),
                    argc: args.len(),
                });
                self.push_seq(seq);
                Ok(())
            }
            Expr::Member { object, property } => {
                let target_var = match &**object {
                    Expr::Identifier(name) => Some(name.clone()),
                    _ => None,
                };
                let mut seq = vec![Instruction::ExecExpression((**object).clone())];
                seq.extend(args.iter().map(|arg| Instruction::ExecExpression(arg.clone())));
                seq.push(Instruction::CallMethod {
                    method: property.clone(),
                    argc: args.len(),
                    target_var,
                });
                self.push_seq(seq);
                Ok(())
            }
            _ => Err(RunError::type_error(
                "only named functions and member methods can be called",
            )),
        }
    }

    fn logical_branch(&mut self, op: crate::ast::BinaryOp, rhs: &Expr) -> RunResult<()> {
        let lhs = self.pop_value()?;
        let Value::Boolean(lhs) = lhs else {
            return Err(RunError::type_error(format!(
                "logical operators require boolean operands, got {}",
                lhs.type_name()
            )));
        };
        let settled = match op {
            crate::ast::BinaryOp::And => !lhs,
            crate::ast::BinaryOp::Or => lhs,
            _ => unreachable!("only and/or lower through logical_branch"),
        };
        if settled {
            self.push_value(Value::Boolean(lhs));
        } else {
            self.push_seq(vec![
                Instruction::ExecExpression(rhs.clone()),
                Instruction::LogicalRhs,
            ]);
        }
        Ok(())
    }

    // --- calls and returns --------------------------------------------------

    fn exec_invoke(&mut self, name: &str, argc: usize, tracer: &mut impl StepTracer) -> RunResult<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value()?);
        }
        args.reverse();

        let Some(variable) = self.lookup(name) else {
            return Err(RunError::reference(format!("'{name}' is not defined")));
        };
        match variable.value.clone() {
            Value::VibeFunction(id) => self.invoke_function(id, name, args, tracer),
            Value::Tool(binding) => {
                let mut json_args = indexmap::IndexMap::new();
                if args.len() > binding.parameters.len() {
                    return Err(RunError::type_error(format!(
                        "tool '{name}' takes {} arguments, got {}",
                        binding.parameters.len(),
                        args.len()
                    )));
                }
                for (param, arg) in binding.parameters.iter().zip(args) {
                    json_args.insert(param.name.clone(), arg.to_json()?);
                }
                check_args(&binding, &json_args).map_err(RunError::type_error)?;
                self.suspend_tool(PendingTool {
                    tool: binding,
                    args: json_args,
                });
                Ok(())
            }
            Value::TsFunction(id) => {
                let binding = self
                    .import_bindings
                    .get(id.index())
                    .cloned()
                    .ok_or_else(|| RunError::protocol(format!("dangling import id for '{name}'")))?;
                let bindings = self.capture_ts_bindings();
                self.suspend_ts(PendingTs {
                    kind: TsCallKind::ImportedFunction {
                        module: binding.module,
                        name: binding.name,
                        args,
                    },
                    bindings,
                    expected: None,
                });
                Ok(())
            }
            other => Err(RunError::type_error(format!(
                "'{name}' is a {}, not a callable",
                other.type_name()
            ))),
        }
    }

    fn invoke_function(
        &mut self,
        id: FunctionId,
        name: &str,
        args: Vec<Value>,
        tracer: &mut impl StepTracer,
    ) -> RunResult<()> {
        let decl = self
            .functions
            .get(id.index())
            .cloned()
            .ok_or_else(|| RunError::protocol(format!("dangling function id for '{name}'")))?;
        if args.len() != decl.params.len() {
            return Err(RunError::type_error(format!(
                "function '{name}' expects {} arguments, got {}",
                decl.params.len(),
                args.len()
            )));
        }
        let mut frame = Frame::new(decl.name.clone());
        frame.return_to = Some(self.instructions.len());
        frame.return_type = decl.return_type.clone();
        for (param, arg) in decl.params.iter().zip(args) {
            let arg = match &param.annotation {
                Some(annotation) => coerce(arg, annotation).map_err(RunError::from)?,
                None => arg,
            };
            frame.declare(&param.name, Variable::typed(arg, param.annotation.clone()), None)?;
        }
        self.call_stack.push(frame);
        tracer.on_frame_push(name, self.call_stack.len());
        // Implicit null return sits under the body so falling off the end
        // still pops the frame.
        let mut seq = vec![Instruction::Return { has_value: false }];
        for stmt in decl.body.iter().rev() {
            seq.push(Instruction::ExecStatement(stmt.clone()));
        }
        self.instructions.extend(seq);
        Ok(())
    }

    fn exec_return(&mut self, has_value: bool, tracer: &mut impl StepTracer) -> RunResult<()> {
        let value = if has_value { self.pop_value()? } else { Value::Null };
        if self.call_stack.len() <= 1 {
            return Err(RunError::structural("return outside function"));
        }
        let frame = self
            .call_stack
            .pop()
            .ok_or_else(|| RunError::protocol("call stack is empty"))?;
        let value = match &frame.return_type {
            Some(annotation) => coerce(value, annotation).map_err(RunError::from)?,
            None => value,
        };
        let return_to = frame
            .return_to
            .ok_or_else(|| RunError::protocol("function frame without a return address"))?;
        self.instructions.truncate(return_to);
        self.push_value(value);
        tracer.on_frame_pop(self.call_stack.len());
        Ok(())
    }

    // --- AI suspension ------------------------------------------------------

    fn exec_ai_op(
        &mut self,
        op: AiOperation,
        has_model: bool,
        mode: &ContextMode,
        expected: Option<TypeAnnotation>,
    ) -> RunResult<()> {
        let model = if has_model {
            match self.pop_value()? {
                Value::Model(config) => Some(config),
                other => {
                    return Err(RunError::type_error(format!(
                        "expected model, got {}",
                        other.type_name()
                    )));
                }
            }
        } else {
            None
        };
        let prompt = match self.pop_value()? {
            Value::Text(text) => text,
            other => {
                return Err(RunError::type_error(format!(
                    "prompt must be text, got {}",
                    other.type_name()
                )));
            }
        };
        let tools = match op {
            AiOperation::Ask => Vec::new(),
            AiOperation::Do | AiOperation::Vibe => self.visible_tools(),
        };
        let context = self.context_for_mode(mode);
        self.suspend_ai(PendingAi {
            operation: op,
            prompt,
            model,
            tools,
            mode: mode.clone(),
            expected,
            context,
        });
        Ok(())
    }

    /// JSON-representable variables visible at a host-escape suspension.
    /// Values are deep copies; const semantics survive the escape.
    fn capture_ts_bindings(&self) -> indexmap::IndexMap<String, Json> {
        let mut bindings = indexmap::IndexMap::new();
        let mut frames: Vec<&Frame> = Vec::new();
        if let Some(entry) = self.call_stack.first() {
            frames.push(entry);
        }
        if self.call_stack.len() > 1
            && let Some(top) = self.call_stack.last()
        {
            frames.push(top);
        }
        for frame in frames {
            for (name, variable) in frame.locals() {
                if let Ok(json) = variable.value.to_json() {
                    bindings.insert(name.clone(), json);
                }
            }
        }
        bindings
    }

    // --- control flow -------------------------------------------------------

    fn exec_for_init(&mut self, var: &str, body: &[Statement], mode: &ContextMode) -> RunResult<()> {
        let source = self.pop_value()?;
        let items: Vec<Value> = match source {
            Value::Number(_) => {
                let bound = source.as_integer("for loop bound")?;
                if bound < 0 {
                    return Err(RunError::structural(format!(
                        "for loop bound must be non-negative, got {bound}"
                    )));
                }
                (1..=bound).map(|n| Value::Number(n as f64)).collect()
            }
            Value::Array(items) => items,
            other => {
                return Err(RunError::type_error(format!(
                    "for loop source must be a number or an array, got {}",
                    other.type_name()
                )));
            }
        };
        if items.is_empty() {
            self.instructions.push(Instruction::ScopeExit {
                scope: ScopeKind::For,
                label: Some(var.to_owned()),
                mode: mode.clone(),
            });
            return Ok(());
        }
        let first = items[0].clone();
        self.current_frame_mut()?.declare(var, Variable::new(first), None)?;
        self.push_iteration(var, body, mode, items, 1);
        Ok(())
    }

    fn exec_for_next(
        &mut self,
        var: &str,
        body: &[Statement],
        mode: &ContextMode,
        items: &[Value],
        index: usize,
    ) -> RunResult<()> {
        if index >= items.len() {
            self.instructions.push(Instruction::ScopeExit {
                scope: ScopeKind::For,
                label: Some(var.to_owned()),
                mode: mode.clone(),
            });
            return Ok(());
        }
        self.assign_through_chain(var, items[index].clone(), None)?;
        self.push_iteration(var, body, mode, items.to_vec(), index + 1);
        Ok(())
    }

    /// Schedules one loop-body iteration followed by the next `for_next`.
    fn push_iteration(&mut self, var: &str, body: &[Statement], mode: &ContextMode, items: Vec<Value>, index: usize) {
        let mut seq = vec![Instruction::EnterBlock];
        seq.extend(body.iter().cloned().map(Instruction::ExecStatement));
        seq.push(Instruction::ExitBlock);
        seq.push(Instruction::ForNext {
            var: var.to_owned(),
            body: body.to_vec(),
            mode: mode.clone(),
            items,
            index,
        });
        self.push_seq(seq);
    }

    fn exec_while_branch(&mut self, cond: &Expr, body: &[Statement], mode: &ContextMode) -> RunResult<()> {
        let value = self.pop_value()?;
        let Value::Boolean(keep_going) = value else {
            return Err(RunError::type_error(format!(
                "while condition must be boolean, got {}",
                value.type_name()
            )));
        };
        if keep_going {
            let mut seq = vec![Instruction::EnterBlock];
            seq.extend(body.iter().cloned().map(Instruction::ExecStatement));
            seq.push(Instruction::ExitBlock);
            seq.push(Instruction::ExecExpression(cond.clone()));
            seq.push(Instruction::WhileBranch {
                cond: cond.clone(),
                body: body.to_vec(),
                mode: mode.clone(),
            });
            self.push_seq(seq);
        } else {
            self.instructions.push(Instruction::ScopeExit {
                scope: ScopeKind::While,
                label: None,
                mode: mode.clone(),
            });
        }
        Ok(())
    }

    fn exec_if_branch(&mut self, then_branch: &[Statement], else_branch: Option<&[Statement]>) -> RunResult<()> {
        let value = self.pop_value()?;
        let Value::Boolean(truthy) = value else {
            return Err(RunError::type_error(format!(
                "if condition must be boolean, got {}",
                value.type_name()
            )));
        };
        let branch = if truthy { Some(then_branch) } else { else_branch };
        if let Some(statements) = branch
            && !statements.is_empty()
        {
            let mut seq = vec![Instruction::ScopeEnter {
                scope: ScopeKind::If,
                label: None,
            }];
            seq.extend(statements.iter().cloned().map(Instruction::ExecStatement));
            seq.push(Instruction::ScopeExit {
                scope: ScopeKind::If,
                label: None,
                mode: ContextMode::Default,
            });
            self.push_seq(seq);
        }
        Ok(())
    }

    fn exec_scope_exit(&mut self, scope: ScopeKind, label: Option<String>, mode: &ContextMode) -> RunResult<()> {
        match mode {
            ContextMode::Default | ContextMode::Verbose => self.current_frame_mut()?.exit_scope_verbose(),
            ContextMode::Forget => self.current_frame_mut()?.exit_scope_forget(),
            ContextMode::Compress { prompt } => {
                let prompt = prompt.clone();
                let model = self.nearest_model();
                let depth = self.call_stack.len() - 1;
                let frame = self.current_frame_mut()?;
                let open = frame.begin_compress()?;
                let frame_name = frame.name.clone();
                let entries = crate::context::project_entries(
                    &frame.entries()[open.entry_index..],
                    &frame_name,
                    depth,
                );
                self.suspend_compress(PendingCompress {
                    prompt,
                    model,
                    scope,
                    label,
                    enter_index: open.entry_index,
                    entries,
                });
                Ok(())
            }
        }
    }
}

/// Lowers a declaration initializer, threading the destination annotation
/// into suspension points so the resume can validate eagerly.
fn lower_initializer(init: &Expr, annotation: Option<&TypeAnnotation>) -> Vec<Instruction> {
    match init {
        Expr::Do { prompt, model, mode } => {
            lower_ai(AiOperation::Do, prompt, model.as_deref(), mode, annotation.cloned())
        }
        Expr::Vibe { prompt, model, mode } => {
            lower_ai(AiOperation::Vibe, prompt, model.as_deref(), mode, annotation.cloned())
        }
        Expr::Ask { prompt } => lower_ai(
            AiOperation::Ask,
            prompt,
            None,
            &ContextMode::Default,
            annotation.cloned(),
        ),
        Expr::TsBlock { code } => vec![Instruction::CallTsBlock {
            code: code.clone(),
            expected: annotation.cloned(),
        }],
        other => vec![Instruction::ExecExpression(other.clone())],
    }
}

/// Lowers an AI operation: prompt, then model (if any), then the suspension.
fn lower_ai(
    op: AiOperation,
    prompt: &Expr,
    model: Option<&Expr>,
    mode: &ContextMode,
    expected: Option<TypeAnnotation>,
) -> Vec<Instruction> {
    let mut seq = vec![Instruction::ExecExpression(prompt.clone())];
    if let Some(model) = model {
        seq.push(Instruction::ExecExpression(model.clone()));
    }
    seq.push(Instruction::AiOp {
        op,
        has_model: model.is_some(),
        mode: mode.clone(),
        expected,
    });
    seq
}

/// The name a declaration statement binds, for export bookkeeping.
fn declared_name(stmt: &Statement) -> Option<&str> {
    match &stmt.kind {
        StmtKind::Let { name, .. }
        | StmtKind::Const { name, .. }
        | StmtKind::Model { name, .. }
        | StmtKind::ToolDecl { name, .. } => Some(name),
        StmtKind::Function(decl) => Some(&decl.name),
        _ => None,
    }
}
