//! String interpolation.
//!
//! Plain strings interpolate `{name}` by simple-name lookup; template
//! literals interpolate `${expr}` with full expressions. In both forms an
//! undefined simple name stays literal — interpolation never invents a value
//! and never fails on a missing name.

use crate::{
    ast::{Expr, TemplatePart},
    error::RunResult,
    instruction::{Instruction, TemplateSlot},
    state::RuntimeState,
};

impl RuntimeState {
    /// Resolves `{name}` interpolations in a plain string literal against the
    /// scope chain. Anything that is not a well-formed `{identifier}` with a
    /// bound name is copied through untouched.
    pub(super) fn interpolate_plain(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            if let Some(close) = after.find('}') {
                let name = &after[..close];
                if is_identifier(name)
                    && let Some(variable) = self.lookup(name)
                {
                    out.push_str(&variable.value.render());
                    rest = &after[close + 1..];
                    continue;
                }
            }
            out.push('{');
            rest = after;
        }
        out.push_str(rest);
        out
    }

    /// Lowers a template literal: non-identifier interpolations evaluate on
    /// the stack; identifier interpolations resolve at build time so an
    /// undefined name can stay literal.
    pub(super) fn lower_template(&mut self, parts: &[TemplatePart]) {
        let mut seq = Vec::new();
        let mut layout = Vec::new();
        for part in parts {
            match part {
                TemplatePart::Text(text) => layout.push(TemplateSlot::Text(text.clone())),
                TemplatePart::Expr { raw, expr } => match expr {
                    Expr::Identifier(name) => layout.push(TemplateSlot::Name {
                        raw: raw.clone(),
                        name: name.clone(),
                    }),
                    other => {
                        seq.push(Instruction::ExecExpression(other.clone()));
                        layout.push(TemplateSlot::Stack);
                    }
                },
            }
        }
        seq.push(Instruction::BuildTemplate { layout });
        self.push_seq(seq);
    }

    /// Assembles a template from its layout, consuming one stack value per
    /// `Stack` slot (they were evaluated in source order).
    pub(super) fn build_template(&mut self, layout: &[TemplateSlot]) -> RunResult<()> {
        let stack_slots = layout.iter().filter(|slot| matches!(slot, TemplateSlot::Stack)).count();
        let mut values = Vec::with_capacity(stack_slots);
        for _ in 0..stack_slots {
            values.push(self.pop_value()?);
        }
        values.reverse();
        let mut values = values.into_iter();

        let mut out = String::new();
        for slot in layout {
            match slot {
                TemplateSlot::Text(text) => out.push_str(text),
                TemplateSlot::Name { raw, name } => match self.lookup(name) {
                    Some(variable) => out.push_str(&variable.value.render()),
                    // undefined simple names stay literal
                    None => {
                        out.push_str("${");
                        out.push_str(raw);
                        out.push('}');
                    }
                },
                TemplateSlot::Stack => {
                    let value = values
                        .next()
                        .ok_or_else(|| crate::error::RunError::protocol("template slot underflow"))?;
                    out.push_str(&value.render());
                }
            }
        }
        self.push_value(crate::value::Value::Text(out));
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
