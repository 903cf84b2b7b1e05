//! Indexing, slicing, member access, and the fixed member-method table.
//!
//! Slices are inclusive on both bounds; omitted bounds default to the full
//! array. Mutating methods write back through the scope chain when the
//! receiver was a plain identifier — without logging a snapshot, since
//! mutation is not reassignment.

use crate::{
    error::{RunError, RunResult},
    state::RuntimeState,
    value::{Json, Value},
};

impl RuntimeState {
    /// `target[index]`
    pub(super) fn exec_index(&mut self) -> RunResult<()> {
        let index = self.pop_value()?;
        let target = self.pop_value()?;
        let result = match &target {
            Value::Array(items) => {
                let i = checked_index(&index, items.len())?;
                items[i].clone()
            }
            Value::Json(Json::Array(items)) => {
                let i = checked_index(&index, items.len())?;
                Value::from_json(items[i].clone())
            }
            Value::Json(Json::Object(map)) => {
                let Value::Text(key) = &index else {
                    return Err(RunError::type_error(format!(
                        "object index must be text, got {}",
                        index.type_name()
                    )));
                };
                let Some(member) = map.get(key) else {
                    return Err(RunError::structural(format!("key '{key}' not found in object")));
                };
                Value::from_json(member.clone())
            }
            other => {
                return Err(RunError::type_error(format!(
                    "cannot index value of type {}",
                    other.type_name()
                )));
            }
        };
        self.push_value(result);
        Ok(())
    }

    /// `target[start,end]` — inclusive on both bounds. Omitted start defaults
    /// to 0, omitted end to `len - 1`.
    pub(super) fn exec_slice(&mut self, has_start: bool, has_end: bool) -> RunResult<()> {
        let end_value = if has_end { Some(self.pop_value()?) } else { None };
        let start_value = if has_start { Some(self.pop_value()?) } else { None };
        let target = self.pop_value()?;
        let Value::Array(items) = &target else {
            return Err(RunError::type_error(format!(
                "cannot slice value of type {}",
                target.type_name()
            )));
        };
        // with both bounds omitted the whole array comes back, even empty
        if items.is_empty() && start_value.is_none() && end_value.is_none() {
            self.push_value(Value::Array(Vec::new()));
            return Ok(());
        }
        let len = items.len() as i64;
        let start = match &start_value {
            Some(value) => value.as_integer("slice start")?,
            None => 0,
        };
        let end = match &end_value {
            Some(value) => value.as_integer("slice end")?,
            None => len - 1,
        };
        if start > end {
            return Err(RunError::structural(format!(
                "slice start ({start}) is greater than end ({end})"
            )));
        }
        if start < 0 || end >= len {
            return Err(RunError::structural(format!(
                "slice bounds [{start},{end}] out of range for array of length {len}"
            )));
        }
        let slice = items[start as usize..=end as usize].to_vec();
        self.push_value(Value::Array(slice));
        Ok(())
    }

    /// `object.property` — member read on a JSON object.
    pub(super) fn exec_member_get(&mut self, property: &str) -> RunResult<()> {
        let target = self.pop_value()?;
        match &target {
            Value::Json(Json::Object(map)) => {
                let Some(member) = map.get(property) else {
                    return Err(RunError::structural(format!(
                        "key '{property}' not found in object"
                    )));
                };
                let value = Value::from_json(member.clone());
                self.push_value(value);
                Ok(())
            }
            other => Err(RunError::type_error(format!(
                "value of type {} has no property '{property}'",
                other.type_name()
            ))),
        }
    }

    /// Dispatches a member method over the fixed table: arrays support
    /// `len()`, `push(v)` (returns the array for chaining), `pop()`; strings
    /// support `len()`. Anything else is a type error.
    pub(super) fn exec_call_method(&mut self, method: &str, argc: usize, target_var: Option<&str>) -> RunResult<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value()?);
        }
        args.reverse();
        let target = self.pop_value()?;

        let result = match (&target, method) {
            (Value::Array(items), "len") => {
                expect_argc(method, &args, 0)?;
                Value::Number(items.len() as f64)
            }
            (Value::Array(items), "push") => {
                expect_argc(method, &args, 1)?;
                let mut items = items.clone();
                items.push(args.remove(0));
                let updated = Value::Array(items);
                if let Some(name) = target_var {
                    self.mutate_through_chain(name, updated.clone())?;
                }
                updated
            }
            (Value::Array(items), "pop") => {
                expect_argc(method, &args, 0)?;
                let mut items = items.clone();
                let Some(popped) = items.pop() else {
                    return Err(RunError::structural("pop from empty array"));
                };
                if let Some(name) = target_var {
                    self.mutate_through_chain(name, Value::Array(items))?;
                }
                popped
            }
            (Value::Text(text), "len") => {
                expect_argc(method, &args, 0)?;
                Value::Number(text.chars().count() as f64)
            }
            (other, _) => {
                return Err(RunError::type_error(format!(
                    "unknown method '{method}' on {}",
                    other.type_name()
                )));
            }
        };
        self.push_value(result);
        Ok(())
    }
}

fn expect_argc(method: &str, args: &[Value], expected: usize) -> RunResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RunError::type_error(format!(
            "method '{method}' takes {expected} argument{}, got {}",
            if expected == 1 { "" } else { "s" },
            args.len()
        )))
    }
}

/// Integer, in-range array index. Negative indexes are rejected.
fn checked_index(index: &Value, len: usize) -> RunResult<usize> {
    let i = index.as_integer("array index")?;
    if i < 0 || i as usize >= len {
        return Err(RunError::structural(format!(
            "index {i} out of range for array of length {len}"
        )));
    }
    Ok(i as usize)
}
