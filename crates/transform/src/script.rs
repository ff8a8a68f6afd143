//! Embedded Lua evaluator for administrator-authored scripts.
//!
//! Every invocation gets a fresh sandboxed state: no `os`, `io`, `debug`,
//! `package`, `require`, `load`, `loadfile` or `dofile`, a memory cap, and an
//! instruction budget plus wall-clock limit enforced from a VM hook. `print`
//! goes to the debug log, never to stdout.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, MultiValue, Result as LuaResult, Table, Value as LuaValue, VmState};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use unirecon_core::{Row, Value};

use crate::error::TransformationError;
use crate::evaluator::{TransformationEvaluator, TransformationKind};

/// Maximum number of Lua instructions per invocation.
pub const INSTRUCTION_LIMIT: i64 = 50_000_000;

/// How often the hook checks the budget (every N instructions).
pub const INSTRUCTION_HOOK_INTERVAL: u32 = 10_000;

/// Wall-clock limit per invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Heap limit per Lua state, in bytes.
pub const MEMORY_LIMIT: usize = 64 * 1024 * 1024;

const REMOVED_GLOBALS: &[&str] = &[
    "os", "io", "debug", "package", "require", "loadfile", "dofile", "load",
];

#[derive(Debug, Clone)]
pub struct ScriptEvaluator {
    instruction_limit: i64,
    timeout: Duration,
    memory_limit: usize,
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self::new(INSTRUCTION_LIMIT, DEFAULT_TIMEOUT)
    }
}

impl ScriptEvaluator {
    pub fn new(instruction_limit: i64, timeout: Duration) -> Self {
        Self { instruction_limit, timeout, memory_limit: MEMORY_LIMIT }
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Compile-check a script without running it.
    pub fn validate_script(&self, script: &str) -> Result<(), TransformationError> {
        if script.trim().is_empty() {
            return Err(TransformationError::validation("Script cannot be empty"));
        }
        let lua = self
            .sandbox()
            .map_err(|e| TransformationError::validation(format_lua_error(&e)))?;
        lua.load(script).into_function().map(|_| ()).map_err(|e| {
            TransformationError::validation(format!("Script compilation error: {}", format_lua_error(&e)))
        })
    }

    /// Run a field-level script with globals `value`, `row` (and its alias `raw`).
    ///
    /// The script's return value wins; without one, the possibly reassigned
    /// `value` global is the result. A blank script returns the input unchanged.
    pub fn run_value(&self, script: &str, value: &Value, row: &Row) -> Result<Value, TransformationError> {
        if script.trim().is_empty() {
            return Ok(value.clone());
        }
        self.exec_value(script, value, row).map_err(|e| {
            TransformationError::evaluation(format!("Script transformation failed: {}", format_lua_error(&e)))
        })
    }

    /// Run a whole-dataset script over global `rows`.
    ///
    /// The script either returns a new array of row tables or mutates `rows`
    /// in place. Existing columns keep their order; new ones are appended by name.
    pub fn run_dataset(&self, script: &str, rows: Vec<Row>) -> Result<Vec<Row>, TransformationError> {
        if script.trim().is_empty() {
            return Ok(rows);
        }
        let order = column_order(&rows);
        self.exec_dataset(script, &rows, &order).map_err(|e| {
            TransformationError::evaluation(format!("Dataset script failed: {}", format_lua_error(&e)))
        })
    }

    fn exec_value(&self, script: &str, value: &Value, row: &Row) -> LuaResult<Value> {
        let lua = self.sandbox()?;
        let globals = lua.globals();
        globals.set("value", to_lua(&lua, value)?)?;
        let record = row_to_table(&lua, row)?;
        globals.set("row", record.clone())?;
        globals.set("raw", record)?;

        let result: LuaValue = lua.load(script).eval()?;
        if !result.is_nil() {
            return from_lua(result);
        }
        from_lua(globals.get::<LuaValue>("value")?)
    }

    fn exec_dataset(&self, script: &str, rows: &[Row], order: &[String]) -> LuaResult<Vec<Row>> {
        let lua = self.sandbox()?;
        let list = lua.create_table()?;
        for (i, row) in rows.iter().enumerate() {
            list.set(i + 1, row_to_table(&lua, row)?)?;
        }
        lua.globals().set("rows", list)?;

        let result: LuaValue = lua.load(script).eval()?;
        let table = match result {
            LuaValue::Table(t) => t,
            LuaValue::Nil => match lua.globals().get::<LuaValue>("rows")? {
                LuaValue::Table(t) => t,
                other => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "rows must remain a list of rows, got {}",
                        other.type_name()
                    )))
                }
            },
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "dataset script must return a list of rows, got {}",
                    other.type_name()
                )))
            }
        };

        let mut out = Vec::new();
        for item in table.sequence_values::<LuaValue>() {
            match item? {
                LuaValue::Table(t) => out.push(table_to_row(t, order)?),
                other => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "each row must be a table, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(out)
    }

    fn sandbox(&self) -> LuaResult<Lua> {
        let lua = Lua::new();
        lua.set_memory_limit(self.memory_limit)?;
        {
            let globals = lua.globals();
            for name in REMOVED_GLOBALS {
                globals.set(*name, LuaValue::Nil)?;
            }
            // stdout belongs to the CLI's CSV/JSON output
            let print_fn = lua.create_function(|_, args: MultiValue| {
                let parts: Vec<String> = args.iter().map(display_lua).collect();
                log::debug!("script: {}", parts.join("\t"));
                Ok(())
            })?;
            globals.set("print", print_fn)?;
        }

        let limit = self.instruction_limit;
        let timeout = self.timeout;
        let start_time = Instant::now();
        let budget = AtomicI64::new(limit);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(INSTRUCTION_HOOK_INTERVAL),
            move |_lua, _debug| {
                if start_time.elapsed() > timeout {
                    return Err(mlua::Error::RuntimeError(format!(
                        "execution timeout ({}ms limit)",
                        timeout.as_millis()
                    )));
                }
                let remaining = budget.fetch_sub(INSTRUCTION_HOOK_INTERVAL as i64, Ordering::Relaxed);
                if remaining <= 0 {
                    Err(mlua::Error::RuntimeError(format!(
                        "instruction limit exceeded ({} instructions)",
                        limit
                    )))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
        Ok(lua)
    }
}

impl TransformationEvaluator for ScriptEvaluator {
    fn kind(&self) -> TransformationKind {
        TransformationKind::Script
    }

    fn validate(&self, config: &str) -> Result<(), TransformationError> {
        self.validate_script(config)
    }

    fn evaluate(&self, value: &Value, row: &Row, config: &str) -> Result<Value, TransformationError> {
        self.run_value(config, value, row)
    }
}

// ---------------------------------------------------------------------------
// Value <-> Lua
// ---------------------------------------------------------------------------

fn to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Integer(i) => LuaValue::Integer(*i),
        Value::Decimal(d) => match d.to_f64() {
            Some(n) => LuaValue::Number(n),
            None => LuaValue::String(lua.create_string(d.to_string())?),
        },
        other => LuaValue::String(lua.create_string(other.to_string())?),
    })
}

fn from_lua(value: LuaValue) -> LuaResult<Value> {
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Integer(i)),
        LuaValue::Number(n) => Decimal::from_f64(n)
            .map(|d| Value::Decimal(d.normalize()))
            .ok_or_else(|| mlua::Error::RuntimeError(format!("number {n} is not a finite decimal"))),
        LuaValue::String(s) => Ok(Value::Text(s.to_str()?.to_string())),
        other => Err(mlua::Error::RuntimeError(format!(
            "unsupported script result type: {}",
            other.type_name()
        ))),
    }
}

fn row_to_table(lua: &Lua, row: &Row) -> LuaResult<Table> {
    let table = lua.create_table()?;
    for (column, value) in row.iter() {
        table.set(column, to_lua(lua, value)?)?;
    }
    Ok(table)
}

fn table_to_row(table: Table, order: &[String]) -> LuaResult<Row> {
    let mut fields = BTreeMap::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let key = match key {
            LuaValue::String(s) => s.to_str()?.to_string(),
            LuaValue::Integer(i) => i.to_string(),
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "row keys must be strings, got {}",
                    other.type_name()
                )))
            }
        };
        fields.insert(key, from_lua(value)?);
    }

    let mut row = Row::with_capacity(fields.len());
    for column in order {
        if let Some(value) = fields.remove(column) {
            row.insert(column.clone(), value);
        }
    }
    for (column, value) in fields {
        row.insert(column, value);
    }
    Ok(row)
}

/// `print`-style rendering of a Lua value.
fn display_lua(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

/// Union of input columns in first-seen order.
fn column_order(rows: &[Row]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !order.iter().any(|c| c == column) {
                order.push(column.to_string());
            }
        }
    }
    order
}

/// Format a Lua error for display.
fn format_lua_error(error: &mlua::Error) -> String {
    match error {
        mlua::Error::SyntaxError { message, .. } => {
            // Strip the "[string \"...\"]:1: " prefix if present
            if let Some(idx) = message.find("]:") {
                let rest = &message[idx + 2..];
                match rest.find(": ") {
                    Some(colon) => rest[colon + 2..].to_string(),
                    None => rest.to_string(),
                }
            } else {
                message.clone()
            }
        }
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn expression_result_is_returned() {
        let eval = ScriptEvaluator::default();
        let out = eval.run_value("value:upper()", &Value::text("abc"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("ABC"));
    }

    #[test]
    fn reassigned_value_is_used_without_return() {
        let eval = ScriptEvaluator::default();
        let out = eval
            .run_value("value = value .. '-' .. row.ccy", &Value::text("T1"), &row(&[("ccy", "USD")]))
            .unwrap();
        assert_eq!(out, Value::text("T1-USD"));
    }

    #[test]
    fn untouched_value_passes_through() {
        let eval = ScriptEvaluator::default();
        let out = eval.run_value("local x = 1", &Value::Integer(7), &Row::new()).unwrap();
        assert_eq!(out, Value::Integer(7));
    }

    #[test]
    fn numbers_come_back_as_decimals() {
        let eval = ScriptEvaluator::default();
        let out = eval
            .run_value("return tonumber(raw.amount) * 1.5", &Value::Null, &row(&[("amount", "10")]))
            .unwrap();
        assert_eq!(out, Value::Decimal(Decimal::new(15, 0)));
    }

    #[test]
    fn blank_script_is_identity() {
        let eval = ScriptEvaluator::default();
        assert_eq!(eval.run_value("  ", &Value::text("x"), &Row::new()).unwrap(), Value::text("x"));
    }

    #[test]
    fn sandbox_removes_dangerous_globals() {
        let eval = ScriptEvaluator::default();
        for script in ["os.time()", "io.open('x')", "require('x')", "load('return 1')"] {
            let err = eval.run_value(script, &Value::Null, &Row::new()).unwrap_err();
            assert!(matches!(err, TransformationError::Evaluation { .. }), "{script}");
        }
    }

    #[test]
    fn print_goes_to_debug_log() {
        let eval = ScriptEvaluator::default();
        let out = eval.run_value("print('seen', value) return value", &Value::text("a"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("a"));
        let out = eval.run_dataset("print(#rows) return rows", vec![row(&[("id", "1")])]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn oversized_allocation_hits_memory_limit() {
        let eval = ScriptEvaluator::default().with_memory_limit(4 * 1024 * 1024);
        let err = eval.run_value("return string.rep('x', 2^26)", &Value::Null, &Row::new()).unwrap_err();
        assert!(matches!(err, TransformationError::Evaluation { .. }));
        assert!(err.to_string().contains("memory"), "{err}");

        // ordinary scripts fit comfortably
        let out = eval.run_value("return #string.rep('x', 1000)", &Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Integer(1000));
    }

    #[test]
    fn runaway_script_hits_instruction_limit() {
        let eval = ScriptEvaluator::new(100_000, Duration::from_secs(30));
        let err = eval.run_value("while true do end", &Value::Null, &Row::new()).unwrap_err();
        assert!(err.to_string().contains("instruction limit exceeded"), "{err}");
    }

    #[test]
    fn table_result_is_rejected() {
        let eval = ScriptEvaluator::default();
        let err = eval.run_value("return {}", &Value::Null, &Row::new()).unwrap_err();
        assert!(err.to_string().contains("unsupported script result type"));
    }

    #[test]
    fn validation_reports_syntax_errors() {
        let eval = ScriptEvaluator::default();
        assert!(eval.validate_script("return value").is_ok());
        let err = eval.validate_script("return (").unwrap_err();
        assert!(matches!(err, TransformationError::Validation(ref m) if m.starts_with("Script compilation error")));
        assert!(eval.validate_script("").is_err());
    }

    #[test]
    fn dataset_script_can_filter_and_extend_in_place() {
        let eval = ScriptEvaluator::default();
        let rows = vec![
            row(&[("id", "1"), ("status", "LIVE")]),
            row(&[("id", "2"), ("status", "DEAD")]),
        ];
        let script = r#"
            local kept = {}
            for _, r in ipairs(rows) do
              if r.status == "LIVE" then
                r.flag = "y"
                table.insert(kept, r)
              end
            end
            rows = kept
        "#;
        let out = eval.run_dataset(script, rows).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].columns().collect::<Vec<_>>(), vec!["id", "status", "flag"]);
        assert_eq!(out[0].value("flag"), &Value::text("y"));
    }

    #[test]
    fn dataset_script_may_return_new_rows() {
        let eval = ScriptEvaluator::default();
        let out = eval
            .run_dataset("return { { a = 'x' }, { a = 'y', b = 2 } }", vec![])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].value("b"), &Value::Integer(2));
    }

    #[test]
    fn dataset_script_must_produce_rows() {
        let eval = ScriptEvaluator::default();
        let err = eval.run_dataset("return 5", vec![Row::new()]).unwrap_err();
        assert!(err.to_string().contains("must return a list of rows"));
    }
}
