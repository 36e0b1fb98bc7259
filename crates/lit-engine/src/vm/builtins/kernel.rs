//! Kernel globals: printing, clocks, eval.

use std::time::{SystemTime, UNIX_EPOCH};

use lit_core::Value;

use crate::vm::object::Obj;
use crate::vm::table::Table;
use crate::vm::State;

fn cfn_print(state: &mut State, args: &[Value]) -> Result<Value, String> {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&state.value_to_string(*arg));
    }
    out.push('\n');
    state.print(&out);
    Ok(Value::NULL)
}

fn cfn_println(state: &mut State, args: &[Value]) -> Result<Value, String> {
    cfn_print(state, args)
}

/// `printf(fmt, ...)` with the `String.format` placeholder set: `@` splices
/// any value, `#` a number, `$` a string.
fn cfn_printf(state: &mut State, args: &[Value]) -> Result<Value, String> {
    let format = match args.first() {
        Some(value) => state
            .as_string(*value)
            .map(|s| s.to_string())
            .ok_or("printf expects a format string")?,
        None => return Err("printf expects a format string".to_string()),
    };
    let rendered = super::string::format_values(state, &format, &args[1..])?;
    state.print(&rendered);
    Ok(Value::NULL)
}

fn cfn_time(_state: &mut State, _args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::number(now))
}

fn cfn_system_time(_state: &mut State, _args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as f64)
        .unwrap_or(0.0);
    Ok(Value::number(now))
}

/// Compile and run a source string as the `eval` module; the module's
/// return value is the result.
fn cfn_eval(state: &mut State, args: &[Value]) -> Result<Value, String> {
    let source = match args.first() {
        Some(value) => state
            .as_string(*value)
            .map(|s| s.to_string())
            .ok_or("eval expects a string")?,
        None => return Err("eval expects a string".to_string()),
    };
    let saved_fiber = state.current_fiber;
    let result = state.interpret_source("eval", &source);
    state.current_fiber = saved_fiber;
    Ok(result.value)
}

/// A snapshot of the global table as a map object.
fn cfn_globals(state: &mut State, _args: &[Value]) -> Result<Value, String> {
    let mut entries = Table::new();
    for (key, value) in state.globals.iter() {
        entries.set(key, value);
    }
    let map = state.alloc(Obj::Map(entries));
    Ok(Value::object(map))
}

pub fn open_kernel_library(state: &mut State) {
    state.define_native("print", cfn_print);
    state.define_native("println", cfn_println);
    state.define_native("printf", cfn_printf);
    state.define_native("time", cfn_time);
    state.define_native("systemTime", cfn_system_time);
    state.define_native("eval", cfn_eval);
    state.define_native("globals", cfn_globals);
}
