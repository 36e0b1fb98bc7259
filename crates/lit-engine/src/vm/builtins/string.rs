//! The `String` class.
//!
//! Strings are immutable and interned; every operation returns a new
//! interned string. Indexing and slicing are character-based (UTF-8 aware),
//! byte access goes through `byteAt`/`charCodeAt`.

use lit_core::Value;

use crate::vm::api::{format_number, ClassBuilder};
use crate::vm::builtins::checks::check_number;
use crate::vm::object::Obj;
use crate::vm::State;

fn receiver_string(state: &State, instance: Value) -> Result<String, String> {
    state
        .as_string(instance)
        .map(|s| s.to_string())
        .ok_or_else(|| "expected a string receiver".to_string())
}

/// `String.format` / `printf` placeholders: `@` any value, `#` a number,
/// `$` a string. A doubled placeholder escapes itself.
pub fn format_values(state: &mut State, format: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut next = 0usize;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '@' | '#' | '$' => {
                if chars.peek() == Some(&c) {
                    chars.next();
                    out.push(c);
                    continue;
                }
                let arg = args
                    .get(next)
                    .copied()
                    .ok_or_else(|| format!("format placeholder #{next} has no argument"))?;
                next += 1;
                match c {
                    '#' => {
                        if !arg.is_number() {
                            return Err(format!(
                                "format placeholder '#' expects a number, got a {}",
                                state.type_name(arg)
                            ));
                        }
                        out.push_str(&format_number(arg.as_number()));
                    }
                    '$' => match state.as_string(arg) {
                        Some(s) => out.push_str(s),
                        None => {
                            return Err(format!(
                                "format placeholder '$' expects a string, got a {}",
                                state.type_name(arg)
                            ))
                        }
                    },
                    _ => {
                        let rendered = state.value_to_string(arg);
                        out.push_str(&rendered);
                    }
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn objfn_string_plus(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let mut text = receiver_string(state, instance)?;
    let other = args.first().copied().unwrap_or(Value::NULL);
    text.push_str(&state.value_to_string(other));
    Ok(state.string_value(&text))
}

fn objfn_string_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    receiver_string(state, instance)?;
    Ok(instance)
}

fn objfn_string_tonumber(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    match text.trim().parse::<f64>() {
        Ok(n) => Ok(Value::number(n)),
        Err(_) => Ok(Value::NULL),
    }
}

fn objfn_string_length(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    Ok(Value::number(text.chars().count() as f64))
}

fn objfn_string_compare(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let other = args.first().copied().unwrap_or(Value::NULL);
    Ok(Value::bool(instance.to_bits() == other.to_bits()
        || state.as_string(instance) == state.as_string(other)))
}

fn objfn_string_less(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let a = receiver_string(state, instance)?;
    let b = super::checks::check_string(state, args, 0)?;
    Ok(Value::bool(a < b))
}

fn objfn_string_greater(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let a = receiver_string(state, instance)?;
    let b = super::checks::check_string(state, args, 0)?;
    Ok(Value::bool(a > b))
}

/// Character-based index with negative wrap-around.
fn resolve_index(len: usize, index: f64) -> Option<usize> {
    let index = index as i64;
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        None
    } else {
        Some(resolved as usize)
    }
}

fn objfn_string_subscript(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let index = check_number(state, args, 0)?;
    let count = text.chars().count();
    match resolve_index(count, index) {
        Some(i) => {
            let ch: String = text.chars().skip(i).take(1).collect();
            Ok(state.string_value(&ch))
        }
        None => Ok(Value::NULL),
    }
}

fn objfn_string_indexof(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let needle = super::checks::check_string(state, args, 0)?;
    match text.find(&needle) {
        Some(byte_index) => {
            let char_index = text[..byte_index].chars().count();
            Ok(Value::number(char_index as f64))
        }
        None => Ok(Value::number(-1.0)),
    }
}

fn objfn_string_contains(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let needle = super::checks::check_string(state, args, 0)?;
    Ok(Value::bool(text.contains(&needle)))
}

fn objfn_string_startswith(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let prefix = super::checks::check_string(state, args, 0)?;
    Ok(Value::bool(text.starts_with(&prefix)))
}

fn objfn_string_endswith(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let suffix = super::checks::check_string(state, args, 0)?;
    Ok(Value::bool(text.ends_with(&suffix)))
}

fn objfn_string_replace(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let from = super::checks::check_string(state, args, 0)?;
    let to = super::checks::check_string(state, args, 1)?;
    let replaced = text.replace(&from, &to);
    Ok(state.string_value(&replaced))
}

/// UTF-8 aware slicing: `substring(start, count)` in characters.
fn objfn_string_substring(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let start = check_number(state, args, 0)?.max(0.0) as usize;
    let total = text.chars().count();
    let count = super::checks::get_number(args, 1, (total.saturating_sub(start)) as f64) as usize;
    let slice: String = text.chars().skip(start).take(count).collect();
    Ok(state.string_value(&slice))
}

fn objfn_string_upper(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?.to_uppercase();
    Ok(state.string_value(&text))
}

fn objfn_string_lower(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?.to_lowercase();
    Ok(state.string_value(&text))
}

fn objfn_string_byteat(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let index = check_number(state, args, 0)? as usize;
    match text.as_bytes().get(index) {
        Some(byte) => Ok(Value::number(*byte as f64)),
        None => Ok(Value::NULL),
    }
}

/// `split(sep, keepBlanks?)` — blanks are dropped unless asked for.
fn objfn_string_split(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let separator = super::checks::check_string(state, args, 0)?;
    let keep_blanks = args
        .get(1)
        .map(|v| !v.is_falsey())
        .unwrap_or(false);
    let pieces: Vec<&str> = if separator.is_empty() {
        text.split("").filter(|p| !p.is_empty()).collect()
    } else {
        text.split(separator.as_str()).collect()
    };
    // The parts are unreachable until the array exists; keep collection
    // off while assembling the composite.
    let was_allowed = state.heap.allow_gc;
    state.heap.allow_gc = false;
    let mut parts = Vec::new();
    for piece in pieces {
        if piece.is_empty() && !keep_blanks {
            continue;
        }
        parts.push(state.string_value(piece));
    }
    let array = state.alloc(Obj::Array(parts));
    state.heap.allow_gc = was_allowed;
    Ok(Value::object(array))
}

fn objfn_string_format(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let format = receiver_string(state, instance)?;
    let rendered = format_values(state, &format, args)?;
    Ok(state.string_value(&rendered))
}

fn objfn_string_iterator(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let text = receiver_string(state, instance)?;
    let count = text.chars().count();
    let next = match args.first() {
        Some(value) if value.is_number() => value.as_number() as usize + 1,
        _ => 0,
    };
    if next >= count {
        Ok(Value::NULL)
    } else {
        Ok(Value::number(next as f64))
    }
}

fn objfn_string_iteratorvalue(
    state: &mut State,
    instance: Value,
    args: &[Value],
) -> Result<Value, String> {
    objfn_string_subscript(state, instance, args)
}

fn invalid_constructor(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    Err(format!(
        "cannot create an instance of a built-in type {}",
        state.type_name(instance)
    ))
}

pub fn open_string_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "String");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, invalid_constructor);
    builder.bind_method(state, "+", objfn_string_plus);
    builder.bind_method(state, "[]", objfn_string_subscript);
    builder.bind_method(state, "<", objfn_string_less);
    builder.bind_method(state, ">", objfn_string_greater);
    builder.bind_method(state, "==", objfn_string_compare);
    builder.bind_method(state, "toString", objfn_string_tostring);
    builder.bind_method(state, "toNumber", objfn_string_tonumber);
    builder.bind_method(state, "split", objfn_string_split);
    builder.bind_method(state, "indexOf", objfn_string_indexof);
    builder.bind_method(state, "contains", objfn_string_contains);
    builder.bind_method(state, "startsWith", objfn_string_startswith);
    builder.bind_method(state, "endsWith", objfn_string_endswith);
    builder.bind_method(state, "replace", objfn_string_replace);
    builder.bind_method(state, "substring", objfn_string_substring);
    builder.bind_method(state, "toUpperCase", objfn_string_upper);
    builder.bind_method(state, "toLowerCase", objfn_string_lower);
    builder.bind_method(state, "byteAt", objfn_string_byteat);
    builder.bind_method(state, "charCodeAt", objfn_string_byteat);
    builder.bind_method(state, "format", objfn_string_format);
    builder.bind_method(state, "iterator", objfn_string_iterator);
    builder.bind_method(state, "iteratorValue", objfn_string_iteratorvalue);
    builder.set_getter(state, "length", objfn_string_length);
    builder.install(state);
    state.classes.string = Some(builder.handle());
}
