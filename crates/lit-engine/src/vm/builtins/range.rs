//! The `Range` class and its iterator protocol.
//!
//! Ranges are inclusive of both bounds when iterated: `0 .. 3` yields
//! 0, 1, 2, 3.

use lit_core::Value;

use crate::vm::api::{format_number, ClassBuilder};
use crate::vm::builtins::checks::check_number;
use crate::vm::object::{Obj, Range};
use crate::vm::State;

fn receiver_range(state: &State, instance: Value) -> Result<Range, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Range(range)) => Ok(*range),
        _ => Err("expected a range receiver".to_string()),
    }
}

fn objfn_range_iterator(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let range = receiver_range(state, instance)?;
    let mut number = range.from;
    if let Some(value) = args.first() {
        if value.is_number() {
            number = value.as_number();
            let finished = if range.to > range.from {
                number >= range.to
            } else {
                number >= range.from
            };
            if finished {
                return Ok(Value::NULL);
            }
            number += if range.from - range.to > 0.0 { -1.0 } else { 1.0 };
        }
    }
    Ok(Value::number(number))
}

fn objfn_range_iteratorvalue(
    _state: &mut State,
    _instance: Value,
    args: &[Value],
) -> Result<Value, String> {
    Ok(args.first().copied().unwrap_or(Value::NULL))
}

fn objfn_range_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let range = receiver_range(state, instance)?;
    let rendered = format!(
        "[range ({}, {})]",
        format_number(range.from),
        format_number(range.to)
    );
    Ok(state.string_value(&rendered))
}

fn objfn_range_from(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(receiver_range(state, instance)?.from))
}

fn objfn_range_set_from(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let value = check_number(state, args, 0)?;
    if let Some(Obj::Range(range)) = instance.as_object().map(|h| state.heap.get_mut(h)) {
        range.from = value;
    }
    Ok(Value::number(value))
}

fn objfn_range_to(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(receiver_range(state, instance)?.to))
}

fn objfn_range_set_to(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let value = check_number(state, args, 0)?;
    if let Some(Obj::Range(range)) = instance.as_object().map(|h| state.heap.get_mut(h)) {
        range.to = value;
    }
    Ok(Value::number(value))
}

fn objfn_range_length(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let range = receiver_range(state, instance)?;
    Ok(Value::number(range.to - range.from))
}

pub fn open_range_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Range");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_method(state, "iterator", objfn_range_iterator);
    builder.bind_method(state, "iteratorValue", objfn_range_iteratorvalue);
    builder.bind_method(state, "toString", objfn_range_tostring);
    builder.bind_field(state, "from", objfn_range_from, objfn_range_set_from);
    builder.bind_field(state, "to", objfn_range_to, objfn_range_set_to);
    builder.set_getter(state, "length", objfn_range_length);
    builder.install(state);
    state.classes.range = Some(builder.handle());
}
