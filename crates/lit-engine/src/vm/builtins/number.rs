//! `Number` and `Bool`.

use lit_core::Value;

use crate::vm::api::{format_number, ClassBuilder};
use crate::vm::State;

fn objfn_number_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    if !instance.is_number() {
        return Err("expected a number".to_string());
    }
    let rendered = format_number(instance.as_number());
    Ok(state.string_value(&rendered))
}

fn objfn_number_tochar(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    if !instance.is_number() {
        return Err("expected a number".to_string());
    }
    let code = instance.as_number() as u32;
    let ch = char::from_u32(code).unwrap_or('\u{fffd}');
    Ok(state.string_value(&ch.to_string()))
}

pub fn open_number_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Number");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_method(state, "toString", objfn_number_tostring);
    builder.bind_method(state, "toChar", objfn_number_tochar);
    builder.set_getter(state, "chr", objfn_number_tochar);
    builder.install(state);
    state.classes.number = Some(builder.handle());
}

fn objfn_bool_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let rendered = if instance.is_bool() && instance.as_bool() {
        "true"
    } else {
        "false"
    };
    Ok(state.string_value(rendered))
}

fn objfn_bool_compare(_state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let other = args.first().copied().unwrap_or(Value::NULL);
    Ok(Value::bool(instance.to_bits() == other.to_bits()))
}

pub fn open_bool_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Bool");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_method(state, "==", objfn_bool_compare);
    builder.bind_method(state, "toString", objfn_bool_tostring);
    builder.install(state);
    state.classes.bool_ = Some(builder.handle());
}
