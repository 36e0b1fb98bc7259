//! The `Object` and `Class` well-known classes.

use lit_core::Value;

use crate::vm::api::ClassBuilder;
use crate::vm::object::{Obj, ObjKind};
use crate::vm::State;

fn objfn_object_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let rendered = match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Instance(inner)) => {
            let name = state.string_at(state.class(inner.class).name).to_string();
            format!("[instance {name}]")
        }
        Some(Obj::Class(class)) => {
            let name = state.string_at(class.name).to_string();
            format!("[class {name}]")
        }
        _ => format!("[{}]", state.type_name(instance)),
    };
    Ok(state.string_value(&rendered))
}

pub fn open_object_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Object");
    builder.bind_method(state, "toString", objfn_object_tostring);
    builder.set_static_method(state, "toString", objfn_object_tostring);
    builder.install(state);
    state.classes.object = Some(builder.handle());
}

fn objfn_class_name(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Class(class)) => {
            let name = class.name;
            Ok(Value::object(name))
        }
        _ => Ok(Value::NULL),
    }
}

fn objfn_class_super(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Class(class)) => Ok(class
            .super_class
            .map(Value::object)
            .unwrap_or(Value::NULL)),
        Some(Obj::Instance(inner)) => {
            let class = state.class(inner.class);
            Ok(class.super_class.map(Value::object).unwrap_or(Value::NULL))
        }
        _ => Ok(Value::NULL),
    }
}

fn objfn_class_compare(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let other = args.first().copied().unwrap_or(Value::NULL);
    if !matches!(state.kind_of(other), Some(ObjKind::Class)) {
        return Err("can only compare classes against classes".to_string());
    }
    Ok(Value::bool(instance.to_bits() == other.to_bits()))
}

pub fn open_class_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Class");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_method(state, "==", objfn_class_compare);
    builder.bind_method(state, "toString", objfn_object_tostring);
    builder.set_getter(state, "name", objfn_class_name);
    builder.set_getter(state, "super", objfn_class_super);
    builder.set_static_getter(state, "super", objfn_class_super);
    builder.install(state);
    state.classes.class = Some(builder.handle());
}
