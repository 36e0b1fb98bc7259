//! The `Map` class. Maps are string-keyed; iteration yields keys in a
//! stable (handle) order.

use lit_core::Value;

use crate::vm::api::ClassBuilder;
use crate::vm::object::{Obj, ObjKind};
use crate::vm::table::Table;
use crate::vm::State;

fn receiver_table(state: &State, instance: Value) -> Result<Table, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Map(entries)) => Ok(entries.clone()),
        _ => Err("expected a map receiver".to_string()),
    }
}

fn objfn_map_constructor(state: &mut State, _instance: Value, _args: &[Value]) -> Result<Value, String> {
    let map = state.alloc(Obj::Map(Table::new()));
    Ok(Value::object(map))
}

fn objfn_map_subscript(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let key = args.first().copied().unwrap_or(Value::NULL);
    let key = match key.as_object() {
        Some(key) if matches!(state.heap.get(key), Obj::String(_)) => key,
        _ => return Err("map index must be a string".to_string()),
    };
    if args.len() >= 2 {
        let value = args[1];
        match instance.as_object().map(|h| state.heap.get_mut(h)) {
            Some(Obj::Map(entries)) => {
                // Storing null removes the key.
                if value.is_null() {
                    entries.remove(key);
                } else {
                    entries.set(key, value);
                }
            }
            _ => return Err("expected a map receiver".to_string()),
        }
        return Ok(value);
    }
    let entries = receiver_table(state, instance)?;
    Ok(entries.get(key).unwrap_or(Value::NULL))
}

fn objfn_map_length(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let entries = receiver_table(state, instance)?;
    Ok(Value::number(entries.len() as f64))
}

fn objfn_map_clear(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    match instance.as_object().map(|h| state.heap.get_mut(h)) {
        Some(Obj::Map(entries)) => {
            entries.clear();
            Ok(Value::NULL)
        }
        _ => Err("expected a map receiver".to_string()),
    }
}

fn objfn_map_addall(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let other = args.first().copied().unwrap_or(Value::NULL);
    let other = receiver_table(state, other)
        .map_err(|_| "expected a map as the argument".to_string())?;
    match instance.as_object().map(|h| state.heap.get_mut(h)) {
        Some(Obj::Map(entries)) => {
            entries.add_all(&other);
            Ok(instance)
        }
        _ => Err("expected a map receiver".to_string()),
    }
}

fn objfn_map_clone(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let entries = receiver_table(state, instance)?;
    let map = state.alloc(Obj::Map(entries));
    Ok(Value::object(map))
}

fn objfn_map_contains(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let entries = receiver_table(state, instance)?;
    let key = args.first().copied().unwrap_or(Value::NULL);
    match key.as_object() {
        Some(key) => Ok(Value::bool(entries.contains(key))),
        None => Ok(Value::FALSE),
    }
}

fn objfn_map_remove(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let key = args.first().copied().unwrap_or(Value::NULL);
    let key = match key.as_object() {
        Some(key) if matches!(state.heap.get(key), Obj::String(_)) => key,
        _ => return Err("map index must be a string".to_string()),
    };
    match instance.as_object().map(|h| state.heap.get_mut(h)) {
        Some(Obj::Map(entries)) => Ok(Value::bool(entries.remove(key))),
        _ => Err("expected a map receiver".to_string()),
    }
}

fn objfn_map_iterator(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let entries = receiver_table(state, instance)?;
    let next = match args.first() {
        Some(value) if value.is_number() => value.as_number() as usize + 1,
        _ => 0,
    };
    if next >= entries.len() {
        Ok(Value::NULL)
    } else {
        Ok(Value::number(next as f64))
    }
}

/// Iteration yields the key at the cursor.
fn objfn_map_iteratorvalue(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let entries = receiver_table(state, instance)?;
    let index = match args.first() {
        Some(value) if value.is_number() => value.as_number() as usize,
        _ => return Ok(Value::NULL),
    };
    match entries.sorted_keys().get(index) {
        Some(key) => Ok(Value::object(*key)),
        None => Ok(Value::NULL),
    }
}

fn objfn_map_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    if !matches!(state.kind_of(instance), Some(ObjKind::Map)) {
        return Err("expected a map receiver".to_string());
    }
    let rendered = state.value_to_string(instance);
    Ok(state.string_value(&rendered))
}

pub fn open_map_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Map");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, objfn_map_constructor);
    builder.bind_method(state, "[]", objfn_map_subscript);
    builder.bind_method(state, "addAll", objfn_map_addall);
    builder.bind_method(state, "clear", objfn_map_clear);
    builder.bind_method(state, "contains", objfn_map_contains);
    builder.bind_method(state, "remove", objfn_map_remove);
    builder.bind_method(state, "iterator", objfn_map_iterator);
    builder.bind_method(state, "iteratorValue", objfn_map_iteratorvalue);
    builder.bind_method(state, "clone", objfn_map_clone);
    builder.bind_method(state, "toString", objfn_map_tostring);
    builder.set_getter(state, "length", objfn_map_length);
    builder.install(state);
    state.classes.map = Some(builder.handle());
}
