//! The `Function` and `Module` classes.

use lit_core::Value;

use crate::vm::api::ClassBuilder;
use crate::vm::object::Obj;
use crate::vm::State;

fn function_name(state: &mut State, instance: Value) -> Value {
    let handle = match instance.as_object() {
        Some(handle) => handle,
        None => return Value::NULL,
    };
    let name = match state.heap.get(handle) {
        Obj::Function(f) => f.name,
        Obj::Closure(c) => state.function(c.function).name,
        Obj::NativeFunction(n) => Some(n.name),
        Obj::NativePrimitive(n) => Some(n.name),
        Obj::NativeMethod(n) => Some(n.name),
        Obj::PrimitiveMethod(n) => Some(n.name),
        _ => None,
    };
    name.map(Value::object).unwrap_or(Value::NULL)
}

fn objfn_function_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let name = function_name(state, instance);
    if name.is_null() {
        return Ok(state.string_value("[function]"));
    }
    Ok(name)
}

fn objfn_function_name(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    Ok(function_name(state, instance))
}

fn invalid_constructor(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    Err(format!(
        "cannot create an instance of a built-in type {}",
        state.type_name(instance)
    ))
}

pub fn open_function_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Function");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, invalid_constructor);
    builder.bind_method(state, "toString", objfn_function_tostring);
    builder.set_getter(state, "name", objfn_function_name);
    builder.install(state);
    state.classes.function = Some(builder.handle());
}

fn objfn_module_name(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Module(module)) => Ok(Value::object(module.name)),
        _ => Err("expected a module receiver".to_string()),
    }
}

fn objfn_module_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Module(module)) => {
            let name = state.string_at(module.name).to_string();
            Ok(state.string_value(&format!("[module {name}]")))
        }
        _ => Err("expected a module receiver".to_string()),
    }
}

/// The private slot values of a module as an array.
fn objfn_module_privates(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let privates = match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Module(module)) => module.privates.clone(),
        _ => return Err("expected a module receiver".to_string()),
    };
    let array = state.alloc(Obj::Array(privates));
    Ok(Value::object(array))
}

fn objfn_module_current(state: &mut State, _instance: Value, _args: &[Value]) -> Result<Value, String> {
    let module = state
        .current_fiber
        .map(|fiber| state.fiber(fiber).module)
        .or(state.last_module);
    Ok(module.map(Value::object).unwrap_or(Value::NULL))
}

pub fn open_module_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Module");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, invalid_constructor);
    builder.bind_method(state, "toString", objfn_module_tostring);
    builder.set_getter(state, "name", objfn_module_name);
    builder.set_getter(state, "privates", objfn_module_privates);
    builder.set_static_getter(state, "current", objfn_module_current);
    builder.install(state);
    state.classes.module = Some(builder.handle());
}
