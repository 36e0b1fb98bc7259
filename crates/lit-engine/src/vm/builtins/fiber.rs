//! The `Fiber` class: cooperative coroutines.
//!
//! `run`/`try`/`yield`/`yeet`/`abort` are primitive methods: they switch
//! the active fiber and tell the interpreter to re-read its frame instead
//! of returning a value.

use lit_core::{ObjHandle, Value};

use crate::vm::api::ClassBuilder;
use crate::vm::fiber::Fiber;
use crate::vm::object::{Obj, ObjKind};
use crate::vm::State;

fn receiver_fiber(state: &State, instance: Value) -> Result<ObjHandle, String> {
    match instance.as_object() {
        Some(handle) if matches!(state.heap.get(handle), Obj::Fiber(_)) => Ok(handle),
        _ => Err("expected a fiber receiver".to_string()),
    }
}

fn objfn_fiber_constructor(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let function = match args.first().and_then(|v| v.as_object()) {
        Some(handle) if matches!(state.heap.get(handle), Obj::Function(_)) => handle,
        _ => return Err("Fiber constructor expects a function as its argument".to_string()),
    };
    let module = match state.current_fiber {
        Some(fiber) => state.fiber(fiber).module,
        None => state
            .last_module
            .ok_or("Fiber constructor requires a running module")?,
    };
    let mut fiber = Fiber::new(module, Some(function));
    fiber.parent = state.current_fiber;
    let handle = state.alloc(Obj::Fiber(fiber));
    Ok(Value::object(handle))
}

/// Transfer control into `fiber`. A fresh fiber gets its function and
/// arguments laid out first; a suspended one just resumes.
fn run_fiber(
    state: &mut State,
    fiber: ObjHandle,
    args: &[Value],
    catcher: bool,
) -> Result<bool, String> {
    if state.fiber(fiber).is_done() {
        return Err("Fiber already finished executing".to_string());
    }
    let parent = state.current_fiber;
    {
        let fiber = state.fiber_mut(fiber);
        fiber.parent = parent;
        fiber.catcher = catcher;
    }
    state.current_fiber = Some(fiber);

    let fresh = {
        let fiber = state.fiber(fiber);
        fiber.stack.is_empty() && fiber.frames.len() == 1 && fiber.frames[0].ip == 0
    };
    if fresh {
        let function = state.fiber(fiber).frames[0].function;
        let (declared, vararg) = {
            let function = state.function(function);
            (function.arg_count, function.vararg)
        };
        state.fiber_mut(fiber).arg_count = declared;
        state.fiber_mut(fiber).push(Value::object(function));
        let positional = declared - usize::from(vararg);
        for i in 0..positional {
            let value = args.get(i).copied().unwrap_or(Value::NULL);
            state.fiber_mut(fiber).push(value);
        }
        if vararg {
            let rest: Vec<Value> = args.iter().skip(positional).copied().collect();
            let array = state.alloc(Obj::Array(rest));
            state.fiber_mut(fiber).push(Value::object(array));
        }
    }
    Ok(true)
}

fn objfn_fiber_run(state: &mut State, instance: Value, args: &[Value]) -> Result<bool, String> {
    let fiber = receiver_fiber(state, instance)?;
    run_fiber(state, fiber, args, false)
}

fn objfn_fiber_try(state: &mut State, instance: Value, args: &[Value]) -> Result<bool, String> {
    let fiber = receiver_fiber(state, instance)?;
    run_fiber(state, fiber, args, true)
}

/// Suspend the current fiber, delivering the value to the parent's
/// suspended invoke. Without a parent this is a runtime error.
fn yield_impl(state: &mut State, args: &[Value], verb: &str) -> Result<bool, String> {
    let current = state
        .current_fiber
        .ok_or("no fiber to run on")?;
    let parent = state.fiber(current).parent;
    let Some(parent) = parent else {
        let message = match args.first() {
            Some(value) => state.value_to_string(*value),
            None => format!("Fiber was {verb}"),
        };
        state.signal_runtime_error(message);
        return Ok(true);
    };
    let value = args.first().copied().unwrap_or(Value::NULL);
    // The parent sits suspended at its run() invoke; its receiver slot is
    // the result slot. Our own receiver slot becomes the resumption value.
    state.current_fiber = Some(parent);
    state.fiber_mut(parent).set_top(0, value);
    state.fiber_mut(current).set_top(0, Value::NULL);
    Ok(true)
}

fn objfn_fiber_yield(state: &mut State, _instance: Value, args: &[Value]) -> Result<bool, String> {
    yield_impl(state, args, "yielded")
}

fn objfn_fiber_yeet(state: &mut State, _instance: Value, args: &[Value]) -> Result<bool, String> {
    yield_impl(state, args, "yeeted")
}

fn objfn_fiber_abort(state: &mut State, _instance: Value, args: &[Value]) -> Result<bool, String> {
    let message = match args.first() {
        Some(value) => state.value_to_string(*value),
        None => "Fiber was aborted".to_string(),
    };
    state.signal_runtime_error(message);
    Ok(true)
}

fn objfn_fiber_done(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let fiber = receiver_fiber(state, instance)?;
    Ok(Value::bool(state.fiber(fiber).is_done()))
}

fn objfn_fiber_error(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let fiber = receiver_fiber(state, instance)?;
    Ok(state.fiber(fiber).error)
}

fn objfn_fiber_current(state: &mut State, _instance: Value, _args: &[Value]) -> Result<Value, String> {
    Ok(state
        .current_fiber
        .map(Value::object)
        .unwrap_or(Value::NULL))
}

fn objfn_fiber_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    if !matches!(state.kind_of(instance), Some(ObjKind::Fiber)) {
        return Err("expected a fiber receiver".to_string());
    }
    Ok(state.string_value("[fiber]"))
}

pub fn open_fiber_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Fiber");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, objfn_fiber_constructor);
    builder.bind_method(state, "toString", objfn_fiber_tostring);
    builder.bind_primitive(state, "run", objfn_fiber_run);
    builder.bind_primitive(state, "try", objfn_fiber_try);
    builder.set_getter(state, "done", objfn_fiber_done);
    builder.set_getter(state, "error", objfn_fiber_error);
    builder.set_static_primitive(state, "yield", objfn_fiber_yield);
    builder.set_static_primitive(state, "yeet", objfn_fiber_yeet);
    builder.set_static_primitive(state, "abort", objfn_fiber_abort);
    builder.set_static_getter(state, "current", objfn_fiber_current);
    builder.install(state);
    state.classes.fiber = Some(builder.handle());
}
