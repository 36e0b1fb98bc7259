//! The `GC` class: collector introspection and manual triggering.

use lit_core::Value;

use crate::vm::api::ClassBuilder;
use crate::vm::State;

fn objfn_gc_memory_used(state: &mut State, _instance: Value, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(state.heap.bytes_allocated as f64))
}

fn objfn_gc_next_round(state: &mut State, _instance: Value, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(state.heap.next_gc as f64))
}

fn objfn_gc_trigger(state: &mut State, _instance: Value, _args: &[Value]) -> Result<Value, String> {
    let collected = state.collect_garbage();
    Ok(Value::number(collected as f64))
}

pub fn open_gc_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "GC");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.set_static_getter(state, "memoryUsed", objfn_gc_memory_used);
    builder.set_static_getter(state, "nextRound", objfn_gc_next_round);
    builder.set_static_method(state, "trigger", objfn_gc_trigger);
    builder.install(state);
}
