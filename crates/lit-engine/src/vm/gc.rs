//! Tri-colour mark/sweep collection.
//!
//! White objects are unmarked slots, grey objects sit on the heap's grey
//! stack, black objects are marked slots that have been drained from it.
//! Marking starts from the root set (fiber chain, explicit roots, globals,
//! modules, well-known classes), the grey stack is drained by blackening,
//! then the intern table drops white strings and the arena sweeps.

use lit_core::{ObjHandle, Value};

use crate::vm::object::{Obj, RefSlot, UpvalueState};
use crate::vm::State;

impl State {
    /// Run a full collection. Returns the number of bytes reclaimed.
    /// A no-op while the `allow_gc` latch is cleared.
    pub fn collect_garbage(&mut self) -> usize {
        if !self.heap.allow_gc {
            return 0;
        }
        self.heap.allow_gc = false;

        self.mark_roots();
        self.trace_references();
        self.strings.remove_white(&self.heap);
        let reclaimed = self.heap.sweep();

        self.heap.allow_gc = true;
        reclaimed
    }

    fn mark_roots(&mut self) {
        let explicit: Vec<Value> = self.heap.roots.clone();
        for value in explicit {
            self.heap.mark_value(value);
        }
        if let Some(fiber) = self.current_fiber {
            self.heap.mark_object(fiber);
        }
        for class in self.classes.all().into_iter().flatten() {
            self.heap.mark_object(class);
        }
        if let Some(module) = self.last_module {
            self.heap.mark_object(module);
        }
        self.globals.mark(&mut self.heap);
        self.modules.mark(&mut self.heap);
    }

    fn trace_references(&mut self) {
        while let Some(handle) = self.heap.gray.pop() {
            self.blacken(handle);
        }
    }

    /// Mark every object the given (already grey) object references.
    fn blacken(&mut self, handle: ObjHandle) {
        let mut values: Vec<Value> = Vec::new();
        let mut handles: Vec<ObjHandle> = Vec::new();
        match self.heap.get(handle) {
            Obj::String(_) | Obj::Range(_) | Obj::Userdata(_) => {}
            Obj::Function(function) => {
                if let Some(name) = function.name {
                    handles.push(name);
                }
                handles.push(function.module);
                values.extend_from_slice(&function.chunk.constants);
            }
            Obj::NativeFunction(n) => handles.push(n.name),
            Obj::NativePrimitive(n) => handles.push(n.name),
            Obj::NativeMethod(n) => handles.push(n.name),
            Obj::PrimitiveMethod(n) => handles.push(n.name),
            Obj::Fiber(fiber) => {
                values.extend_from_slice(&fiber.stack);
                for frame in &fiber.frames {
                    handles.push(frame.function);
                    if let Some(closure) = frame.closure {
                        handles.push(closure);
                    }
                }
                handles.extend_from_slice(&fiber.open_upvalues);
                handles.push(fiber.module);
                if let Some(parent) = fiber.parent {
                    handles.push(parent);
                }
                values.push(fiber.error);
            }
            Obj::Module(module) => {
                handles.push(module.name);
                values.extend_from_slice(&module.privates);
                for (key, value) in module.private_names.iter() {
                    handles.push(key);
                    values.push(value);
                }
                if let Some(main) = module.main_function {
                    handles.push(main);
                }
                if let Some(main_fiber) = module.main_fiber {
                    handles.push(main_fiber);
                }
                values.push(module.return_value);
            }
            Obj::Closure(closure) => {
                handles.push(closure.function);
                handles.extend_from_slice(&closure.upvalues);
            }
            Obj::Upvalue(UpvalueState::Closed(value)) => values.push(*value),
            Obj::Upvalue(UpvalueState::Open { fiber, .. }) => handles.push(*fiber),
            Obj::Class(class) => {
                handles.push(class.name);
                if let Some(init) = class.init_method {
                    values.push(init);
                }
                if let Some(super_class) = class.super_class {
                    handles.push(super_class);
                }
                for (key, value) in class.methods.iter().chain(class.static_fields.iter()) {
                    handles.push(key);
                    values.push(value);
                }
            }
            Obj::Instance(instance) => {
                handles.push(instance.class);
                for (key, value) in instance.fields.iter() {
                    handles.push(key);
                    values.push(value);
                }
            }
            Obj::BoundMethod(bound) => {
                values.push(bound.receiver);
                values.push(bound.method);
            }
            Obj::Array(elements) => values.extend_from_slice(elements),
            Obj::Map(entries) => {
                for (key, value) in entries.iter() {
                    handles.push(key);
                    values.push(value);
                }
            }
            Obj::Field(field) => {
                handles.push(field.name);
                if let Some(getter) = field.getter {
                    values.push(getter);
                }
                if let Some(setter) = field.setter {
                    values.push(setter);
                }
            }
            Obj::Reference(slot) => match slot {
                RefSlot::Global { name } => handles.push(*name),
                RefSlot::Private { module, .. } => handles.push(*module),
                RefSlot::Local { fiber, .. } => handles.push(*fiber),
                RefSlot::Upvalue { upvalue } => handles.push(*upvalue),
                RefSlot::Field { owner, name } => {
                    values.push(*owner);
                    handles.push(*name);
                }
            },
        }
        for value in values {
            self.heap.mark_value(value);
        }
        for child in handles {
            self.heap.mark_object(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_objects_are_reclaimed() {
        let mut state = State::new();
        let before = state.heap.live_objects();
        // An unrooted array dies at the next collection.
        state.alloc(Obj::Array(vec![Value::number(1.0)]));
        assert_eq!(state.heap.live_objects(), before + 1);
        state.collect_garbage();
        assert_eq!(state.heap.live_objects(), before);
    }

    #[test]
    fn rooted_objects_survive() {
        let mut state = State::new();
        let array = state.alloc(Obj::Array(vec![]));
        state.push_root(Value::object(array));
        state.collect_garbage();
        assert!(state.heap.contains(array));
        state.pop_root();
        state.collect_garbage();
        assert!(!state.heap.contains(array));
    }

    #[test]
    fn white_strings_leave_the_intern_table() {
        let mut state = State::new();
        let before = state.strings.len();
        state.intern("an unreferenced temporary string");
        assert_eq!(state.strings.len(), before + 1);
        state.collect_garbage();
        assert_eq!(state.strings.len(), before);
    }

    #[test]
    fn cyclic_graphs_survive_through_a_root() {
        let mut state = State::new();
        let array_a = state.alloc(Obj::Array(vec![]));
        let array_b = state.alloc(Obj::Array(vec![Value::object(array_a)]));
        if let Obj::Array(elements) = state.heap.get_mut(array_a) {
            elements.push(Value::object(array_b));
        }
        state.push_root(Value::object(array_a));
        state.collect_garbage();
        assert!(state.heap.contains(array_a));
        assert!(state.heap.contains(array_b));
        state.pop_root();
        state.collect_garbage();
        assert!(!state.heap.contains(array_a));
        assert!(!state.heap.contains(array_b));
    }

    #[test]
    fn interned_strings_referenced_by_globals_survive() {
        let mut state = State::new();
        let value = state.string_value("kept-by-global");
        state.set_global("keeper", value);
        state.collect_garbage();
        assert!(state.strings.lookup("kept-by-global").is_some());
    }
}
