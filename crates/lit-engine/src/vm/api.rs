//! Host-facing API: native registration, host-initiated calls, and value
//! stringification.

use lit_core::{ObjHandle, Value};

use crate::vm::fiber::{CallFrame, Fiber};
use crate::vm::object::{
    Class, FieldAccessor, Instance, NativeFn, NativeFunction, NativeMethod, NativeMethodFn,
    NativePrimitive, NativePrimitiveFn, Obj, ObjKind, PrimitiveMethod, PrimitiveMethodFn,
};
use crate::vm::state::{Interpretation, InterpretResult};
use crate::vm::table::Table;
use crate::vm::State;

/// Format a number the way Lit prints it: integral values without the
/// trailing `.0`, everything else with Rust's shortest representation.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl State {
    // ---- native registration -------------------------------------------

    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_handle = self.intern(name);
        self.push_root(Value::object(name_handle));
        let native = self.alloc(Obj::NativeFunction(NativeFunction {
            function,
            name: name_handle,
        }));
        self.globals.set(name_handle, Value::object(native));
        self.pop_root();
    }

    pub fn define_native_primitive(&mut self, name: &str, function: NativePrimitiveFn) {
        let name_handle = self.intern(name);
        self.push_root(Value::object(name_handle));
        let native = self.alloc(Obj::NativePrimitive(NativePrimitive {
            function,
            name: name_handle,
        }));
        self.globals.set(name_handle, Value::object(native));
        self.pop_root();
    }

    // ---- host calls ----------------------------------------------------

    /// Call any callable value from host code with explicit arguments.
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Interpretation {
        let Some(handle) = callee.as_object() else {
            self.signal_runtime_error(if callee.is_null() {
                "attempt to call a null value".to_string()
            } else {
                "can only call functions and classes".to_string()
            });
            return Interpretation::of(InterpretResult::RuntimeError);
        };
        match self.heap.get(handle).kind() {
            ObjKind::Function | ObjKind::Closure => self.call_script(callee, Value::NULL, args),
            ObjKind::NativeFunction => {
                let function = match self.heap.get(handle) {
                    Obj::NativeFunction(n) => n.function,
                    _ => unreachable!(),
                };
                self.run_native(|state| function(state, args))
            }
            ObjKind::NativeMethod => {
                let method = match self.heap.get(handle) {
                    Obj::NativeMethod(n) => n.method,
                    _ => unreachable!(),
                };
                self.run_native(|state| method(state, Value::NULL, args))
            }
            ObjKind::BoundMethod => {
                let (receiver, method) = match self.heap.get(handle) {
                    Obj::BoundMethod(b) => (b.receiver, b.method),
                    _ => unreachable!(),
                };
                self.call_method(receiver, method, args)
            }
            ObjKind::Class => self.construct(handle, args),
            _ => {
                self.signal_runtime_error("can only call functions and classes".to_string());
                Interpretation::of(InterpretResult::RuntimeError)
            }
        }
    }

    /// Call `method` with an explicit receiver.
    pub fn call_method(&mut self, receiver: Value, method: Value, args: &[Value]) -> Interpretation {
        let Some(handle) = method.as_object() else {
            self.signal_runtime_error("attempt to call a null value".to_string());
            return Interpretation::of(InterpretResult::RuntimeError);
        };
        match self.heap.get(handle).kind() {
            ObjKind::Function | ObjKind::Closure => self.call_script(method, receiver, args),
            ObjKind::NativeMethod => {
                let native = match self.heap.get(handle) {
                    Obj::NativeMethod(n) => n.method,
                    _ => unreachable!(),
                };
                self.run_native(|state| native(state, receiver, args))
            }
            ObjKind::PrimitiveMethod => {
                let native = match self.heap.get(handle) {
                    Obj::PrimitiveMethod(p) => p.method,
                    _ => unreachable!(),
                };
                // A primitive that switches frames resumes inside the
                // interpreter; host callers only see the simple outcome.
                match native(self, receiver, args) {
                    Ok(_) => Interpretation::ok(Value::NULL),
                    Err(message) => {
                        self.signal_runtime_error(message);
                        Interpretation::of(InterpretResult::RuntimeError)
                    }
                }
            }
            ObjKind::BoundMethod => {
                let (bound_receiver, bound_method) = match self.heap.get(handle) {
                    Obj::BoundMethod(b) => (b.receiver, b.method),
                    _ => unreachable!(),
                };
                self.call_method(bound_receiver, bound_method, args)
            }
            ObjKind::Class => self.construct(handle, args),
            _ => self.call(method, args),
        }
    }

    /// Resolve `name` on the receiver's class (or instance fields) and
    /// call it. `Invalid` when the method does not exist.
    pub fn find_and_call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: &[Value],
    ) -> Interpretation {
        if self.current_fiber.is_none() {
            self.signal_runtime_error("no fiber to run on".to_string());
            return Interpretation::of(InterpretResult::RuntimeError);
        }
        let name_handle = self.intern(name);
        let mut method = None;
        if let Some(Obj::Instance(instance)) = receiver.as_object().map(|h| self.heap.get(h)) {
            method = instance.fields.get(name_handle);
        }
        if method.is_none() {
            if let Some(class) = self.class_for(receiver) {
                method = self.class(class).methods.get(name_handle);
            }
        }
        match method {
            Some(method) => self.call_method(receiver, method, args),
            None => Interpretation::of(InterpretResult::Invalid),
        }
    }

    fn run_native(
        &mut self,
        call: impl FnOnce(&mut Self) -> Result<Value, String>,
    ) -> Interpretation {
        match call(self) {
            Ok(value) => Interpretation::ok(value),
            Err(message) => {
                self.signal_runtime_error(message);
                Interpretation::of(InterpretResult::RuntimeError)
            }
        }
    }

    /// Run a script function to completion on the current fiber (creating
    /// a scratch fiber if the host has none), unwinding back here when the
    /// pushed frame returns.
    fn call_script(&mut self, callee: Value, receiver: Value, args: &[Value]) -> Interpretation {
        let fiber = match self.current_fiber {
            Some(fiber) => fiber,
            None => {
                let module = match self.last_module {
                    Some(module) => module,
                    None => {
                        self.signal_runtime_error("no fiber to run on".to_string());
                        return Interpretation::of(InterpretResult::RuntimeError);
                    }
                };
                let fiber = self.alloc(Obj::Fiber(Fiber::new(module, None)));
                self.current_fiber = Some(fiber);
                fiber
            }
        };
        let handle = callee.as_object().expect("script callee is an object");
        let (function, closure) = match self.heap.get(handle) {
            Obj::Function(_) => (handle, None),
            Obj::Closure(c) => (c.function, Some(handle)),
            _ => unreachable!("call_script takes functions and closures"),
        };
        let slot_base = self.fiber(fiber).stack.len();
        // Slot zero is the receiver (or the callee itself for functions).
        let slot_zero = if receiver.is_null() { callee } else { receiver };
        self.fiber_mut(fiber).push(slot_zero);
        for arg in args {
            self.fiber_mut(fiber).push(*arg);
        }
        let declared = self.function(function).arg_count;
        let vararg = self.function(function).vararg;
        let given = args.len();
        if given != declared {
            if given < declared {
                let missing = declared - given - usize::from(vararg);
                for _ in 0..missing {
                    self.fiber_mut(fiber).push(Value::NULL);
                }
                if vararg {
                    let array = self.alloc(Obj::Array(Vec::new()));
                    self.fiber_mut(fiber).push(Value::object(array));
                }
            } else if vararg {
                let extra = given - declared + 1;
                let start = self.fiber(fiber).stack.len() - extra;
                let values = self.fiber(fiber).stack[start..].to_vec();
                let array = self.alloc(Obj::Array(values));
                self.fiber_mut(fiber).drop_n(extra);
                self.fiber_mut(fiber).push(Value::object(array));
            } else {
                self.fiber_mut(fiber).drop_n(given - declared);
            }
        } else if vararg {
            let last = self.fiber(fiber).peek(0);
            let array = self.alloc(Obj::Array(vec![last]));
            self.fiber_mut(fiber).set_top(0, Value::object(array));
        }
        self.fiber_mut(fiber).frames.push(CallFrame {
            function,
            closure,
            ip: 0,
            slot_base,
            result_ignored: false,
            return_to_host: true,
        });
        let result = self.exec_fiber(fiber);
        if result.status == InterpretResult::RuntimeError {
            let error = self
                .current_fiber
                .map(|fiber| self.fiber(fiber).error)
                .unwrap_or(Value::NULL);
            return Interpretation {
                status: InterpretResult::RuntimeError,
                value: error,
            };
        }
        result
    }

    /// Instantiate a class from host code.
    fn construct(&mut self, class: ObjHandle, args: &[Value]) -> Interpretation {
        let instance = self.alloc(Obj::Instance(Instance {
            class,
            fields: Table::new(),
        }));
        let instance_value = Value::object(instance);
        self.push_root(instance_value);
        let result = match self.class(class).init_method {
            Some(init) => {
                let outcome = self.call_method(instance_value, init, args);
                if outcome.status == InterpretResult::Ok {
                    Interpretation::ok(instance_value)
                } else {
                    outcome
                }
            }
            None => Interpretation::ok(instance_value),
        };
        self.pop_root();
        result
    }

    // ---- stringification -----------------------------------------------

    /// Render a value for printing. Instances and classes with a scripted
    /// `toString` go through the method-call path.
    pub fn value_to_string(&mut self, value: Value) -> String {
        if value.is_null() {
            return "null".to_string();
        }
        if value.is_bool() {
            return if value.as_bool() { "true" } else { "false" }.to_string();
        }
        if value.is_number() {
            return format_number(value.as_number());
        }
        let handle = value.as_object().expect("non-primitive value is an object");
        match self.heap.get(handle) {
            Obj::String(s) => s.to_string(),
            Obj::Array(elements) => {
                let elements = elements.clone();
                let mut out = String::from("[");
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let rendered = self.value_to_string(*element);
                    if matches!(self.kind_of(*element), Some(ObjKind::String)) {
                        out.push_str(&format!("\"{rendered}\""));
                    } else {
                        out.push_str(&rendered);
                    }
                }
                out.push(']');
                out
            }
            Obj::Map(entries) => {
                let keys = entries.sorted_keys();
                let entries = entries.clone();
                let mut out = String::from("{");
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let value = entries.get(*key).unwrap_or(Value::NULL);
                    let key_text = self.string_at(*key).to_string();
                    let rendered = self.value_to_string(value);
                    out.push_str(&format!("{key_text} = {rendered}"));
                }
                out.push_str(" }");
                out
            }
            Obj::Range(range) => {
                format!(
                    "[range ({}, {})]",
                    format_number(range.from),
                    format_number(range.to)
                )
            }
            Obj::Function(_) | Obj::Closure(_) => {
                let name = self.function_display_name(handle);
                format!("[function {name}]")
            }
            Obj::NativeFunction(n) => format!("[native {}]", self.string_at(n.name)),
            Obj::NativePrimitive(n) => format!("[native {}]", self.string_at(n.name)),
            Obj::NativeMethod(n) => format!("[method {}]", self.string_at(n.name)),
            Obj::PrimitiveMethod(n) => format!("[method {}]", self.string_at(n.name)),
            Obj::BoundMethod(_) => "[bound method]".to_string(),
            Obj::Fiber(_) => "[fiber]".to_string(),
            Obj::Module(module) => format!("[module {}]", self.string_at(module.name)),
            Obj::Userdata(_) => "[userdata]".to_string(),
            Obj::Field(_) => "[field]".to_string(),
            Obj::Reference(_) => "[reference]".to_string(),
            Obj::Class(_) | Obj::Instance(_) => {
                let result = self.find_and_call_method(value, "toString", &[]);
                if result.status == InterpretResult::Ok {
                    if let Some(text) = self.as_string(result.value) {
                        return text.to_string();
                    }
                }
                match self.heap.get(handle) {
                    Obj::Class(class) => format!("[class {}]", self.string_at(class.name)),
                    Obj::Instance(instance) => {
                        let class = self.class(instance.class);
                        format!("[instance {}]", self.string_at(class.name))
                    }
                    _ => unreachable!(),
                }
            }
            Obj::Upvalue(_) => "[upvalue]".to_string(),
        }
    }

    fn function_display_name(&self, handle: ObjHandle) -> String {
        let function = match self.heap.get(handle) {
            Obj::Function(f) => f,
            Obj::Closure(c) => self.function(c.function),
            _ => return "?".to_string(),
        };
        function
            .name
            .map(|n| self.string_at(n).to_string())
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

/// Builds a native class through the binding API: inherit, constructor,
/// methods, primitives, getters/setters and static members.
pub struct ClassBuilder {
    handle: ObjHandle,
    name: ObjHandle,
}

impl ClassBuilder {
    pub fn new(state: &mut State, name: &str) -> Self {
        let name_handle = state.intern(name);
        let handle = state.alloc(Obj::Class(Class {
            name: name_handle,
            init_method: None,
            methods: Table::new(),
            static_fields: Table::new(),
            super_class: None,
        }));
        Self {
            handle,
            name: name_handle,
        }
    }

    pub fn handle(&self) -> ObjHandle {
        self.handle
    }

    /// Copy the parent's methods, statics and constructor, and remember it
    /// as the superclass.
    pub fn inherit_from(&self, state: &mut State, parent: ObjHandle) {
        let (methods, statics, init) = {
            let parent = state.class(parent);
            (
                parent.methods.clone(),
                parent.static_fields.clone(),
                parent.init_method,
            )
        };
        let class = state.class_mut(self.handle);
        class.super_class = Some(parent);
        if class.init_method.is_none() {
            class.init_method = init;
        }
        class.methods.add_all(&methods);
        class.static_fields.add_all(&statics);
    }

    fn method_value(state: &mut State, name: &str, method: NativeMethodFn) -> Value {
        let name = state.intern(name);
        state.push_root(Value::object(name));
        let handle = state.alloc(Obj::NativeMethod(NativeMethod { method, name }));
        state.pop_root();
        Value::object(handle)
    }

    fn primitive_value(state: &mut State, name: &str, method: PrimitiveMethodFn) -> Value {
        let name = state.intern(name);
        state.push_root(Value::object(name));
        let handle = state.alloc(Obj::PrimitiveMethod(PrimitiveMethod { method, name }));
        state.pop_root();
        Value::object(handle)
    }

    pub fn bind_constructor(&self, state: &mut State, method: NativeMethodFn) {
        let value = Self::method_value(state, "constructor", method);
        let key = state.intern("constructor");
        let class = state.class_mut(self.handle);
        class.init_method = Some(value);
        class.methods.set(key, value);
    }

    pub fn bind_method(&self, state: &mut State, name: &str, method: NativeMethodFn) {
        let value = Self::method_value(state, name, method);
        let key = state.intern(name);
        state.class_mut(self.handle).methods.set(key, value);
    }

    pub fn bind_primitive(&self, state: &mut State, name: &str, method: PrimitiveMethodFn) {
        let value = Self::primitive_value(state, name, method);
        let key = state.intern(name);
        state.class_mut(self.handle).methods.set(key, value);
    }

    pub fn set_static_method(&self, state: &mut State, name: &str, method: NativeMethodFn) {
        let value = Self::method_value(state, name, method);
        let key = state.intern(name);
        state.class_mut(self.handle).static_fields.set(key, value);
    }

    pub fn set_static_primitive(&self, state: &mut State, name: &str, method: PrimitiveMethodFn) {
        let value = Self::primitive_value(state, name, method);
        let key = state.intern(name);
        state.class_mut(self.handle).static_fields.set(key, value);
    }

    fn field_value(
        state: &mut State,
        name: &str,
        getter: Option<NativeMethodFn>,
        setter: Option<NativeMethodFn>,
    ) -> Value {
        let name_handle = state.intern(name);
        state.push_root(Value::object(name_handle));
        let mut roots = 1;
        let getter = getter.map(|g| Self::method_value(state, name, g));
        if let Some(getter) = getter {
            state.push_root(getter);
            roots += 1;
        }
        let setter = setter.map(|s| Self::method_value(state, name, s));
        if let Some(setter) = setter {
            state.push_root(setter);
            roots += 1;
        }
        let field = state.alloc(Obj::Field(FieldAccessor {
            name: name_handle,
            getter,
            setter,
        }));
        for _ in 0..roots {
            state.pop_root();
        }
        Value::object(field)
    }

    pub fn set_getter(&self, state: &mut State, name: &str, getter: NativeMethodFn) {
        let value = Self::field_value(state, name, Some(getter), None);
        let key = state.intern(name);
        state.class_mut(self.handle).methods.set(key, value);
    }

    pub fn set_setter(&self, state: &mut State, name: &str, setter: NativeMethodFn) {
        let value = Self::field_value(state, name, None, Some(setter));
        let key = state.intern(name);
        state.class_mut(self.handle).methods.set(key, value);
    }

    pub fn bind_field(
        &self,
        state: &mut State,
        name: &str,
        getter: NativeMethodFn,
        setter: NativeMethodFn,
    ) {
        let value = Self::field_value(state, name, Some(getter), Some(setter));
        let key = state.intern(name);
        state.class_mut(self.handle).methods.set(key, value);
    }

    pub fn set_static_getter(&self, state: &mut State, name: &str, getter: NativeMethodFn) {
        let value = Self::field_value(state, name, Some(getter), None);
        let key = state.intern(name);
        state.class_mut(self.handle).static_fields.set(key, value);
    }

    pub fn set_static_setter(&self, state: &mut State, name: &str, setter: NativeMethodFn) {
        let value = Self::field_value(state, name, None, Some(setter));
        let key = state.intern(name);
        state.class_mut(self.handle).static_fields.set(key, value);
    }

    pub fn set_static_field(&self, state: &mut State, name: &str, value: Value) {
        let key = state.intern(name);
        state.class_mut(self.handle).static_fields.set(key, value);
    }

    /// Install the class as a global under its own name.
    pub fn install(&self, state: &mut State) {
        state.globals.set(self.name, Value::object(self.handle));
    }
}
