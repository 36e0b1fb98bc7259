//! The bytecode dispatch loop and call machinery.
//!
//! Switch-based dispatch over the current fiber's top frame. The loop keeps
//! a small register set (fiber, function, ip, slot base) and re-reads it
//! after anything that can change the frame: calls, returns, fiber
//! switches, and runtime-error recovery.

use lit_core::{ObjHandle, Value};

use crate::compiler::opcode::Opcode;
use crate::vm::fiber::{CallFrame, Fiber, CALL_FRAMES_MAX};
use crate::vm::object::{
    BoundMethod, Class, Instance, Obj, ObjKind, RefSlot, UpvalueState,
};
use crate::vm::state::{Interpretation, InterpretResult};
use crate::vm::State;

/// Cached view of the active frame.
struct Registers {
    fiber: ObjHandle,
    function: ObjHandle,
    ip: usize,
    slot_base: usize,
}

/// Raise a runtime error from inside the dispatch loop: store the ip, walk
/// the catcher chain, and either resume in the catching fiber or bail out.
macro_rules! rt_error {
    ($state:expr, $regs:expr, $($arg:tt)*) => {{
        $state.write_ip(&$regs);
        if $state.signal_runtime_error(format!($($arg)*)) && $state.reload(&mut $regs) {
            continue;
        }
        return $state.runtime_error_result();
    }};
}

/// Finish a call that may have pushed a frame or switched fibers.
macro_rules! after_call {
    ($state:expr, $regs:expr, $result:expr) => {{
        match $result {
            Ok(true) => {
                if $state.reload(&mut $regs) {
                    continue;
                }
                return $state.runtime_error_result();
            }
            Ok(false) => {}
            Err(message) => rt_error!($state, $regs, "{message}"),
        }
    }};
}

impl State {
    // ---- fiber stack helpers -------------------------------------------

    fn push_value(&mut self, fiber: ObjHandle, value: Value) {
        self.fiber_mut(fiber).push(value);
    }

    fn pop_value(&mut self, fiber: ObjHandle) -> Value {
        self.fiber_mut(fiber).pop()
    }

    fn peek_value(&self, fiber: ObjHandle, distance: usize) -> Value {
        self.fiber(fiber).peek(distance)
    }

    fn drop_values(&mut self, fiber: ObjHandle, count: usize) {
        self.fiber_mut(fiber).drop_n(count);
    }

    fn set_top_value(&mut self, fiber: ObjHandle, distance: usize, value: Value) {
        self.fiber_mut(fiber).set_top(distance, value);
    }

    fn stack_len(&self, fiber: ObjHandle) -> usize {
        self.fiber(fiber).stack.len()
    }

    fn write_ip(&mut self, regs: &Registers) {
        if let Some(frame) = self.fiber_mut(regs.fiber).frames.last_mut() {
            frame.ip = regs.ip;
        }
    }

    /// Re-read the register set from the current fiber's top frame.
    /// Returns false when execution cannot continue (abort or no fiber).
    fn reload(&self, regs: &mut Registers) -> bool {
        let fiber = match self.current_fiber {
            Some(fiber) => fiber,
            None => return false,
        };
        let state = self.fiber(fiber);
        if state.aborting {
            return false;
        }
        let frame = match state.frames.last() {
            Some(frame) => frame,
            None => return false,
        };
        *regs = Registers {
            fiber,
            function: frame.function,
            ip: frame.ip,
            slot_base: frame.slot_base,
        };
        true
    }

    fn runtime_error_result(&self) -> Interpretation {
        let value = self
            .current_fiber
            .map(|fiber| self.fiber(fiber).error)
            .unwrap_or(Value::NULL);
        Interpretation {
            status: InterpretResult::RuntimeError,
            value,
        }
    }

    // ---- code reading --------------------------------------------------

    fn read_byte(&self, regs: &mut Registers) -> u8 {
        let byte = self.function(regs.function).chunk.code[regs.ip];
        regs.ip += 1;
        byte
    }

    fn read_short(&self, regs: &mut Registers) -> u16 {
        let chunk = &self.function(regs.function).chunk;
        let value = ((chunk.code[regs.ip] as u16) << 8) | chunk.code[regs.ip + 1] as u16;
        regs.ip += 2;
        value
    }

    fn read_constant(&self, regs: &mut Registers) -> Value {
        let index = self.read_byte(regs) as usize;
        self.function(regs.function).chunk.constants[index]
    }

    fn read_constant_long(&self, regs: &mut Registers) -> Value {
        let index = self.read_short(regs) as usize;
        self.function(regs.function).chunk.constants[index]
    }

    fn read_string_long(&self, regs: &mut Registers) -> ObjHandle {
        self.read_constant_long(regs)
            .as_object()
            .expect("name constant must be a string")
    }

    // ---- upvalues ------------------------------------------------------

    /// Find or create the open upvalue for a stack slot. The open list is
    /// kept sorted by descending slot so closing can stop early.
    pub(crate) fn capture_upvalue(&mut self, fiber: ObjHandle, slot: usize) -> ObjHandle {
        let mut insert_at = None;
        {
            let open = &self.fiber(fiber).open_upvalues;
            for (i, handle) in open.iter().enumerate() {
                match self.heap.get(*handle) {
                    Obj::Upvalue(UpvalueState::Open { slot: existing, .. }) => {
                        if *existing == slot {
                            return *handle;
                        }
                        if *existing < slot {
                            insert_at = Some(i);
                            break;
                        }
                    }
                    _ => unreachable!("open upvalue list holds upvalues"),
                }
            }
        }
        let created = self.alloc(Obj::Upvalue(UpvalueState::Open { fiber, slot }));
        let open = &mut self.fiber_mut(fiber).open_upvalues;
        match insert_at {
            Some(i) => open.insert(i, created),
            None => open.push(created),
        }
        created
    }

    /// Close every open upvalue at or above `from_slot`.
    pub(crate) fn close_upvalues(&mut self, fiber: ObjHandle, from_slot: usize) {
        loop {
            let (handle, slot) = {
                let open = &self.fiber(fiber).open_upvalues;
                match open.first() {
                    Some(handle) => match self.heap.get(*handle) {
                        Obj::Upvalue(UpvalueState::Open { slot, .. }) => (*handle, *slot),
                        _ => unreachable!("open upvalue list holds open upvalues"),
                    },
                    None => return,
                }
            };
            if slot < from_slot {
                return;
            }
            let value = self.fiber(fiber).stack[slot];
            *self.heap.get_mut(handle) = Obj::Upvalue(UpvalueState::Closed(value));
            self.fiber_mut(fiber).open_upvalues.remove(0);
        }
    }

    fn read_upvalue(&self, closure: Option<ObjHandle>, index: usize) -> Value {
        let closure = closure.expect("upvalue access requires a closure");
        let upvalue = match self.heap.get(closure) {
            Obj::Closure(c) => c.upvalues[index],
            _ => unreachable!("frame closure is a closure"),
        };
        match self.heap.get(upvalue) {
            Obj::Upvalue(UpvalueState::Closed(value)) => *value,
            Obj::Upvalue(UpvalueState::Open { fiber, slot }) => self.fiber(*fiber).stack[*slot],
            _ => unreachable!("closure upvalues are upvalues"),
        }
    }

    fn write_upvalue(&mut self, closure: Option<ObjHandle>, index: usize, value: Value) {
        let closure = closure.expect("upvalue access requires a closure");
        let upvalue = match self.heap.get(closure) {
            Obj::Closure(c) => c.upvalues[index],
            _ => unreachable!("frame closure is a closure"),
        };
        match self.heap.get(upvalue) {
            Obj::Upvalue(UpvalueState::Closed(_)) => {
                *self.heap.get_mut(upvalue) = Obj::Upvalue(UpvalueState::Closed(value));
            }
            Obj::Upvalue(UpvalueState::Open { fiber, slot }) => {
                let (fiber, slot) = (*fiber, *slot);
                self.fiber_mut(fiber).stack[slot] = value;
            }
            _ => unreachable!("closure upvalues are upvalues"),
        }
    }

    fn frame_closure(&self, regs: &Registers) -> Option<ObjHandle> {
        self.fiber(regs.fiber)
            .frames
            .last()
            .and_then(|frame| frame.closure)
    }

    // ---- runtime errors ------------------------------------------------

    /// Record a runtime error and search the parent chain for a catcher.
    /// Returns true when a catching fiber resumed with the error value.
    pub fn signal_runtime_error(&mut self, message: String) -> bool {
        let error = self.string_value(&message);
        self.handle_runtime_error(error)
    }

    pub fn handle_runtime_error(&mut self, error: Value) -> bool {
        let mut walker = self.current_fiber;
        while let Some(handle) = walker {
            self.fiber_mut(handle).error = error;
            if self.fiber(handle).catcher {
                let parent = self.fiber(handle).parent;
                self.current_fiber = parent;
                if let Some(parent) = parent {
                    // The parent is suspended at its run/try invoke; the
                    // receiver slot is the result slot.
                    self.set_top_value(parent, 0, error);
                }
                return true;
            }
            let caller = self.fiber(handle).parent;
            self.fiber_mut(handle).parent = None;
            walker = caller;
        }
        let Some(fiber) = self.current_fiber else {
            return false;
        };
        self.fiber_mut(fiber).aborting = true;
        self.fiber_mut(fiber).error = error;
        let message = self
            .as_string(error)
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.type_name(error).to_string());
        let trace = self.stack_trace(fiber);
        self.had_error = true;
        self.print_error(&format!("{message}\n{trace}"));
        false
    }

    fn stack_trace(&self, fiber: ObjHandle) -> String {
        let mut out = String::new();
        for frame in self.fiber(fiber).frames.iter().rev() {
            let function = self.function(frame.function);
            let name = function
                .name
                .map(|n| self.string_at(n).to_string())
                .unwrap_or_else(|| "?".to_string());
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            if line != 0 {
                out.push_str(&format!("[line {line}] in {name}\n"));
            } else {
                out.push_str(&format!("in {name}\n"));
            }
        }
        out
    }

    // ---- calls ---------------------------------------------------------

    /// Push a call frame for a script function. The stack already holds
    /// `[callee, arg1..argN]`; arguments are normalized to the declared
    /// count (padding with null, dropping extras or collecting varargs).
    fn dispatch_call(
        &mut self,
        function: ObjHandle,
        closure: Option<ObjHandle>,
        arg_count: usize,
    ) -> Result<bool, String> {
        let fiber = self.current_fiber.ok_or("no fiber to run on")?;
        if self.fiber(fiber).frames.len() >= CALL_FRAMES_MAX {
            return Err("fiber frame overflow".to_string());
        }
        let slot_base = self.stack_len(fiber) - arg_count - 1;
        let (declared, vararg) = {
            let function = self.function(function);
            (function.arg_count, function.vararg)
        };
        if arg_count != declared {
            if arg_count < declared {
                let missing = declared - arg_count - usize::from(vararg);
                for _ in 0..missing {
                    self.push_value(fiber, Value::NULL);
                }
                if vararg {
                    let array = self.alloc(Obj::Array(Vec::new()));
                    self.push_value(fiber, Value::object(array));
                }
            } else if vararg {
                let extra = arg_count - declared + 1;
                let start = self.stack_len(fiber) - extra;
                let values: Vec<Value> = self.fiber(fiber).stack[start..].to_vec();
                // Allocate while the originals are still stack-reachable.
                let array = self.alloc(Obj::Array(values));
                self.drop_values(fiber, extra);
                self.push_value(fiber, Value::object(array));
            } else {
                self.drop_values(fiber, arg_count - declared);
            }
        } else if vararg {
            let last = self.peek_value(fiber, 0);
            let array = self.alloc(Obj::Array(vec![last]));
            self.set_top_value(fiber, 0, Value::object(array));
        }
        self.fiber_mut(fiber).frames.push(CallFrame {
            function,
            closure,
            ip: 0,
            slot_base,
            result_ignored: false,
            return_to_host: false,
        });
        Ok(true)
    }

    /// Dispatch a call to any callee type. The stack holds
    /// `[callee, args...]`; on return the window has been replaced
    /// according to the callee's protocol. The result says whether the
    /// active frame changed (new frame pushed or fiber switched).
    pub fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<bool, String> {
        let fiber = self.current_fiber.ok_or("no fiber to run on")?;
        let handle = match callee.as_object() {
            Some(handle) => handle,
            None => {
                return Err(if callee.is_null() {
                    "attempt to call a null value".to_string()
                } else {
                    "can only call functions and classes".to_string()
                })
            }
        };
        match self.heap.get(handle).kind() {
            ObjKind::Function => self.dispatch_call(handle, None, arg_count),
            ObjKind::Closure => {
                let function = match self.heap.get(handle) {
                    Obj::Closure(c) => c.function,
                    _ => unreachable!(),
                };
                self.dispatch_call(function, Some(handle), arg_count)
            }
            ObjKind::NativeFunction => {
                let function = match self.heap.get(handle) {
                    Obj::NativeFunction(n) => n.function,
                    _ => unreachable!(),
                };
                let args = self.collect_args(fiber, arg_count);
                let result = function(self, &args)?;
                self.drop_values(fiber, arg_count);
                self.set_top_value(fiber, 0, result);
                Ok(false)
            }
            ObjKind::NativeMethod => {
                let method = match self.heap.get(handle) {
                    Obj::NativeMethod(n) => n.method,
                    _ => unreachable!(),
                };
                let receiver = self.peek_value(fiber, arg_count);
                let args = self.collect_args(fiber, arg_count);
                let result = method(self, receiver, &args)?;
                self.drop_values(fiber, arg_count);
                self.set_top_value(fiber, 0, result);
                Ok(false)
            }
            ObjKind::NativePrimitive => {
                let function = match self.heap.get(handle) {
                    Obj::NativePrimitive(n) => n.function,
                    _ => unreachable!(),
                };
                let args = self.collect_args(fiber, arg_count);
                self.drop_values(fiber, arg_count);
                // The copies left the stack; keep them rooted while the
                // primitive may allocate.
                for arg in &args {
                    self.push_root(*arg);
                }
                let result = function(self, &args);
                for _ in 0..args.len() {
                    self.pop_root();
                }
                result
            }
            ObjKind::PrimitiveMethod => {
                let method = match self.heap.get(handle) {
                    Obj::PrimitiveMethod(p) => p.method,
                    _ => unreachable!(),
                };
                let receiver = self.peek_value(fiber, arg_count);
                let args = self.collect_args(fiber, arg_count);
                self.drop_values(fiber, arg_count);
                for arg in &args {
                    self.push_root(*arg);
                }
                let result = method(self, receiver, &args);
                for _ in 0..args.len() {
                    self.pop_root();
                }
                result
            }
            ObjKind::Class => {
                let instance = self.alloc(Obj::Instance(Instance {
                    class: handle,
                    fields: crate::vm::table::Table::new(),
                }));
                let slot = self.stack_len(fiber) - arg_count - 1;
                self.fiber_mut(fiber).stack[slot] = Value::object(instance);
                let init = self.class(handle).init_method;
                match init {
                    Some(init) => self.call_value(init, arg_count),
                    None => {
                        self.drop_values(fiber, arg_count);
                        Ok(false)
                    }
                }
            }
            ObjKind::BoundMethod => {
                let (receiver, method) = match self.heap.get(handle) {
                    Obj::BoundMethod(b) => (b.receiver, b.method),
                    _ => unreachable!(),
                };
                let slot = self.stack_len(fiber) - arg_count - 1;
                self.fiber_mut(fiber).stack[slot] = receiver;
                self.call_value(method, arg_count)
            }
            _ => Err("can only call functions and classes".to_string()),
        }
    }

    fn collect_args(&self, fiber: ObjHandle, arg_count: usize) -> Vec<Value> {
        let stack = &self.fiber(fiber).stack;
        stack[stack.len() - arg_count..].to_vec()
    }

    /// Method lookup on `class` (or the receiver's own fields for
    /// instances), then dispatch. `None` means the method was not found.
    fn invoke_from_class(
        &mut self,
        class: ObjHandle,
        name: ObjHandle,
        arg_count: usize,
        receiver: Value,
        statics: bool,
        ignoring: bool,
    ) -> Result<Option<bool>, String> {
        let mut method = None;
        if let Some(Obj::Instance(instance)) = receiver.as_object().map(|h| self.heap.get(h)) {
            method = instance.fields.get(name);
        }
        if method.is_none() {
            let class = self.class(class);
            method = if statics {
                class.static_fields.get(name)
            } else {
                class.methods.get(name)
            };
        }
        let Some(method) = method else {
            return Ok(None);
        };
        if ignoring {
            let fiber = self.current_fiber.ok_or("no fiber to run on")?;
            if self.call_value(method, arg_count)? {
                if let Some(frame) = self.fiber_mut(fiber).frames.last_mut() {
                    frame.result_ignored = true;
                }
                Ok(Some(true))
            } else {
                // Native result: discard it, keep the receiver.
                self.set_top_value(fiber, 0, receiver);
                Ok(Some(false))
            }
        } else {
            self.call_value(method, arg_count).map(Some)
        }
    }

    /// The INVOKE family: resolve `name` against the receiver and call it.
    fn invoke_operation(
        &mut self,
        name: ObjHandle,
        arg_count: usize,
        super_class: Option<ObjHandle>,
        ignoring: bool,
    ) -> Result<bool, String> {
        let fiber = self.current_fiber.ok_or("no fiber to run on")?;
        let receiver = self.peek_value(fiber, arg_count);
        if receiver.is_null() {
            return Err(format!(
                "Attempt to index a null value with '{}'",
                self.string_at(name)
            ));
        }
        let (class, statics) = match super_class {
            Some(class) => (class, false),
            None => match receiver.as_object().map(|h| self.heap.get(h).kind()) {
                Some(ObjKind::Class) => (receiver.as_object().expect("class receiver"), true),
                _ => {
                    let class = self
                        .class_for(receiver)
                        .ok_or("only instances and classes have methods")?;
                    (class, false)
                }
            },
        };
        match self.invoke_from_class(class, name, arg_count, receiver, statics, ignoring)? {
            Some(changed) => Ok(changed),
            None => Err(format!(
                "Attempt to call method '{}', that is not defined in class {}",
                self.string_at(name),
                self.string_at(self.class(class).name)
            )),
        }
    }

    /// Arithmetic fallback: invoke the operator method on the receiver.
    fn invoke_operator(
        &mut self,
        receiver: Value,
        method_name: &str,
        arg_count: usize,
    ) -> Result<bool, String> {
        let class = self.class_for(receiver).ok_or_else(|| {
            format!(
                "cannot get class object for a '{}'",
                self.type_name(receiver)
            )
        })?;
        let name = self.intern(method_name);
        match self.invoke_from_class(class, name, arg_count, receiver, false, false)? {
            Some(changed) => Ok(changed),
            None => Err(format!(
                "Attempt to call method '{}', that is not defined in class {}",
                method_name,
                self.string_at(self.class(class).name)
            )),
        }
    }

    // ---- field access --------------------------------------------------

    /// GET_FIELD: `[object, name]` → `[value]`, or a getter call.
    fn get_field_op(&mut self) -> Result<bool, String> {
        let fiber = self.current_fiber.ok_or("no fiber to run on")?;
        let object = self.peek_value(fiber, 1);
        if object.is_null() {
            return Err("Attempt to index a null value".to_string());
        }
        let name = self
            .peek_value(fiber, 0)
            .as_object()
            .expect("field name is a string");
        let kind = object.as_object().map(|h| self.heap.get(h).kind());
        let mut value = None;
        let mut accessor = None;
        match kind {
            Some(ObjKind::Instance) => {
                let handle = object.as_object().expect("instance");
                let instance = self.instance(handle);
                if let Some(found) = instance.fields.get(name) {
                    value = Some(found);
                } else if let Some(found) = self.class(instance.class).methods.get(name) {
                    match self.field_getter(found) {
                        Some(getter) => accessor = Some(getter),
                        None if self.is_field(found) => {
                            return Err(self.missing_accessor_error(instance.class, name, "getter"))
                        }
                        None => {
                            let bound = self.alloc(Obj::BoundMethod(BoundMethod {
                                receiver: object,
                                method: found,
                            }));
                            value = Some(Value::object(bound));
                        }
                    }
                }
            }
            Some(ObjKind::Class) => {
                let class = object.as_object().expect("class");
                if let Some(found) = self.class(class).static_fields.get(name) {
                    match self.field_getter(found) {
                        Some(getter) => accessor = Some(getter),
                        None if self.is_field(found) => {
                            return Err(self.missing_accessor_error(class, name, "getter"))
                        }
                        None => {
                            let found_kind = found.as_object().map(|h| self.heap.get(h).kind());
                            if matches!(
                                found_kind,
                                Some(ObjKind::NativeMethod) | Some(ObjKind::PrimitiveMethod)
                            ) {
                                let bound = self.alloc(Obj::BoundMethod(BoundMethod {
                                    receiver: object,
                                    method: found,
                                }));
                                value = Some(Value::object(bound));
                            } else {
                                value = Some(found);
                            }
                        }
                    }
                }
            }
            _ => {
                let class = self
                    .class_for(object)
                    .ok_or("only instances and classes have fields")?;
                if let Some(found) = self.class(class).methods.get(name) {
                    match self.field_getter(found) {
                        Some(getter) => accessor = Some(getter),
                        None if self.is_field(found) => {
                            return Err(self.missing_accessor_error(class, name, "getter"))
                        }
                        None => {
                            let found_kind = found.as_object().map(|h| self.heap.get(h).kind());
                            if matches!(
                                found_kind,
                                Some(ObjKind::NativeMethod) | Some(ObjKind::PrimitiveMethod)
                            ) {
                                let bound = self.alloc(Obj::BoundMethod(BoundMethod {
                                    receiver: object,
                                    method: found,
                                }));
                                value = Some(Value::object(bound));
                            } else {
                                value = Some(found);
                            }
                        }
                    }
                }
            }
        }
        if let Some(getter) = accessor {
            // [object, name] → [object], then call the getter on it.
            self.drop_values(fiber, 1);
            return self.call_value(getter, 0);
        }
        self.drop_values(fiber, 1);
        self.set_top_value(fiber, 0, value.unwrap_or(Value::NULL));
        Ok(false)
    }

    /// SET_FIELD: `[object, value, name]` → `[value]`, or a setter call.
    fn set_field_op(&mut self) -> Result<bool, String> {
        let fiber = self.current_fiber.ok_or("no fiber to run on")?;
        let object = self.peek_value(fiber, 2);
        if object.is_null() {
            return Err("Attempt to index a null value".to_string());
        }
        let value = self.peek_value(fiber, 1);
        let name = self
            .peek_value(fiber, 0)
            .as_object()
            .expect("field name is a string");
        let kind = object.as_object().map(|h| self.heap.get(h).kind());
        match kind {
            Some(ObjKind::Class) => {
                let class = object.as_object().expect("class");
                if let Some(found) = self.class(class).static_fields.get(name) {
                    if self.is_field(found) {
                        return match self.field_setter(found) {
                            Some(setter) => {
                                self.drop_values(fiber, 2);
                                self.push_value(fiber, value);
                                self.call_value(setter, 1)
                            }
                            None => Err(self.missing_accessor_error(class, name, "setter")),
                        };
                    }
                }
                if value.is_null() {
                    self.class_mut(class).static_fields.remove(name);
                } else {
                    self.class_mut(class).static_fields.set(name, value);
                }
                self.drop_values(fiber, 2);
                self.set_top_value(fiber, 0, value);
                Ok(false)
            }
            Some(ObjKind::Instance) => {
                let handle = object.as_object().expect("instance");
                let class = self.instance(handle).class;
                if let Some(found) = self.class(class).methods.get(name) {
                    if self.is_field(found) {
                        return match self.field_setter(found) {
                            Some(setter) => {
                                self.drop_values(fiber, 2);
                                self.push_value(fiber, value);
                                self.call_value(setter, 1)
                            }
                            None => Err(self.missing_accessor_error(class, name, "setter")),
                        };
                    }
                }
                match self.heap.get_mut(handle) {
                    Obj::Instance(instance) => {
                        if value.is_null() {
                            instance.fields.remove(name);
                        } else {
                            instance.fields.set(name, value);
                        }
                    }
                    _ => unreachable!(),
                }
                self.drop_values(fiber, 2);
                self.set_top_value(fiber, 0, value);
                Ok(false)
            }
            _ => {
                let class = self
                    .class_for(object)
                    .ok_or("only instances and classes have fields")?;
                if let Some(found) = self.class(class).methods.get(name) {
                    if self.is_field(found) {
                        return match self.field_setter(found) {
                            Some(setter) => {
                                self.drop_values(fiber, 2);
                                self.push_value(fiber, value);
                                self.call_value(setter, 1)
                            }
                            None => Err(self.missing_accessor_error(class, name, "setter")),
                        };
                    }
                }
                Err(format!(
                    "Class {} does not contain field {}",
                    self.string_at(self.class(class).name),
                    self.string_at(name)
                ))
            }
        }
    }

    fn is_field(&self, value: Value) -> bool {
        matches!(
            value.as_object().map(|h| self.heap.get(h)),
            Some(Obj::Field(_))
        )
    }

    fn field_getter(&self, value: Value) -> Option<Value> {
        match value.as_object().map(|h| self.heap.get(h)) {
            Some(Obj::Field(field)) => field.getter,
            _ => None,
        }
    }

    fn field_setter(&self, value: Value) -> Option<Value> {
        match value.as_object().map(|h| self.heap.get(h)) {
            Some(Obj::Field(field)) => field.setter,
            _ => None,
        }
    }

    fn missing_accessor_error(&self, class: ObjHandle, name: ObjHandle, which: &str) -> String {
        format!(
            "Class {} does not have a {} for the field {}",
            self.string_at(self.class(class).name),
            which,
            self.string_at(name)
        )
    }

    // ---- execution entry points ----------------------------------------

    /// Run a module's main function on a fresh fiber.
    pub fn exec_module(&mut self, module: ObjHandle) -> Interpretation {
        let main = match self.module(module).main_function {
            Some(main) => main,
            None => return Interpretation::of(InterpretResult::Invalid),
        };
        let fiber = self.alloc(Obj::Fiber(Fiber::new(module, Some(main))));
        if self.module(module).main_fiber.is_none() {
            self.module_mut(module).main_fiber = Some(fiber);
        }
        self.current_fiber = Some(fiber);
        self.push_value(fiber, Value::object(main));
        self.exec_fiber(fiber)
    }

    /// The dispatch loop. Runs until the fiber chain finishes, a
    /// host-entry frame returns, or an uncaught runtime error aborts.
    pub fn exec_fiber(&mut self, fiber: ObjHandle) -> Interpretation {
        let was_allowed = self.heap.allow_gc;
        self.heap.allow_gc = true;
        self.current_fiber = Some(fiber);
        self.fiber_mut(fiber).aborting = false;
        let mut vararg_extra: i32 = 0;
        let mut regs = Registers {
            fiber,
            function: ObjHandle(0),
            ip: 0,
            slot_base: 0,
        };
        if !self.reload(&mut regs) {
            self.heap.allow_gc = was_allowed;
            return Interpretation::of(InterpretResult::Invalid);
        }

        loop {
            let byte = self.read_byte(&mut regs);
            let op = match Opcode::from_byte(byte) {
                Some(op) => op,
                None => rt_error!(self, regs, "Unknown op code '{byte}'"),
            };
            match op {
                Opcode::Pop => {
                    self.drop_values(regs.fiber, 1);
                }
                Opcode::Return => {
                    let result = self.pop_value(regs.fiber);
                    self.close_upvalues(regs.fiber, regs.slot_base);
                    self.write_ip(&regs);
                    let frame = self
                        .fiber_mut(regs.fiber)
                        .frames
                        .pop()
                        .expect("RETURN without a frame");
                    let module = self.function(frame.function).module;
                    if frame.return_to_host {
                        self.module_mut(module).return_value = result;
                        self.fiber_mut(regs.fiber).stack.truncate(frame.slot_base);
                        self.heap.allow_gc = was_allowed;
                        return Interpretation::ok(result);
                    }
                    if self.fiber(regs.fiber).frames.is_empty() {
                        self.module_mut(module).return_value = result;
                        let parent = self.fiber(regs.fiber).parent;
                        match parent {
                            None => {
                                self.drop_values(regs.fiber, 1);
                                self.heap.allow_gc = was_allowed;
                                return Interpretation::ok(result);
                            }
                            Some(parent) => {
                                self.fiber_mut(regs.fiber).parent = None;
                                self.current_fiber = Some(parent);
                                // The parent's receiver slot is the result
                                // slot of its run() invoke.
                                self.set_top_value(parent, 0, result);
                                if self.reload(&mut regs) {
                                    continue;
                                }
                                return self.runtime_error_result();
                            }
                        }
                    }
                    let receiver = self.fiber(regs.fiber).stack[frame.slot_base];
                    self.fiber_mut(regs.fiber).stack.truncate(frame.slot_base);
                    if frame.result_ignored {
                        self.push_value(regs.fiber, receiver);
                    } else {
                        self.push_value(regs.fiber, result);
                    }
                    if self.reload(&mut regs) {
                        continue;
                    }
                    return self.runtime_error_result();
                }
                Opcode::Constant => {
                    let value = self.read_constant(&mut regs);
                    self.push_value(regs.fiber, value);
                }
                Opcode::ConstantLong => {
                    let value = self.read_constant_long(&mut regs);
                    self.push_value(regs.fiber, value);
                }
                Opcode::True => self.push_value(regs.fiber, Value::TRUE),
                Opcode::False => self.push_value(regs.fiber, Value::FALSE),
                Opcode::Null => self.push_value(regs.fiber, Value::NULL),
                Opcode::Array => {
                    let array = self.alloc(Obj::Array(Vec::new()));
                    self.push_value(regs.fiber, Value::object(array));
                }
                Opcode::Object => {
                    let map = self.alloc(Obj::Map(crate::vm::table::Table::new()));
                    self.push_value(regs.fiber, Value::object(map));
                }
                Opcode::Range => {
                    let from = self.pop_value(regs.fiber);
                    let to = self.pop_value(regs.fiber);
                    if !from.is_number() || !to.is_number() {
                        rt_error!(self, regs, "Range operands must be number");
                    }
                    let range = self.alloc(Obj::Range(crate::vm::object::Range {
                        from: from.as_number(),
                        to: to.as_number(),
                    }));
                    self.push_value(regs.fiber, Value::object(range));
                }
                Opcode::Negate => {
                    let operand = self.peek_value(regs.fiber, 0);
                    if !operand.is_number() {
                        rt_error!(self, regs, "Operand must be a number");
                    }
                    self.set_top_value(regs.fiber, 0, Value::number(-operand.as_number()));
                }
                Opcode::Not => {
                    let operand = self.peek_value(regs.fiber, 0);
                    if matches!(self.kind_of(operand), Some(ObjKind::Instance)) {
                        self.write_ip(&regs);
                        let class = self.class_for(operand).expect("instances have classes");
                        let name = self.intern("!");
                        match self.invoke_from_class(class, name, 0, operand, false, false) {
                            Ok(Some(true)) => {
                                if self.reload(&mut regs) {
                                    continue;
                                }
                                return self.runtime_error_result();
                            }
                            Ok(Some(false)) => continue,
                            Ok(None) => {}
                            Err(message) => rt_error!(self, regs, "{message}"),
                        }
                    }
                    self.set_top_value(regs.fiber, 0, Value::bool(operand.is_falsey()));
                }
                Opcode::BNot => {
                    let operand = self.peek_value(regs.fiber, 0);
                    if !operand.is_number() {
                        rt_error!(self, regs, "Operand must be a number");
                    }
                    let result = !(operand.as_number() as i64);
                    self.set_top_value(regs.fiber, 0, Value::number(result as f64));
                }
                Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Power
                | Opcode::Divide
                | Opcode::FloorDivide
                | Opcode::Mod
                | Opcode::Greater
                | Opcode::GreaterEqual
                | Opcode::Less
                | Opcode::LessEqual => {
                    let a = self.peek_value(regs.fiber, 1);
                    let b = self.peek_value(regs.fiber, 0);
                    if a.is_number() {
                        if !b.is_number() {
                            rt_error!(
                                self,
                                regs,
                                "Attempt to use op {} with a number and a {}",
                                op_symbol(op),
                                self.type_name(b)
                            );
                        }
                        let (x, y) = (a.as_number(), b.as_number());
                        let result = match op {
                            Opcode::Add => Value::number(x + y),
                            Opcode::Subtract => Value::number(x - y),
                            Opcode::Multiply => Value::number(x * y),
                            Opcode::Power => Value::number(x.powf(y)),
                            Opcode::Divide => Value::number(x / y),
                            Opcode::FloorDivide => Value::number((x / y).floor()),
                            Opcode::Mod => Value::number(x % y),
                            Opcode::Greater => Value::bool(x > y),
                            Opcode::GreaterEqual => Value::bool(x >= y),
                            Opcode::Less => Value::bool(x < y),
                            Opcode::LessEqual => Value::bool(x <= y),
                            _ => unreachable!(),
                        };
                        self.drop_values(regs.fiber, 1);
                        self.set_top_value(regs.fiber, 0, result);
                        continue;
                    }
                    self.write_ip(&regs);
                    let result = self.invoke_operator(a, op_symbol(op), 1);
                    after_call!(self, regs, result);
                    if self.reload(&mut regs) {
                        continue;
                    }
                    return self.runtime_error_result();
                }
                Opcode::BAnd | Opcode::BOr | Opcode::BXor | Opcode::LShift | Opcode::RShift => {
                    let a = self.peek_value(regs.fiber, 1);
                    let b = self.peek_value(regs.fiber, 0);
                    if !a.is_number() || !b.is_number() {
                        rt_error!(
                            self,
                            regs,
                            "Operands of bitwise op {} must be two numbers, got {} and {}",
                            op_symbol(op),
                            self.type_name(a),
                            self.type_name(b)
                        );
                    }
                    let (x, y) = (a.as_number() as i64, b.as_number() as i64);
                    let result = match op {
                        Opcode::BAnd => x & y,
                        Opcode::BOr => x | y,
                        Opcode::BXor => x ^ y,
                        Opcode::LShift => x << (y & 63),
                        Opcode::RShift => x >> (y & 63),
                        _ => unreachable!(),
                    };
                    self.drop_values(regs.fiber, 1);
                    self.set_top_value(regs.fiber, 0, Value::number(result as f64));
                }
                Opcode::Equal => {
                    let a = self.peek_value(regs.fiber, 1);
                    let b = self.peek_value(regs.fiber, 0);
                    if a.is_number() && b.is_number() {
                        self.drop_values(regs.fiber, 1);
                        self.set_top_value(
                            regs.fiber,
                            0,
                            Value::bool(a.as_number() == b.as_number()),
                        );
                        continue;
                    }
                    // Instances may define their own equality.
                    if matches!(self.kind_of(a), Some(ObjKind::Instance)) {
                        let class = self.class_for(a).expect("instances have classes");
                        let name = self.intern("==");
                        let has_method = self.class(class).methods.get(name).is_some();
                        if has_method {
                            self.write_ip(&regs);
                            let result = self.invoke_from_class(class, name, 1, a, false, false);
                            match result {
                                Ok(Some(true)) => {
                                    if self.reload(&mut regs) {
                                        continue;
                                    }
                                    return self.runtime_error_result();
                                }
                                Ok(Some(false)) | Ok(None) => continue,
                                Err(message) => rt_error!(self, regs, "{message}"),
                            }
                        }
                    }
                    // Interned strings, bools and null all compare by bits.
                    self.drop_values(regs.fiber, 1);
                    self.set_top_value(regs.fiber, 0, Value::bool(a.to_bits() == b.to_bits()));
                }
                Opcode::SetGlobal => {
                    let name = self.read_string_long(&mut regs);
                    let value = self.peek_value(regs.fiber, 0);
                    self.globals.set(name, value);
                }
                Opcode::GetGlobal => {
                    let name = self.read_string_long(&mut regs);
                    let value = self.globals.get(name).unwrap_or(Value::NULL);
                    self.push_value(regs.fiber, value);
                }
                Opcode::SetLocal => {
                    let index = self.read_byte(&mut regs) as usize;
                    let value = self.peek_value(regs.fiber, 0);
                    self.fiber_mut(regs.fiber).stack[regs.slot_base + index] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_byte(&mut regs) as usize;
                    let value = self.fiber(regs.fiber).stack[regs.slot_base + index];
                    self.push_value(regs.fiber, value);
                }
                Opcode::SetLocalLong => {
                    let index = self.read_short(&mut regs) as usize;
                    let value = self.peek_value(regs.fiber, 0);
                    self.fiber_mut(regs.fiber).stack[regs.slot_base + index] = value;
                }
                Opcode::GetLocalLong => {
                    let index = self.read_short(&mut regs) as usize;
                    let value = self.fiber(regs.fiber).stack[regs.slot_base + index];
                    self.push_value(regs.fiber, value);
                }
                Opcode::SetPrivate => {
                    let index = self.read_byte(&mut regs) as usize;
                    let value = self.peek_value(regs.fiber, 0);
                    let module = self.fiber(regs.fiber).module;
                    self.module_mut(module).privates[index] = value;
                }
                Opcode::GetPrivate => {
                    let index = self.read_byte(&mut regs) as usize;
                    let module = self.fiber(regs.fiber).module;
                    let value = self.module(module).privates[index];
                    self.push_value(regs.fiber, value);
                }
                Opcode::SetPrivateLong => {
                    let index = self.read_short(&mut regs) as usize;
                    let value = self.peek_value(regs.fiber, 0);
                    let module = self.fiber(regs.fiber).module;
                    self.module_mut(module).privates[index] = value;
                }
                Opcode::GetPrivateLong => {
                    let index = self.read_short(&mut regs) as usize;
                    let module = self.fiber(regs.fiber).module;
                    let value = self.module(module).privates[index];
                    self.push_value(regs.fiber, value);
                }
                Opcode::SetUpvalue => {
                    let index = self.read_byte(&mut regs) as usize;
                    let value = self.peek_value(regs.fiber, 0);
                    let closure = self.frame_closure(&regs);
                    self.write_upvalue(closure, index, value);
                }
                Opcode::GetUpvalue => {
                    let index = self.read_byte(&mut regs) as usize;
                    let closure = self.frame_closure(&regs);
                    let value = self.read_upvalue(closure, index);
                    self.push_value(regs.fiber, value);
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_short(&mut regs) as usize;
                    if self.pop_value(regs.fiber).is_falsey() {
                        regs.ip += offset;
                    }
                }
                Opcode::JumpIfNull => {
                    let offset = self.read_short(&mut regs) as usize;
                    if self.peek_value(regs.fiber, 0).is_null() {
                        regs.ip += offset;
                    }
                }
                Opcode::JumpIfNullPopping => {
                    let offset = self.read_short(&mut regs) as usize;
                    if self.pop_value(regs.fiber).is_null() {
                        regs.ip += offset;
                    }
                }
                Opcode::Jump => {
                    let offset = self.read_short(&mut regs) as usize;
                    regs.ip += offset;
                }
                Opcode::JumpBack => {
                    let offset = self.read_short(&mut regs) as usize;
                    regs.ip -= offset;
                }
                Opcode::And => {
                    let offset = self.read_short(&mut regs) as usize;
                    if self.peek_value(regs.fiber, 0).is_falsey() {
                        regs.ip += offset;
                    } else {
                        self.drop_values(regs.fiber, 1);
                    }
                }
                Opcode::Or => {
                    let offset = self.read_short(&mut regs) as usize;
                    let value = self.peek_value(regs.fiber, 0);
                    if value.is_null() || value.is_falsey() {
                        self.drop_values(regs.fiber, 1);
                    } else {
                        regs.ip += offset;
                    }
                }
                Opcode::NullOr => {
                    let offset = self.read_short(&mut regs) as usize;
                    if self.peek_value(regs.fiber, 0).is_null() {
                        self.drop_values(regs.fiber, 1);
                    } else {
                        regs.ip += offset;
                    }
                }
                Opcode::Call => {
                    let arg_count =
                        (self.read_byte(&mut regs) as i32 + vararg_extra).max(0) as usize;
                    vararg_extra = 0;
                    let callee = self.peek_value(regs.fiber, arg_count);
                    self.write_ip(&regs);
                    let result = self.call_value(callee, arg_count);
                    after_call!(self, regs, result);
                }
                Opcode::Closure => {
                    let function = self
                        .read_constant_long(&mut regs)
                        .as_object()
                        .expect("closure constant is a function");
                    let upvalue_count = self.function(function).upvalue_count;
                    let closure = self.alloc(Obj::Closure(crate::vm::object::Closure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push_value(regs.fiber, Value::object(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte(&mut regs) != 0;
                        let index = self.read_byte(&mut regs) as usize;
                        let upvalue = if is_local {
                            self.capture_upvalue(regs.fiber, regs.slot_base + index)
                        } else {
                            let enclosing = self
                                .frame_closure(&regs)
                                .expect("nested upvalue requires a closure");
                            match self.heap.get(enclosing) {
                                Obj::Closure(c) => c.upvalues[index],
                                _ => unreachable!(),
                            }
                        };
                        match self.heap.get_mut(closure) {
                            Obj::Closure(c) => c.upvalues.push(upvalue),
                            _ => unreachable!(),
                        }
                    }
                }
                Opcode::CloseUpvalue => {
                    let top = self.stack_len(regs.fiber) - 1;
                    self.close_upvalues(regs.fiber, top);
                    self.drop_values(regs.fiber, 1);
                }
                Opcode::Class => {
                    let name = self.read_string_long(&mut regs);
                    let object_class = self.classes.object;
                    let mut class = Class {
                        name,
                        init_method: None,
                        methods: crate::vm::table::Table::new(),
                        static_fields: crate::vm::table::Table::new(),
                        super_class: object_class,
                    };
                    if let Some(object_class) = object_class {
                        let parent = self.class(object_class);
                        class.methods.add_all(&parent.methods);
                        class.static_fields.add_all(&parent.static_fields);
                    }
                    let handle = self.alloc(Obj::Class(class));
                    self.push_value(regs.fiber, Value::object(handle));
                    self.globals.set(name, Value::object(handle));
                }
                Opcode::GetField => {
                    self.write_ip(&regs);
                    let result = self.get_field_op();
                    after_call!(self, regs, result);
                    if self.reload(&mut regs) {
                        continue;
                    }
                    return self.runtime_error_result();
                }
                Opcode::SetField => {
                    self.write_ip(&regs);
                    let result = self.set_field_op();
                    after_call!(self, regs, result);
                    if self.reload(&mut regs) {
                        continue;
                    }
                    return self.runtime_error_result();
                }
                Opcode::SubscriptGet => {
                    let receiver = self.peek_value(regs.fiber, 1);
                    self.write_ip(&regs);
                    let result = self.invoke_operator(receiver, "[]", 1);
                    after_call!(self, regs, result);
                    if self.reload(&mut regs) {
                        continue;
                    }
                    return self.runtime_error_result();
                }
                Opcode::SubscriptSet => {
                    let receiver = self.peek_value(regs.fiber, 2);
                    self.write_ip(&regs);
                    let result = self.invoke_operator(receiver, "[]", 2);
                    after_call!(self, regs, result);
                    if self.reload(&mut regs) {
                        continue;
                    }
                    return self.runtime_error_result();
                }
                Opcode::PushArrayElement => {
                    let value = self.peek_value(regs.fiber, 0);
                    let array = self.peek_value(regs.fiber, 1);
                    let pushed = match array.as_object().map(|h| self.heap.get_mut(h)) {
                        Some(Obj::Array(elements)) => {
                            elements.push(value);
                            true
                        }
                        _ => false,
                    };
                    if !pushed {
                        rt_error!(self, regs, "Expected an array as the operand");
                    }
                    self.drop_values(regs.fiber, 1);
                }
                Opcode::PushObjectField => {
                    let value = self.peek_value(regs.fiber, 0);
                    let key = self.peek_value(regs.fiber, 1);
                    let operand = self.peek_value(regs.fiber, 2);
                    let key = match key.as_object() {
                        Some(key) if matches!(self.heap.get(key), Obj::String(_)) => key,
                        _ => rt_error!(self, regs, "Object keys must be strings"),
                    };
                    let stored = match operand.as_object().map(|h| self.heap.get_mut(h)) {
                        Some(Obj::Map(entries)) => {
                            entries.set(key, value);
                            true
                        }
                        Some(Obj::Instance(instance)) => {
                            instance.fields.set(key, value);
                            true
                        }
                        _ => false,
                    };
                    if !stored {
                        rt_error!(
                            self,
                            regs,
                            "Expected an object or a map as the operand, got {}",
                            self.type_name(operand)
                        );
                    }
                    self.drop_values(regs.fiber, 2);
                }
                Opcode::StaticField => {
                    let name = self.read_string_long(&mut regs);
                    let value = self.peek_value(regs.fiber, 0);
                    let class = self
                        .peek_value(regs.fiber, 1)
                        .as_object()
                        .expect("STATIC_FIELD expects a class");
                    self.class_mut(class).static_fields.set(name, value);
                    self.drop_values(regs.fiber, 1);
                }
                Opcode::Method => {
                    let name = self.read_string_long(&mut regs);
                    let method = self.peek_value(regs.fiber, 0);
                    let class = self
                        .peek_value(regs.fiber, 1)
                        .as_object()
                        .expect("METHOD expects a class");
                    let is_constructor = self.string_at(name) == "constructor";
                    let inherited = {
                        let class = self.class(class);
                        match (class.init_method, class.super_class) {
                            (None, _) => true,
                            (Some(init), Some(super_class)) => {
                                let super_init = self.class(super_class).init_method;
                                super_init
                                    .map(|s| s.to_bits() == init.to_bits())
                                    .unwrap_or(false)
                            }
                            _ => false,
                        }
                    };
                    if is_constructor && inherited {
                        self.class_mut(class).init_method = Some(method);
                    }
                    self.class_mut(class).methods.set(name, method);
                    self.drop_values(regs.fiber, 1);
                }
                Opcode::DefineField => {
                    let name = self.read_string_long(&mut regs);
                    let value = self.peek_value(regs.fiber, 0);
                    let class = self
                        .peek_value(regs.fiber, 1)
                        .as_object()
                        .expect("DEFINE_FIELD expects a class");
                    self.class_mut(class).methods.set(name, value);
                    self.drop_values(regs.fiber, 1);
                }
                Opcode::Invoke | Opcode::InvokeIgnoring => {
                    let arg_count =
                        (self.read_byte(&mut regs) as i32 + vararg_extra).max(0) as usize;
                    vararg_extra = 0;
                    let name = self.read_string_long(&mut regs);
                    self.write_ip(&regs);
                    let ignoring = op == Opcode::InvokeIgnoring;
                    let result = self.invoke_operation(name, arg_count, None, ignoring);
                    after_call!(self, regs, result);
                }
                Opcode::InvokeSuper | Opcode::InvokeSuperIgnoring => {
                    let arg_count =
                        (self.read_byte(&mut regs) as i32 + vararg_extra).max(0) as usize;
                    vararg_extra = 0;
                    let name = self.read_string_long(&mut regs);
                    let class = match self.pop_value(regs.fiber).as_object() {
                        Some(class) if matches!(self.heap.get(class), Obj::Class(_)) => class,
                        _ => rt_error!(self, regs, "Superclass must be a class"),
                    };
                    self.write_ip(&regs);
                    let ignoring = op == Opcode::InvokeSuperIgnoring;
                    let result = self.invoke_operation(name, arg_count, Some(class), ignoring);
                    after_call!(self, regs, result);
                }
                Opcode::GetSuperMethod => {
                    let name = self.read_string_long(&mut regs);
                    let class = self
                        .peek_value(regs.fiber, 0)
                        .as_object()
                        .expect("GET_SUPER_METHOD expects a class");
                    let instance = self.peek_value(regs.fiber, 1);
                    // Allocate before dropping the operands so the receiver
                    // stays reachable.
                    let value = match self.class(class).methods.get(name) {
                        Some(method) => {
                            let bound = self.alloc(Obj::BoundMethod(BoundMethod {
                                receiver: instance,
                                method,
                            }));
                            Value::object(bound)
                        }
                        None => Value::NULL,
                    };
                    self.drop_values(regs.fiber, 2);
                    self.push_value(regs.fiber, value);
                }
                Opcode::Inherit => {
                    let super_value = self.peek_value(regs.fiber, 1);
                    let super_class = match super_value.as_object() {
                        Some(handle) if matches!(self.heap.get(handle), Obj::Class(_)) => handle,
                        _ => rt_error!(self, regs, "Superclass must be a class"),
                    };
                    let class = self
                        .peek_value(regs.fiber, 0)
                        .as_object()
                        .expect("INHERIT expects a class");
                    let (methods, statics, init) = {
                        let parent = self.class(super_class);
                        (
                            parent.methods.clone(),
                            parent.static_fields.clone(),
                            parent.init_method,
                        )
                    };
                    let target = self.class_mut(class);
                    target.super_class = Some(super_class);
                    target.init_method = init;
                    target.methods.add_all(&methods);
                    target.static_fields.add_all(&statics);
                }
                Opcode::Is => {
                    let instance = self.peek_value(regs.fiber, 1);
                    if instance.is_null() {
                        self.drop_values(regs.fiber, 2);
                        self.push_value(regs.fiber, Value::FALSE);
                        continue;
                    }
                    let class_value = self.peek_value(regs.fiber, 0);
                    let target = match class_value.as_object() {
                        Some(handle) if matches!(self.heap.get(handle), Obj::Class(_)) => handle,
                        _ => rt_error!(self, regs, "operands must be an instance and a class"),
                    };
                    let mut walker = self.class_for(instance);
                    let mut found = false;
                    while let Some(current) = walker {
                        if current == target {
                            found = true;
                            break;
                        }
                        walker = self.class(current).super_class;
                    }
                    self.drop_values(regs.fiber, 2);
                    self.push_value(regs.fiber, Value::bool(found));
                }
                Opcode::PopLocals => {
                    let count = self.read_short(&mut regs) as usize;
                    self.drop_values(regs.fiber, count);
                }
                Opcode::Vararg => {
                    let slot = self.read_byte(&mut regs) as usize;
                    let value = self.fiber(regs.fiber).stack[regs.slot_base + slot];
                    match value.as_object().map(|h| self.heap.get(h)) {
                        Some(Obj::Array(elements)) => {
                            let elements = elements.clone();
                            vararg_extra = elements.len() as i32 - 1;
                            for element in elements {
                                self.push_value(regs.fiber, element);
                            }
                        }
                        _ => {
                            // Not an array: splat degenerates to one arg.
                            vararg_extra = 0;
                            self.push_value(regs.fiber, value);
                        }
                    }
                }
                Opcode::ReferenceGlobal => {
                    let name = self.read_string_long(&mut regs);
                    let reference = self.alloc(Obj::Reference(RefSlot::Global { name }));
                    self.push_value(regs.fiber, Value::object(reference));
                }
                Opcode::ReferencePrivate => {
                    let index = self.read_short(&mut regs) as usize;
                    let module = self.fiber(regs.fiber).module;
                    let reference = self.alloc(Obj::Reference(RefSlot::Private { module, index }));
                    self.push_value(regs.fiber, Value::object(reference));
                }
                Opcode::ReferenceLocal => {
                    let index = self.read_short(&mut regs) as usize;
                    let reference = self.alloc(Obj::Reference(RefSlot::Local {
                        fiber: regs.fiber,
                        slot: regs.slot_base + index,
                    }));
                    self.push_value(regs.fiber, Value::object(reference));
                }
                Opcode::ReferenceUpvalue => {
                    let index = self.read_byte(&mut regs) as usize;
                    let closure = self
                        .frame_closure(&regs)
                        .expect("upvalue reference requires a closure");
                    let upvalue = match self.heap.get(closure) {
                        Obj::Closure(c) => c.upvalues[index],
                        _ => unreachable!(),
                    };
                    let reference = self.alloc(Obj::Reference(RefSlot::Upvalue { upvalue }));
                    self.push_value(regs.fiber, Value::object(reference));
                }
                Opcode::ReferenceField => {
                    let owner = self.peek_value(regs.fiber, 1);
                    if owner.is_null() {
                        rt_error!(self, regs, "Attempt to index a null value");
                    }
                    if !matches!(self.kind_of(owner), Some(ObjKind::Instance)) {
                        rt_error!(self, regs, "You can only reference fields of real instances");
                    }
                    let name = self
                        .peek_value(regs.fiber, 0)
                        .as_object()
                        .expect("field name is a string");
                    let reference = self.alloc(Obj::Reference(RefSlot::Field { owner, name }));
                    self.drop_values(regs.fiber, 1);
                    self.set_top_value(regs.fiber, 0, Value::object(reference));
                }
                Opcode::SetReference => {
                    let reference = self.pop_value(regs.fiber);
                    let slot = reference.as_object().and_then(|h| match self.heap.get(h) {
                        Obj::Reference(slot) => Some(slot.clone()),
                        _ => None,
                    });
                    let slot = match slot {
                        Some(slot) => slot,
                        None => rt_error!(self, regs, "Provided value is not a reference"),
                    };
                    let value = self.peek_value(regs.fiber, 0);
                    self.write_reference(&slot, value);
                }
            }
        }
    }
}

/// The source-level symbol of an operator opcode, used both for error
/// messages and operator-method lookup.
fn op_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Subtract => "-",
        Opcode::Multiply => "*",
        Opcode::Power => "**",
        Opcode::Divide => "/",
        Opcode::FloorDivide => "#",
        Opcode::Mod => "%",
        Opcode::BAnd => "&",
        Opcode::BOr => "|",
        Opcode::BXor => "^",
        Opcode::LShift => "<<",
        Opcode::RShift => ">>",
        Opcode::Equal => "==",
        Opcode::Greater => ">",
        Opcode::GreaterEqual => ">=",
        Opcode::Less => "<",
        Opcode::LessEqual => "<=",
        _ => "?",
    }
}
