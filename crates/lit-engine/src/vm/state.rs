//! The VM state: heap, interning, globals, modules, well-known classes and
//! the top-level interpret entry points.

use std::path::Path;

use lit_core::{ObjHandle, Value};
use rustc_hash::FxHashSet;

use crate::compiler::binary;
use crate::compiler::emitter::Emitter;
use crate::compiler::optimizer::{OptimizationSettings, Optimizer};
use crate::errors::CompileError;
use crate::parser::ast::Statement;
use crate::parser::preprocessor::preprocess;
use crate::parser::Parser;
use crate::vm::fiber::Fiber;
use crate::vm::heap::Heap;
use crate::vm::interner::Interner;
use crate::vm::object::{Class, Function, Instance, Module, Obj, ObjKind, RefSlot, UpvalueState};
use crate::vm::table::Table;

/// Outcome category of an interpret or call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
    Invalid,
}

/// Outcome of an interpret/call attempt: the status plus the value it
/// produced (the error value for runtime errors).
#[derive(Debug, Clone, Copy)]
pub struct Interpretation {
    pub status: InterpretResult,
    pub value: Value,
}

impl Interpretation {
    pub fn ok(value: Value) -> Self {
        Self {
            status: InterpretResult::Ok,
            value,
        }
    }

    pub fn of(status: InterpretResult) -> Self {
        Self {
            status,
            value: Value::NULL,
        }
    }
}

/// Handles of the well-known classes installed by the core library.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreClasses {
    pub object: Option<ObjHandle>,
    pub class: Option<ObjHandle>,
    pub number: Option<ObjHandle>,
    pub bool_: Option<ObjHandle>,
    pub string: Option<ObjHandle>,
    pub function: Option<ObjHandle>,
    pub fiber: Option<ObjHandle>,
    pub module: Option<ObjHandle>,
    pub array: Option<ObjHandle>,
    pub map: Option<ObjHandle>,
    pub range: Option<ObjHandle>,
}

impl CoreClasses {
    pub fn all(&self) -> [Option<ObjHandle>; 11] {
        [
            self.object,
            self.class,
            self.number,
            self.bool_,
            self.string,
            self.function,
            self.fiber,
            self.module,
            self.array,
            self.map,
            self.range,
        ]
    }
}

pub type PrinterFn = Box<dyn FnMut(&str)>;

pub struct State {
    pub heap: Heap,
    pub strings: Interner,
    pub globals: Table,
    pub modules: Table,
    /// The fiber currently executing (or most recently executed).
    pub current_fiber: Option<ObjHandle>,
    pub classes: CoreClasses,
    pub optimization: OptimizationSettings,
    pub defines: FxHashSet<String>,
    pub had_error: bool,
    pub last_module: Option<ObjHandle>,
    print_fn: PrinterFn,
    error_fn: PrinterFn,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Create a state with the core library installed.
    pub fn new() -> Self {
        let mut state = Self {
            heap: Heap::new(),
            strings: Interner::new(),
            globals: Table::new(),
            modules: Table::new(),
            current_fiber: None,
            classes: CoreClasses::default(),
            optimization: OptimizationSettings::default(),
            defines: FxHashSet::default(),
            had_error: false,
            last_module: None,
            print_fn: Box::new(|text| print!("{text}")),
            error_fn: Box::new(|text| eprintln!("{text}")),
        };
        crate::vm::builtins::open_core_library(&mut state);
        state.heap.allow_gc = true;
        state
    }

    pub fn set_printer(&mut self, printer: PrinterFn) {
        self.print_fn = printer;
    }

    pub fn set_error_printer(&mut self, printer: PrinterFn) {
        self.error_fn = printer;
    }

    pub fn print(&mut self, text: &str) {
        (self.print_fn)(text);
    }

    pub fn print_error(&mut self, text: &str) {
        (self.error_fn)(text);
    }

    pub fn raise_compile_error(&mut self, error: &CompileError) {
        self.had_error = true;
        let rendered = error.to_string();
        (self.error_fn)(&rendered);
    }

    // ---- heap plumbing -------------------------------------------------

    /// Allocate, collecting first when past the threshold.
    pub fn alloc(&mut self, obj: Obj) -> ObjHandle {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    pub fn push_root(&mut self, value: Value) {
        self.heap.push_root(value);
    }

    pub fn pop_root(&mut self) {
        self.heap.pop_root();
    }

    pub fn intern(&mut self, text: &str) -> ObjHandle {
        self.strings.intern(&mut self.heap, text)
    }

    /// Interned string as a value.
    pub fn string_value(&mut self, text: &str) -> Value {
        let handle = self.intern(text);
        Value::object(handle)
    }

    // ---- typed object accessors ----------------------------------------

    pub fn kind_of(&self, value: Value) -> Option<ObjKind> {
        value.as_object().map(|h| self.heap.get(h).kind())
    }

    pub fn string_at(&self, handle: ObjHandle) -> &str {
        match self.heap.get(handle) {
            Obj::String(s) => s,
            other => unreachable!("expected string, found {:?}", other.kind()),
        }
    }

    pub fn as_string(&self, value: Value) -> Option<&str> {
        match value.as_object().map(|h| self.heap.get(h)) {
            Some(Obj::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn function(&self, handle: ObjHandle) -> &Function {
        match self.heap.get(handle) {
            Obj::Function(f) => f,
            other => unreachable!("expected function, found {:?}", other.kind()),
        }
    }

    pub fn function_mut(&mut self, handle: ObjHandle) -> &mut Function {
        match self.heap.get_mut(handle) {
            Obj::Function(f) => f,
            other => unreachable!("expected function, found {:?}", other.kind()),
        }
    }

    pub fn fiber(&self, handle: ObjHandle) -> &Fiber {
        match self.heap.get(handle) {
            Obj::Fiber(f) => f,
            other => unreachable!("expected fiber, found {:?}", other.kind()),
        }
    }

    pub fn fiber_mut(&mut self, handle: ObjHandle) -> &mut Fiber {
        match self.heap.get_mut(handle) {
            Obj::Fiber(f) => f,
            other => unreachable!("expected fiber, found {:?}", other.kind()),
        }
    }

    pub fn module(&self, handle: ObjHandle) -> &Module {
        match self.heap.get(handle) {
            Obj::Module(m) => m,
            other => unreachable!("expected module, found {:?}", other.kind()),
        }
    }

    pub fn module_mut(&mut self, handle: ObjHandle) -> &mut Module {
        match self.heap.get_mut(handle) {
            Obj::Module(m) => m,
            other => unreachable!("expected module, found {:?}", other.kind()),
        }
    }

    pub fn class(&self, handle: ObjHandle) -> &Class {
        match self.heap.get(handle) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, found {:?}", other.kind()),
        }
    }

    pub fn class_mut(&mut self, handle: ObjHandle) -> &mut Class {
        match self.heap.get_mut(handle) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, found {:?}", other.kind()),
        }
    }

    pub fn instance(&self, handle: ObjHandle) -> &Instance {
        match self.heap.get(handle) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, found {:?}", other.kind()),
        }
    }

    /// The class that handles method lookups for `value`.
    pub fn class_for(&self, value: Value) -> Option<ObjHandle> {
        if value.is_number() {
            return self.classes.number;
        }
        if value.is_bool() {
            return self.classes.bool_;
        }
        if value.is_null() {
            return self.classes.object;
        }
        let handle = value.as_object()?;
        match self.heap.get(handle) {
            Obj::String(_) => self.classes.string,
            Obj::Instance(instance) => Some(instance.class),
            Obj::Class(_) => self.classes.class,
            Obj::Array(_) => self.classes.array,
            Obj::Map(_) => self.classes.map,
            Obj::Range(_) => self.classes.range,
            Obj::Fiber(_) => self.classes.fiber,
            Obj::Module(_) => self.classes.module,
            Obj::Function(_)
            | Obj::Closure(_)
            | Obj::NativeFunction(_)
            | Obj::NativePrimitive(_)
            | Obj::NativeMethod(_)
            | Obj::PrimitiveMethod(_)
            | Obj::BoundMethod(_) => self.classes.function,
            _ => self.classes.object,
        }
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        if value.is_null() {
            "null"
        } else if value.is_bool() {
            "bool"
        } else if value.is_number() {
            "number"
        } else {
            self.heap.get(value.as_object().unwrap()).kind().type_name()
        }
    }

    // ---- reference slots ----------------------------------------------

    /// Read through a reference slot.
    pub fn read_reference(&self, slot: &RefSlot) -> Value {
        match slot {
            RefSlot::Global { name } => self.globals.get(*name).unwrap_or(Value::NULL),
            RefSlot::Private { module, index } => self
                .module(*module)
                .privates
                .get(*index)
                .copied()
                .unwrap_or(Value::NULL),
            RefSlot::Local { fiber, slot } => self
                .fiber(*fiber)
                .stack
                .get(*slot)
                .copied()
                .unwrap_or(Value::NULL),
            RefSlot::Upvalue { upvalue } => match self.heap.get(*upvalue) {
                Obj::Upvalue(UpvalueState::Closed(value)) => *value,
                Obj::Upvalue(UpvalueState::Open { fiber, slot }) => self.fiber(*fiber).stack[*slot],
                _ => Value::NULL,
            },
            RefSlot::Field { owner, name } => match owner.as_object().map(|h| self.heap.get(h)) {
                Some(Obj::Instance(instance)) => {
                    instance.fields.get(*name).unwrap_or(Value::NULL)
                }
                _ => Value::NULL,
            },
        }
    }

    /// Write through a reference slot.
    pub fn write_reference(&mut self, slot: &RefSlot, value: Value) {
        match slot {
            RefSlot::Global { name } => self.globals.set(*name, value),
            RefSlot::Private { module, index } => {
                let index = *index;
                let module = self.module_mut(*module);
                if index < module.privates.len() {
                    module.privates[index] = value;
                }
            }
            RefSlot::Local { fiber, slot } => {
                let slot = *slot;
                let fiber = self.fiber_mut(*fiber);
                if slot < fiber.stack.len() {
                    fiber.stack[slot] = value;
                }
            }
            RefSlot::Upvalue { upvalue } => match self.heap.get(*upvalue) {
                Obj::Upvalue(UpvalueState::Open { fiber, slot }) => {
                    let (fiber, slot) = (*fiber, *slot);
                    self.fiber_mut(fiber).stack[slot] = value;
                }
                Obj::Upvalue(UpvalueState::Closed(_)) => {
                    let upvalue = *upvalue;
                    *self.heap.get_mut(upvalue) = Obj::Upvalue(UpvalueState::Closed(value));
                }
                _ => {}
            },
            RefSlot::Field { owner, name } => {
                if let Some(handle) = owner.as_object() {
                    if let Obj::Instance(instance) = self.heap.get_mut(handle) {
                        instance.fields.set(*name, value);
                    }
                }
            }
        }
    }

    // ---- compilation ---------------------------------------------------

    /// Compile source text into a module, reporting every diagnostic
    /// through the error printer. Returns `None` on any compile error.
    pub fn compile_module(&mut self, module_name: &str, source: &str) -> Option<ObjHandle> {
        // Binary modules are detected by their magic number.
        if binary::looks_like_bytecode(source.as_bytes()) {
            return match binary::load_module(self, source.as_bytes()) {
                Ok(module) => Some(module),
                Err(message) => {
                    self.had_error = true;
                    let rendered = message;
                    (self.error_fn)(&rendered);
                    None
                }
            };
        }
        let was_allowed = self.heap.allow_gc;
        self.heap.allow_gc = false;
        self.had_error = false;

        let result = self.compile_source(module_name, source);

        self.heap.allow_gc = was_allowed;
        if self.had_error {
            None
        } else {
            result
        }
    }

    fn compile_source(&mut self, module_name: &str, source: &str) -> Option<ObjHandle> {
        let cleaned = match preprocess(source, &mut self.defines) {
            Ok(cleaned) => cleaned,
            Err(error) => {
                self.raise_compile_error(&error);
                return None;
            }
        };
        let mut statements: Vec<Statement> = match Parser::new(&cleaned).parse() {
            Ok(statements) => statements,
            Err(errors) => {
                for error in &errors {
                    self.raise_compile_error(error);
                }
                return None;
            }
        };
        let settings = self.optimization.clone();
        Optimizer::new(&settings).optimize(&mut statements);
        let module = Emitter::new(self).emit_module(module_name, &statements);
        Some(module)
    }

    /// Compile and run a module from source.
    pub fn interpret_source(&mut self, module_name: &str, source: &str) -> Interpretation {
        let module = match self.compile_module(module_name, source) {
            Some(module) => module,
            None => return Interpretation::of(InterpretResult::CompileError),
        };
        let result = self.exec_module(module);
        self.last_module = Some(module);
        result
    }

    /// Read a file and interpret it; `.lbc` bytecode is loaded directly.
    pub fn interpret_file(&mut self, path: &str) -> Interpretation {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.had_error = true;
                let rendered = format!("failed to open file '{path}' for reading: {err}");
                (self.error_fn)(&rendered);
                return Interpretation::of(InterpretResult::Invalid);
            }
        };
        let module_name = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();
        if binary::looks_like_bytecode(&bytes) {
            return match binary::load_module(self, &bytes) {
                Ok(module) => {
                    let result = self.exec_module(module);
                    self.last_module = Some(module);
                    result
                }
                Err(message) => {
                    self.had_error = true;
                    (self.error_fn)(&message);
                    Interpretation::of(InterpretResult::CompileError)
                }
            };
        }
        match String::from_utf8(bytes) {
            Ok(source) => self.interpret_source(&module_name, &source),
            Err(_) => {
                self.had_error = true;
                (self.error_fn)(&format!("file '{path}' is not valid source"));
                Interpretation::of(InterpretResult::Invalid)
            }
        }
    }

    // ---- globals -------------------------------------------------------

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.intern(name);
        self.globals.set(key, value);
    }

    pub fn get_global(&mut self, name: &str) -> Value {
        let key = self.intern(name);
        self.globals.get(key).unwrap_or(Value::NULL)
    }

    pub fn global_exists(&mut self, name: &str) -> bool {
        let key = self.intern(name);
        self.globals.contains(key)
    }
}
