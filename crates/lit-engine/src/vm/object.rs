//! Runtime object model.
//!
//! Every heap value is one of the [`Obj`] variants. The common header of
//! the original (type tag, intrusive next link, mark bit) maps onto the
//! enum discriminant and the arena slot's mark bit; the intrusive list is
//! the arena itself.

use lit_core::{ObjHandle, Value};

use crate::compiler::chunk::Chunk;
use crate::vm::fiber::Fiber;
use crate::vm::table::Table;
use crate::vm::State;

/// Host function: receives the arguments, returns a value.
pub type NativeFn = fn(&mut State, &[Value]) -> Result<Value, String>;

/// Host primitive: manipulates the fiber stacks directly; returns whether
/// the interpreter must re-read its frame (a call or fiber switch happened).
pub type NativePrimitiveFn = fn(&mut State, &[Value]) -> Result<bool, String>;

/// Host method: bound to a receiver.
pub type NativeMethodFn = fn(&mut State, Value, &[Value]) -> Result<Value, String>;

/// Primitive method: the receiver-taking flavor of the primitive protocol.
pub type PrimitiveMethodFn = fn(&mut State, Value, &[Value]) -> Result<bool, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    NativeFunction,
    NativePrimitive,
    NativeMethod,
    PrimitiveMethod,
    Fiber,
    Module,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
    Array,
    Map,
    Userdata,
    Range,
    Field,
    Reference,
}

impl ObjKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ObjKind::String => "string",
            ObjKind::Function => "function",
            ObjKind::NativeFunction => "native_function",
            ObjKind::NativePrimitive => "native_primitive",
            ObjKind::NativeMethod => "native_method",
            ObjKind::PrimitiveMethod => "primitive_method",
            ObjKind::Fiber => "fiber",
            ObjKind::Module => "module",
            ObjKind::Closure => "closure",
            ObjKind::Upvalue => "upvalue",
            ObjKind::Class => "class",
            ObjKind::Instance => "instance",
            ObjKind::BoundMethod => "bound_method",
            ObjKind::Array => "array",
            ObjKind::Map => "map",
            ObjKind::Userdata => "userdata",
            ObjKind::Range => "range",
            ObjKind::Field => "field",
            ObjKind::Reference => "reference",
        }
    }
}

/// A compiled function: a chunk plus its calling metadata.
#[derive(Debug, Clone)]
pub struct Function {
    pub chunk: Chunk,
    pub name: Option<ObjHandle>,
    pub arg_count: usize,
    pub upvalue_count: usize,
    pub max_slots: usize,
    pub vararg: bool,
    pub module: ObjHandle,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub function: ObjHandle,
    pub upvalues: Vec<ObjHandle>,
}

/// A captured variable. Open while the local is still on its fiber's
/// stack; closed once the frame (or scope) that owned it exits.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    Open { fiber: ObjHandle, slot: usize },
    Closed(Value),
}

#[derive(Debug, Clone)]
pub struct NativeFunction {
    pub function: NativeFn,
    pub name: ObjHandle,
}

#[derive(Debug, Clone)]
pub struct NativePrimitive {
    pub function: NativePrimitiveFn,
    pub name: ObjHandle,
}

#[derive(Debug, Clone)]
pub struct NativeMethod {
    pub method: NativeMethodFn,
    pub name: ObjHandle,
}

#[derive(Debug, Clone)]
pub struct PrimitiveMethod {
    pub method: PrimitiveMethodFn,
    pub name: ObjHandle,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: ObjHandle,
    pub privates: Vec<Value>,
    /// Private name → slot index, as number values. Dropped entirely when
    /// the private-names optimization is on.
    pub private_names: Table,
    pub main_function: Option<ObjHandle>,
    pub main_fiber: Option<ObjHandle>,
    pub return_value: Value,
    pub ran: bool,
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: ObjHandle,
    /// The constructor, own or inherited. Never dangling: inheritance
    /// copies the parent's before the subclass can override it.
    pub init_method: Option<Value>,
    pub methods: Table,
    pub static_fields: Table,
    pub super_class: Option<ObjHandle>,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub class: ObjHandle,
    pub fields: Table,
}

#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub from: f64,
    pub to: f64,
}

/// Field accessor pair, installed in method/static tables and intercepted
/// by GET_FIELD / SET_FIELD.
#[derive(Debug, Clone)]
pub struct FieldAccessor {
    pub name: ObjHandle,
    pub getter: Option<Value>,
    pub setter: Option<Value>,
}

/// A first-class reference to a mutable slot. The original stored a raw
/// `Value*`; the arena version names the slot symbolically, which keeps the
/// reference valid exactly as long as its owner is reachable.
#[derive(Debug, Clone)]
pub enum RefSlot {
    Global { name: ObjHandle },
    Private { module: ObjHandle, index: usize },
    Local { fiber: ObjHandle, slot: usize },
    Upvalue { upvalue: ObjHandle },
    Field { owner: Value, name: ObjHandle },
}

#[derive(Debug)]
pub enum Obj {
    String(Box<str>),
    Function(Function),
    NativeFunction(NativeFunction),
    NativePrimitive(NativePrimitive),
    NativeMethod(NativeMethod),
    PrimitiveMethod(PrimitiveMethod),
    Fiber(Fiber),
    Module(Module),
    Closure(Closure),
    Upvalue(UpvalueState),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
    Array(Vec<Value>),
    Map(Table),
    Userdata(Vec<u8>),
    Range(Range),
    Field(FieldAccessor),
    Reference(RefSlot),
}

impl Obj {
    pub fn kind(&self) -> ObjKind {
        match self {
            Obj::String(_) => ObjKind::String,
            Obj::Function(_) => ObjKind::Function,
            Obj::NativeFunction(_) => ObjKind::NativeFunction,
            Obj::NativePrimitive(_) => ObjKind::NativePrimitive,
            Obj::NativeMethod(_) => ObjKind::NativeMethod,
            Obj::PrimitiveMethod(_) => ObjKind::PrimitiveMethod,
            Obj::Fiber(_) => ObjKind::Fiber,
            Obj::Module(_) => ObjKind::Module,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Upvalue(_) => ObjKind::Upvalue,
            Obj::Class(_) => ObjKind::Class,
            Obj::Instance(_) => ObjKind::Instance,
            Obj::BoundMethod(_) => ObjKind::BoundMethod,
            Obj::Array(_) => ObjKind::Array,
            Obj::Map(_) => ObjKind::Map,
            Obj::Userdata(_) => ObjKind::Userdata,
            Obj::Range(_) => ObjKind::Range,
            Obj::Field(_) => ObjKind::Field,
            Obj::Reference(_) => ObjKind::Reference,
        }
    }

    /// Whether a value of this kind can be the callee of CALL.
    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind(),
            ObjKind::Function
                | ObjKind::Closure
                | ObjKind::NativeFunction
                | ObjKind::NativePrimitive
                | ObjKind::NativeMethod
                | ObjKind::PrimitiveMethod
                | ObjKind::BoundMethod
                | ObjKind::Class
        )
    }

    /// Rough allocation size used for the GC trigger accounting.
    pub fn size_estimate(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            Obj::String(s) => s.len(),
            Obj::Function(f) => {
                f.chunk.code.len()
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
                    + f.chunk.lines.len() * 4
            }
            Obj::Fiber(f) => f.stack.capacity() * std::mem::size_of::<Value>() + f.frames.len() * 48,
            Obj::Module(m) => m.privates.len() * std::mem::size_of::<Value>(),
            Obj::Closure(c) => c.upvalues.len() * 4,
            Obj::Array(a) => a.capacity() * std::mem::size_of::<Value>(),
            Obj::Map(m) => m.len() * 24,
            Obj::Class(c) => (c.methods.len() + c.static_fields.len()) * 24,
            Obj::Instance(i) => i.fields.len() * 24,
            Obj::Userdata(d) => d.len(),
            _ => 0,
        }
    }
}
