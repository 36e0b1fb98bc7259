//! Bytecode opcodes for the Lit VM.
//!
//! All opcodes are single-byte instructions. Operands follow the opcode in
//! the code stream; 16-bit operands are big-endian. Jump displacements are
//! 16-bit and relative; `JumpBack` subtracts its operand.

/// Bytecode opcode enumeration. Discriminants are the serialized encoding
/// and must stay stable: `.lbc` files store these bytes directly.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Pop = 0,
    Return,
    Constant,
    ConstantLong,
    True,
    False,
    Null,
    Array,
    Object,
    Range,
    Negate,
    Not,

    Add,
    Subtract,
    Multiply,
    Power,
    Divide,
    FloorDivide,
    Mod,
    BAnd,
    BOr,
    BXor,
    LShift,
    RShift,
    BNot,

    Equal,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    SetGlobal,
    GetGlobal,

    SetLocal,
    GetLocal,
    SetLocalLong,
    GetLocalLong,

    SetPrivate,
    GetPrivate,
    SetPrivateLong,
    GetPrivateLong,

    SetUpvalue,
    GetUpvalue,

    JumpIfFalse,
    JumpIfNull,
    JumpIfNullPopping,
    Jump,
    JumpBack,
    And,
    Or,
    NullOr,

    Closure,
    CloseUpvalue,

    Class,
    GetField,
    SetField,

    // [array] [index] -> [value]
    SubscriptGet,
    // [array] [index] [value] -> [value]
    SubscriptSet,
    // [array] [value] -> [array]
    PushArrayElement,
    // [map] [key] [value] -> [map]
    PushObjectField,

    // [class] [method] -> [class]
    Method,
    // [class] [value] -> [class]
    StaticField,
    DefineField,
    Inherit,
    // [instance] [class] -> [bool]
    Is,
    GetSuperMethod,

    // Varying stack effect; the emitter tracks these explicitly.
    Call,
    Invoke,
    InvokeSuper,
    InvokeIgnoring,
    InvokeSuperIgnoring,
    PopLocals,
    Vararg,

    ReferenceGlobal,
    ReferencePrivate,
    ReferenceLocal,
    ReferenceUpvalue,
    ReferenceField,

    SetReference,
}

/// How an opcode's operands are laid out in the code stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// One unsigned byte.
    Byte,
    /// One big-endian u16.
    Short,
    /// Argument-count byte followed by a u16 constant index (invokes).
    ByteShort,
    /// u16 constant index followed by `2 * upvalue_count` bytes.
    Closure,
}

impl Opcode {
    pub const COUNT: usize = Opcode::SetReference as usize + 1;

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        if (byte as usize) < Self::COUNT {
            // Discriminants are dense and start at zero.
            Some(unsafe { std::mem::transmute::<u8, Opcode>(byte) })
        } else {
            None
        }
    }

    /// Static stack effect. Varying-N opcodes (calls, invokes, PopLocals,
    /// Vararg, Closure) report the effect of the bare opcode; the emitter
    /// adjusts for their operands separately.
    pub fn stack_effect(self) -> i32 {
        use Opcode::*;
        match self {
            Pop => -1,
            Return => 0,
            Constant | ConstantLong | True | False | Null | Array | Object => 1,
            Range => -1,
            Negate | Not | BNot => 0,
            Add | Subtract | Multiply | Power | Divide | FloorDivide | Mod | BAnd | BOr | BXor
            | LShift | RShift => -1,
            Equal | Greater | GreaterEqual | Less | LessEqual => -1,
            SetGlobal => 0,
            GetGlobal => 1,
            SetLocal | SetLocalLong | SetPrivate | SetPrivateLong | SetUpvalue => 0,
            GetLocal | GetLocalLong | GetPrivate | GetPrivateLong | GetUpvalue => 1,
            JumpIfFalse | JumpIfNullPopping => -1,
            JumpIfNull | Jump | JumpBack => 0,
            And | Or | NullOr => -1,
            Closure => 1,
            CloseUpvalue => -1,
            Class => 1,
            GetField => -1,
            SetField => -2,
            SubscriptGet => -1,
            SubscriptSet => -2,
            PushArrayElement => -1,
            PushObjectField => -2,
            Method | StaticField | DefineField => -1,
            Inherit => 0,
            Is => -1,
            GetSuperMethod => -1,
            Call | Invoke | InvokeSuper | InvokeIgnoring | InvokeSuperIgnoring | PopLocals
            | Vararg => 0,
            ReferenceGlobal | ReferencePrivate | ReferenceLocal | ReferenceUpvalue => 1,
            ReferenceField => -1,
            SetReference => -1,
        }
    }

    pub fn operand_kind(self) -> OperandKind {
        use Opcode::*;
        match self {
            Constant | SetLocal | GetLocal | SetPrivate | GetPrivate | SetUpvalue | GetUpvalue
            | ReferenceUpvalue | Call | Vararg => OperandKind::Byte,
            ConstantLong | SetLocalLong | GetLocalLong | SetPrivateLong | GetPrivateLong
            | SetGlobal | GetGlobal | JumpIfFalse | JumpIfNull | JumpIfNullPopping | Jump
            | JumpBack | And | Or | NullOr | Class | Method | StaticField | DefineField
            | GetSuperMethod | PopLocals | ReferenceGlobal | ReferencePrivate | ReferenceLocal => {
                OperandKind::Short
            }
            Invoke | InvokeSuper | InvokeIgnoring | InvokeSuperIgnoring => OperandKind::ByteShort,
            Closure => OperandKind::Closure,
            _ => OperandKind::None,
        }
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Pop => "POP",
            Return => "RETURN",
            Constant => "CONSTANT",
            ConstantLong => "CONSTANT_LONG",
            True => "TRUE",
            False => "FALSE",
            Null => "NULL",
            Array => "ARRAY",
            Object => "OBJECT",
            Range => "RANGE",
            Negate => "NEGATE",
            Not => "NOT",
            Add => "ADD",
            Subtract => "SUBTRACT",
            Multiply => "MULTIPLY",
            Power => "POWER",
            Divide => "DIVIDE",
            FloorDivide => "FLOOR_DIVIDE",
            Mod => "MOD",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            LShift => "LSHIFT",
            RShift => "RSHIFT",
            BNot => "BNOT",
            Equal => "EQUAL",
            Greater => "GREATER",
            GreaterEqual => "GREATER_EQUAL",
            Less => "LESS",
            LessEqual => "LESS_EQUAL",
            SetGlobal => "SET_GLOBAL",
            GetGlobal => "GET_GLOBAL",
            SetLocal => "SET_LOCAL",
            GetLocal => "GET_LOCAL",
            SetLocalLong => "SET_LOCAL_LONG",
            GetLocalLong => "GET_LOCAL_LONG",
            SetPrivate => "SET_PRIVATE",
            GetPrivate => "GET_PRIVATE",
            SetPrivateLong => "SET_PRIVATE_LONG",
            GetPrivateLong => "GET_PRIVATE_LONG",
            SetUpvalue => "SET_UPVALUE",
            GetUpvalue => "GET_UPVALUE",
            JumpIfFalse => "JUMP_IF_FALSE",
            JumpIfNull => "JUMP_IF_NULL",
            JumpIfNullPopping => "JUMP_IF_NULL_POPPING",
            Jump => "JUMP",
            JumpBack => "JUMP_BACK",
            And => "AND",
            Or => "OR",
            NullOr => "NULL_OR",
            Closure => "CLOSURE",
            CloseUpvalue => "CLOSE_UPVALUE",
            Class => "CLASS",
            GetField => "GET_FIELD",
            SetField => "SET_FIELD",
            SubscriptGet => "SUBSCRIPT_GET",
            SubscriptSet => "SUBSCRIPT_SET",
            PushArrayElement => "PUSH_ARRAY_ELEMENT",
            PushObjectField => "PUSH_OBJECT_FIELD",
            Method => "METHOD",
            StaticField => "STATIC_FIELD",
            DefineField => "DEFINE_FIELD",
            Inherit => "INHERIT",
            Is => "IS",
            GetSuperMethod => "GET_SUPER_METHOD",
            Call => "CALL",
            Invoke => "INVOKE",
            InvokeSuper => "INVOKE_SUPER",
            InvokeIgnoring => "INVOKE_IGNORING",
            InvokeSuperIgnoring => "INVOKE_SUPER_IGNORING",
            PopLocals => "POP_LOCALS",
            Vararg => "VARARG",
            ReferenceGlobal => "REFERENCE_GLOBAL",
            ReferencePrivate => "REFERENCE_PRIVATE",
            ReferenceLocal => "REFERENCE_LOCAL",
            ReferenceUpvalue => "REFERENCE_UPVALUE",
            ReferenceField => "REFERENCE_FIELD",
            SetReference => "SET_REFERENCE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        for byte in 0..Opcode::COUNT as u8 {
            let op = Opcode::from_byte(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(Opcode::from_byte(Opcode::COUNT as u8), None);
        assert_eq!(Opcode::from_byte(255), None);
    }

    #[test]
    fn binary_ops_consume_one() {
        assert_eq!(Opcode::Add.stack_effect(), -1);
        assert_eq!(Opcode::Equal.stack_effect(), -1);
        assert_eq!(Opcode::Constant.stack_effect(), 1);
        assert_eq!(Opcode::SetField.stack_effect(), -2);
    }
}
