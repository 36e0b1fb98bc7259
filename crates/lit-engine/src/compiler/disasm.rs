//! Bytecode disassembler, used by `lit dump` and the compiler tests.

use lit_core::Value;

use crate::compiler::chunk::Chunk;
use crate::compiler::opcode::{Opcode, OperandKind};
use crate::vm::object::Obj;
use crate::vm::State;

/// Disassemble a module: its main function and, recursively, every
/// function constant reachable from it.
pub fn disassemble_module(state: &State, module: lit_core::ObjHandle) -> String {
    let mut out = String::new();
    if let Some(main) = state.module(module).main_function {
        disassemble_function(state, main, &mut out);
    }
    out
}

fn disassemble_function(state: &State, function: lit_core::ObjHandle, out: &mut String) {
    let name = state
        .function(function)
        .name
        .map(|n| state.string_at(n).to_string())
        .unwrap_or_else(|| "?".to_string());
    out.push_str(&format!("== {name} ==\n"));
    let chunk = &state.function(function).chunk;
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(state, chunk, offset, out);
    }
    // Nested functions live in the constant pool.
    for constant in &chunk.constants {
        if let Some(handle) = constant.as_object() {
            if matches!(state.heap.get(handle), Obj::Function(_)) {
                disassemble_function(state, handle, out);
            }
        }
    }
}

/// Render one instruction; returns the offset of the next one.
pub fn disassemble_instruction(
    state: &State,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    out.push_str(&format!("{offset:04} "));
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{line:4} "));
    }
    let byte = chunk.code[offset];
    let op = match Opcode::from_byte(byte) {
        Some(op) => op,
        None => {
            out.push_str(&format!("BAD_OPCODE {byte}\n"));
            return offset + 1;
        }
    };
    match op.operand_kind() {
        OperandKind::None => {
            out.push_str(&format!("{}\n", op.name()));
            offset + 1
        }
        OperandKind::Byte => {
            let arg = chunk.code[offset + 1];
            out.push_str(&format!("{:<24} {arg}\n", op.name()));
            offset + 2
        }
        OperandKind::Short => {
            let arg = ((chunk.code[offset + 1] as u16) << 8) | chunk.code[offset + 2] as u16;
            if matches!(
                op,
                Opcode::Constant
                    | Opcode::ConstantLong
                    | Opcode::SetGlobal
                    | Opcode::GetGlobal
                    | Opcode::Class
                    | Opcode::Method
                    | Opcode::StaticField
                    | Opcode::DefineField
                    | Opcode::GetSuperMethod
            ) {
                let rendered = render_constant(state, chunk, arg as usize);
                out.push_str(&format!("{:<24} {arg} '{rendered}'\n", op.name()));
            } else {
                out.push_str(&format!("{:<24} {arg}\n", op.name()));
            }
            offset + 3
        }
        OperandKind::ByteShort => {
            let arg_count = chunk.code[offset + 1];
            let constant =
                ((chunk.code[offset + 2] as u16) << 8) | chunk.code[offset + 3] as u16;
            let rendered = render_constant(state, chunk, constant as usize);
            out.push_str(&format!(
                "{:<24} ({arg_count} args) '{rendered}'\n",
                op.name()
            ));
            offset + 4
        }
        OperandKind::Closure => {
            let constant =
                ((chunk.code[offset + 1] as u16) << 8) | chunk.code[offset + 2] as u16;
            let rendered = render_constant(state, chunk, constant as usize);
            out.push_str(&format!("{:<24} {constant} {rendered}\n", op.name()));
            let function = chunk.constants[constant as usize]
                .as_object()
                .expect("closure constant is a function");
            let upvalue_count = state.function(function).upvalue_count;
            let mut next = offset + 3;
            for _ in 0..upvalue_count {
                let is_local = chunk.code[next];
                let index = chunk.code[next + 1];
                out.push_str(&format!(
                    "{next:04}    |   {} {index}\n",
                    if is_local != 0 { "local" } else { "upvalue" }
                ));
                next += 2;
            }
            next
        }
    }
}

fn render_constant(state: &State, chunk: &Chunk, index: usize) -> String {
    match chunk.constants.get(index) {
        Some(value) => render_value(state, *value),
        None => "<bad constant>".to_string(),
    }
}

fn render_value(state: &State, value: Value) -> String {
    if value.is_number() {
        return crate::vm::api::format_number(value.as_number());
    }
    if value.is_null() {
        return "null".to_string();
    }
    if value.is_bool() {
        return value.as_bool().to_string();
    }
    let handle = value.as_object().expect("object value");
    match state.heap.get(handle) {
        Obj::String(s) => s.to_string(),
        Obj::Function(f) => {
            let name = f
                .name
                .map(|n| state.string_at(n).to_string())
                .unwrap_or_else(|| "?".to_string());
            format!("<fn {name}>")
        }
        Obj::Field(_) => "<field>".to_string(),
        other => format!("<{}>", other.kind().type_name()),
    }
}
