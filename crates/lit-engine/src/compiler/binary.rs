//! The `.lbc` on-disk module format.
//!
//! Little-endian throughout; strings are length-prefixed and XOR-obfuscated
//! with a fixed byte key. The magic and end markers reject foreign files,
//! the version byte rejects future formats.
//!
//! ```text
//! file     := magic:u16 version:u8 module_count:u16 module* end:u16
//! module   := name:string privates:u16 names_disabled:u8
//!             (name:string index:u16){privates if !disabled} function
//! function := chunk name:string argc:u8 upvalues:u16 vararg:u8 max_slots:u16
//! chunk    := code_len:u32 byte{code_len}
//!             line_len:u32 u16{line_len}
//!             const_count:u32 constant{const_count}
//! constant := 0:u8 f64 | 1:u8 string | 2:u8 function
//! string   := length:u16 (byte ^ KEY){length}
//! ```

use lit_core::{ObjHandle, Value};

use crate::compiler::chunk::Chunk;
use crate::vm::object::{Function, Module, Obj};
use crate::vm::table::Table;
use crate::vm::State;

pub const BYTECODE_MAGIC: u16 = 6932;
pub const BYTECODE_VERSION: u8 = 0;
pub const BYTECODE_END: u16 = 2942;
const STRING_KEY: u8 = 48;

pub fn looks_like_bytecode(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && u16::from_le_bytes([bytes[0], bytes[1]]) == BYTECODE_MAGIC
}

// ---- writing -----------------------------------------------------------

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.out.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn f64(&mut self, value: f64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn string(&mut self, text: &str) {
        self.u16(text.len() as u16);
        for byte in text.bytes() {
            self.u8(byte ^ STRING_KEY);
        }
    }
}

/// Serialize compiled modules into the binary container.
pub fn save_modules(state: &State, modules: &[ObjHandle]) -> Vec<u8> {
    let mut writer = Writer { out: Vec::new() };
    writer.u16(BYTECODE_MAGIC);
    writer.u8(BYTECODE_VERSION);
    writer.u16(modules.len() as u16);
    for module in modules {
        write_module(state, &mut writer, *module);
    }
    writer.u16(BYTECODE_END);
    writer.out
}

fn write_module(state: &State, writer: &mut Writer, module: ObjHandle) {
    let module = state.module(module);
    writer.string(state.string_at(module.name));
    writer.u16(module.privates.len() as u16);
    let names_disabled = module.private_names.is_empty() && !module.privates.is_empty();
    writer.u8(names_disabled as u8);
    if !names_disabled {
        for key in module.private_names.sorted_keys() {
            let index = module
                .private_names
                .get(key)
                .map(|v| v.as_number() as u16)
                .unwrap_or(0);
            writer.string(state.string_at(key));
            writer.u16(index);
        }
    }
    let main = module.main_function.expect("compiled module has a main");
    write_function(state, writer, main);
}

fn write_function(state: &State, writer: &mut Writer, function: ObjHandle) {
    let function = state.function(function);
    write_chunk(state, writer, &function.chunk);
    let name = function
        .name
        .map(|n| state.string_at(n))
        .unwrap_or_default();
    writer.string(name);
    writer.u8(function.arg_count as u8);
    writer.u16(function.upvalue_count as u16);
    writer.u8(function.vararg as u8);
    writer.u16(function.max_slots as u16);
}

fn write_chunk(state: &State, writer: &mut Writer, chunk: &Chunk) {
    writer.u32(chunk.code.len() as u32);
    writer.out.extend_from_slice(&chunk.code);
    if chunk.has_line_info {
        writer.u32((chunk.lines.len() * 2) as u32);
        for (line, count) in &chunk.lines {
            writer.u16(*line);
            writer.u16(*count);
        }
    } else {
        writer.u32(0);
    }
    writer.u32(chunk.constants.len() as u32);
    for constant in &chunk.constants {
        if constant.is_number() {
            writer.u8(0);
            writer.f64(constant.as_number());
        } else if let Some(handle) = constant.as_object() {
            match state.heap.get(handle) {
                Obj::String(s) => {
                    writer.u8(1);
                    let text = s.to_string();
                    writer.string(&text);
                }
                Obj::Function(_) => {
                    writer.u8(2);
                    write_function(state, writer, handle);
                }
                // Other constant kinds (field accessors) cannot be
                // serialized; a null placeholder keeps indices stable.
                _ => {
                    writer.u8(0);
                    writer.f64(0.0);
                }
            }
        } else {
            writer.u8(0);
            writer.f64(0.0);
        }
    }
}

// ---- reading -----------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, String> {
        let byte = *self
            .bytes
            .get(self.at)
            .ok_or("unexpected end of compiled code")?;
        self.at += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, String> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        Ok(u32::from_le_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn f64(&mut self) -> Result<f64, String> {
        let mut buffer = [0u8; 8];
        for byte in &mut buffer {
            *byte = self.u8()?;
        }
        Ok(f64::from_le_bytes(buffer))
    }

    fn string(&mut self) -> Result<String, String> {
        let length = self.u16()? as usize;
        let mut bytes = Vec::with_capacity(length);
        for _ in 0..length {
            bytes.push(self.u8()? ^ STRING_KEY);
        }
        String::from_utf8(bytes).map_err(|_| "compiled code holds invalid strings".to_string())
    }
}

/// Load the binary container, registering every module it holds. Returns
/// the first module.
pub fn load_module(state: &mut State, bytes: &[u8]) -> Result<ObjHandle, String> {
    let was_allowed = state.heap.allow_gc;
    state.heap.allow_gc = false;
    let result = load_module_inner(state, bytes);
    state.heap.allow_gc = was_allowed;
    result
}

fn load_module_inner(state: &mut State, bytes: &[u8]) -> Result<ObjHandle, String> {
    let mut reader = Reader { bytes, at: 0 };
    if reader.u16()? != BYTECODE_MAGIC {
        return Err("Failed to read compiled code, unknown magic number".to_string());
    }
    let version = reader.u8()?;
    if version > BYTECODE_VERSION {
        return Err(format!(
            "Failed to read compiled code, unknown bytecode version '{version}'"
        ));
    }
    let module_count = reader.u16()?;
    let mut first = None;
    for _ in 0..module_count {
        let name = reader.string()?;
        let name_handle = state.intern(&name);
        let privates_count = reader.u16()? as usize;
        let names_disabled = reader.u8()? != 0;
        let mut private_names = Table::new();
        if !names_disabled {
            for _ in 0..privates_count {
                let private_name = reader.string()?;
                let index = reader.u16()?;
                let key = state.intern(&private_name);
                private_names.set(key, Value::number(index as f64));
            }
        }
        let module = state.alloc(Obj::Module(Module {
            name: name_handle,
            privates: vec![Value::NULL; privates_count],
            private_names,
            main_function: None,
            main_fiber: None,
            return_value: Value::NULL,
            ran: false,
        }));
        let main = read_function(state, &mut reader, module)?;
        state.module_mut(module).main_function = Some(main);
        state.modules.set(name_handle, Value::object(module));
        if first.is_none() {
            first = Some(module);
        }
    }
    if reader.u16()? != BYTECODE_END {
        return Err("Failed to read compiled code, unknown end number".to_string());
    }
    first.ok_or("compiled code holds no modules".to_string())
}

fn read_function(
    state: &mut State,
    reader: &mut Reader<'_>,
    module: ObjHandle,
) -> Result<ObjHandle, String> {
    let chunk = read_chunk(state, reader, module)?;
    let name = reader.string()?;
    let name_handle = if name.is_empty() {
        None
    } else {
        Some(state.intern(&name))
    };
    let arg_count = reader.u8()? as usize;
    let upvalue_count = reader.u16()? as usize;
    let vararg = reader.u8()? != 0;
    let max_slots = reader.u16()? as usize;
    Ok(state.alloc(Obj::Function(Function {
        chunk,
        name: name_handle,
        arg_count,
        upvalue_count,
        max_slots,
        vararg,
        module,
    })))
}

fn read_chunk(
    state: &mut State,
    reader: &mut Reader<'_>,
    module: ObjHandle,
) -> Result<Chunk, String> {
    let mut chunk = Chunk::new();
    let code_len = reader.u32()? as usize;
    chunk.code.reserve(code_len);
    for _ in 0..code_len {
        chunk.code.push(reader.u8()?);
    }
    let line_len = reader.u32()? as usize;
    if line_len == 0 {
        chunk.has_line_info = false;
    } else {
        for _ in 0..line_len / 2 {
            let line = reader.u16()?;
            let count = reader.u16()?;
            chunk.lines.push((line, count));
        }
    }
    let const_count = reader.u32()? as usize;
    for _ in 0..const_count {
        let tag = reader.u8()?;
        let constant = match tag {
            0 => Value::number(reader.f64()?),
            1 => {
                let text = reader.string()?;
                state.string_value(&text)
            }
            2 => Value::object(read_function(state, reader, module)?),
            other => {
                return Err(format!(
                    "Failed to read compiled code, unknown constant tag '{other}'"
                ))
            }
        };
        chunk.constants.push(constant);
    }
    Ok(chunk)
}
