//! `lit dump` — compile a file and print its disassembly.

use anyhow::{Context, Result};
use lit_engine::compiler::disasm;
use lit_engine::State;

use crate::EXIT_COMPILE_ERROR;

pub fn execute(file: &str) -> Result<u8> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to open file '{file}' for reading"))?;
    let mut state = State::new();
    state.set_error_printer(Box::new(|message| super::run::print_error(message)));
    match state.compile_module(file, &source) {
        Some(module) => {
            print!("{}", disasm::disassemble_module(&state, module));
            Ok(0)
        }
        None => Ok(EXIT_COMPILE_ERROR),
    }
}
