//! `lit compile` — compile sources into a `.lbc` module bundle. Bytecode
//! is always produced at the extreme preset.

use anyhow::{bail, Context, Result};
use lit_engine::compiler::binary;
use lit_engine::compiler::optimizer::OptimizationLevel;
use lit_engine::State;

use crate::EXIT_COMPILE_ERROR;

pub fn execute(files: &[String], output: &str) -> Result<u8> {
    if files.is_empty() {
        bail!("no input files");
    }
    let mut state = State::new();
    state.optimization.set_level(OptimizationLevel::Extreme);
    state.set_error_printer(Box::new(|message| super::run::print_error(message)));
    let mut modules = Vec::new();
    for file in files {
        let source = std::fs::read_to_string(file)
            .with_context(|| format!("failed to open file '{file}' for reading"))?;
        match state.compile_module(file, &source) {
            Some(module) => modules.push(module),
            None => return Ok(EXIT_COMPILE_ERROR),
        }
    }
    let bytes = binary::save_modules(&state, &modules);
    std::fs::write(output, bytes)
        .with_context(|| format!("failed to write '{output}'"))?;
    Ok(0)
}
