//! `lit run` — execute a source file or compiled module.

use std::io::Write;

use anyhow::{bail, Result};
use lit_engine::{InterpretResult, State};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::{EXIT_ARGUMENT_ERROR, EXIT_COMPILE_ERROR, EXIT_MEM_LEAK, EXIT_RUNTIME_ERROR};

pub fn print_error(message: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
    let _ = writeln!(&mut stderr, "{message}");
    let _ = stderr.reset();
}

pub fn execute(file: &str, optimization: &str) -> Result<u8> {
    let Some(level) = super::parse_optimization_level(optimization) else {
        bail!("unknown optimization level '{optimization}'");
    };
    let mut state = State::new();
    state.optimization.set_level(level);
    state.set_error_printer(Box::new(|message| print_error(message)));
    let result = state.interpret_file(file);
    // Natives must balance their push_root/pop_root pairs; anything left
    // over is an internal leak.
    if !state.heap.roots.is_empty() {
        print_error(&format!(
            "internal leak: {} values left on the root stack",
            state.heap.roots.len()
        ));
        return Ok(EXIT_MEM_LEAK);
    }
    Ok(match result.status {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => EXIT_COMPILE_ERROR,
        InterpretResult::RuntimeError => EXIT_RUNTIME_ERROR,
        InterpretResult::Invalid => EXIT_ARGUMENT_ERROR,
    })
}
