//! `lit repl` — the interactive shell. Every line runs in the same module
//! so bindings persist; expression results are printed back.

use anyhow::{Context, Result};
use lit_engine::compiler::optimizer::OptimizationLevel;
use lit_engine::{InterpretResult, State};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub fn execute() -> Result<u8> {
    let mut editor = DefaultEditor::new().context("failed to start the shell")?;
    let mut state = State::new();
    state.optimization.set_level(OptimizationLevel::Repl);
    state.set_error_printer(Box::new(|message| super::run::print_error(message)));
    println!("lit {} — interactive shell", env!("CARGO_PKG_VERSION"));
    loop {
        match editor.readline("lit> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                let result = state.interpret_source("repl", &line);
                if result.status == InterpretResult::Ok && !result.value.is_null() {
                    let rendered = state.value_to_string(result.value);
                    println!("{rendered}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("input error"),
        }
    }
    Ok(0)
}
