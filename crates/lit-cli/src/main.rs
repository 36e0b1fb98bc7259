//! The `lit` command-line tool: run scripts, inspect bytecode, compile to
//! `.lbc`, or start the interactive shell.

mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

/// Exit codes, kept stable for scripts driving the CLI.
pub const EXIT_ARGUMENT_ERROR: u8 = 1;
pub const EXIT_MEM_LEAK: u8 = 2;
pub const EXIT_COMPILE_ERROR: u8 = 65;
pub const EXIT_RUNTIME_ERROR: u8 = 70;

#[derive(Parser)]
#[command(name = "lit")]
#[command(about = "The Lit programming language", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script or compiled module
    #[command(alias = "r")]
    Run {
        /// Source file (.lit) or compiled module (.lbc)
        file: String,
        /// Optimization level: none, repl, debug, release, extreme
        #[arg(short = 'O', long, default_value = "debug")]
        optimization: String,
    },
    /// Disassemble a file's bytecode
    Dump {
        /// Source file to compile and disassemble
        file: String,
    },
    /// Compile source files into a .lbc module bundle
    Compile {
        /// Source files to compile
        files: Vec<String>,
        /// Output path
        #[arg(short, long, default_value = "out.lbc")]
        output: String,
    },
    /// Start the interactive shell
    Repl,
}

fn dispatch(command: Option<Commands>) -> anyhow::Result<u8> {
    match command {
        Some(Commands::Run { file, optimization }) => commands::run::execute(&file, &optimization),
        Some(Commands::Dump { file }) => commands::dump::execute(&file),
        Some(Commands::Compile { files, output }) => commands::compile::execute(&files, &output),
        Some(Commands::Repl) | None => commands::repl::execute(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(code) => ExitCode::from(code),
        // Argument and I/O failures unwind here; compile and runtime
        // failures carry their own exit codes through the Ok path.
        Err(err) => {
            commands::run::print_error(&format!("{err:#}"));
            ExitCode::from(EXIT_ARGUMENT_ERROR)
        }
    }
}
