//! AtomC compiler library
//!
//! Front-end for the AtomC teaching language: a lexer, a symbol table with
//! nested domains, and a recursive-descent parser that performs semantic
//! analysis and emits stack-machine code in a single pass, with guard-based
//! backtracking over both the token stream and the emitted instructions.
//!
//! The produced [`atomc_runtime::Program`] runs on the interpreter in the
//! `atomc-runtime` crate:
//!
//! ```rust,ignore
//! let unit = atomcc::compile_source("void main() { put_i(42); }")?;
//! let mut out = std::io::stdout();
//! let mut vm = atomc_runtime::Vm::new(&unit.program, &mut out);
//! vm.run()?;
//! ```
//!
//! Error convention: parser diagnostics are returned already formatted as
//! `error in line <L>: <msg>`; lexer, machine and host failures carry the
//! `[ERROR]: ` prefix. Every error is fatal, there is no recovery.

pub mod config;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod types;

pub use config::RunConfig;
pub use lexer::{Payload, Token, TokenKind, tokenize};
pub use parser::{Compilation, parse};
pub use symbols::{Symbol, SymbolId, SymbolKind, SymbolTable};
pub use types::{Ty, TyBase, arith_type_to, conv_to};

use std::fs;
use std::io::Write;
use std::path::Path;

use atomc_runtime::Vm;

/// Compile AtomC source text into an executable unit.
pub fn compile_source(source: &str) -> Result<Compilation, String> {
    let tokens = tokenize(source).map_err(|e| format!("[ERROR]: {}", e))?;
    parse(tokens)
}

/// Load and compile a source file.
pub fn compile_file(path: &Path) -> Result<Compilation, String> {
    let source = fs::read_to_string(path)
        .map_err(|e| format!("[ERROR]: Unable to open {}: {}", path.display(), e))?;
    compile_source(&source)
}

/// Compile source text and execute it, writing program output to `out`.
pub fn run_source(source: &str, cfg: &RunConfig, out: &mut dyn Write) -> Result<(), String> {
    let unit = compile_source(source)?;
    let mut vm = Vm::new(&unit.program, out)
        .with_stack_size(cfg.stack_size)
        .with_trace(cfg.trace);
    vm.run().map_err(|e| format!("[ERROR]: {}", e))
}
