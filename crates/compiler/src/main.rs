//! AtomC compiler CLI
//!
//! `run` drives the whole pipeline (lex, parse/analyze/emit, interpret);
//! `check` stops after analysis; `tokens` dumps the lexer's output.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use atomcc::{Payload, RunConfig};

#[derive(ClapParser)]
#[command(name = "atomcc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AtomC compiler - compile and run AtomC programs on a stack machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an AtomC source file and run it
    Run {
        /// Input source file
        input: PathBuf,

        /// Print every executed instruction to stderr
        #[arg(long)]
        trace: bool,

        /// Capacity of the value stack, in cells
        #[arg(long, value_name = "CELLS")]
        stack_size: Option<usize>,

        /// Run configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse and analyze a source file without running it
    Check {
        /// Input source file
        input: PathBuf,
    },

    /// Dump the token stream of a source file
    Tokens {
        /// Input source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            trace,
            stack_size,
            config,
        } => run_cmd(&input, trace, stack_size, config.as_deref()),
        Commands::Check { input } => check_cmd(&input),
        Commands::Tokens { input } => tokens_cmd(&input),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "atomcc", &mut io::stdout());
        }
    }
}

fn load(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("[ERROR]: Unable to open {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn run_cmd(input: &Path, trace: bool, stack_size: Option<usize>, config: Option<&Path>) {
    let mut cfg = match config {
        Some(path) => match RunConfig::from_toml(&load(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("[ERROR]: {}", e);
                process::exit(1);
            }
        },
        None => RunConfig::default(),
    };
    if trace {
        cfg.trace = true;
    }
    if let Some(cells) = stack_size {
        cfg.stack_size = cells;
    }

    let source = load(input);
    let mut stdout = io::stdout();
    if let Err(e) = atomcc::run_source(&source, &cfg, &mut stdout) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn check_cmd(input: &Path) {
    let source = load(input);
    match atomcc::compile_source(&source) {
        Ok(_) => println!("{}: ok", input.display()),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn tokens_cmd(input: &Path) {
    let source = load(input);
    let tokens = match atomcc::tokenize(&source) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("[ERROR]: {}", e);
            process::exit(1);
        }
    };
    for token in tokens {
        match token.payload {
            Payload::None => println!("{}\t{:?}", token.line, token.kind),
            Payload::Text(t) => println!("{}\t{:?}\t{}", token.line, token.kind, t),
            Payload::Int(v) => println!("{}\t{:?}\t{}", token.line, token.kind, v),
            Payload::Double(v) => println!("{}\t{:?}\t{}", token.line, token.kind, v),
            Payload::Char(v) => println!("{}\t{:?}\t{}", token.line, token.kind, v),
        }
    }
}
