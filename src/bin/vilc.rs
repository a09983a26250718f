//! Command-line front end: compiles a textual VIL program to 6502 assembly.

use bumpalo::Bump;
use clap::Parser;
use log::LevelFilter;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use vilc::compiler::{CompileOptions, Compiler};
use vilc::core::CompilationSession;
use vilc::text::{parse_program, print_insts};
use vilc::vil::Catalog;

#[derive(Parser, Debug)]
#[command(name = "vilc", version, about = "Lowers VIL stack IR to 6502 assembly")]
struct Args {
    /// Input VIL file; standard input when omitted.
    input: Option<PathBuf>,

    /// Write assembly here instead of standard output.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Skip the peephole fusion engine.
    #[arg(long)]
    no_fuse: bool,

    /// Precede every expansion with a comment naming its instruction.
    #[arg(long)]
    annotate: bool,

    /// Print the VIL stream after fusion before the assembly.
    #[arg(long)]
    print_vil: bool,

    /// Print session statistics to standard error.
    #[arg(long)]
    stats: bool,

    /// Check the instruction catalog for consistency and exit.
    #[arg(long)]
    self_check: bool,

    /// Raise the log level (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if args.self_check {
        Catalog::new().self_check()?;
        println!("catalog ok");
        return Ok(());
    }

    let source = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let program = match parse_program(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let options = CompileOptions {
        fuse: !args.no_fuse,
        annotate: args.annotate,
        ..CompileOptions::default()
    };
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = match Compiler::new(&session, options).compile(&program) {
        Ok(output) => output,
        Err(diag) => {
            eprintln!("Error: {}", diag);
            process::exit(1);
        }
    };

    let mut text = String::new();
    if args.print_vil {
        text.push_str(&print_insts(&program.types, &output.insts));
        text.push('\n');
    }
    text.push_str(&output.asm());

    match &args.output {
        Some(path) => fs::write(path, text)?,
        None => print!("{}", text),
    }

    if args.stats {
        eprint!("{}", session.stats());
    }
    Ok(())
}
