//! the compiler binary.  takes a mode selecting how far to compile, an input
//! file, and an output file:
//!
//! ```txt
//! sysyc -koopa input.c -o output.koopa
//! sysyc -riscv input.c -o output.S
//! ```

use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use sysy::back::code_gen;
use sysy::front;
use sysy::middle;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// where to stop
    #[arg(value_enum, allow_hyphen_values = true)]
    mode: Mode,
    /// the input file
    input: String,
    /// the output file
    #[arg(short)]
    output: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// stop after lowering to Koopa IR text
    #[value(name = "-koopa")]
    Koopa,
    /// continue to RISC-V assembly
    #[value(name = "-riscv")]
    Riscv,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let input = std::fs::read_to_string(&args.input)
        .map_err(|e| format!("cannot read {}: {e}", args.input))?;

    let ast = front::parse(&input).map_err(|e| e.to_string())?;
    let ir = front::lower(&ast).map_err(|e| e.to_string())?;

    let output = match args.mode {
        Mode::Koopa => ir,
        Mode::Riscv => {
            let prog = middle::parse(&ir).map_err(|e| e.to_string())?;
            code_gen(&prog)
        }
    };

    std::fs::write(&args.output, output)
        .map_err(|e| format!("cannot write {}: {e}", args.output))
}
