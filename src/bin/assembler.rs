//! Assembly to binary image compiler CLI.
//!
//! Assembles one or more source files into a single flat image. All files share
//! one label namespace and are laid out in the order given.
//!
//! # Usage
//! ```text
//! assembler <input>... [OPTIONS]
//! ```
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<first input>.bin`)
//! - `-s, --symbols`: Print exported labels with their addresses
//! - `--trace`: Print a listing line for every assembled instruction
//!
//! # Examples
//! ```text
//! assembler main.lk
//! assembler main.lk lib.lk -o program.bin --symbols
//! ```

use lkcpu::utils::log::{self, Level};
use lkcpu::virtual_machine::assembler::assemble_files;
use lkcpu::{error, info};
use std::env;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let mut inputs: Vec<String> = Vec::new();
    let mut output_path: Option<String> = None;
    let mut symbols = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = Some(args[i].clone());
                i += 1;
            }
            "--symbols" | "-s" => {
                symbols = true;
                i += 1;
            }
            "--trace" => {
                log::set_min_level(Level::Trace);
                i += 1;
            }
            other if other.starts_with('-') => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
            input => {
                inputs.push(input.to_string());
                i += 1;
            }
        }
    }

    let Some(first) = inputs.first() else {
        error!("No input files\n");
        print_usage(&args[0]);
        process::exit(1);
    };

    for input in &inputs {
        if !Path::new(input).exists() {
            error!("Input file does not exist: {}", input);
            process::exit(1);
        }
    }

    let output_path = output_path.unwrap_or_else(|| {
        let p = Path::new(first);
        let stem = p.file_stem().unwrap_or_default().to_string_lossy();
        let parent = p.parent().unwrap_or(Path::new("."));
        parent
            .join(format!("{}.bin", stem))
            .to_string_lossy()
            .into_owned()
    });

    if let Some(parent) = Path::new(&output_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(1);
    }

    let program = match assemble_files(&inputs) {
        Ok(p) => p,
        Err(e) => {
            error!("Assembly failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = program.write_file(&output_path) {
        error!("Failed to write output file: {}", e);
        process::exit(1);
    }

    info!(
        "Compiled {} -> {} ({} bytes)",
        inputs.join(", "),
        output_path,
        program.len()
    );

    if symbols {
        let name_w = program
            .symbols
            .keys()
            .map(|k| k.chars().count())
            .max()
            .unwrap_or(0);
        for (name, addr) in &program.symbols {
            println!("{name:<name_w$}  {addr:08X}");
        }
    }
}

const USAGE: &str = "\
Assembly Compiler

USAGE:
    {program} <input>... [OPTIONS]

ARGS:
    <input>...    Assembly source files, assembled in order into one image

OPTIONS:
    -o, --output <file>     Output file path (defaults to <first input>.bin)
    -s, --symbols           Print exported labels and their addresses
        --trace             Print a listing line for every instruction
    -h, --help              Print this help message

EXAMPLES:
    # Compile to default output name
    {program} program.lk

    # Link two files with explicit output
    {program} main.lk lib.lk -o output.bin
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
