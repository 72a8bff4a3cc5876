//! Virtual CPU emulator.
//!
//! Loads a flat binary image at the entry address and runs it until it returns.
//!
//! # Usage
//! ```text
//! lkcpu <image.bin> [OPTIONS]
//! ```
//!
//! # Output
//! The debug buffer is always printed as `[v1,v2,...]` once the run ends, even
//! when it ends in an error. `--registers` and `--memory` print dumps before it.
//!
//! # Environment
//! - `LKCPU_SEED`: seed for the random fill of untouched memory
//! - `LKCPU_MAX_STEPS`: instruction budget
//!
//! Command-line flags take precedence over the environment.

use lkcpu::utils::log::{self, Level};
use lkcpu::virtual_machine::program::Program;
use lkcpu::virtual_machine::vm::{DEFAULT_ENTRY, ExecConfig, ExecProfile, Memory, VM};
use lkcpu::{error, info};
use std::env;
use std::process;
use std::time::Instant;

const SEED_ENV: &str = "LKCPU_SEED";
const MAX_STEPS_ENV: &str = "LKCPU_MAX_STEPS";

#[derive(Debug, Default)]
struct Options {
    image: String,
    registers: bool,
    memory: bool,
    seed: Option<u64>,
    max_steps: Option<u64>,
    trace: bool,
    profile: bool,
}

fn parse_u64(what: &str, value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| format!("Invalid {what}: '{value}' is not a valid number"))
}

fn env_u64(name: &str) -> Result<Option<u64>, String> {
    match env::var(name) {
        Ok(value) => parse_u64(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut image = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-r" | "--registers" => opts.registers = true,
            "-m" | "--memory" => opts.memory = true,
            "--trace" => opts.trace = true,
            "--profile" => opts.profile = true,
            k @ ("--seed" | "--max-steps") => {
                i += 1;
                let value = args.get(i).ok_or_else(|| format!("{k} requires an argument"))?;
                let n = parse_u64(k, value)?;
                if k == "--seed" {
                    opts.seed = Some(n);
                } else {
                    opts.max_steps = Some(n);
                }
            }
            other if other.starts_with('-') => return Err(format!("Unexpected argument: {other}")),
            path => {
                if image.replace(path.to_string()).is_some() {
                    return Err(format!("Unexpected argument: {path}"));
                }
            }
        }
        i += 1;
    }

    opts.image = image.ok_or("Missing image file")?;
    if opts.seed.is_none() {
        opts.seed = env_u64(SEED_ENV)?;
    }
    if opts.max_steps.is_none() {
        opts.max_steps = env_u64(MAX_STEPS_ENV)?;
    }
    Ok(opts)
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let opts = parse_args(&args).unwrap_or_else(|e| {
        error!("{e}\n");
        print_usage(&args[0]);
        process::exit(1);
    });

    if opts.trace {
        log::set_min_level(Level::Trace);
    }

    let program = Program::from_file(&opts.image, DEFAULT_ENTRY).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });

    let config = ExecConfig {
        max_steps: opts.max_steps,
        ..ExecConfig::default()
    };
    let memory = match opts.seed {
        Some(seed) => Memory::with_seed(seed),
        None => Memory::new(),
    };
    let mut vm = VM::with_memory(config, memory);

    let start = Instant::now();
    let result = vm.load(&program).and_then(|_| vm.run());
    let elapsed = start.elapsed();

    if opts.registers {
        for (reg, value) in vm.registers().iter() {
            println!("{reg} = {value:08X}");
        }
    }
    if opts.memory {
        for (addr, byte) in vm.memory().snapshot() {
            println!("{addr:08X}: {byte:02X}");
        }
    }
    println!("[{}]", vm.debug_output().join(","));

    if opts.profile {
        print_profile(vm.profile());
        info!("Finished in {:.3} ms", elapsed.as_secs_f64() * 1000.0);
    }

    if let Err(e) = result {
        error!("Execution failed: {e}");
        process::exit(1);
    }
}

fn print_profile(profile: &ExecProfile) {
    let total_u = profile.instructions();
    let total = total_u as f64;

    let cat_w = 2 + profile
        .iter()
        .map(|(c, _)| c.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("total".chars().count());

    let amt_w = profile
        .iter()
        .map(|(_, n)| format_with_commas(n).chars().count())
        .max()
        .unwrap_or(0)
        .max(format_with_commas(total_u).chars().count());

    let dash_w = cat_w + 1 + amt_w + 2 + "( 100.0%)".len();

    println!("Execution Profile:");
    println!("{}", "-".repeat(dash_w));

    for (class, count) in profile.iter() {
        if count == 0 {
            continue;
        }
        let percent = if total > 0.0 {
            (count as f64 / total) * 100.0
        } else {
            0.0
        };
        println!(
            "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
            class.as_str(),
            format_with_commas(count),
            percent,
        );
    }

    println!("{}", "-".repeat(dash_w));
    println!(
        "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
        "total",
        format_with_commas(total_u),
        100.0,
    );
    if profile.traps() > 0 {
        println!(
            "{:<cat_w$} {:>amt_w$}",
            "traps",
            format_with_commas(profile.traps())
        );
    }
}

fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

const USAGE: &str = "\
Virtual CPU Emulator

USAGE:
    {program} <image.bin> [OPTIONS]

ARGS:
    <image.bin>    Flat binary image, loaded at 0x14830000

OPTIONS:
    -r, --registers         Print registers after the run
    -m, --memory            Print every touched memory byte after the run
        --seed <n>          Seed for untouched memory (env: LKCPU_SEED)
        --max-steps <n>     Abort after n instructions (env: LKCPU_MAX_STEPS)
        --trace             Log every executed instruction
        --profile           Print instruction counts by class
    -h, --help              Print this help message

EXAMPLES:
    # Run and print the debug buffer
    {program} program.bin

    # Reproducible run with a register dump
    {program} program.bin -r --seed 1
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
