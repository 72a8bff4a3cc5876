//! VM benchmark binary.
//!
//! Measures execution time for representative programs, or for one source file
//! given on the command line. Assembly is done once, outside the timed region.
//! Run with: `cargo run --release --bin bench [source] [--iterations N]`

use std::env;
use std::fs;
use std::process;
use std::time::{Duration, Instant};

use lkcpu::error;
use lkcpu::virtual_machine::assembler::assemble_source;
use lkcpu::virtual_machine::errors::VMError;
use lkcpu::virtual_machine::program::Program;
use lkcpu::virtual_machine::vm::{ExecConfig, Memory, VM};

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

/// How long each benchmark runs.
#[derive(Clone, Copy)]
enum Plan {
    /// Repeat until at least this much time has passed.
    MinDuration(Duration),
    Iterations(u64),
}

struct BenchResult {
    name: String,
    iterations: u64,
    total: Duration,
    fastest: Duration,
    slowest: Duration,
    /// Instructions executed by one run.
    instructions: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total.div_f64(self.iterations.max(1) as f64)
    }

    fn print(&self) {
        let avg = self.avg();
        let ns_per_instr = if self.instructions > 0 {
            avg.as_nanos() as f64 / self.instructions as f64
        } else {
            0.0
        };
        let minstr_per_sec = if avg.as_nanos() > 0 {
            self.instructions as f64 / avg.as_secs_f64() / 1e6
        } else {
            0.0
        };
        println!(
            "  {:<22} {:>7} {:>11.3} {:>11.3} {:>11.3} {:>10} {:>8.2} {:>9.1}",
            self.name,
            self.iterations,
            avg.as_secs_f64() * 1e6,
            self.fastest.as_secs_f64() * 1e6,
            self.slowest.as_secs_f64() * 1e6,
            self.instructions,
            ns_per_instr,
            minstr_per_sec,
        );
    }
}

/// Loads and runs `program` on a fresh VM, returning the instruction count.
fn run_once(program: &Program, seed: u64) -> Result<u64, VMError> {
    let mut vm = VM::with_memory(ExecConfig::default(), Memory::with_seed(seed));
    vm.load(program)?;
    vm.run()?;
    Ok(vm.profile().instructions())
}

fn bench(name: &str, plan: Plan, program: &Program) -> Result<BenchResult, VMError> {
    // Warmup
    for seed in 0..3 {
        run_once(program, seed)?;
    }

    let mut result = BenchResult {
        name: name.to_string(),
        iterations: 0,
        total: Duration::ZERO,
        fastest: Duration::MAX,
        slowest: Duration::ZERO,
        instructions: 0,
    };
    let start = Instant::now();
    loop {
        let done = match plan {
            Plan::MinDuration(min) => start.elapsed() >= min,
            Plan::Iterations(n) => result.iterations >= n,
        };
        if done {
            break;
        }
        let t = Instant::now();
        result.instructions = run_once(program, result.iterations)?;
        let elapsed = t.elapsed();
        result.total += elapsed;
        result.fastest = result.fastest.min(elapsed);
        result.slowest = result.slowest.max(elapsed);
        result.iterations += 1;
    }
    if result.iterations == 0 {
        result.fastest = Duration::ZERO;
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Benchmark definitions
// ---------------------------------------------------------------------------

const TIGHT_LOOP_ASM: &str = r#"
    krz 100000 f1
    krz 0 f2
    nll loop
        ata 1 f2
        nta 1 f1
        fi f1 0 niv
        malkrz loop xx
    krz f5@ xx
"#;

const ARITHMETIC_MIX_ASM: &str = r#"
    krz 10000 f0
    krz 1 f1
    krz 2 f2
    krz 3 f3
    nll loop
        krz f1 f4
        ata f2 f4
        ekc f3 f4
        dro 1 f4
        dto 2 f4
        dal f1 f4
        ada 65535 f4
        dtosna 1 f4
        krz f4 f1
        nta 1 f0
        fi f0 0 niv
        malkrz loop xx
    krz f5@ xx
"#;

const MULTIPLY_ASM: &str = r#"
    krz 20000 f0
    krz 3 f1
    nll loop
        lat 7 f1 f2
        latsna f2 f1 f3
        nta 1 f0
        fi f0 0 niv
        malkrz loop xx
    krz f5@ xx
"#;

const MEMORY_ASM: &str = r#"
    krz 5000 f0
    krz 42 f1
    nll loop
        krz f1 f5+f0@
        krz f5+f0@ f2
        nta 1 f0
        fi f0 0 niv
        malkrz loop xx
    krz f5@ xx
"#;

const CALL_OVERHEAD_ASM: &str = r#"
    krz 10000 f0
    nll loop
        inj noop xx f6
        nta 1 f0
        fi f0 0 niv
        malkrz loop xx
    krz f5@ xx
    nll noop
        krz f6 xx
"#;

const DEBUG_TRAP_ASM: &str = r#"
    krz 1000 f0
    nta 8 f5
    nll loop
        krz f0 f5+4@
        krz back f5@
        krz 3126834864 xx
    nll back
        nta 1 f0
        fi f0 0 niv
        malkrz loop xx
    ata 8 f5
    krz f5@ xx
"#;

const BUILTIN: &[(&str, &str)] = &[
    ("tight_loop(100K)", TIGHT_LOOP_ASM),
    ("arithmetic_mix(10K)", ARITHMETIC_MIX_ASM),
    ("multiply(20K)", MULTIPLY_ASM),
    ("memory(5K)", MEMORY_ASM),
    ("call_overhead(10K)", CALL_OVERHEAD_ASM),
    ("debug_trap(1K)", DEBUG_TRAP_ASM),
];

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut source_path: Option<String> = None;
    let mut plan = Plan::MinDuration(Duration::from_secs(2));

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--iterations" | "-n" => {
                i += 1;
                let n = args.get(i).and_then(|v| v.parse::<u64>().ok()).filter(|&n| n > 0);
                match n {
                    Some(n) => plan = Plan::Iterations(n),
                    None => {
                        error!("--iterations requires a positive number");
                        process::exit(1);
                    }
                }
            }
            other if other.starts_with('-') => {
                error!("Unexpected argument: {other}");
                process::exit(1);
            }
            path => source_path = Some(path.to_string()),
        }
        i += 1;
    }

    let programs: Vec<(String, String)> = match &source_path {
        Some(path) => match fs::read_to_string(path) {
            Ok(source) => vec![(path.clone(), source)],
            Err(e) => {
                error!("Failed to read {path}: {e}");
                process::exit(1);
            }
        },
        None => BUILTIN
            .iter()
            .map(|(name, src)| (name.to_string(), src.to_string()))
            .collect(),
    };

    match plan {
        Plan::MinDuration(min) => {
            println!("VM Benchmarks (each runs for >= {}s)\n", min.as_secs())
        }
        Plan::Iterations(n) => println!("VM Benchmarks ({n} iterations each)\n"),
    }
    println!(
        "  {:<22} {:>7} {:>11} {:>11} {:>11} {:>10} {:>8} {:>9}",
        "benchmark", "iters", "avg us", "min us", "max us", "instrs", "ns/instr", "Minstr/s"
    );
    println!("  {}", "-".repeat(96));

    for (name, source) in &programs {
        // Pre-assemble (assembly cost excluded from benchmark)
        let program = assemble_source(source).unwrap_or_else(|e| {
            error!("Assembly of {name} failed: {e}");
            process::exit(1);
        });
        match bench(name, plan, &program) {
            Ok(result) => result.print(),
            Err(e) => {
                error!("{name} failed: {e}");
                process::exit(1);
            }
        }
    }
}
