//! Streamsheets - run a machine of trigger-driven spreadsheets

mod default_functions;
mod report;

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use streamsheets_core::trigger::TRIGGER_TYPES;
use streamsheets_core::{Machine, MachineState, load_machine, save_machine};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CYCLES: u64 = 10;

fn print_usage() {
    eprintln!("Usage: streamsheets [OPTIONS] FILE");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  FILE                      Machine file to run (.toml)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -n, --cycles <N>          Number of machine cycles to run (default: 10)");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  --no-default-functions    Do not load default.rhai from the config dir");
    eprintln!("  --cycletime <MS>          Override the machine cycletime");
    eprintln!("  --no-wait                 Do not sleep between cycles");
    eprintln!("  --stop                    Stop the machine after the run");
    eprintln!("  -o, --output <FILE>       Save the machine file after the run");
    eprintln!("  -h, --help                Print help");
    eprintln!();
    eprintln!("Trigger types:");
    for trigger in TRIGGER_TYPES {
        eprintln!("  {:<24}  {}", trigger.name, trigger.description);
    }
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: warn).");
}

struct Options {
    file_path: PathBuf,
    functions_files: Vec<PathBuf>,
    no_default_functions: bool,
    cycles: u64,
    cycletime: Option<u64>,
    wait: bool,
    stop: bool,
    output_file: Option<PathBuf>,
}

fn parse_number(args: &[String], i: usize, flag: &str) -> u64 {
    let Some(value) = args.get(i) else {
        eprintln!("Error: {} requires a number", flag);
        std::process::exit(1);
    };
    match value.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Error: {} expects a number, got '{}'", flag, value);
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().collect();

    let mut file_path: Option<PathBuf> = None;
    let mut functions_files: Vec<PathBuf> = Vec::new();
    let mut no_default_functions = false;
    let mut cycles = DEFAULT_CYCLES;
    let mut cycletime: Option<u64> = None;
    let mut wait = true;
    let mut stop = false;
    let mut output_file: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-n" | "--cycles" => {
                i += 1;
                cycles = parse_number(&args, i, "--cycles");
            }
            "-f" | "--functions" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --functions requires a file path");
                    std::process::exit(1);
                }
                functions_files.push(PathBuf::from(&args[i]));
            }
            "--no-default-functions" => no_default_functions = true,
            "--cycletime" => {
                i += 1;
                cycletime = Some(parse_number(&args, i, "--cycletime"));
            }
            "--no-wait" => wait = false,
            "--stop" => stop = true,
            "-o" | "--output" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --output requires a file path");
                    std::process::exit(1);
                }
                output_file = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
            _ => {
                if file_path.is_none() {
                    file_path = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: Unexpected argument: {}", args[i]);
                    print_usage();
                    std::process::exit(1);
                }
            }
        }
        i += 1;
    }

    let Some(file_path) = file_path else {
        eprintln!("Error: Missing machine file");
        print_usage();
        std::process::exit(1);
    };

    Options {
        file_path,
        functions_files,
        no_default_functions,
        cycles,
        cycletime,
        wait,
        stop,
        output_file,
    }
}

/// Run one cycle. When waiting, the rest of the cycletime goes to pending
/// repeats first and is then slept away.
fn run_cycle(machine: &mut Machine, wait: bool) -> bool {
    let started = Instant::now();
    if !machine.cycle() {
        return false;
    }
    if wait {
        let cycletime = Duration::from_millis(machine.cycletime());
        while machine.has_pending_tasks() && started.elapsed() < cycletime {
            machine.turn();
        }
        if let Some(rest) = cycletime.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    true
}

fn stop_machine(machine: &mut Machine, options: &Options) {
    machine.stop();
    let mut spent = 0;
    while machine.state() == MachineState::WillStop
        && machine.pending_stop_sheets() > 0
        && spent < options.cycles
    {
        run_cycle(machine, options.wait);
        spent += 1;
    }
    debug!(cycles = spent, "stop sheets finished");
    machine.stop();
}

fn run(options: Options) -> Result<()> {
    let mut functions = options.functions_files.clone();
    default_functions::prepend_default_functions_if_present(
        &mut functions,
        options.no_default_functions,
    );

    let mut machine = load_machine(&options.file_path, &functions)
        .with_context(|| format!("Failed to load {}", options.file_path.display()))?;
    if let Some(cycletime) = options.cycletime {
        machine.set_cycletime(cycletime);
    }

    machine.start();
    let mut ran = 0;
    while ran < options.cycles && run_cycle(&mut machine, options.wait) {
        ran += 1;
    }
    info!(machine = %machine.name(), cycles = ran, "run finished");

    if options.stop {
        stop_machine(&mut machine, &options);
    }

    let stdout = std::io::stdout();
    report::write_machine(&mut stdout.lock(), &machine).context("Failed to write report")?;

    if let Some(output_path) = &options.output_file {
        save_machine(&machine, output_path)
            .with_context(|| format!("Failed to save {}", output_path.display()))?;
        eprintln!("Saved to {}", output_path.display());
    }
    Ok(())
}

fn main() {
    let options = parse_args();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run(options) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
