use clap::Parser;
use realmode86::config::MachineConfig;
use realmode86::shell::Shell;
use realmode86::Emulator;
use std::path::PathBuf;
use std::process::ExitCode;

/// A real-mode 8086 emulator: BIOS and DOS traps, COM and EXE loading.
#[derive(Parser, Debug)]
#[command(name = "realmode86", version, about)]
struct Cli {
    /// Enables trace logging and runs FILE.
    #[arg(short = 'd', long = "debug", value_name = "FILE")]
    debug: Option<PathBuf>,

    /// Program to run directly, skipping the interactive shell.
    file: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(path) = cli.debug {
        return run_file(&path, true);
    }
    if let Some(path) = cli.file {
        return run_file(&path, false);
    }

    Shell::new(MachineConfig::default()).run_repl();
    ExitCode::SUCCESS
}

fn run_file(path: &PathBuf, debug: bool) -> ExitCode {
    let config = MachineConfig { trace: debug, ..MachineConfig::default() };
    let mut emulator = Emulator::new(config);
    if let Err(err) = emulator.load_file(path) {
        eprintln!("Error: {}", err);
        return ExitCode::FAILURE;
    }
    let outcome = emulator.run();
    if outcome.budget_exhausted {
        eprintln!(
            "(instruction budget exhausted after {} instructions)",
            outcome.instructions_executed
        );
    }
    ExitCode::SUCCESS
}
