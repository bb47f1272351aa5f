//! The crate root: module wiring and the run loop, the way the teacher's `lib.rs` wires
//! `CPU`/`Bus` together behind an `Emulator` facade. Everything below `Machine` (registers,
//! flags, addressing, memory) is split out the way the teacher splits `fields`/`conversions`
//! out of `processor`; everything above it (loading, trapping, the run loop, the shell) is
//! new surface this machine's program model needs that the teacher's 68k board does not.

pub mod addressing;
pub mod config;
pub mod debugger;
pub mod devices;
pub mod error;
pub mod fields;
pub mod instructions;
pub mod loader;
pub mod memory;
pub mod parser;
pub mod processor;
pub mod registers;
pub mod shell;
pub mod traps;

use config::MachineConfig;
use devices::Signal;
use error::Result;
use processor::Machine;

/// What the run loop reports back once it stops, distinguishing a halted program from
/// one that simply outran its instruction budget.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub instructions_executed: u64,
    pub budget_exhausted: bool,
}

/// Fetches, decodes, and executes instructions from `machine` until it halts or the
/// configured instruction budget is exhausted. A software-interrupt opcode routes through
/// the trap dispatcher from inside `Instruction::execute`; this loop only sees the
/// resulting `Signal`.
pub fn run(machine: &mut Machine, config: &MachineConfig) -> RunOutcome {
    let mut executed = 0u64;
    let mut budget_exhausted = false;

    while machine.running {
        if machine.instruction_count >= config.instruction_budget {
            log::warn!("instruction budget of {} exhausted", config.instruction_budget);
            budget_exhausted = true;
            break;
        }

        let decoded = parser::decode(machine);
        if config.trace {
            log::trace!(
                "{:05X}: {}",
                machine.code_address(),
                parser::mnemonic(&decoded)
            );
        }

        if config.step {
            let mnemonic = parser::mnemonic(&decoded);
            if debugger::prompt(machine, &mnemonic) == debugger::StepCommand::Quit {
                machine.halt();
                break;
            }
        }

        let signal = decoded.kind.execute(machine, decoded.length);
        machine.instruction_count += 1;
        executed += 1;

        if signal == Signal::Quit {
            machine.halt();
        }
    }

    RunOutcome { instructions_executed: executed, budget_exhausted }
}

/// Facade over a `Machine` and the configuration it was built with, mirroring the
/// teacher's `Emulator`: construct once from a `MachineConfig`, load an image, run it.
pub struct Emulator {
    pub machine: Machine,
    pub config: MachineConfig,
}

impl Emulator {
    pub fn new(config: MachineConfig) -> Self {
        Emulator { machine: Machine::new(), config }
    }

    pub fn load(&mut self, image: &[u8]) -> Result<()> {
        loader::load(&mut self.machine, image, self.config.base_segment)
    }

    pub fn load_file(&mut self, path: &std::path::Path) -> Result<()> {
        let image = std::fs::read(path)?;
        self.load(&image)
    }

    pub fn run(&mut self) -> RunOutcome {
        run(&mut self.machine, &self.config)
    }
}
