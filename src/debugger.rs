//! A lightweight, `termion`-driven register/flag dump and step prompt, in the teacher's
//! box-drawing idiom — without the teacher's scrolling disassembly window, since this
//! machine's step mode is a diagnostic aid invoked from the shell, not a full-screen
//! attached debugger the run loop lives inside of.

use crate::devices::Signal;
use crate::processor::Machine;
use std::io::{self, Write};
use termion::{clear, cursor};

/// Renders the register/flag box and the instruction about to execute.
pub fn render(machine: &Machine, next_mnemonic: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}{}", clear::All, cursor::Goto(1, 1)));
    out.push_str("╔═══════════════════════════════════════════╗\n");
    out.push_str(&format!("{}", machine));
    out.push_str("╚═══════════════════════════════════════════╝\n");
    out.push_str(&format!("next: {}\n", next_mnemonic));
    out
}

#[derive(PartialEq, Clone, Copy)]
pub enum StepCommand {
    Step,
    Continue,
    Quit,
}

fn read_command() -> StepCommand {
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return StepCommand::Quit;
    }
    match input.trim() {
        "c" => StepCommand::Continue,
        "q" => StepCommand::Quit,
        _ => StepCommand::Step,
    }
}

/// Draws the current machine state and blocks for one step-mode command. Returns the signal
/// the run loop should act on: `Ok` to execute one more instruction and prompt again, `Quit`
/// to stop, or a special case the caller maps to "stop prompting but keep running" for `c`.
pub fn prompt(machine: &Machine, next_mnemonic: &str) -> StepCommand {
    print!("{}", render(machine, next_mnemonic));
    print!("> ");
    let _ = io::stdout().flush();
    read_command()
}

pub fn step_to_signal(cmd: StepCommand) -> Signal {
    match cmd {
        StepCommand::Quit => Signal::Quit,
        _ => Signal::Ok,
    }
}
