/// Mirrors the teacher's `Configuration`: everything the emulator needs before the first
/// instruction is fetched, gathered in one place instead of threaded through as arguments.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Paragraph at which the program image (PSP + code) is installed.
    pub base_segment: u16,
    /// Fetch/decode/execute steps before the run loop reports budget exhaustion.
    pub instruction_budget: u64,
    /// Print a disassembly line for every instruction as it executes.
    pub trace: bool,
    /// Pause for operator input before every instruction.
    pub step: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            base_segment: 0x1000,
            instruction_budget: 100_000_000,
            trace: false,
            step: false,
        }
    }
}
