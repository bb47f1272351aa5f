use realmode86::config::MachineConfig;
use realmode86::loader;
use realmode86::processor::Machine;
use realmode86::registers::GpReg;

fn run_flat(image: &[u8], budget: u64) -> (Machine, realmode86::RunOutcome) {
    let mut machine = Machine::new();
    loader::load(&mut machine, image, 0x1000).expect("flat image should load");
    let config = MachineConfig { instruction_budget: budget, ..MachineConfig::default() };
    let outcome = realmode86::run(&mut machine, &config);
    (machine, outcome)
}

#[test]
fn mov_add_hlt_leaves_the_expected_accumulator_value() {
    let image = vec![
        0xB8, 0x05, 0x00, // MOV AX, 5
        0x05, 0x03, 0x00, // ADD AX, 3
        0xF4,             // HLT
    ];
    let (machine, outcome) = run_flat(&image, 1000);
    assert_eq!(machine.regs.get(GpReg::Ax), 8);
    assert!(!outcome.budget_exhausted);
    assert_eq!(outcome.instructions_executed, 3);
}

#[test]
fn int20_terminates_without_executing_further_instructions() {
    let image = vec![
        0xCD, 0x20, // INT 20h: terminate program
        0xB8, 0xFF, 0xFF, // MOV AX, 0xFFFF -- must never run
    ];
    let (machine, outcome) = run_flat(&image, 1000);
    assert_eq!(machine.regs.get(GpReg::Ax), 0);
    assert!(!outcome.budget_exhausted);
    assert_eq!(outcome.instructions_executed, 1);
}

#[test]
fn short_jump_skips_the_instruction_in_between() {
    let image = vec![
        0xEB, 0x03, // JMP short +3
        0xB8, 0xFF, 0xFF, // MOV AX, 0xFFFF -- skipped
        0xF4,       // HLT
    ];
    let (machine, outcome) = run_flat(&image, 1000);
    assert_eq!(machine.regs.get(GpReg::Ax), 0);
    assert!(!outcome.budget_exhausted);
    assert_eq!(outcome.instructions_executed, 2);
}

#[test]
fn tight_loop_exhausts_the_instruction_budget() {
    let image = vec![0xEB, 0xFE]; // JMP short -2: jump to itself, forever
    let (_machine, outcome) = run_flat(&image, 50);
    assert!(outcome.budget_exhausted);
    assert_eq!(outcome.instructions_executed, 50);
}

#[test]
fn conditional_jump_is_taken_when_zero_flag_is_set() {
    let image = vec![
        0x29, 0xC0, // SUB AX, AX -- zeroes AX and sets ZF
        0x74, 0x02, // JZ +2
        0xB8, 0xFF, 0xFF, // MOV AX, 0xFFFF -- skipped
        0xF4,       // HLT
    ];
    let (machine, outcome) = run_flat(&image, 1000);
    assert_eq!(machine.regs.get(GpReg::Ax), 0);
    assert!(!outcome.budget_exhausted);
    assert_eq!(outcome.instructions_executed, 3);
}

#[test]
fn loader_rejects_an_oversized_flat_image() {
    let mut machine = Machine::new();
    let image = vec![0u8; 0xFF01];
    assert!(loader::load(&mut machine, &image, 0x1000).is_err());
}

#[test]
fn emulator_loads_and_runs_a_flat_image_from_disk() {
    use realmode86::{config::MachineConfig, Emulator};
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(&[0xB8, 0x2A, 0x00, 0xF4]).expect("write image"); // MOV AX, 0x2A; HLT

    let mut emulator = Emulator::new(MachineConfig::default());
    emulator.load_file(file.path()).expect("load flat image");
    let outcome = emulator.run();

    assert_eq!(emulator.machine.regs.get(GpReg::Ax), 0x2A);
    assert!(!outcome.budget_exhausted);
}
