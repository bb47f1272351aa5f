//! The interactive command shell: an ordinary text REPL around the loader and run loop,
//! in the teacher's manner of keeping the host-facing surface thin and separate from the
//! core (the teacher's own `main.rs` loop vs. `CPU`/`Bus`). Its command parsing is not
//! part of the emulator's tested contract; it exists so the binary is runnable end to end.

use crate::config::MachineConfig;
use crate::loader;
use crate::processor::Machine;
use crate::registers::{GpReg, SegReg};
use std::io::{self, Write};
use std::time::Instant;

pub struct Shell {
    machine: Machine,
    config: MachineConfig,
    debug_mode: bool,
    step_mode: bool,
    trace_mode: bool,
    program_type: Option<&'static str>,
    start_time: Instant,
}

impl Shell {
    pub fn new(config: MachineConfig) -> Self {
        Shell {
            machine: Machine::new(),
            config,
            debug_mode: false,
            step_mode: false,
            trace_mode: false,
            program_type: None,
            start_time: Instant::now(),
        }
    }

    /// Reads and dispatches commands from stdin until `EXIT`/`QUIT` or end of input.
    pub fn run_repl(&mut self) {
        println!("MS-DOS Emulator - 8086 real mode, BIOS + DOS traps, COM & EXE support");
        println!();
        println!("Type 'HELP' for available commands");
        println!();

        let stdin = io::stdin();
        loop {
            print!("C:\\> ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            if stdin.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let command = parts[0].to_uppercase();

            match command.as_str() {
                "HELP" | "?" => self.show_help(),
                "CLS" => print!("\x1b[H\x1b[2J"),
                "VER" => {
                    println!("MS-DOS Emulator - real-mode 8086 core");
                    println!("Instructions executed: {}", self.machine.instruction_count);
                }
                "DIR" => self.list_directory(),
                "CD" => self.change_directory(&parts),
                "MD" | "MKDIR" => self.make_directory(&parts),
                "RD" | "RMDIR" => self.remove_directory(&parts),
                "DEL" | "ERASE" => self.delete_file(&parts),
                "TYPE" => self.type_file(&parts),
                "COPY" => self.copy_file(&parts),
                "REN" | "RENAME" => self.rename_file(&parts),
                "ECHO" => {
                    if parts.len() > 1 {
                        println!("{}", parts[1..].join(" "));
                    }
                }
                "DATE" => println!("Current date: {}", crate::traps::host_date_string()),
                "TIME" => println!("Current time: {}", crate::traps::host_time_string()),
                "MEM" => self.show_memory_info(),
                "REGS" => self.show_registers(),
                "DEBUG" => {
                    self.debug_mode = !self.debug_mode;
                    println!("Debug mode: {}", self.debug_mode);
                }
                "STEP" => {
                    self.step_mode = !self.step_mode;
                    println!("Step mode: {}", self.step_mode);
                }
                "TRACE" => {
                    self.trace_mode = !self.trace_mode;
                    println!("Trace mode: {}", self.trace_mode);
                }
                "DUMP" => self.dump_memory(&parts),
                "STACK" => self.show_stack(),
                "STATS" => self.show_statistics(),
                "DISASM" => self.disassemble(&parts),
                "RUN" | "EXEC" => {
                    if parts.len() < 2 {
                        println!("Usage: RUN <filename>");
                        continue;
                    }
                    self.load_and_run(parts[1]);
                }
                "EXIT" | "QUIT" => {
                    println!("Exiting emulator...");
                    return;
                }
                _ => {
                    let upper = command.to_uppercase();
                    if upper.ends_with(".COM") || upper.ends_with(".EXE") {
                        self.load_and_run(parts[0]);
                    } else {
                        println!("Bad command or file name: {}", parts[0]);
                    }
                }
            }
        }
    }

    fn show_help(&self) {
        println!("\nAVAILABLE COMMANDS:");
        println!("File: DIR, CD, MD, RD, DEL, TYPE, COPY, REN");
        println!("System: CLS, VER, DATE, TIME, MEM, ECHO");
        println!("Emulator: RUN, DEBUG, STEP, TRACE, REGS, DUMP, STACK, STATS, DISASM, EXIT");
        println!("Supports: .COM and .EXE files\n");
    }

    fn list_directory(&self) {
        let entries = match std::fs::read_dir(".") {
            Ok(entries) => entries,
            Err(_) => {
                println!("Error reading directory");
                return;
            }
        };

        println!("\n Directory of .\n");
        let (mut file_count, mut dir_count, mut total_size) = (0u32, 0u32, 0u64);
        for entry in entries.flatten() {
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if metadata.is_dir() {
                println!("{:<12} <DIR>", name);
                dir_count += 1;
            } else {
                println!("{:<12} {:>10}", name, metadata.len());
                file_count += 1;
                total_size += metadata.len();
            }
        }
        println!("\n    {} File(s) {} bytes", file_count, total_size);
        println!("    {} Dir(s)\n", dir_count);
    }

    fn change_directory(&self, parts: &[&str]) {
        if parts.len() < 2 {
            if let Ok(cwd) = std::env::current_dir() {
                println!("{}", cwd.display());
            }
            return;
        }
        if std::env::set_current_dir(parts[1]).is_err() {
            println!("Invalid directory");
        }
    }

    fn make_directory(&self, parts: &[&str]) {
        if parts.len() < 2 {
            println!("Usage: MD <directory>");
            return;
        }
        if std::fs::create_dir(parts[1]).is_err() {
            println!("Unable to create directory");
        }
    }

    fn remove_directory(&self, parts: &[&str]) {
        if parts.len() < 2 {
            println!("Usage: RD <directory>");
            return;
        }
        if std::fs::remove_dir(parts[1]).is_err() {
            println!("Unable to remove directory");
        }
    }

    fn delete_file(&self, parts: &[&str]) {
        if parts.len() < 2 {
            println!("Usage: DEL <filename>");
            return;
        }
        if std::fs::remove_file(parts[1]).is_err() {
            println!("File not found");
        }
    }

    fn type_file(&self, parts: &[&str]) {
        if parts.len() < 2 {
            println!("Usage: TYPE <filename>");
            return;
        }
        match std::fs::read_to_string(parts[1]) {
            Ok(content) => print!("{}", content),
            Err(_) => println!("File not found"),
        }
    }

    fn copy_file(&self, parts: &[&str]) {
        if parts.len() < 3 {
            println!("Usage: COPY <source> <destination>");
            return;
        }
        match std::fs::copy(parts[1], parts[2]) {
            Ok(_) => println!("        1 file(s) copied"),
            Err(_) => println!("Unable to copy file"),
        }
    }

    fn rename_file(&self, parts: &[&str]) {
        if parts.len() < 3 {
            println!("Usage: REN <oldname> <newname>");
            return;
        }
        if std::fs::rename(parts[1], parts[2]).is_err() {
            println!("Unable to rename file");
        }
    }

    fn show_memory_info(&self) {
        let used_paragraphs = self.machine.program_segment;
        println!("\nMemory Type        Total       Used       Free");
        println!(
            "Conventional       640K        {}K        {}K",
            used_paragraphs / 64,
            640u32.saturating_sub((used_paragraphs / 64) as u32)
        );
        println!();
    }

    fn show_registers(&self) {
        let regs = &self.machine.regs;
        println!("\nCPU REGISTERS:");
        println!(
            "AX={:04X}  BX={:04X}  CX={:04X}  DX={:04X}",
            regs.get(GpReg::Ax),
            regs.get(GpReg::Bx),
            regs.get(GpReg::Cx),
            regs.get(GpReg::Dx)
        );
        println!(
            "SI={:04X}  DI={:04X}  BP={:04X}  SP={:04X}",
            regs.get(GpReg::Si),
            regs.get(GpReg::Di),
            regs.get(GpReg::Bp),
            regs.get(GpReg::Sp)
        );
        println!(
            "CS={:04X}  DS={:04X}  ES={:04X}  SS={:04X}",
            regs.get_seg(SegReg::Cs),
            regs.get_seg(SegReg::Ds),
            regs.get_seg(SegReg::Es),
            regs.get_seg(SegReg::Ss)
        );
        println!(
            "IP={:04X}  FLAGS={:04X}",
            self.machine.ip,
            self.machine.flags.to_word()
        );

        let f = &self.machine.flags;
        let mut flags = String::new();
        for (set, name) in [
            (f.cf, "CF"),
            (f.pf, "PF"),
            (f.af, "AF"),
            (f.zf, "ZF"),
            (f.sf, "SF"),
            (f.tf, "TF"),
            (f.ifl, "IF"),
            (f.df, "DF"),
            (f.of, "OF"),
        ] {
            if set {
                flags.push_str(name);
                flags.push(' ');
            }
        }
        println!("Flags: {}\n", flags);
    }

    fn dump_memory(&self, parts: &[&str]) {
        let start = parts
            .get(1)
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            .unwrap_or(0);
        let length = parts
            .get(2)
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(256);

        println!("\nMemory dump from {:08X}:", start);
        let mut i = 0u32;
        while i < length {
            let addr = start + i;
            print!("{:08X}: ", addr);
            let bytes: Vec<u8> = (0..16).map(|j| self.machine.memory.read_u8(addr + j)).collect();
            for b in &bytes {
                print!("{:02X} ", b);
            }
            print!(" | ");
            for &b in &bytes {
                if (32..=126).contains(&b) {
                    print!("{}", b as char);
                } else {
                    print!(".");
                }
            }
            println!();
            i += 16;
        }
        println!();
    }

    fn show_stack(&self) {
        println!("\nStack (top 10 entries):");
        let sp = self.machine.sp();
        let ss = self.machine.ss();
        let mut shown = 0;
        let mut addr = sp as u32;
        while shown < 10 && addr + 1 < 0x10000 {
            let value = self
                .machine
                .memory
                .read_u16(crate::memory::Memory::linear(ss, addr as u16));
            println!("  [{:02}] {:04X}", shown, value);
            addr += 2;
            shown += 1;
        }
        if shown == 0 {
            println!("  (empty)");
        }
        println!();
    }

    fn show_statistics(&self) {
        let elapsed = self.start_time.elapsed();
        println!("\nEMULATOR STATISTICS:");
        println!("Program type:     {}", self.program_type.unwrap_or("none loaded"));
        println!("Instructions:     {}", self.machine.instruction_count);
        println!("Running time:     {:?}", elapsed);
        let seconds = elapsed.as_secs_f64();
        if seconds > 0.0 {
            println!("IPS:              {:.0}", self.machine.instruction_count as f64 / seconds);
        }
        println!();
    }

    fn disassemble(&self, parts: &[&str]) {
        let mut addr = parts
            .get(1)
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            .unwrap_or_else(|| crate::memory::Memory::linear(self.machine.cs(), self.machine.ip));
        let count = parts.get(2).and_then(|s| s.parse::<usize>().ok()).unwrap_or(20);

        println!("\nDisassembly from {:08X}:", addr);
        let mut probe = Machine::new();
        probe.memory = self.machine.memory.clone();
        for _ in 0..count {
            probe.regs.set_seg(SegReg::Cs, (addr / 16) as u16);
            probe.ip = (addr % 16) as u16;
            let decoded = crate::parser::decode(&probe);
            println!("{:08X}: {}", addr, crate::parser::mnemonic(&decoded));
            addr += decoded.length as u32;
        }
        println!();
    }

    fn load_and_run(&mut self, filename: &str) {
        let image = match std::fs::read(filename) {
            Ok(bytes) => bytes,
            Err(err) => {
                println!("Bad command or file name: {} ({})", filename, err);
                return;
            }
        };
        self.program_type = Some(if filename.to_uppercase().ends_with(".EXE") {
            "EXE"
        } else {
            "COM"
        });
        self.machine = Machine::new();
        if let Err(err) = loader::load(&mut self.machine, &image, self.config.base_segment) {
            println!("Error: {}", err);
            return;
        }
        let mut config = self.config.clone();
        config.trace = config.trace || self.trace_mode || self.debug_mode;
        config.step = config.step || self.step_mode;
        self.start_time = Instant::now();
        let outcome = crate::run(&mut self.machine, &config);
        if outcome.budget_exhausted {
            println!("(instruction budget exhausted after {} instructions)", outcome.instructions_executed);
        }
    }
}
