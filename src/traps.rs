//! The BIOS/DOS trap dispatcher. A software interrupt never escalates to `EmulatorError` —
//! every failure here is reported back into the guest the way real BIOS/DOS calls do, by
//! setting the carry flag and/or an error code in AL/AX, never by aborting the run loop.

use crate::devices::DirEntry;
use crate::memory::Memory;
use crate::registers::{ByteReg, GpReg, SegReg};
use crate::processor::Machine;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};

pub fn dispatch(machine: &mut Machine, vector: u8) {
    match vector {
        0x10 => video(machine),
        0x11 => equipment(machine),
        0x12 => memory_size(machine),
        0x13 => disk(machine),
        0x16 => keyboard(machine),
        0x1A => clock(machine),
        0x20 => {
            machine.files.close_all_dynamic();
            machine.halt();
        }
        0x21 => dos(machine),
        0x33 => mouse(machine),
        other => log::debug!("unhandled software interrupt {:#04x}", other),
    }
}

fn ah(machine: &Machine) -> u8 {
    machine.regs.get_byte(ByteReg::Ah)
}

fn al(machine: &Machine) -> u8 {
    machine.regs.get_byte(ByteReg::Al)
}

fn set_al(machine: &Machine, value: u8) {
    machine.regs.set_byte(ByteReg::Al, value);
}

fn fail(machine: &mut Machine, dos_error: u8) {
    machine.flags.cf = true;
    machine.regs.set(GpReg::Ax, dos_error as u16);
}

fn succeed(machine: &mut Machine) {
    machine.flags.cf = false;
}

fn video(machine: &mut Machine) {
    match ah(machine) {
        0x00 => log::trace!("set video mode {:#04x}", al(machine)),
        0x02 => log::trace!("set cursor position"),
        0x03 => {
            machine.regs.set_byte(ByteReg::Dh, 0);
            machine.regs.set_byte(ByteReg::Dl, 0);
        }
        0x06 | 0x07 => log::trace!("scroll window"),
        0x0E => {
            let c = al(machine);
            let _ = machine.files.write(crate::devices::STDOUT_HANDLE, &[c]);
        }
        0x0F => {
            machine.regs.set_byte(ByteReg::Al, 0x03);
            machine.regs.set_byte(ByteReg::Ah, 80);
        }
        other => log::debug!("unhandled int 10h function {:#04x}", other),
    }
}

fn equipment(machine: &mut Machine) {
    machine.regs.set(GpReg::Ax, 0x0021);
}

fn memory_size(machine: &mut Machine) {
    machine.regs.set(GpReg::Ax, 640);
}

fn disk(machine: &mut Machine) {
    match ah(machine) {
        0x00 => succeed(machine),
        _ => fail(machine, 0x01),
    }
}

fn keyboard(machine: &mut Machine) {
    match ah(machine) {
        0x00 => {
            let mut buf = [0u8; 1];
            let _ = std::io::stdin().read_exact(&mut buf);
            machine.regs.set_byte(ByteReg::Al, buf[0]);
            machine.regs.set_byte(ByteReg::Ah, 0);
        }
        0x01 => {
            // No host-side raw-mode key buffer is wired up here — the interactive
            // debugger/shell owns the terminal. Always report a key available.
            machine.flags.zf = false;
        }
        0x02 => machine.regs.set_byte(ByteReg::Al, 0),
        0x11 => {
            machine.flags.zf = false;
        }
        other => log::debug!("unhandled int 16h function {:#04x}", other),
    }
}

fn clock(machine: &mut Machine) {
    let now = chrono::Local::now();
    match ah(machine) {
        0x00 => {
            let midnight = now.date().and_hms(0, 0, 0);
            let elapsed = now.signed_duration_since(midnight).num_milliseconds() as u64;
            let ticks = elapsed * 1_193_182 / 65_536_000; // 18.206 Hz BIOS tick rate
            machine.regs.set(GpReg::Cx, (ticks >> 16) as u16);
            machine.regs.set(GpReg::Dx, ticks as u16);
            machine.regs.set_byte(ByteReg::Al, 0);
        }
        0x02 => {
            use chrono::Timelike;
            machine.regs.set_byte(ByteReg::Ch, to_bcd(now.hour() as u8));
            machine.regs.set_byte(ByteReg::Cl, to_bcd(now.minute() as u8));
            machine.regs.set_byte(ByteReg::Dh, to_bcd(now.second() as u8));
            machine.regs.set_byte(ByteReg::Dl, 0);
        }
        0x04 => {
            use chrono::Datelike;
            let year = now.year() as u16;
            machine.regs.set(GpReg::Cx, ((to_bcd((year / 100) as u8) as u16) << 8) | to_bcd((year % 100) as u8) as u16);
            machine.regs.set_byte(ByteReg::Dh, to_bcd(now.month() as u8));
            machine.regs.set_byte(ByteReg::Dl, to_bcd(now.day() as u8));
        }
        other => log::debug!("unhandled int 1ah function {:#04x}", other),
    }
}

fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Host wall-clock date, for the shell's `DATE` builtin (not a guest-visible trap).
pub fn host_date_string() -> String {
    chrono::Local::now().format("%a %m/%d/%Y").to_string()
}

/// Host wall-clock time, for the shell's `TIME` builtin (not a guest-visible trap).
pub fn host_time_string() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn mouse(machine: &mut Machine) {
    match ah(machine) {
        0x00 => machine.regs.set(GpReg::Ax, 0), // no mouse driver present
        _ => machine.regs.set(GpReg::Ax, 0),
    }
}

fn dos(machine: &mut Machine) {
    match ah(machine) {
        0x01 => {
            let mut buf = [0u8; 1];
            let _ = std::io::stdin().read_exact(&mut buf);
            machine.regs.set_byte(ByteReg::Al, buf[0]);
            let _ = machine.files.write(crate::devices::STDOUT_HANDLE, &buf);
        }
        0x02 => {
            let c = machine.regs.get_byte(ByteReg::Dl);
            let _ = machine.files.write(crate::devices::STDOUT_HANDLE, &[c]);
        }
        0x06 => {
            let dl = machine.regs.get_byte(ByteReg::Dl);
            if dl != 0xFF {
                let _ = machine.files.write(crate::devices::STDOUT_HANDLE, &[dl]);
            } else {
                machine.regs.set_byte(ByteReg::Al, 0);
                machine.flags.zf = true;
            }
        }
        0x09 => {
            let addr = Memory::linear(machine.ds(), machine.regs.get(GpReg::Dx));
            let text = read_dollar_string(machine, addr);
            let _ = machine.files.write(crate::devices::STDOUT_HANDLE, text.as_bytes());
        }
        0x0A => buffered_input(machine),
        0x0E => {
            machine.regs.set_byte(ByteReg::Al, 1);
        }
        0x19 => machine.regs.set_byte(ByteReg::Al, 2), // "C:"
        0x25 => {
            let vector = al(machine);
            let handler = Memory::linear(machine.ds(), machine.regs.get(GpReg::Dx));
            machine.vectors[vector as usize] = handler;
        }
        0x2A => {
            use chrono::Datelike;
            let now = chrono::Local::now();
            machine.regs.set(GpReg::Cx, now.year() as u16);
            machine.regs.set_byte(ByteReg::Dh, now.month() as u8);
            machine.regs.set_byte(ByteReg::Dl, now.day() as u8);
            machine.regs.set_byte(ByteReg::Al, now.weekday().num_days_from_sunday() as u8);
        }
        0x2C => {
            use chrono::Timelike;
            let now = chrono::Local::now();
            machine.regs.set_byte(ByteReg::Ch, now.hour() as u8);
            machine.regs.set_byte(ByteReg::Cl, now.minute() as u8);
            machine.regs.set_byte(ByteReg::Dh, now.second() as u8);
            machine.regs.set_byte(ByteReg::Dl, ((now.timestamp_millis() % 1000) / 10) as u8);
        }
        0x30 => {
            machine.regs.set_byte(ByteReg::Al, 5);
            machine.regs.set_byte(ByteReg::Ah, 0);
        }
        0x35 => {
            let vector = al(machine);
            let handler = machine.vectors[vector as usize];
            machine.set_es((handler >> 4) as u16);
            machine.regs.set(GpReg::Bx, (handler & 0xF) as u16);
        }
        0x39 => {
            let path = read_path(machine, GpReg::Dx);
            match fs::create_dir(&path) {
                Ok(()) => succeed(machine),
                Err(_) => fail(machine, 0x03),
            }
        }
        0x3A => {
            let path = read_path(machine, GpReg::Dx);
            match fs::remove_dir(&path) {
                Ok(()) => succeed(machine),
                Err(_) => fail(machine, 0x03),
            }
        }
        0x3B => {
            let path = read_path(machine, GpReg::Dx);
            match std::env::set_current_dir(&path) {
                Ok(()) => succeed(machine),
                Err(_) => fail(machine, 0x03),
            }
        }
        0x3C => {
            let path = read_path(machine, GpReg::Dx);
            match File::create(&path) {
                Ok(file) => {
                    let handle = machine.files.register(file);
                    machine.regs.set(GpReg::Ax, handle);
                    succeed(machine);
                }
                Err(_) => fail(machine, 0x05),
            }
        }
        0x3D => {
            let path = read_path(machine, GpReg::Dx);
            let mode = al(machine);
            let opened = OpenOptions::new()
                .read(mode != 1)
                .write(mode != 0)
                .open(&path);
            match opened {
                Ok(file) => {
                    let handle = machine.files.register(file);
                    machine.regs.set(GpReg::Ax, handle);
                    succeed(machine);
                }
                Err(_) => fail(machine, 0x02),
            }
        }
        0x3E => {
            let handle = machine.regs.get(GpReg::Bx);
            if machine.files.close(handle) {
                succeed(machine);
            } else {
                fail(machine, 0x06);
            }
        }
        0x3F => {
            let handle = machine.regs.get(GpReg::Bx);
            let count = machine.regs.get(GpReg::Cx) as usize;
            let addr = Memory::linear(machine.ds(), machine.regs.get(GpReg::Dx));
            let mut buf = vec![0u8; count];
            match machine.files.read(handle, &mut buf) {
                Ok(n) => {
                    machine.memory.write_bytes(addr, &buf[..n]);
                    machine.regs.set(GpReg::Ax, n as u16);
                    succeed(machine);
                }
                Err(_) => fail(machine, 0x05),
            }
        }
        0x40 => {
            let handle = machine.regs.get(GpReg::Bx);
            let count = machine.regs.get(GpReg::Cx) as usize;
            let addr = Memory::linear(machine.ds(), machine.regs.get(GpReg::Dx));
            let buf = machine.memory.read_bytes(addr, count);
            match machine.files.write(handle, &buf) {
                Ok(n) => {
                    machine.regs.set(GpReg::Ax, n as u16);
                    succeed(machine);
                }
                Err(_) => fail(machine, 0x05),
            }
        }
        0x41 => {
            let path = read_path(machine, GpReg::Dx);
            match fs::remove_file(&path) {
                Ok(()) => succeed(machine),
                Err(_) => fail(machine, 0x02),
            }
        }
        0x42 => {
            let handle = machine.regs.get(GpReg::Bx);
            let origin = match al(machine) {
                0 => std::io::SeekFrom::Start(0),
                1 => std::io::SeekFrom::Current(0),
                _ => std::io::SeekFrom::End(0),
            };
            let offset = (((machine.regs.get(GpReg::Cx) as u32) << 16) | machine.regs.get(GpReg::Dx) as u32) as i64;
            match machine.files.seek(handle, offset, origin) {
                Ok(pos) => {
                    machine.regs.set(GpReg::Ax, pos as u16);
                    machine.regs.set(GpReg::Dx, (pos >> 16) as u16);
                    succeed(machine);
                }
                Err(_) => fail(machine, 0x01),
            }
        }
        0x43 => {
            machine.regs.set(GpReg::Cx, 0);
            succeed(machine);
        }
        0x47 => {
            let addr = Memory::linear(machine.ds(), machine.regs.get(GpReg::Si));
            if let Ok(cwd) = std::env::current_dir() {
                let text = cwd.display().to_string();
                let mut bytes = text.into_bytes();
                bytes.push(0);
                machine.memory.write_bytes(addr, &bytes);
                succeed(machine);
            } else {
                fail(machine, 0x13);
            }
        }
        0x4C => {
            machine.files.close_all_dynamic();
            machine.halt();
        }
        0x4E => find_first(machine),
        0x4F => find_next(machine),
        0x56 => {
            let old_path = read_path(machine, GpReg::Dx);
            let new_addr = Memory::linear(machine.es(), machine.regs.get(GpReg::Di));
            let new_path = read_cstring(machine, new_addr);
            match fs::rename(&old_path, &new_path) {
                Ok(()) => succeed(machine),
                Err(_) => fail(machine, 0x02),
            }
        }
        0x62 => {
            machine.regs.set(GpReg::Bx, machine.program_segment);
        }
        other => log::debug!("unhandled int 21h function {:#04x}", other),
    }
}

fn buffered_input(machine: &mut Machine) {
    let buf_addr = Memory::linear(machine.ds(), machine.regs.get(GpReg::Dx));
    let max_len = machine.memory.read_u8(buf_addr).max(1) - 1;
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        line.clear();
    }
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let truncated: Vec<u8> = trimmed.bytes().take(max_len as usize).collect();
    machine.memory.write_u8(buf_addr + 1, truncated.len() as u8);
    machine.memory.write_bytes(buf_addr + 2, &truncated);
}

fn find_first(machine: &mut Machine) {
    let path = read_path(machine, GpReg::Dx);
    let (dir, pattern) = split_pattern(&path);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => {
            fail(machine, 0x02);
            return;
        }
    };
    let matches: Vec<DirEntry> = entries
        .filter_map(|e| e.ok())
        .filter(|e| matches_pattern(&e.file_name().to_string_lossy(), &pattern))
        .map(|e| {
            let meta = e.metadata().ok();
            DirEntry {
                name: e.file_name().to_string_lossy().into_owned(),
                attribute: if meta.as_ref().map(|m| m.is_dir()).unwrap_or(false) { 0x10 } else { 0x00 },
                size: meta.as_ref().map(|m| m.len() as u32).unwrap_or(0),
                time: 0,
                date: 0,
            }
        })
        .collect();
    if machine.dta.start_search(matches) {
        succeed(machine);
    } else {
        fail(machine, 0x12);
    }
}

fn find_next(machine: &mut Machine) {
    if machine.dta.advance() {
        succeed(machine);
    } else {
        fail(machine, 0x12);
    }
}

fn split_pattern(path: &str) -> (String, String) {
    match path.rfind(['/', '\\']) {
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (".".to_string(), path.to_string()),
    }
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern == "*.*" || pattern == "*" {
        return true;
    }
    // A minimal DOS wildcard match: '*' consumes the rest of its half, '?' any one char.
    let (pat_stem, pat_ext) = pattern.split_once('.').unwrap_or((pattern, ""));
    let (name_stem, name_ext) = name.split_once('.').unwrap_or((name, ""));
    wildcard_eq(pat_stem, name_stem) && wildcard_eq(pat_ext, name_ext)
}

fn wildcard_eq(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.len() != text.len() {
        return false;
    }
    pattern.chars().zip(text.chars()).all(|(p, t)| p == '?' || p.eq_ignore_ascii_case(&t))
}

fn read_cstring(machine: &Machine, mut addr: u32) -> String {
    let mut bytes = Vec::new();
    loop {
        let b = machine.memory.read_u8(addr);
        if b == 0 {
            break;
        }
        bytes.push(b);
        addr += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn read_dollar_string(machine: &Machine, mut addr: u32) -> String {
    let mut bytes = Vec::new();
    loop {
        let b = machine.memory.read_u8(addr);
        if b == b'$' {
            break;
        }
        bytes.push(b);
        addr += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn read_path(machine: &Machine, reg: GpReg) -> String {
    let addr = Memory::linear(machine.ds(), machine.regs.get(reg));
    read_cstring(machine, addr).replace('\\', "/")
}
