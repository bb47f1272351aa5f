//! Turning a program image on disk into a freshly-initialized `Machine`: building the PSP,
//! copying the image into place, patching relocations, and pointing CS:IP/SS:SP at the
//! program's entry. Two executable shapes are recognized, the flat "COM"-style image and the
//! relocatable "EXE"-style image with its own header.

use crate::error::{EmulatorError, Result};
use crate::memory::Memory;
use crate::processor::Machine;
use crate::registers::{GpReg, SegReg};

const MAX_FLAT_IMAGE: usize = 0xFF00; // 65,280 bytes: one segment minus the PSP and one page

const RELOC_SIGNATURE_MZ: u16 = 0x5A4D;
const RELOC_SIGNATURE_ZM: u16 = 0x4D5A;
const MIN_RELOC_HEADER: usize = 28;
const PARAGRAPH: u16 = 16;

/// Builds the 256-byte Program Segment Prefix at `segment:0`.
fn write_psp(machine: &mut Machine, segment: u16, top_of_memory_paragraph: u16) {
    let base = Memory::linear(segment, 0);
    machine.memory.write_u8(base, 0xCD); // INT 20h terminate stub
    machine.memory.write_u8(base + 1, 0x20);
    machine.memory.write_u16(base + 2, top_of_memory_paragraph);
    machine.memory.write_u16(base + 0x2C, segment); // environment segment: none, point at self
    for i in 0..20 {
        machine.memory.write_u8(base + 0x18 + i, 0xFF);
    }
    machine.memory.write_u8(base + 0x50, 0xCD); // INT 21h/RETF call stub
    machine.memory.write_u8(base + 0x51, 0x21);
    machine.memory.write_u8(base + 0x52, 0xCB);
    for i in 0..32 {
        machine.memory.write_u8(base + 0x18 + 20 + i, 0); // two zeroed default FCBs
    }
    machine.memory.write_u8(base + 0x80, 0);
    machine.memory.write_u8(base + 0x81, 0x0D);
}

fn reset_registers(machine: &mut Machine) {
    machine.regs.reset();
    machine.flags = crate::fields::Flags::new();
    machine.flags.ifl = true;
}

/// Loads a flat, origin-0x100 image — the simplest executable shape this machine runs,
/// equivalent to a COM program.
pub fn load_flat(machine: &mut Machine, image: &[u8], program_segment: u16) -> Result<()> {
    if image.len() > MAX_FLAT_IMAGE {
        return Err(EmulatorError::TooLargeForFlatFormat);
    }
    reset_registers(machine);
    let top_paragraph = program_segment.wrapping_add(0x1000);
    write_psp(machine, program_segment, top_paragraph);
    let base = Memory::linear(program_segment, 0x100);
    machine.memory.write_bytes(base, image);

    machine.set_cs(program_segment);
    machine.set_ds(program_segment);
    machine.set_es(program_segment);
    machine.set_ss(program_segment);
    machine.ip = 0x100;
    machine.set_sp(0xFFFE);
    machine.program_segment = program_segment;
    Ok(())
}

struct RelocHeader {
    last_page_bytes: u16,
    pages: u16,
    reloc_count: u16,
    header_paragraphs: u16,
    min_alloc: u16,
    max_alloc: u16,
    initial_ss: u16,
    initial_sp: u16,
    initial_ip: u16,
    initial_cs: u16,
    reloc_table_offset: u16,
}

fn parse_header(bytes: &[u8]) -> Result<RelocHeader> {
    if bytes.len() < MIN_RELOC_HEADER {
        return Err(EmulatorError::HeaderTooSmall);
    }
    let word = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
    let signature = word(0);
    if signature != RELOC_SIGNATURE_MZ && signature != RELOC_SIGNATURE_ZM {
        return Err(EmulatorError::InvalidSignature);
    }
    Ok(RelocHeader {
        last_page_bytes: word(2),
        pages: word(4),
        reloc_count: word(6),
        header_paragraphs: word(8),
        min_alloc: word(10),
        max_alloc: word(12),
        initial_ss: word(14),
        initial_sp: word(16),
        initial_ip: word(20),
        initial_cs: word(22),
        reloc_table_offset: word(24),
    })
}

/// Loads a relocatable, multi-segment image — equivalent to an EXE program: validates the
/// header, copies the image past its header into place, and patches every relocation table
/// entry by adding the program's load segment.
pub fn load_relocatable(machine: &mut Machine, image: &[u8], program_segment: u16) -> Result<()> {
    let header = parse_header(image)?;
    let _ = (header.min_alloc, header.max_alloc);

    let image_len = if header.last_page_bytes == 0 {
        header.pages as usize * 512
    } else {
        (header.pages.saturating_sub(1)) as usize * 512 + header.last_page_bytes as usize
    };
    let header_bytes = header.header_paragraphs as usize * PARAGRAPH as usize;
    if image.len() < header_bytes {
        return Err(EmulatorError::HeaderTooSmall);
    }
    let body = &image[header_bytes..image.len().min(image_len.max(header_bytes))];

    reset_registers(machine);
    let load_segment = program_segment.wrapping_add(PARAGRAPH); // past the 256-byte PSP
    let top_paragraph = load_segment.wrapping_add(0x1000);
    write_psp(machine, program_segment, top_paragraph);
    machine.memory.write_bytes(Memory::linear(load_segment, 0), body);

    for i in 0..header.reloc_count as usize {
        let entry_addr = header.reloc_table_offset as usize + i * 4;
        if entry_addr + 4 > image.len() {
            break;
        }
        let off = u16::from_le_bytes([image[entry_addr], image[entry_addr + 1]]);
        let seg = u16::from_le_bytes([image[entry_addr + 2], image[entry_addr + 3]]);
        let patch_addr = Memory::linear(load_segment.wrapping_add(seg), off);
        let current = machine.memory.read_u16(patch_addr);
        machine.memory.write_u16(patch_addr, current.wrapping_add(load_segment));
    }

    machine.set_cs(load_segment.wrapping_add(header.initial_cs));
    machine.ip = header.initial_ip;
    machine.set_ss(load_segment.wrapping_add(header.initial_ss));
    machine.set_sp(header.initial_sp);
    machine.set_ds(program_segment);
    machine.set_es(program_segment);
    machine.regs.set(GpReg::Ax, 0);
    let _ = SegReg::Cs;
    machine.program_segment = program_segment;
    Ok(())
}

/// Picks a format by signature and loads it; used by the CLI and shell `RUN`/`EXEC` command.
pub fn load(machine: &mut Machine, image: &[u8], program_segment: u16) -> Result<()> {
    if image.is_empty() {
        return Err(EmulatorError::FileTooSmall);
    }
    if image.len() >= 2 {
        let signature = u16::from_le_bytes([image[0], image[1]]);
        if signature == RELOC_SIGNATURE_MZ || signature == RELOC_SIGNATURE_ZM {
            return load_relocatable(machine, image, program_segment);
        }
    }
    load_flat(machine, image, program_segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_lands_at_offset_0x100_with_ip_there() {
        let mut machine = Machine::new();
        let image = vec![0xB0, 0x05]; // MOV AL, 5
        load_flat(&mut machine, &image, 0x1000).unwrap();
        assert_eq!(machine.ip, 0x100);
        assert_eq!(machine.cs(), 0x1000);
        assert_eq!(machine.sp(), 0xFFFE);
        let addr = Memory::linear(0x1000, 0x100);
        assert_eq!(machine.memory.read_u8(addr), 0xB0);
    }

    #[test]
    fn oversized_flat_image_is_rejected() {
        let mut machine = Machine::new();
        let image = vec![0u8; MAX_FLAT_IMAGE + 1];
        assert!(matches!(load_flat(&mut machine, &image, 0x1000), Err(EmulatorError::TooLargeForFlatFormat)));
    }

    #[test]
    fn relocatable_header_below_minimum_size_is_rejected() {
        let mut machine = Machine::new();
        let image = vec![0x4D, 0x5A, 0, 0];
        assert!(matches!(load_relocatable(&mut machine, &image, 0x1000), Err(EmulatorError::HeaderTooSmall)));
    }

    #[test]
    fn unrecognized_signature_is_rejected() {
        let mut machine = Machine::new();
        let mut image = vec![0u8; MIN_RELOC_HEADER];
        image[0] = 0x00;
        image[1] = 0x00;
        assert!(matches!(load_relocatable(&mut machine, &image, 0x1000), Err(EmulatorError::InvalidSignature)));
    }
}
