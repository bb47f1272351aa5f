// This is where the dirty grunt work of making sense of our binary input happens.
//
// Decoding reads only the instruction stream and the register values needed to compute an
// effective address (base/index registers, DS/SS) — it never writes machine state. `Machine`
// is borrowed immutably for the whole of `decode`, the same way the teacher's `InstructionDecoder`
// never mutates the CPU it reads from.

use crate::addressing::{register_field_handle, rm_handle, ModRm};
use crate::fields::{Condition, OpResult, Size};
use crate::instructions::{
    ArithOp, Decoded, FlagBit, Instruction, LoopKind, OperandSrc, ShiftCount, ShiftOp, StringOp, UnaryOp,
};
use crate::memory::Memory;
use crate::processor::Machine;
use crate::registers::{GpReg, SegReg};

struct Cursor<'a> {
    memory: &'a Memory,
    pos: u32,
    start: u32,
}

impl<'a> Cursor<'a> {
    fn new(memory: &'a Memory, start: u32) -> Self {
        Cursor { memory, pos: start, start }
    }

    fn byte(&mut self) -> u8 {
        let b = self.memory.read_u8(self.pos);
        self.pos += 1;
        b
    }

    fn word(&mut self) -> u16 {
        let lo = self.byte() as u16;
        let hi = self.byte() as u16;
        lo | (hi << 8)
    }

    fn imm(&mut self, size: Size) -> OpResult {
        match size {
            Size::Byte => OpResult::Byte(self.byte()),
            Size::Word => OpResult::Word(self.word()),
        }
    }

    fn modrm(&mut self) -> (ModRm, i16) {
        let byte = self.byte();
        let modrm = ModRm::decode(byte);
        let disp = match modrm.displacement_length() {
            0 => 0,
            1 => (self.byte() as i8) as i16,
            2 => self.word() as i16,
            _ => unreachable!(),
        };
        (modrm, disp)
    }

    fn consumed(&self) -> u16 {
        (self.pos - self.start) as u16
    }
}

fn size_of(opcode: u8) -> Size {
    if opcode & 0x01 == 0 {
        Size::Byte
    } else {
        Size::Word
    }
}

/// Decodes the instruction at `machine`'s current `cs:ip`, resolving any ModR/M operand
/// against the register values in force right now. Nothing else runs between this call and
/// the matching `execute`, so resolving eagerly is sound — the teacher's decoder does the
/// same for its own addressing modes.
pub fn decode(machine: &Machine) -> Decoded {
    let base = machine.code_address();
    let mut cursor = Cursor::new(&machine.memory, base);
    let ds = machine.ds();
    let ss = machine.ss();

    let opcode = cursor.byte();
    let kind = decode_opcode(machine, &mut cursor, opcode, ds, ss, machine.ip);
    Decoded { kind, length: cursor.consumed() }
}

fn decode_opcode(machine: &Machine, cursor: &mut Cursor, opcode: u8, ds: u16, ss: u16, ip: u16) -> Instruction {
    let regs = &machine.regs;
    match opcode {
        0x90 => Instruction::Nop,
        0xF4 => Instruction::Hlt,
        0xF8 => Instruction::ClearFlag(FlagBit::Carry),
        0xF9 => Instruction::SetFlag(FlagBit::Carry),
        0xFC => Instruction::ClearFlag(FlagBit::Direction),
        0xFD => Instruction::SetFlag(FlagBit::Direction),
        0xFA => Instruction::ClearFlag(FlagBit::Interrupt),
        0xFB => Instruction::SetFlag(FlagBit::Interrupt),
        0xF5 => Instruction::Cmc,
        0x98 => Instruction::Cbw,
        0x99 => Instruction::Cwd,
        0xD7 => Instruction::Xlat,
        0xF2 => Instruction::SetRepPrefix(Some(false)),
        0xF3 => Instruction::SetRepPrefix(Some(true)),

        0xA4 => Instruction::StringOp { op: StringOp::Movs, size: Size::Byte },
        0xA5 => Instruction::StringOp { op: StringOp::Movs, size: Size::Word },
        0xA6 => Instruction::StringOp { op: StringOp::Cmps, size: Size::Byte },
        0xA7 => Instruction::StringOp { op: StringOp::Cmps, size: Size::Word },
        0xAA => Instruction::StringOp { op: StringOp::Stos, size: Size::Byte },
        0xAB => Instruction::StringOp { op: StringOp::Stos, size: Size::Word },
        0xAC => Instruction::StringOp { op: StringOp::Lods, size: Size::Byte },
        0xAD => Instruction::StringOp { op: StringOp::Lods, size: Size::Word },
        0xAE => Instruction::StringOp { op: StringOp::Scas, size: Size::Byte },
        0xAF => Instruction::StringOp { op: StringOp::Scas, size: Size::Word },

        0x50..=0x57 => Instruction::PushReg(GpReg::from_bits(opcode - 0x50)),
        0x58..=0x5F => Instruction::PopReg(GpReg::from_bits(opcode - 0x58)),
        0x06 => Instruction::PushSeg(SegReg::Es),
        0x07 => Instruction::PopSeg(SegReg::Es),
        0x0E => Instruction::PushSeg(SegReg::Cs),
        0x16 => Instruction::PushSeg(SegReg::Ss),
        0x17 => Instruction::PopSeg(SegReg::Ss),
        0x1E => Instruction::PushSeg(SegReg::Ds),
        0x1F => Instruction::PopSeg(SegReg::Ds),

        0x40..=0x47 => Instruction::IncReg(GpReg::from_bits(opcode - 0x40)),
        0x48..=0x4F => Instruction::DecReg(GpReg::from_bits(opcode - 0x48)),

        0x9C => Instruction::Pushf,
        0x9D => Instruction::Popf,
        0x9F => Instruction::Lahf,
        0x9E => Instruction::Sahf,

        0xC3 => Instruction::RetNear(0),
        0xC2 => Instruction::RetNear(cursor.word()),
        0xCB => Instruction::RetFar(0),
        0xCA => Instruction::RetFar(cursor.word()),
        0xCC => Instruction::Int3,
        0xCE => Instruction::Into,
        0xCF => Instruction::Iret,

        // ADD/OR/ADC/SBB/AND/SUB/XOR/CMP, ModR/M forms: 00-3F excluding the segment
        // push/pop bytes already matched above and the accumulator-immediate forms below.
        0x00..=0x3D if is_arith_block(opcode) => decode_arith_block(cursor, regs, opcode, ds, ss),

        0x84 | 0x85 => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, size, modrm, disp);
            let src = register_field_handle(regs, size, modrm.reg);
            Instruction::Arith { op: ArithOp::Test, size, dest, src: OperandSrc::Handle(src) }
        }
        0xA8 => {
            let imm = cursor.imm(Size::Byte);
            Instruction::Arith {
                op: ArithOp::Test,
                size: Size::Byte,
                dest: register_field_handle(regs, Size::Byte, 0),
                src: OperandSrc::Imm(imm),
            }
        }
        0xA9 => {
            let imm = cursor.imm(Size::Word);
            Instruction::Arith {
                op: ArithOp::Test,
                size: Size::Word,
                dest: register_field_handle(regs, Size::Word, 0),
                src: OperandSrc::Imm(imm),
            }
        }

        0x88..=0x8B => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let rm = rm_handle(regs, ds, ss, size, modrm, disp);
            let reg = register_field_handle(regs, size, modrm.reg);
            // bit 1 of the opcode selects direction: reg-is-source (0x88/0x89) or
            // reg-is-destination (0x8A/0x8B).
            if opcode & 0x02 == 0 {
                Instruction::Mov { size, dest: rm, src: OperandSrc::Handle(reg) }
            } else {
                Instruction::Mov { size, dest: reg, src: OperandSrc::Handle(rm) }
            }
        }
        0x8C => {
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, Size::Word, modrm, disp);
            Instruction::MovRmFromSeg { dest, seg: seg_from_field(modrm.reg) }
        }
        0x8E => {
            let (modrm, disp) = cursor.modrm();
            let src = rm_handle(regs, ds, ss, Size::Word, modrm, disp);
            Instruction::MovSegFromRm { seg: seg_from_field(modrm.reg), src }
        }
        0x8D => {
            let (modrm, disp) = cursor.modrm();
            let dest = register_field_handle(regs, Size::Word, modrm.reg);
            Instruction::Lea { dest, address: compute_offset(regs, modrm.md, modrm.rm, disp) }
        }
        0x86 | 0x87 => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let rm = rm_handle(regs, ds, ss, size, modrm, disp);
            let reg = register_field_handle(regs, size, modrm.reg);
            Instruction::Xchg { size, a: rm, b: reg }
        }
        0x91..=0x97 => Instruction::Xchg {
            size: Size::Word,
            a: register_field_handle(regs, Size::Word, 0),
            b: register_field_handle(regs, Size::Word, opcode - 0x90),
        },

        0xB0..=0xB7 => {
            let imm = cursor.imm(Size::Byte);
            Instruction::Mov {
                size: Size::Byte,
                dest: register_field_handle(regs, Size::Byte, opcode - 0xB0),
                src: OperandSrc::Imm(imm),
            }
        }
        0xB8..=0xBF => {
            let imm = cursor.imm(Size::Word);
            Instruction::Mov {
                size: Size::Word,
                dest: register_field_handle(regs, Size::Word, opcode - 0xB8),
                src: OperandSrc::Imm(imm),
            }
        }
        0xC6 | 0xC7 => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, size, modrm, disp);
            let imm = cursor.imm(size);
            Instruction::Mov { size, dest, src: OperandSrc::Imm(imm) }
        }

        0xA0 => {
            let addr = Memory::linear(ds, cursor.word());
            Instruction::Mov {
                size: Size::Byte,
                dest: register_field_handle(regs, Size::Byte, 0),
                src: OperandSrc::Handle(crate::addressing::MemoryHandle::Mem(addr)),
            }
        }
        0xA1 => {
            let addr = Memory::linear(ds, cursor.word());
            Instruction::Mov {
                size: Size::Word,
                dest: register_field_handle(regs, Size::Word, 0),
                src: OperandSrc::Handle(crate::addressing::MemoryHandle::Mem(addr)),
            }
        }
        0xA2 => {
            let addr = Memory::linear(ds, cursor.word());
            Instruction::Mov {
                size: Size::Byte,
                dest: crate::addressing::MemoryHandle::Mem(addr),
                src: OperandSrc::Handle(register_field_handle(regs, Size::Byte, 0)),
            }
        }
        0xA3 => {
            let addr = Memory::linear(ds, cursor.word());
            Instruction::Mov {
                size: Size::Word,
                dest: crate::addressing::MemoryHandle::Mem(addr),
                src: OperandSrc::Handle(register_field_handle(regs, Size::Word, 0)),
            }
        }

        0x80..=0x83 => {
            let size = if opcode == 0x80 || opcode == 0x82 { Size::Byte } else { Size::Word };
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, size, modrm, disp);
            let imm = if opcode == 0x83 {
                OpResult::Word((cursor.byte() as i8) as i16 as u16)
            } else {
                cursor.imm(size)
            };
            Instruction::Arith { op: ArithOp::from_reg_field(modrm.reg), size, dest, src: OperandSrc::Imm(imm) }
        }

        0xD0..=0xD3 => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, size, modrm, disp);
            let count = if opcode < 0xD2 { ShiftCount::One } else { ShiftCount::Cl };
            Instruction::Shift { op: ShiftOp::from_reg_field(modrm.reg), size, dest, count }
        }

        0xF6 | 0xF7 => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, size, modrm, disp);
            let op = UnaryOp::from_reg_field(modrm.reg);
            let imm = if op == UnaryOp::TestImm { Some(cursor.imm(size)) } else { None };
            Instruction::Unary { op, size, dest, imm }
        }

        0xFE => {
            let (modrm, disp) = cursor.modrm();
            let dest = rm_handle(regs, ds, ss, Size::Byte, modrm, disp);
            Instruction::IncDecRm { inc: modrm.reg == 0, size: Size::Byte, dest }
        }
        0xFF => {
            let (modrm, disp) = cursor.modrm();
            match modrm.reg {
                0 | 1 => {
                    let dest = rm_handle(regs, ds, ss, Size::Word, modrm, disp);
                    Instruction::IncDecRm { inc: modrm.reg == 0, size: Size::Word, dest }
                }
                2 => Instruction::CallRm(rm_handle(regs, ds, ss, Size::Word, modrm, disp)),
                4 => Instruction::JmpRm(rm_handle(regs, ds, ss, Size::Word, modrm, disp)),
                6 => Instruction::PushRm(rm_handle(regs, ds, ss, Size::Word, modrm, disp)),
                _ => Instruction::Unknown(opcode),
            }
        }

        0x70..=0x7F => {
            let disp = cursor.byte() as i8;
            let target = relative_target(ip, cursor, disp as i16);
            Instruction::CondJump { cond: Condition::from_opcode_nibble(opcode), target }
        }
        0xE0 => loop_instruction(cursor, ip, LoopKind::Loopne),
        0xE1 => loop_instruction(cursor, ip, LoopKind::Loope),
        0xE2 => loop_instruction(cursor, ip, LoopKind::Loop),
        0xE3 => loop_instruction(cursor, ip, LoopKind::Jcxz),

        0xEB => {
            let disp = cursor.byte() as i8;
            Instruction::JmpNear(relative_target(ip, cursor, disp as i16))
        }
        0xE9 => {
            let disp = cursor.word() as i16;
            Instruction::JmpNear(relative_target(ip, cursor, disp))
        }
        0xE8 => {
            let disp = cursor.word() as i16;
            Instruction::CallNear(relative_target(ip, cursor, disp))
        }
        0xEA => {
            let offset = cursor.word();
            let segment = cursor.word();
            Instruction::JmpFar { segment, offset }
        }
        0x9A => {
            let offset = cursor.word();
            let segment = cursor.word();
            Instruction::CallFar { segment, offset }
        }

        0xCD => Instruction::Int(cursor.byte()),
        0xD4 => Instruction::Aam(cursor.byte()),
        0xD5 => Instruction::Aad(cursor.byte()),

        other => Instruction::Unknown(other),
    }
}

fn is_arith_block(opcode: u8) -> bool {
    // Each of the eight ADD/OR/ADC/SBB/AND/SUB/XOR/CMP groups occupies a contiguous run of
    // six opcodes (4 ModR/M forms + 2 accumulator-immediate forms); the four bytes ending in
    // 0x6/0x7 or 0xE/0xF within each group are the segment push/pop and unused slots already
    // matched earlier, so only the remaining low nibbles here carry an arithmetic form.
    matches!(opcode & 0x07, 0..=5)
}

fn decode_arith_block(cursor: &mut Cursor, regs: &crate::registers::Registers, opcode: u8, ds: u16, ss: u16) -> Instruction {
    let op = ArithOp::from_reg_field(opcode >> 3);
    let low = opcode & 0x07;
    match low {
        0x04 => {
            let imm = cursor.imm(Size::Byte);
            Instruction::Arith {
                op,
                size: Size::Byte,
                dest: register_field_handle(regs, Size::Byte, 0),
                src: OperandSrc::Imm(imm),
            }
        }
        0x05 => {
            let imm = cursor.imm(Size::Word);
            Instruction::Arith {
                op,
                size: Size::Word,
                dest: register_field_handle(regs, Size::Word, 0),
                src: OperandSrc::Imm(imm),
            }
        }
        _ => {
            let size = size_of(opcode);
            let (modrm, disp) = cursor.modrm();
            let rm = rm_handle(regs, ds, ss, size, modrm, disp);
            let reg = register_field_handle(regs, size, modrm.reg);
            if opcode & 0x02 == 0 {
                Instruction::Arith { op, size, dest: rm, src: OperandSrc::Handle(reg) }
            } else {
                Instruction::Arith { op, size, dest: reg, src: OperandSrc::Handle(rm) }
            }
        }
    }
}

fn seg_from_field(field: u8) -> SegReg {
    match field & 0x03 {
        0 => SegReg::Es,
        1 => SegReg::Cs,
        2 => SegReg::Ss,
        3 => SegReg::Ds,
        _ => unreachable!(),
    }
}

fn compute_offset(regs: &crate::registers::Registers, md: u8, rm: u8, disp: i16) -> u16 {
    let bx = regs.get(GpReg::Bx);
    let bp = regs.get(GpReg::Bp);
    let si = regs.get(GpReg::Si);
    let di = regs.get(GpReg::Di);
    let disp = disp as u16;
    let base = match rm {
        0 => bx.wrapping_add(si),
        1 => bx.wrapping_add(di),
        2 => bp.wrapping_add(si),
        3 => bp.wrapping_add(di),
        4 => si,
        5 => di,
        6 => {
            if md == 0 {
                0
            } else {
                bp
            }
        }
        7 => bx,
        _ => unreachable!(),
    };
    base.wrapping_add(disp)
}

fn loop_instruction(cursor: &mut Cursor, ip: u16, kind: LoopKind) -> Instruction {
    let disp = cursor.byte() as i8;
    Instruction::Loop { kind, target: relative_target(ip, cursor, disp as i16) }
}

/// A relative branch's target: the instruction pointer immediately after the branch's own
/// bytes, plus its signed displacement — both wrapping within the 16-bit code segment.
fn relative_target(ip: u16, cursor: &Cursor, disp: i16) -> u16 {
    ip.wrapping_add(cursor.consumed()).wrapping_add(disp as u16)
}

/// A short, human-readable mnemonic for the debugger's prompt and the shell's `DISASM`
/// verb. Not a full disassembler — it names the operation, not every resolved operand.
pub fn mnemonic(decoded: &Decoded) -> String {
    use Instruction::*;
    match &decoded.kind {
        Nop => "NOP".into(),
        Hlt => "HLT".into(),
        ClearFlag(_) => "CLC/CLD/CLI".into(),
        SetFlag(_) => "STC/STD/STI".into(),
        Cmc => "CMC".into(),
        Cbw => "CBW".into(),
        Cwd => "CWD".into(),
        Xlat => "XLAT".into(),
        SetRepPrefix(Some(true)) => "REPE".into(),
        SetRepPrefix(Some(false)) => "REPNE".into(),
        SetRepPrefix(None) => "REP".into(),
        StringOp { op, size } => format!("{:?} ({:?})", op, size),
        PushReg(r) => format!("PUSH {:?}", r),
        PopReg(r) => format!("POP {:?}", r),
        PushSeg(s) => format!("PUSH {:?}", s),
        PopSeg(s) => format!("POP {:?}", s),
        IncReg(r) => format!("INC {:?}", r),
        DecReg(r) => format!("DEC {:?}", r),
        Pushf => "PUSHF".into(),
        Popf => "POPF".into(),
        Lahf => "LAHF".into(),
        Sahf => "SAHF".into(),
        RetNear(0) => "RET".into(),
        RetNear(n) => format!("RET {:#x}", n),
        RetFar(0) => "RETF".into(),
        RetFar(n) => format!("RETF {:#x}", n),
        Int3 => "INT3".into(),
        Into => "INTO".into(),
        Iret => "IRET".into(),
        Arith { op, size, .. } => format!("{:?} ({:?})", op, size),
        Mov { size, .. } => format!("MOV ({:?})", size),
        MovSegFromRm { seg, .. } => format!("MOV {:?}, r/m", seg),
        MovRmFromSeg { seg, .. } => format!("MOV r/m, {:?}", seg),
        Xchg { size, .. } => format!("XCHG ({:?})", size),
        Lea { address, .. } => format!("LEA {:#06x}", address),
        Shift { op, size, .. } => format!("{:?} ({:?})", op, size),
        Unary { op, size, .. } => format!("{:?} ({:?})", op, size),
        IncDecRm { inc, size, .. } => format!("{} ({:?})", if *inc { "INC" } else { "DEC" }, size),
        CallRm(_) => "CALL r/m".into(),
        JmpRm(_) => "JMP r/m".into(),
        PushRm(_) => "PUSH r/m".into(),
        CondJump { cond, target } => format!("J{:?} {:#06x}", cond, target),
        Loop { kind, target } => format!("{:?} {:#06x}", kind, target),
        JmpNear(target) => format!("JMP {:#06x}", target),
        CallNear(target) => format!("CALL {:#06x}", target),
        CallFar { segment, offset } => format!("CALL {:#06x}:{:#06x}", segment, offset),
        JmpFar { segment, offset } => format!("JMP {:#06x}:{:#06x}", segment, offset),
        Int(vector) => format!("INT {:#04x}", vector),
        Aam(base) => format!("AAM {:#04x}", base),
        Aad(base) => format!("AAD {:#04x}", base),
        Unknown(opcode) => format!("??? ({:#04x})", opcode),
    }
}
