//! Instruction decoding
//!
//! Maps each opcode byte of the primary table and of the `CB`-prefixed table
//! to a decoded instruction. Decoding is a single `match`; execution timing
//! lives in the processor core and emerges from the memory accesses each
//! instruction schedules.

use std::fmt;

/// 8-bit registers addressable by instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    B,
    C,
    D,
    E,
    H,
    L,
    A,
}

/// An 8-bit operand: a register or the byte at `(HL)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg8),
    Indirect,
}

/// 16-bit register pairs used by loads and 16-bit arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    BC,
    DE,
    HL,
    SP,
}

/// Register pairs used by `PUSH`/`POP`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPair {
    BC,
    DE,
    HL,
    AF,
}

/// Pointer registers used by `LD (rr),A` / `LD A,(rr)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    BC,
    DE,
    /// `(HL+)`
    HlInc,
    /// `(HL-)`
    HlDec,
}

/// Branch conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    NotZero,
    Zero,
    NotCarry,
    Carry,
}

/// Accumulator operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

/// Rotate and shift operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

/// Decoded primary-table instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    /// `LD r,r'`, `LD r,(HL)`, `LD (HL),r`
    Ld { dst: Operand, src: Operand },
    /// `LD r,n`, `LD (HL),n`
    LdImm { dst: Operand },
    /// `LD rr,nn`
    LdImm16 { dst: Reg16 },
    /// `LD (rr),A`
    StoreA { ptr: Pointer },
    /// `LD A,(rr)`
    LoadA { ptr: Pointer },
    /// `LD (nn),SP`
    StoreSp,
    /// `LD (nn),A`
    StoreAbs,
    /// `LD A,(nn)`
    LoadAbs,
    /// `LDH (n),A`
    StoreHighImm,
    /// `LDH A,(n)`
    LoadHighImm,
    /// `LDH (C),A`
    StoreHighC,
    /// `LDH A,(C)`
    LoadHighC,
    LdSpHl,
    /// `LD HL,SP+e`
    LdHlSpOffset,
    Inc { dst: Operand },
    Dec { dst: Operand },
    Inc16 { dst: Reg16 },
    Dec16 { dst: Reg16 },
    AddHl { src: Reg16 },
    /// `ADD SP,e`
    AddSpOffset,
    Alu { op: AluOp, src: Operand },
    AluImm { op: AluOp },
    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Jp { cond: Option<Cond> },
    JpHl,
    Jr { cond: Option<Cond> },
    Call { cond: Option<Cond> },
    Ret { cond: Option<Cond> },
    Reti,
    Rst { vector: u8 },
    Push { src: StackPair },
    Pop { dst: StackPair },
    /// `CB` prefix: the next byte selects a [`CbInstr`]
    Prefix,
    /// One of the eleven holes in the opcode map
    Illegal(u8),
}

/// Operation kind of a prefixed instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbOp {
    Rotate(RotOp),
    Bit(u8),
    Res(u8),
    Set(u8),
}

/// Decoded `CB`-table instruction: operation kind, bit index and operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbInstr {
    pub op: CbOp,
    pub target: Operand,
}

const OPERANDS: [Operand; 8] = [
    Operand::Reg(Reg8::B),
    Operand::Reg(Reg8::C),
    Operand::Reg(Reg8::D),
    Operand::Reg(Reg8::E),
    Operand::Reg(Reg8::H),
    Operand::Reg(Reg8::L),
    Operand::Indirect,
    Operand::Reg(Reg8::A),
];

const ALU_OPS: [AluOp; 8] = [
    AluOp::Add,
    AluOp::Adc,
    AluOp::Sub,
    AluOp::Sbc,
    AluOp::And,
    AluOp::Xor,
    AluOp::Or,
    AluOp::Cp,
];

const ROT_OPS: [RotOp; 8] = [
    RotOp::Rlc,
    RotOp::Rrc,
    RotOp::Rl,
    RotOp::Rr,
    RotOp::Sla,
    RotOp::Sra,
    RotOp::Swap,
    RotOp::Srl,
];

fn operand(bits: u8) -> Operand {
    OPERANDS[(bits & 0x07) as usize]
}

impl Instr {
    /// Decode a primary-table opcode
    pub fn decode(opcode: u8) -> Instr {
        use Operand::{Indirect, Reg};
        use Reg8::*;

        match opcode {
            0x00 => Instr::Nop,
            0x01 => Instr::LdImm16 { dst: Reg16::BC },
            0x02 => Instr::StoreA { ptr: Pointer::BC },
            0x03 => Instr::Inc16 { dst: Reg16::BC },
            0x04 => Instr::Inc { dst: Reg(B) },
            0x05 => Instr::Dec { dst: Reg(B) },
            0x06 => Instr::LdImm { dst: Reg(B) },
            0x07 => Instr::Rlca,
            0x08 => Instr::StoreSp,
            0x09 => Instr::AddHl { src: Reg16::BC },
            0x0A => Instr::LoadA { ptr: Pointer::BC },
            0x0B => Instr::Dec16 { dst: Reg16::BC },
            0x0C => Instr::Inc { dst: Reg(C) },
            0x0D => Instr::Dec { dst: Reg(C) },
            0x0E => Instr::LdImm { dst: Reg(C) },
            0x0F => Instr::Rrca,

            0x10 => Instr::Stop,
            0x11 => Instr::LdImm16 { dst: Reg16::DE },
            0x12 => Instr::StoreA { ptr: Pointer::DE },
            0x13 => Instr::Inc16 { dst: Reg16::DE },
            0x14 => Instr::Inc { dst: Reg(D) },
            0x15 => Instr::Dec { dst: Reg(D) },
            0x16 => Instr::LdImm { dst: Reg(D) },
            0x17 => Instr::Rla,
            0x18 => Instr::Jr { cond: None },
            0x19 => Instr::AddHl { src: Reg16::DE },
            0x1A => Instr::LoadA { ptr: Pointer::DE },
            0x1B => Instr::Dec16 { dst: Reg16::DE },
            0x1C => Instr::Inc { dst: Reg(E) },
            0x1D => Instr::Dec { dst: Reg(E) },
            0x1E => Instr::LdImm { dst: Reg(E) },
            0x1F => Instr::Rra,

            0x20 => Instr::Jr { cond: Some(Cond::NotZero) },
            0x21 => Instr::LdImm16 { dst: Reg16::HL },
            0x22 => Instr::StoreA { ptr: Pointer::HlInc },
            0x23 => Instr::Inc16 { dst: Reg16::HL },
            0x24 => Instr::Inc { dst: Reg(H) },
            0x25 => Instr::Dec { dst: Reg(H) },
            0x26 => Instr::LdImm { dst: Reg(H) },
            0x27 => Instr::Daa,
            0x28 => Instr::Jr { cond: Some(Cond::Zero) },
            0x29 => Instr::AddHl { src: Reg16::HL },
            0x2A => Instr::LoadA { ptr: Pointer::HlInc },
            0x2B => Instr::Dec16 { dst: Reg16::HL },
            0x2C => Instr::Inc { dst: Reg(L) },
            0x2D => Instr::Dec { dst: Reg(L) },
            0x2E => Instr::LdImm { dst: Reg(L) },
            0x2F => Instr::Cpl,

            0x30 => Instr::Jr { cond: Some(Cond::NotCarry) },
            0x31 => Instr::LdImm16 { dst: Reg16::SP },
            0x32 => Instr::StoreA { ptr: Pointer::HlDec },
            0x33 => Instr::Inc16 { dst: Reg16::SP },
            0x34 => Instr::Inc { dst: Indirect },
            0x35 => Instr::Dec { dst: Indirect },
            0x36 => Instr::LdImm { dst: Indirect },
            0x37 => Instr::Scf,
            0x38 => Instr::Jr { cond: Some(Cond::Carry) },
            0x39 => Instr::AddHl { src: Reg16::SP },
            0x3A => Instr::LoadA { ptr: Pointer::HlDec },
            0x3B => Instr::Dec16 { dst: Reg16::SP },
            0x3C => Instr::Inc { dst: Reg(A) },
            0x3D => Instr::Dec { dst: Reg(A) },
            0x3E => Instr::LdImm { dst: Reg(A) },
            0x3F => Instr::Ccf,

            // LD (HL),(HL) slot
            0x76 => Instr::Halt,
            0x40..=0x7F => Instr::Ld {
                dst: operand(opcode >> 3),
                src: operand(opcode),
            },
            0x80..=0xBF => Instr::Alu {
                op: ALU_OPS[((opcode >> 3) & 0x07) as usize],
                src: operand(opcode),
            },

            0xC0 => Instr::Ret { cond: Some(Cond::NotZero) },
            0xC1 => Instr::Pop { dst: StackPair::BC },
            0xC2 => Instr::Jp { cond: Some(Cond::NotZero) },
            0xC3 => Instr::Jp { cond: None },
            0xC4 => Instr::Call { cond: Some(Cond::NotZero) },
            0xC5 => Instr::Push { src: StackPair::BC },
            0xC6 => Instr::AluImm { op: AluOp::Add },
            0xC7 => Instr::Rst { vector: 0x00 },
            0xC8 => Instr::Ret { cond: Some(Cond::Zero) },
            0xC9 => Instr::Ret { cond: None },
            0xCA => Instr::Jp { cond: Some(Cond::Zero) },
            0xCB => Instr::Prefix,
            0xCC => Instr::Call { cond: Some(Cond::Zero) },
            0xCD => Instr::Call { cond: None },
            0xCE => Instr::AluImm { op: AluOp::Adc },
            0xCF => Instr::Rst { vector: 0x08 },

            0xD0 => Instr::Ret { cond: Some(Cond::NotCarry) },
            0xD1 => Instr::Pop { dst: StackPair::DE },
            0xD2 => Instr::Jp { cond: Some(Cond::NotCarry) },
            0xD4 => Instr::Call { cond: Some(Cond::NotCarry) },
            0xD5 => Instr::Push { src: StackPair::DE },
            0xD6 => Instr::AluImm { op: AluOp::Sub },
            0xD7 => Instr::Rst { vector: 0x10 },
            0xD8 => Instr::Ret { cond: Some(Cond::Carry) },
            0xD9 => Instr::Reti,
            0xDA => Instr::Jp { cond: Some(Cond::Carry) },
            0xDC => Instr::Call { cond: Some(Cond::Carry) },
            0xDE => Instr::AluImm { op: AluOp::Sbc },
            0xDF => Instr::Rst { vector: 0x18 },

            0xE0 => Instr::StoreHighImm,
            0xE1 => Instr::Pop { dst: StackPair::HL },
            0xE2 => Instr::StoreHighC,
            0xE5 => Instr::Push { src: StackPair::HL },
            0xE6 => Instr::AluImm { op: AluOp::And },
            0xE7 => Instr::Rst { vector: 0x20 },
            0xE8 => Instr::AddSpOffset,
            0xE9 => Instr::JpHl,
            0xEA => Instr::StoreAbs,
            0xEE => Instr::AluImm { op: AluOp::Xor },
            0xEF => Instr::Rst { vector: 0x28 },

            0xF0 => Instr::LoadHighImm,
            0xF1 => Instr::Pop { dst: StackPair::AF },
            0xF2 => Instr::LoadHighC,
            0xF3 => Instr::Di,
            0xF5 => Instr::Push { src: StackPair::AF },
            0xF6 => Instr::AluImm { op: AluOp::Or },
            0xF7 => Instr::Rst { vector: 0x30 },
            0xF8 => Instr::LdHlSpOffset,
            0xF9 => Instr::LdSpHl,
            0xFA => Instr::LoadAbs,
            0xFB => Instr::Ei,
            0xFE => Instr::AluImm { op: AluOp::Cp },
            0xFF => Instr::Rst { vector: 0x38 },

            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                Instr::Illegal(opcode)
            }
        }
    }
}

impl CbInstr {
    /// Decode the byte following a `CB` prefix
    pub fn decode(opcode: u8) -> CbInstr {
        let index = (opcode >> 3) & 0x07;
        let op = match opcode >> 6 {
            0 => CbOp::Rotate(ROT_OPS[index as usize]),
            1 => CbOp::Bit(index),
            2 => CbOp::Res(index),
            _ => CbOp::Set(index),
        };
        CbInstr {
            op,
            target: operand(opcode),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{:?}", reg),
            Operand::Indirect => write!(f, "(HL)"),
        }
    }
}

impl fmt::Display for CbInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            CbOp::Rotate(op) => write!(f, "{} {}", format!("{:?}", op).to_uppercase(), self.target),
            CbOp::Bit(b) => write!(f, "BIT {},{}", b, self.target),
            CbOp::Res(b) => write!(f, "RES {},{}", b, self.target),
            CbOp::Set(b) => write!(f, "SET {},{}", b, self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_opcodes() {
        let illegal: Vec<u8> = (0..=255u8)
            .filter(|&op| matches!(Instr::decode(op), Instr::Illegal(_)))
            .collect();
        assert_eq!(
            illegal,
            vec![0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD]
        );
    }

    #[test]
    fn test_load_block() {
        assert_eq!(
            Instr::decode(0x41),
            Instr::Ld {
                dst: Operand::Reg(Reg8::B),
                src: Operand::Reg(Reg8::C)
            }
        );
        assert_eq!(
            Instr::decode(0x77),
            Instr::Ld {
                dst: Operand::Indirect,
                src: Operand::Reg(Reg8::A)
            }
        );
        assert_eq!(Instr::decode(0x76), Instr::Halt);
    }

    #[test]
    fn test_alu_block() {
        assert_eq!(
            Instr::decode(0xAF),
            Instr::Alu {
                op: AluOp::Xor,
                src: Operand::Reg(Reg8::A)
            }
        );
        assert_eq!(
            Instr::decode(0xBE),
            Instr::Alu {
                op: AluOp::Cp,
                src: Operand::Indirect
            }
        );
    }

    #[test]
    fn test_cb_table() {
        assert_eq!(
            CbInstr::decode(0x7C),
            CbInstr {
                op: CbOp::Bit(7),
                target: Operand::Reg(Reg8::H)
            }
        );
        assert_eq!(
            CbInstr::decode(0x37),
            CbInstr {
                op: CbOp::Rotate(RotOp::Swap),
                target: Operand::Reg(Reg8::A)
            }
        );
        assert_eq!(
            CbInstr::decode(0x86),
            CbInstr {
                op: CbOp::Res(0),
                target: Operand::Indirect
            }
        );
        assert_eq!(
            CbInstr::decode(0xFF),
            CbInstr {
                op: CbOp::Set(7),
                target: Operand::Reg(Reg8::A)
            }
        );
        assert_eq!(CbInstr::decode(0x7C).to_string(), "BIT 7,H");
    }
}
