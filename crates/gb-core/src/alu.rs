//! Arithmetic and logic unit
//!
//! Pure functions computing results and condition flags for every SM83
//! arithmetic, logical, rotate and bit operation. The processor core calls
//! these once it has its operands latched; nothing here touches memory.

use crate::cpu::Flags;
use crate::opcodes::{AluOp, RotOp};

/// Run one of the eight accumulator operations (`ADD`..`CP`).
///
/// For `Cp` the returned value is the unchanged accumulator.
pub fn accumulate(op: AluOp, a: u8, value: u8, flags: Flags) -> (u8, Flags) {
    match op {
        AluOp::Add => add8(a, value, false),
        AluOp::Adc => add8(a, value, flags.carry()),
        AluOp::Sub => sub8(a, value, false),
        AluOp::Sbc => sub8(a, value, flags.carry()),
        AluOp::And => {
            let result = a & value;
            (result, Flags::from_bits(result == 0, false, true, false))
        }
        AluOp::Xor => {
            let result = a ^ value;
            (result, Flags::from_bits(result == 0, false, false, false))
        }
        AluOp::Or => {
            let result = a | value;
            (result, Flags::from_bits(result == 0, false, false, false))
        }
        AluOp::Cp => {
            let (_, flags) = sub8(a, value, false);
            (a, flags)
        }
    }
}

/// 8-bit addition with optional carry in.
pub fn add8(a: u8, b: u8, carry_in: bool) -> (u8, Flags) {
    let c = carry_in as u16;
    let sum = a as u16 + b as u16 + c;
    let half = (a & 0x0F) as u16 + (b & 0x0F) as u16 + c > 0x0F;
    let result = sum as u8;
    (result, Flags::from_bits(result == 0, false, half, sum > 0xFF))
}

/// 8-bit subtraction with optional borrow in.
pub fn sub8(a: u8, b: u8, carry_in: bool) -> (u8, Flags) {
    let c = carry_in as i16;
    let diff = a as i16 - b as i16 - c;
    let half = ((a & 0x0F) as i16) - ((b & 0x0F) as i16) - c < 0;
    let result = diff as u8;
    (result, Flags::from_bits(result == 0, true, half, diff < 0))
}

/// `INC r`: carry is left untouched.
pub fn inc8(value: u8, flags: Flags) -> (u8, Flags) {
    let result = value.wrapping_add(1);
    let half = value & 0x0F == 0x0F;
    (result, Flags::from_bits(result == 0, false, half, flags.carry()))
}

/// `DEC r`: carry is left untouched.
pub fn dec8(value: u8, flags: Flags) -> (u8, Flags) {
    let result = value.wrapping_sub(1);
    let half = value & 0x0F == 0x00;
    (result, Flags::from_bits(result == 0, true, half, flags.carry()))
}

/// Half-carry and carry of a 16-bit add, computed by comparing the partial
/// sums against their overflow thresholds.
pub fn add16_carries_threshold(a: u16, b: u16) -> (bool, bool) {
    let half = (a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF;
    let carry = a as u32 + b as u32 > 0xFFFF;
    (half, carry)
}

/// Half-carry and carry of a 16-bit add, recovered bit by bit from the carry
/// vector `a ^ b ^ sum`: bit 12 holds the carry out of bit 11, bit 16 the
/// carry out of bit 15.
pub fn add16_carries_by_bits(a: u16, b: u16) -> (bool, bool) {
    let (a, b) = (a as u32, b as u32);
    let carries = a ^ b ^ (a + b);
    (carries & 0x1000 != 0, carries & 0x1_0000 != 0)
}

/// `ADD HL,rr`: zero is preserved, subtract cleared.
pub fn add16(hl: u16, value: u16, flags: Flags) -> (u16, Flags) {
    let (half, carry) = add16_carries_threshold(hl, value);
    (
        hl.wrapping_add(value),
        Flags::from_bits(flags.zero(), false, half, carry),
    )
}

/// `ADD SP,e` and `LD HL,SP+e`.
///
/// Carries come from the unsigned add of the pointer's low byte and the raw
/// immediate; zero and subtract are always cleared.
pub fn add_sp_offset(sp: u16, offset: u8) -> (u16, Flags) {
    let result = sp.wrapping_add(offset as i8 as i16 as u16);
    let low = (sp & 0x00FF) as u8;
    let half = (low & 0x0F) + (offset & 0x0F) > 0x0F;
    let carry = low as u16 + offset as u16 > 0xFF;
    (result, Flags::from_bits(false, false, half, carry))
}

/// Decimal adjust after a BCD addition or subtraction.
pub fn daa(a: u8, flags: Flags) -> (u8, Flags) {
    let mut result = a;
    let mut carry = flags.carry();
    if !flags.subtract() {
        if carry || result > 0x99 {
            result = result.wrapping_add(0x60);
            carry = true;
        }
        if flags.half_carry() || result & 0x0F > 0x09 {
            result = result.wrapping_add(0x06);
        }
    } else {
        if carry {
            result = result.wrapping_sub(0x60);
        }
        if flags.half_carry() {
            result = result.wrapping_sub(0x06);
        }
    }
    (result, Flags::from_bits(result == 0, flags.subtract(), false, carry))
}

/// Prefixed rotates and shifts. Zero reflects the result.
pub fn rotate(op: RotOp, value: u8, flags: Flags) -> (u8, Flags) {
    let (result, carry) = match op {
        RotOp::Rlc => (value.rotate_left(1), value & 0x80 != 0),
        RotOp::Rrc => (value.rotate_right(1), value & 0x01 != 0),
        RotOp::Rl => ((value << 1) | flags.carry() as u8, value & 0x80 != 0),
        RotOp::Rr => ((value >> 1) | ((flags.carry() as u8) << 7), value & 0x01 != 0),
        RotOp::Sla => (value << 1, value & 0x80 != 0),
        RotOp::Sra => ((value >> 1) | (value & 0x80), value & 0x01 != 0),
        RotOp::Swap => (value.rotate_left(4), false),
        RotOp::Srl => (value >> 1, value & 0x01 != 0),
    };
    (result, Flags::from_bits(result == 0, false, false, carry))
}

/// Unprefixed accumulator rotates (`RLCA`, `RRCA`, `RLA`, `RRA`) always clear zero.
pub fn rotate_accumulator(op: RotOp, a: u8, flags: Flags) -> (u8, Flags) {
    let (result, flags) = rotate(op, a, flags);
    (result, Flags::from_bits(false, false, false, flags.carry()))
}

/// `BIT b,r`: carry is preserved.
pub fn bit(index: u8, value: u8, flags: Flags) -> Flags {
    let clear = value & (1 << index) == 0;
    Flags::from_bits(clear, false, true, flags.carry())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(bits: u8) -> Flags {
        Flags::new(bits)
    }

    #[test]
    fn test_add8_half_and_full_carry() {
        let (r, f) = add8(0x0F, 0x01, false);
        assert_eq!(r, 0x10);
        assert!(f.half_carry() && !f.carry() && !f.zero());

        let (r, f) = add8(0xFF, 0x01, false);
        assert_eq!(r, 0x00);
        assert!(f.zero() && f.half_carry() && f.carry());

        let (r, f) = add8(0x0E, 0x01, true);
        assert_eq!(r, 0x10);
        assert!(f.half_carry());
    }

    #[test]
    fn test_sub8_borrow() {
        let (r, f) = sub8(0x10, 0x01, false);
        assert_eq!(r, 0x0F);
        assert!(f.subtract() && f.half_carry() && !f.carry());

        let (r, f) = sub8(0x00, 0x01, false);
        assert_eq!(r, 0xFF);
        assert!(f.carry() && f.half_carry());

        let (r, f) = sub8(0x01, 0x00, true);
        assert_eq!(r, 0x00);
        assert!(f.zero() && !f.carry());
    }

    #[test]
    fn test_compare_keeps_accumulator() {
        let (r, f) = accumulate(AluOp::Cp, 0x42, 0x42, Flags::default());
        assert_eq!(r, 0x42);
        assert!(f.zero() && f.subtract());
    }

    #[test]
    fn test_inc_dec_preserve_carry() {
        let (r, f) = inc8(0xFF, flags(Flags::CARRY));
        assert_eq!(r, 0);
        assert!(f.zero() && f.half_carry() && f.carry());

        let (r, f) = dec8(0x01, Flags::default());
        assert_eq!(r, 0);
        assert!(f.zero() && f.subtract() && !f.carry());
    }

    #[test]
    fn test_add16_carries() {
        let (r, f) = add16(0x0FFF, 0x0001, flags(Flags::ZERO));
        assert_eq!(r, 0x1000);
        assert!(f.half_carry() && !f.carry() && f.zero());

        let (r, f) = add16(0xFFFF, 0x0001, Flags::default());
        assert_eq!(r, 0x0000);
        assert!(f.half_carry() && f.carry() && !f.zero());
    }

    #[test]
    fn test_add_sp_offset_uses_low_byte() {
        let (r, f) = add_sp_offset(0xFFF8, 0x08);
        assert_eq!(r, 0x0000);
        assert!(f.half_carry() && f.carry() && !f.zero());

        let (r, f) = add_sp_offset(0x0001, 0xFF);
        assert_eq!(r, 0x0000);
        assert!(f.half_carry() && f.carry());
    }

    #[test]
    fn test_daa_after_add() {
        // 0x15 + 0x27 = 0x3C -> 0x42
        let (sum, f) = add8(0x15, 0x27, false);
        let (r, f) = daa(sum, f);
        assert_eq!(r, 0x42);
        assert!(!f.carry() && !f.half_carry());
    }

    #[test]
    fn test_daa_after_subtract() {
        // 0x42 - 0x15 = 0x2D -> 0x27
        let (diff, f) = sub8(0x42, 0x15, false);
        let (r, f) = daa(diff, f);
        assert_eq!(r, 0x27);
        assert!(f.subtract());
    }

    #[test]
    fn test_rotates() {
        let (r, f) = rotate(RotOp::Rlc, 0x80, Flags::default());
        assert_eq!(r, 0x01);
        assert!(f.carry());

        let (r, f) = rotate(RotOp::Rr, 0x01, Flags::default());
        assert_eq!(r, 0x00);
        assert!(f.carry() && f.zero());

        let (r, f) = rotate_accumulator(RotOp::Rr, 0x01, Flags::default());
        assert_eq!(r, 0x00);
        assert!(f.carry() && !f.zero());

        let (r, _) = rotate(RotOp::Swap, 0xAB, Flags::default());
        assert_eq!(r, 0xBA);

        let (r, _) = rotate(RotOp::Sra, 0x81, Flags::default());
        assert_eq!(r, 0xC0);
    }

    #[test]
    fn test_bit() {
        let f = bit(7, 0x7F, flags(Flags::CARRY));
        assert!(f.zero() && f.half_carry() && f.carry() && !f.subtract());
        assert!(!bit(0, 0x01, Flags::default()).zero());
    }
}
