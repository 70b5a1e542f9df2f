//! CPU module - SM83 implementation
//!
//! The core advances one machine cycle per [`Cpu::tick`]. Every memory access
//! is handed to the [`Bus`] as a scheduled access tagged with the current
//! cycle; the router services it at the end of that cycle and the value lands
//! in one of the CPU's latches, ready for the next cycle. Instruction timing is
//! therefore nothing more than the number of steps each instruction takes.
//!
//! The opcode fetch of the next instruction overlaps with the last cycle of
//! the current one, as on hardware.

use std::fmt;

use log::{error, trace};

use crate::alu;
use crate::bus::{AccessKind, BusError, Interrupt, Latch, LatchSink};
use crate::opcodes::{AluOp, CbInstr, CbOp, Cond, Instr, Operand, Pointer, Reg16, Reg8, RotOp, StackPair};

/// Condition flags, stored in the upper nibble of F
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const ZERO: u8 = 0b1000_0000;
    pub const SUBTRACT: u8 = 0b0100_0000;
    pub const HALF_CARRY: u8 = 0b0010_0000;
    pub const CARRY: u8 = 0b0001_0000;

    /// Build from a raw F value; the low nibble is always dropped
    pub fn new(bits: u8) -> Self {
        Self(bits & 0xF0)
    }

    pub fn from_bits(zero: bool, subtract: bool, half_carry: bool, carry: bool) -> Self {
        let mut flags = Self(0);
        flags.set_zero(zero);
        flags.set_subtract(subtract);
        flags.set_half_carry(half_carry);
        flags.set_carry(carry);
        flags
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn zero(&self) -> bool {
        (self.0 & Self::ZERO) != 0
    }

    pub fn subtract(&self) -> bool {
        (self.0 & Self::SUBTRACT) != 0
    }

    pub fn half_carry(&self) -> bool {
        (self.0 & Self::HALF_CARRY) != 0
    }

    pub fn carry(&self) -> bool {
        (self.0 & Self::CARRY) != 0
    }

    pub fn set_zero(&mut self, val: bool) {
        self.0 = if val { self.0 | Self::ZERO } else { self.0 & !Self::ZERO };
    }

    pub fn set_subtract(&mut self, val: bool) {
        self.0 = if val { self.0 | Self::SUBTRACT } else { self.0 & !Self::SUBTRACT };
    }

    pub fn set_half_carry(&mut self, val: bool) {
        self.0 = if val { self.0 | Self::HALF_CARRY } else { self.0 & !Self::HALF_CARRY };
    }

    pub fn set_carry(&mut self, val: bool) {
        self.0 = if val { self.0 | Self::CARRY } else { self.0 & !Self::CARRY };
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.zero() { 'Z' } else { '-' },
            if self.subtract() { 'N' } else { '-' },
            if self.half_carry() { 'H' } else { '-' },
            if self.carry() { 'C' } else { '-' },
        )
    }
}

/// One 16-bit register cell viewed either whole or as two halves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterPair(u16);

impl RegisterPair {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn pair(&self) -> u16 {
        self.0
    }

    pub fn high(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn low(&self) -> u8 {
        self.0 as u8
    }

    pub fn set_pair(&mut self, value: u16) {
        self.0 = value;
    }

    pub fn set_high(&mut self, value: u8) {
        self.0 = (self.0 & 0x00FF) | ((value as u16) << 8);
    }

    pub fn set_low(&mut self, value: u8) {
        self.0 = (self.0 & 0xFF00) | value as u16;
    }
}

/// SM83 register file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub af: RegisterPair,
    pub bc: RegisterPair,
    pub de: RegisterPair,
    pub hl: RegisterPair,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// Register values left behind by the DMG boot ROM
    pub fn post_boot() -> Self {
        Self {
            af: RegisterPair::new(0x01B0),
            bc: RegisterPair::new(0x0013),
            de: RegisterPair::new(0x00D8),
            hl: RegisterPair::new(0x014D),
            sp: 0xFFFE,
            pc: 0x0100,
        }
    }

    pub fn a(&self) -> u8 {
        self.af.high()
    }

    pub fn set_a(&mut self, value: u8) {
        self.af.set_high(value);
    }

    pub fn flags(&self) -> Flags {
        Flags::new(self.af.low())
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.af.set_low(flags.bits());
    }

    pub fn reg8(&self, reg: Reg8) -> u8 {
        match reg {
            Reg8::A => self.af.high(),
            Reg8::B => self.bc.high(),
            Reg8::C => self.bc.low(),
            Reg8::D => self.de.high(),
            Reg8::E => self.de.low(),
            Reg8::H => self.hl.high(),
            Reg8::L => self.hl.low(),
        }
    }

    pub fn set_reg8(&mut self, reg: Reg8, value: u8) {
        match reg {
            Reg8::A => self.af.set_high(value),
            Reg8::B => self.bc.set_high(value),
            Reg8::C => self.bc.set_low(value),
            Reg8::D => self.de.set_high(value),
            Reg8::E => self.de.set_low(value),
            Reg8::H => self.hl.set_high(value),
            Reg8::L => self.hl.set_low(value),
        }
    }

    pub fn reg16(&self, reg: Reg16) -> u16 {
        match reg {
            Reg16::BC => self.bc.pair(),
            Reg16::DE => self.de.pair(),
            Reg16::HL => self.hl.pair(),
            Reg16::SP => self.sp,
        }
    }

    pub fn set_reg16(&mut self, reg: Reg16, value: u16) {
        match reg {
            Reg16::BC => self.bc.set_pair(value),
            Reg16::DE => self.de.set_pair(value),
            Reg16::HL => self.hl.set_pair(value),
            Reg16::SP => self.sp = value,
        }
    }

    pub fn stack_pair(&self, pair: StackPair) -> u16 {
        match pair {
            StackPair::BC => self.bc.pair(),
            StackPair::DE => self.de.pair(),
            StackPair::HL => self.hl.pair(),
            StackPair::AF => self.af.pair(),
        }
    }

    /// `POP AF` cannot set the low nibble of F
    pub fn set_stack_pair(&mut self, pair: StackPair, value: u16) {
        match pair {
            StackPair::BC => self.bc.set_pair(value),
            StackPair::DE => self.de.set_pair(value),
            StackPair::HL => self.hl.set_pair(value),
            StackPair::AF => self.af.set_pair(value & 0xFFF0),
        }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A:{:02X} F:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X} PC:{:04X}",
            self.af.high(),
            self.af.low(),
            self.bc.high(),
            self.bc.low(),
            self.de.high(),
            self.de.low(),
            self.hl.high(),
            self.hl.low(),
            self.sp,
            self.pc
        )
    }
}

/// Outcome of a `STOP` instruction as decided by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A speed switch was armed and has been performed
    SpeedSwitch,
    /// The CPU sleeps until a joypad line goes low
    Sleep,
}

/// The CPU's view of the memory router
pub trait Bus {
    /// Queue an access for service at the end of the current machine cycle
    fn schedule(&mut self, address: u16, kind: AccessKind) -> Result<(), BusError>;
    /// `IF & IE`, masked to the five interrupt lines
    fn pending_interrupts(&self) -> u8;
    /// Clear the request bit of an interrupt being serviced
    fn acknowledge_interrupt(&mut self, interrupt: Interrupt);
    /// Handle `STOP`: reset the divider and switch speed if armed
    fn stop(&mut self) -> StopOutcome;
    /// Whether a stopped CPU should resume
    fn stop_released(&self) -> bool;
}

/// Power state of the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Running,
    Halted,
    Stopped,
    /// Frozen after fetching an undefined opcode
    Locked { opcode: u8, address: u16 },
}

/// Where the CPU is within the current instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The next cycle starts a new instruction (or an interrupt dispatch)
    Boundary,
    /// The opcode is in IR
    Decode,
    Execute { instr: Instr, step: u8 },
    /// The byte following `CB` is in IR
    DecodeCb,
    ExecuteCb { instr: CbInstr, step: u8 },
    Dispatch { step: u8 },
}

/// Result of one instruction step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// More steps follow in the next cycle
    Busy,
    /// Instruction complete; the next fetch shares this cycle
    Done,
    /// `CB` prefix read scheduled
    Prefix,
    /// Halted, stopped or locked; no fetch
    Suspend,
}

/// SM83 CPU state
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: Registers,
    /// Interrupt master enable
    ime: bool,
    /// Boundaries left before a pending `EI` takes effect
    ei_delay: u8,
    mode: CpuMode,
    /// Skip the next PC increment once
    halt_bug: bool,
    phase: Phase,
    /// Instruction register
    ir: u8,
    /// Operand latches
    z: u8,
    w: u8,
    /// Address of the opcode currently executing
    instr_address: u16,
    /// Total machine cycles executed
    cycles: u64,
    /// Instruction boundaries passed
    instructions: u64,
}

impl Cpu {
    /// Create a CPU in the power-on state, ready to run a boot ROM from 0x0000
    pub fn new() -> Self {
        Self {
            registers: Registers::default(),
            ime: false,
            ei_delay: 0,
            mode: CpuMode::Running,
            halt_bug: false,
            phase: Phase::Boundary,
            ir: 0,
            z: 0,
            w: 0,
            instr_address: 0,
            cycles: 0,
            instructions: 0,
        }
    }

    /// Create a CPU holding the state the boot ROM leaves behind
    pub fn post_boot() -> Self {
        Self {
            registers: Registers::post_boot(),
            ..Self::new()
        }
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn ime(&self) -> bool {
        self.ime
    }

    pub fn set_ime(&mut self, enabled: bool) {
        self.ime = enabled;
        self.ei_delay = 0;
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    /// Opcode and address of an undefined instruction that froze the CPU
    pub fn lockup(&self) -> Option<(u8, u16)> {
        match self.mode {
            CpuMode::Locked { opcode, address } => Some((opcode, address)),
            _ => None,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Address of the instruction most recently fetched
    pub fn instruction_address(&self) -> u16 {
        self.instr_address
    }

    /// Run one machine cycle.
    ///
    /// Returns `true` when this cycle began a new instruction: either the
    /// opcode fetch was scheduled or interrupt dispatch started.
    pub fn tick<B: Bus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        self.cycles += 1;

        match self.mode {
            CpuMode::Locked { .. } => return Ok(false),
            CpuMode::Halted => {
                // Waking takes this whole cycle
                if bus.pending_interrupts() != 0 {
                    self.mode = CpuMode::Running;
                    self.phase = Phase::Boundary;
                }
                return Ok(false);
            }
            CpuMode::Stopped => {
                if bus.stop_released() {
                    self.mode = CpuMode::Running;
                    self.phase = Phase::Boundary;
                }
                return Ok(false);
            }
            CpuMode::Running => {}
        }

        match self.phase {
            Phase::Boundary => self.boundary(bus),
            Phase::Decode => {
                let instr = Instr::decode(self.ir);
                let flow = self.execute(instr, 0, bus)?;
                self.advance(flow, Phase::Execute { instr, step: 1 }, bus)
            }
            Phase::Execute { instr, step } => {
                let flow = self.execute(instr, step, bus)?;
                self.advance(flow, Phase::Execute { instr, step: step + 1 }, bus)
            }
            Phase::DecodeCb => {
                let instr = CbInstr::decode(self.ir);
                let flow = self.execute_cb(instr, 0, bus)?;
                self.advance(flow, Phase::ExecuteCb { instr, step: 1 }, bus)
            }
            Phase::ExecuteCb { instr, step } => {
                let flow = self.execute_cb(instr, step, bus)?;
                self.advance(flow, Phase::ExecuteCb { instr, step: step + 1 }, bus)
            }
            Phase::Dispatch { step } => {
                let flow = self.dispatch(step, bus)?;
                self.advance(flow, Phase::Dispatch { step: step + 1 }, bus)
            }
        }
    }

    fn advance<B: Bus>(&mut self, flow: Flow, next: Phase, bus: &mut B) -> Result<bool, BusError> {
        match flow {
            Flow::Busy => {
                self.phase = next;
                Ok(false)
            }
            Flow::Done => self.boundary(bus),
            Flow::Prefix => {
                self.phase = Phase::DecodeCb;
                Ok(false)
            }
            Flow::Suspend => {
                self.phase = Phase::Boundary;
                Ok(false)
            }
        }
    }

    /// Instruction boundary: interrupt check, then opcode fetch
    fn boundary<B: Bus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        if self.ei_delay > 0 {
            self.ei_delay -= 1;
            if self.ei_delay == 0 {
                self.ime = true;
            }
        }

        self.instructions += 1;

        if self.ime && bus.pending_interrupts() != 0 {
            self.ime = false;
            if self.halt_bug {
                // EI; HALT: return to the HALT itself
                self.halt_bug = false;
                self.registers.pc = self.registers.pc.wrapping_sub(1);
            }
            self.phase = Phase::Dispatch { step: 1 };
            return Ok(true);
        }

        let pc = self.registers.pc;
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.registers.pc = pc.wrapping_add(1);
        }
        self.instr_address = pc;
        bus.schedule(pc, AccessKind::Read(Latch::Ir))?;
        self.phase = Phase::Decode;
        Ok(true)
    }

    fn read<B: Bus>(&mut self, bus: &mut B, address: u16, latch: Latch) -> Result<(), BusError> {
        bus.schedule(address, AccessKind::Read(latch))
    }

    fn write<B: Bus>(&mut self, bus: &mut B, address: u16, value: u8) -> Result<(), BusError> {
        bus.schedule(address, AccessKind::Write(value))
    }

    fn read_immediate<B: Bus>(&mut self, bus: &mut B, latch: Latch) -> Result<(), BusError> {
        let pc = self.registers.pc;
        self.registers.pc = pc.wrapping_add(1);
        self.read(bus, pc, latch)
    }

    fn wz(&self) -> u16 {
        u16::from_le_bytes([self.z, self.w])
    }

    fn hl(&self) -> u16 {
        self.registers.hl.pair()
    }

    fn condition(&self, cond: Option<Cond>) -> bool {
        let flags = self.registers.flags();
        match cond {
            None => true,
            Some(Cond::NotZero) => !flags.zero(),
            Some(Cond::Zero) => flags.zero(),
            Some(Cond::NotCarry) => !flags.carry(),
            Some(Cond::Carry) => flags.carry(),
        }
    }

    fn pointer_address(&mut self, ptr: Pointer) -> u16 {
        match ptr {
            Pointer::BC => self.registers.bc.pair(),
            Pointer::DE => self.registers.de.pair(),
            Pointer::HlInc => {
                let hl = self.hl();
                self.registers.hl.set_pair(hl.wrapping_add(1));
                hl
            }
            Pointer::HlDec => {
                let hl = self.hl();
                self.registers.hl.set_pair(hl.wrapping_sub(1));
                hl
            }
        }
    }

    fn alu(&mut self, op: AluOp, value: u8) {
        let (result, flags) = alu::accumulate(op, self.registers.a(), value, self.registers.flags());
        self.registers.set_a(result);
        self.registers.set_flags(flags);
    }

    fn rotate_a(&mut self, op: RotOp) {
        let (result, flags) = alu::rotate_accumulator(op, self.registers.a(), self.registers.flags());
        self.registers.set_a(result);
        self.registers.set_flags(flags);
    }

    fn inc_dec(&mut self, value: u8, increment: bool) -> u8 {
        let flags = self.registers.flags();
        let (result, flags) = if increment {
            alu::inc8(value, flags)
        } else {
            alu::dec8(value, flags)
        };
        self.registers.set_flags(flags);
        result
    }

    fn sp_dec(&mut self) -> u16 {
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        self.registers.sp
    }

    fn sp_inc(&mut self) -> u16 {
        let sp = self.registers.sp;
        self.registers.sp = sp.wrapping_add(1);
        sp
    }

    /// Run step `step` of a primary-table instruction
    fn execute<B: Bus>(&mut self, instr: Instr, step: u8, bus: &mut B) -> Result<Flow, BusError> {
        use Flow::{Busy, Done};

        let flow = match (instr, step) {
            (Instr::Nop, _) => Done,

            (Instr::Stop, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::Stop, _) => match bus.stop() {
                StopOutcome::SpeedSwitch => Done,
                StopOutcome::Sleep => {
                    self.mode = CpuMode::Stopped;
                    Flow::Suspend
                }
            },

            (Instr::Halt, _) => {
                if !self.ime && bus.pending_interrupts() != 0 {
                    self.halt_bug = true;
                    Done
                } else {
                    self.mode = CpuMode::Halted;
                    Flow::Suspend
                }
            }

            (Instr::Di, _) => {
                self.ime = false;
                self.ei_delay = 0;
                Done
            }
            (Instr::Ei, _) => {
                if !self.ime && self.ei_delay == 0 {
                    self.ei_delay = 2;
                }
                Done
            }

            (Instr::Ld { dst: Operand::Reg(dst), src: Operand::Reg(src) }, _) => {
                let value = self.registers.reg8(src);
                self.registers.set_reg8(dst, value);
                Done
            }
            (Instr::Ld { dst: Operand::Reg(_), src: Operand::Indirect }, 0) => {
                self.read(bus, self.hl(), Latch::Z)?;
                Busy
            }
            (Instr::Ld { dst: Operand::Reg(dst), src: Operand::Indirect }, _) => {
                self.registers.set_reg8(dst, self.z);
                Done
            }
            (Instr::Ld { dst: Operand::Indirect, src: Operand::Reg(src) }, 0) => {
                let value = self.registers.reg8(src);
                self.write(bus, self.hl(), value)?;
                Busy
            }
            (Instr::Ld { dst: Operand::Indirect, .. }, _) => Done,

            (Instr::LdImm { .. }, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::LdImm { dst: Operand::Reg(dst) }, _) => {
                self.registers.set_reg8(dst, self.z);
                Done
            }
            (Instr::LdImm { dst: Operand::Indirect }, 1) => {
                self.write(bus, self.hl(), self.z)?;
                Busy
            }
            (Instr::LdImm { dst: Operand::Indirect }, _) => Done,

            (Instr::LdImm16 { .. }, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::LdImm16 { .. }, 1) => {
                self.read_immediate(bus, Latch::W)?;
                Busy
            }
            (Instr::LdImm16 { dst }, _) => {
                self.registers.set_reg16(dst, self.wz());
                Done
            }

            (Instr::StoreA { ptr }, 0) => {
                let address = self.pointer_address(ptr);
                self.write(bus, address, self.registers.a())?;
                Busy
            }
            (Instr::StoreA { .. }, _) => Done,

            (Instr::LoadA { ptr }, 0) => {
                let address = self.pointer_address(ptr);
                self.read(bus, address, Latch::Z)?;
                Busy
            }
            (Instr::LoadA { .. }, _) => {
                self.registers.set_a(self.z);
                Done
            }

            (Instr::StoreSp | Instr::StoreAbs | Instr::LoadAbs, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::StoreSp | Instr::StoreAbs | Instr::LoadAbs, 1) => {
                self.read_immediate(bus, Latch::W)?;
                Busy
            }
            (Instr::StoreSp, 2) => {
                self.write(bus, self.wz(), self.registers.sp as u8)?;
                Busy
            }
            (Instr::StoreSp, 3) => {
                self.write(bus, self.wz().wrapping_add(1), (self.registers.sp >> 8) as u8)?;
                Busy
            }
            (Instr::StoreSp, _) => Done,
            (Instr::StoreAbs, 2) => {
                self.write(bus, self.wz(), self.registers.a())?;
                Busy
            }
            (Instr::StoreAbs, _) => Done,
            (Instr::LoadAbs, 2) => {
                self.read(bus, self.wz(), Latch::Z)?;
                Busy
            }
            (Instr::LoadAbs, _) => {
                self.registers.set_a(self.z);
                Done
            }

            (Instr::StoreHighImm | Instr::LoadHighImm, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::StoreHighImm, 1) => {
                self.write(bus, 0xFF00 | self.z as u16, self.registers.a())?;
                Busy
            }
            (Instr::StoreHighImm, _) => Done,
            (Instr::LoadHighImm, 1) => {
                self.read(bus, 0xFF00 | self.z as u16, Latch::Z)?;
                Busy
            }
            (Instr::LoadHighImm, _) => {
                self.registers.set_a(self.z);
                Done
            }

            (Instr::StoreHighC, 0) => {
                let address = 0xFF00 | self.registers.bc.low() as u16;
                self.write(bus, address, self.registers.a())?;
                Busy
            }
            (Instr::StoreHighC, _) => Done,
            (Instr::LoadHighC, 0) => {
                let address = 0xFF00 | self.registers.bc.low() as u16;
                self.read(bus, address, Latch::Z)?;
                Busy
            }
            (Instr::LoadHighC, _) => {
                self.registers.set_a(self.z);
                Done
            }

            (Instr::LdSpHl, 0) => {
                self.registers.sp = self.hl();
                Busy
            }
            (Instr::LdSpHl, _) => Done,

            (Instr::LdHlSpOffset, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::LdHlSpOffset, 1) => {
                let (result, flags) = alu::add_sp_offset(self.registers.sp, self.z);
                self.registers.hl.set_pair(result);
                self.registers.set_flags(flags);
                Busy
            }
            (Instr::LdHlSpOffset, _) => Done,

            (Instr::Inc { dst: Operand::Reg(reg) }, _) | (Instr::Dec { dst: Operand::Reg(reg) }, _) => {
                let increment = matches!(instr, Instr::Inc { .. });
                let result = self.inc_dec(self.registers.reg8(reg), increment);
                self.registers.set_reg8(reg, result);
                Done
            }
            (Instr::Inc { dst: Operand::Indirect } | Instr::Dec { dst: Operand::Indirect }, 0) => {
                self.read(bus, self.hl(), Latch::Z)?;
                Busy
            }
            (Instr::Inc { dst: Operand::Indirect } | Instr::Dec { dst: Operand::Indirect }, 1) => {
                let increment = matches!(instr, Instr::Inc { .. });
                let result = self.inc_dec(self.z, increment);
                self.write(bus, self.hl(), result)?;
                Busy
            }
            (Instr::Inc { dst: Operand::Indirect } | Instr::Dec { dst: Operand::Indirect }, _) => Done,

            (Instr::Inc16 { dst }, 0) => {
                let value = self.registers.reg16(dst).wrapping_add(1);
                self.registers.set_reg16(dst, value);
                Busy
            }
            (Instr::Dec16 { dst }, 0) => {
                let value = self.registers.reg16(dst).wrapping_sub(1);
                self.registers.set_reg16(dst, value);
                Busy
            }
            (Instr::Inc16 { .. } | Instr::Dec16 { .. }, _) => Done,

            (Instr::AddHl { src }, 0) => {
                let (result, flags) =
                    alu::add16(self.hl(), self.registers.reg16(src), self.registers.flags());
                self.registers.hl.set_pair(result);
                self.registers.set_flags(flags);
                Busy
            }
            (Instr::AddHl { .. }, _) => Done,

            (Instr::AddSpOffset, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::AddSpOffset, 1) => Busy,
            (Instr::AddSpOffset, 2) => {
                let (result, flags) = alu::add_sp_offset(self.registers.sp, self.z);
                self.registers.sp = result;
                self.registers.set_flags(flags);
                Busy
            }
            (Instr::AddSpOffset, _) => Done,

            (Instr::Alu { op, src: Operand::Reg(reg) }, _) => {
                self.alu(op, self.registers.reg8(reg));
                Done
            }
            (Instr::Alu { src: Operand::Indirect, .. }, 0) => {
                self.read(bus, self.hl(), Latch::Z)?;
                Busy
            }
            (Instr::AluImm { .. }, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::Alu { op, src: Operand::Indirect }, _) | (Instr::AluImm { op }, _) => {
                self.alu(op, self.z);
                Done
            }

            (Instr::Rlca, _) => {
                self.rotate_a(RotOp::Rlc);
                Done
            }
            (Instr::Rrca, _) => {
                self.rotate_a(RotOp::Rrc);
                Done
            }
            (Instr::Rla, _) => {
                self.rotate_a(RotOp::Rl);
                Done
            }
            (Instr::Rra, _) => {
                self.rotate_a(RotOp::Rr);
                Done
            }
            (Instr::Daa, _) => {
                let (result, flags) = alu::daa(self.registers.a(), self.registers.flags());
                self.registers.set_a(result);
                self.registers.set_flags(flags);
                Done
            }
            (Instr::Cpl, _) => {
                self.registers.set_a(!self.registers.a());
                let mut flags = self.registers.flags();
                flags.set_subtract(true);
                flags.set_half_carry(true);
                self.registers.set_flags(flags);
                Done
            }
            (Instr::Scf, _) => {
                let zero = self.registers.flags().zero();
                self.registers.set_flags(Flags::from_bits(zero, false, false, true));
                Done
            }
            (Instr::Ccf, _) => {
                let flags = self.registers.flags();
                self.registers
                    .set_flags(Flags::from_bits(flags.zero(), false, false, !flags.carry()));
                Done
            }

            (Instr::Jp { .. }, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::Jp { .. }, 1) => {
                self.read_immediate(bus, Latch::W)?;
                Busy
            }
            (Instr::Jp { cond }, 2) => {
                if self.condition(cond) {
                    self.registers.pc = self.wz();
                    Busy
                } else {
                    Done
                }
            }
            (Instr::Jp { .. }, _) => Done,

            (Instr::JpHl, _) => {
                self.registers.pc = self.hl();
                Done
            }

            (Instr::Jr { .. }, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::Jr { cond }, 1) => {
                if self.condition(cond) {
                    let offset = self.z as i8 as i16 as u16;
                    self.registers.pc = self.registers.pc.wrapping_add(offset);
                    Busy
                } else {
                    Done
                }
            }
            (Instr::Jr { .. }, _) => Done,

            (Instr::Call { .. }, 0) => {
                self.read_immediate(bus, Latch::Z)?;
                Busy
            }
            (Instr::Call { .. }, 1) => {
                self.read_immediate(bus, Latch::W)?;
                Busy
            }
            (Instr::Call { cond }, 2) => {
                if self.condition(cond) {
                    self.sp_dec();
                    Busy
                } else {
                    Done
                }
            }
            (Instr::Call { .. }, 3) => {
                let sp = self.registers.sp;
                self.write(bus, sp, (self.registers.pc >> 8) as u8)?;
                self.sp_dec();
                Busy
            }
            (Instr::Call { .. }, 4) => {
                let sp = self.registers.sp;
                self.write(bus, sp, self.registers.pc as u8)?;
                self.registers.pc = self.wz();
                Busy
            }
            (Instr::Call { .. }, _) => Done,

            // Conditional returns spend one cycle evaluating the condition
            (Instr::Ret { cond: Some(_) }, 0) => Busy,
            (Instr::Ret { cond: Some(cond) }, 1) => {
                if self.condition(Some(cond)) {
                    let sp = self.sp_inc();
                    self.read(bus, sp, Latch::Z)?;
                    Busy
                } else {
                    Done
                }
            }
            (Instr::Ret { cond: Some(_) }, 2) => {
                let sp = self.sp_inc();
                self.read(bus, sp, Latch::W)?;
                Busy
            }
            (Instr::Ret { cond: Some(_) }, 3) => {
                self.registers.pc = self.wz();
                Busy
            }
            (Instr::Ret { cond: None } | Instr::Reti, 0) => {
                let sp = self.sp_inc();
                self.read(bus, sp, Latch::Z)?;
                Busy
            }
            (Instr::Ret { cond: None } | Instr::Reti, 1) => {
                let sp = self.sp_inc();
                self.read(bus, sp, Latch::W)?;
                Busy
            }
            (Instr::Ret { cond: None } | Instr::Reti, 2) => {
                self.registers.pc = self.wz();
                if instr == Instr::Reti {
                    self.ime = true;
                    self.ei_delay = 0;
                }
                Busy
            }
            (Instr::Ret { .. } | Instr::Reti, _) => Done,

            (Instr::Rst { .. }, 0) => {
                self.sp_dec();
                Busy
            }
            (Instr::Rst { .. }, 1) => {
                let sp = self.registers.sp;
                self.write(bus, sp, (self.registers.pc >> 8) as u8)?;
                self.sp_dec();
                Busy
            }
            (Instr::Rst { vector }, 2) => {
                let sp = self.registers.sp;
                self.write(bus, sp, self.registers.pc as u8)?;
                self.registers.pc = vector as u16;
                Busy
            }
            (Instr::Rst { .. }, _) => Done,

            (Instr::Push { .. }, 0) => {
                self.sp_dec();
                Busy
            }
            (Instr::Push { src }, 1) => {
                let value = self.registers.stack_pair(src);
                let sp = self.registers.sp;
                self.write(bus, sp, (value >> 8) as u8)?;
                self.sp_dec();
                Busy
            }
            (Instr::Push { src }, 2) => {
                let value = self.registers.stack_pair(src);
                let sp = self.registers.sp;
                self.write(bus, sp, value as u8)?;
                Busy
            }
            (Instr::Push { .. }, _) => Done,

            (Instr::Pop { .. }, 0) => {
                let sp = self.sp_inc();
                self.read(bus, sp, Latch::Z)?;
                Busy
            }
            (Instr::Pop { .. }, 1) => {
                let sp = self.sp_inc();
                self.read(bus, sp, Latch::W)?;
                Busy
            }
            (Instr::Pop { dst }, _) => {
                self.registers.set_stack_pair(dst, self.wz());
                Done
            }

            (Instr::Prefix, _) => {
                self.read_immediate(bus, Latch::Ir)?;
                Flow::Prefix
            }

            (Instr::Illegal(opcode), _) => {
                let address = self.instr_address;
                error!(
                    "CPU locked up: undefined opcode {:02X} at {:04X}",
                    opcode, address
                );
                self.mode = CpuMode::Locked { opcode, address };
                Flow::Suspend
            }
        };

        Ok(flow)
    }

    /// Run step `step` of a prefixed instruction
    fn execute_cb<B: Bus>(&mut self, instr: CbInstr, step: u8, bus: &mut B) -> Result<Flow, BusError> {
        let flow = match (instr.target, step) {
            (Operand::Reg(reg), _) => {
                if let Some(result) = self.apply_cb(instr.op, self.registers.reg8(reg)) {
                    self.registers.set_reg8(reg, result);
                }
                Flow::Done
            }
            (Operand::Indirect, 0) => {
                self.read(bus, self.hl(), Latch::Z)?;
                Flow::Busy
            }
            (Operand::Indirect, 1) => match self.apply_cb(instr.op, self.z) {
                Some(result) => {
                    self.write(bus, self.hl(), result)?;
                    Flow::Busy
                }
                None => Flow::Done,
            },
            (Operand::Indirect, _) => Flow::Done,
        };
        Ok(flow)
    }

    /// Apply a prefixed operation; `BIT` only updates flags
    fn apply_cb(&mut self, op: CbOp, value: u8) -> Option<u8> {
        let flags = self.registers.flags();
        match op {
            CbOp::Rotate(rot) => {
                let (result, flags) = alu::rotate(rot, value, flags);
                self.registers.set_flags(flags);
                Some(result)
            }
            CbOp::Bit(index) => {
                self.registers.set_flags(alu::bit(index, value, flags));
                None
            }
            CbOp::Res(index) => Some(value & !(1 << index)),
            CbOp::Set(index) => Some(value | (1 << index)),
        }
    }

    /// Interrupt dispatch. Step 0 is the boundary cycle that found the
    /// interrupt; the handler's first fetch shares step 5.
    fn dispatch<B: Bus>(&mut self, step: u8, bus: &mut B) -> Result<Flow, BusError> {
        let flow = match step {
            1 => {
                self.sp_dec();
                Flow::Busy
            }
            2 => {
                let sp = self.registers.sp;
                self.write(bus, sp, (self.registers.pc >> 8) as u8)?;
                self.sp_dec();
                Flow::Busy
            }
            3 => {
                // The high byte push has landed; it may have overwritten IE
                let pending = bus.pending_interrupts();
                let sp = self.registers.sp;
                self.write(bus, sp, self.registers.pc as u8)?;
                match Interrupt::highest(pending) {
                    Some(interrupt) => {
                        trace!(
                            "dispatch {:?} from {:04X}",
                            interrupt, self.registers.pc
                        );
                        bus.acknowledge_interrupt(interrupt);
                        self.registers.pc = interrupt.vector();
                    }
                    None => {
                        trace!("dispatch cancelled from {:04X}", self.registers.pc);
                        self.registers.pc = 0x0000;
                    }
                }
                Flow::Busy
            }
            4 => Flow::Busy,
            _ => Flow::Done,
        };
        Ok(flow)
    }
}

impl LatchSink for Cpu {
    fn latch(&mut self, latch: Latch, value: u8) {
        match latch {
            Latch::Ir => self.ir = value,
            Latch::Z => self.z = value,
            Latch::W => self.w = value,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} IME:{} {:?}", self.registers, self.ime as u8, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 64 KiB of flat memory; IF and IE live at their usual addresses
    struct FlatBus {
        memory: Vec<u8>,
        queue: Vec<(u16, AccessKind)>,
    }

    impl FlatBus {
        fn with_program(origin: u16, program: &[u8]) -> Self {
            let mut memory = vec![0; 0x10000];
            memory[origin as usize..origin as usize + program.len()].copy_from_slice(program);
            Self {
                memory,
                queue: Vec::new(),
            }
        }

        fn drain(&mut self, cpu: &mut Cpu) {
            for (address, kind) in self.queue.drain(..) {
                match kind {
                    AccessKind::Read(latch) => cpu.latch(latch, self.memory[address as usize]),
                    AccessKind::Write(value) => self.memory[address as usize] = value,
                }
            }
        }
    }

    impl Bus for FlatBus {
        fn schedule(&mut self, address: u16, kind: AccessKind) -> Result<(), BusError> {
            self.queue.push((address, kind));
            Ok(())
        }

        fn pending_interrupts(&self) -> u8 {
            self.memory[0xFF0F] & self.memory[0xFFFF] & 0x1F
        }

        fn acknowledge_interrupt(&mut self, interrupt: Interrupt) {
            self.memory[0xFF0F] &= !interrupt.bit();
        }

        fn stop(&mut self) -> StopOutcome {
            StopOutcome::Sleep
        }

        fn stop_released(&self) -> bool {
            false
        }
    }

    fn cycle(cpu: &mut Cpu, bus: &mut FlatBus) -> bool {
        let boundary = cpu.tick(bus).unwrap();
        bus.drain(cpu);
        boundary
    }

    /// Cycles from the current point to the next instruction boundary
    fn cycles_to_boundary(cpu: &mut Cpu, bus: &mut FlatBus) -> u32 {
        let mut count = 1;
        while !cycle(cpu, bus) {
            count += 1;
            assert!(count < 64, "no instruction boundary");
        }
        count
    }

    fn setup(program: &[u8]) -> (Cpu, FlatBus) {
        let mut cpu = Cpu::new();
        cpu.registers_mut().pc = 0x0100;
        cpu.registers_mut().sp = 0xFFFE;
        let mut bus = FlatBus::with_program(0x0100, program);
        // First boundary fetches the first opcode
        assert!(cycle(&mut cpu, &mut bus));
        (cpu, bus)
    }

    /// Cycle count of the first instruction in `program`
    fn timing(program: &[u8], flags: u8) -> u32 {
        let (mut cpu, mut bus) = setup(program);
        cpu.registers_mut().set_flags(Flags::new(flags));
        cpu.registers_mut().hl.set_pair(0xC000);
        cycles_to_boundary(&mut cpu, &mut bus)
    }

    #[test]
    fn test_register_pair_halves() {
        let mut pair = RegisterPair::new(0x1234);
        pair.set_high(0xAB);
        assert_eq!(pair.pair(), 0xAB34);
        pair.set_low(0xCD);
        assert_eq!(pair.pair(), 0xABCD);
        assert_eq!(pair.high(), 0xAB);
        assert_eq!(pair.low(), 0xCD);
    }

    #[test]
    fn test_flags_low_nibble_always_zero() {
        assert_eq!(Flags::new(0xFF).bits(), 0xF0);
        let mut regs = Registers::default();
        regs.set_stack_pair(StackPair::AF, 0x12FF);
        assert_eq!(regs.af.pair(), 0x12F0);
        assert_eq!(Flags::from_bits(true, false, true, false).to_string(), "Z-H-");
    }

    #[test]
    fn test_post_boot_registers() {
        let cpu = Cpu::post_boot();
        assert_eq!(
            cpu.registers().to_string(),
            "A:01 F:B0 B:00 C:13 D:00 E:D8 H:01 L:4D SP:FFFE PC:0100"
        );
    }

    #[test]
    fn test_instruction_timing() {
        let z = Flags::ZERO;
        let cases: &[(&[u8], u8, u32, &str)] = &[
            (&[0x00], 0, 1, "NOP"),
            (&[0x3E, 0x12], 0, 2, "LD A,n"),
            (&[0x7E], 0, 2, "LD A,(HL)"),
            (&[0x36, 0x12], 0, 3, "LD (HL),n"),
            (&[0x01, 0x34, 0x12], 0, 3, "LD BC,nn"),
            (&[0x08, 0x00, 0xC0], 0, 5, "LD (nn),SP"),
            (&[0xEA, 0x00, 0xC0], 0, 4, "LD (nn),A"),
            (&[0xE0, 0x80], 0, 3, "LDH (n),A"),
            (&[0xE2], 0, 2, "LDH (C),A"),
            (&[0x34], 0, 3, "INC (HL)"),
            (&[0x03], 0, 2, "INC BC"),
            (&[0x09], 0, 2, "ADD HL,BC"),
            (&[0xE8, 0x01], 0, 4, "ADD SP,e"),
            (&[0xF8, 0x01], 0, 3, "LD HL,SP+e"),
            (&[0xF9], 0, 2, "LD SP,HL"),
            (&[0xC3, 0x00, 0x02], 0, 4, "JP nn"),
            (&[0xC2, 0x00, 0x02], z, 3, "JP NZ not taken"),
            (&[0xE9], 0, 1, "JP HL"),
            (&[0x18, 0x00], 0, 3, "JR"),
            (&[0x20, 0x00], z, 2, "JR NZ not taken"),
            (&[0xCD, 0x00, 0x02], 0, 6, "CALL"),
            (&[0xC4, 0x00, 0x02], z, 3, "CALL NZ not taken"),
            (&[0xC9], 0, 4, "RET"),
            (&[0xC0], 0, 5, "RET NZ taken"),
            (&[0xC0], z, 2, "RET NZ not taken"),
            (&[0xD9], 0, 4, "RETI"),
            (&[0xC7], 0, 4, "RST"),
            (&[0xC5], 0, 4, "PUSH BC"),
            (&[0xC1], 0, 3, "POP BC"),
            (&[0xCB, 0x11], 0, 2, "RL C"),
            (&[0xCB, 0x46], 0, 3, "BIT 0,(HL)"),
            (&[0xCB, 0xC6], 0, 4, "SET 0,(HL)"),
            (&[0xCB, 0x16], 0, 4, "RL (HL)"),
        ];

        for &(program, flags, expected, name) in cases {
            assert_eq!(timing(program, flags), expected, "{}", name);
        }
    }

    #[test]
    fn test_call_and_return() {
        // CALL 0x0200 ; at 0x0200: RET
        let (mut cpu, mut bus) = setup(&[0xCD, 0x00, 0x02]);
        bus.memory[0x0200] = 0xC9;
        cycles_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.registers().pc, 0x0201);
        assert_eq!(cpu.registers().sp, 0xFFFC);
        assert_eq!(bus.memory[0xFFFD], 0x01);
        assert_eq!(bus.memory[0xFFFC], 0x03);
        cycles_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.registers().pc, 0x0104);
        assert_eq!(cpu.registers().sp, 0xFFFE);
    }

    #[test]
    fn test_jr_backwards() {
        let (mut cpu, mut bus) = setup(&[0x00, 0x18, 0xFD]);
        cycles_to_boundary(&mut cpu, &mut bus);
        cycles_to_boundary(&mut cpu, &mut bus);
        // Fetch of the target has already advanced PC past it
        assert_eq!(cpu.registers().pc, 0x0101);
    }

    #[test]
    fn test_interrupt_dispatch() {
        let (mut cpu, mut bus) = setup(&[0x00, 0x00]);
        cpu.set_ime(true);
        bus.memory[0xFFFF] = 0x05;
        bus.memory[0xFF0F] = 0x04;

        // NOP completes, then the boundary begins dispatch instead of a fetch
        assert_eq!(cycles_to_boundary(&mut cpu, &mut bus), 1);
        assert_eq!(cpu.registers().pc, 0x0101);
        assert!(!cpu.ime());

        assert_eq!(cycles_to_boundary(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.registers().pc, 0x0051);
        assert_eq!(bus.memory[0xFF0F], 0x00);
        assert_eq!(bus.memory[0xFFFD], 0x01);
        assert_eq!(bus.memory[0xFFFC], 0x01);
    }

    #[test]
    fn test_ei_delay() {
        // EI ; NOP ; NOP
        let (mut cpu, mut bus) = setup(&[0xFB, 0x00, 0x00]);
        bus.memory[0xFFFF] = 0x01;
        bus.memory[0xFF0F] = 0x01;

        cycles_to_boundary(&mut cpu, &mut bus);
        assert!(!cpu.ime());
        // The instruction after EI still runs
        assert_eq!(cpu.registers().pc, 0x0102);
        cycles_to_boundary(&mut cpu, &mut bus);
        cycles_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.registers().pc, 0x0041);
    }

    #[test]
    fn test_halt_bug_repeats_next_byte() {
        // HALT ; INC A with an interrupt pending and IME off
        let (mut cpu, mut bus) = setup(&[0x76, 0x3C, 0x00]);
        cpu.registers_mut().set_a(0);
        bus.memory[0xFFFF] = 0x01;
        bus.memory[0xFF0F] = 0x01;

        for _ in 0..3 {
            cycles_to_boundary(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.registers().a(), 2);
        assert_eq!(cpu.mode(), CpuMode::Running);
    }

    #[test]
    fn test_ei_halt_with_pending_interrupt_returns_to_halt() {
        // EI ; HALT ; NOP, handler INC A ; RETI
        let (mut cpu, mut bus) = setup(&[0xFB, 0x76, 0x00]);
        bus.memory[0x0040] = 0x3C;
        bus.memory[0x0041] = 0xD9;
        cpu.registers_mut().set_a(0);
        bus.memory[0xFFFF] = 0x01;
        bus.memory[0xFF0F] = 0x01;

        // EI, HALT, dispatch, INC A
        for _ in 0..4 {
            cycles_to_boundary(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.instruction_address(), 0x0041);
        assert_eq!(cpu.registers().a(), 1);
        assert_eq!(bus.memory[0xFFFD], 0x01);
        assert_eq!(bus.memory[0xFFFC], 0x01);

        // RETI lands back on HALT, which now halts with nothing pending
        cycles_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.instruction_address(), 0x0101);
        for _ in 0..8 {
            cycle(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::Halted);
        assert_eq!(cpu.registers().a(), 1);
    }

    #[test]
    fn test_halt_wakes_without_ime() {
        let (mut cpu, mut bus) = setup(&[0x76, 0x00]);
        for _ in 0..10 {
            cycle(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::Halted);
        bus.memory[0xFFFF] = 0x10;
        bus.memory[0xFF0F] = 0x10;
        // One wake cycle, then the fetch
        assert_eq!(cycles_to_boundary(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.mode(), CpuMode::Running);
        assert_eq!(cpu.registers().pc, 0x0102);
    }

    #[test]
    fn test_undefined_opcode_locks() {
        let (mut cpu, mut bus) = setup(&[0xD3]);
        for _ in 0..8 {
            assert!(!cycle(&mut cpu, &mut bus));
        }
        assert_eq!(cpu.lockup(), Some((0xD3, 0x0100)));
        assert_eq!(cpu.registers().pc, 0x0101);
    }

    #[test]
    fn test_dispatch_cancelled_by_ie_overwrite() {
        let (mut cpu, mut bus) = setup(&[0x00]);
        cpu.set_ime(true);
        cpu.registers_mut().sp = 0x0000;
        // Timer requested; pushing PC high (0x01) into IE leaves only VBlank enabled
        bus.memory[0xFFFF] = 0x04;
        bus.memory[0xFF0F] = 0x04;
        cycles_to_boundary(&mut cpu, &mut bus);
        cycles_to_boundary(&mut cpu, &mut bus);
        assert_eq!(bus.memory[0xFFFF], 0x01);
        assert_eq!(cpu.registers().pc, 0x0001);
        assert_eq!(bus.memory[0xFF0F], 0x04);
    }

    #[test]
    fn test_pop_af_masks_flags() {
        let (mut cpu, mut bus) = setup(&[0xF1]);
        cpu.registers_mut().sp = 0xC000;
        bus.memory[0xC000] = 0xFF;
        bus.memory[0xC001] = 0x12;
        cycles_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.registers().af.pair(), 0x12F0);
    }

    #[test]
    fn test_load_store_hl_increment() {
        // LD A,0x5A ; LD (HL+),A ; LD A,(HL-)
        let (mut cpu, mut bus) = setup(&[0x3E, 0x5A, 0x22, 0x3A]);
        cpu.registers_mut().hl.set_pair(0xC000);
        bus.memory[0xC001] = 0x77;
        for _ in 0..3 {
            cycles_to_boundary(&mut cpu, &mut bus);
        }
        assert_eq!(bus.memory[0xC000], 0x5A);
        assert_eq!(cpu.registers().a(), 0x77);
        assert_eq!(cpu.registers().hl.pair(), 0xC000);
    }
}
