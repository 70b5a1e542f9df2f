//! Memory bus and mapping
//!
//! The Game Boy memory map:
//! $0000-$3FFF - Cartridge ROM bank 0 (boot ROM over $0000-$00FF until unmapped)
//! $4000-$7FFF - Cartridge ROM, switchable bank
//! $8000-$9FFF - Video RAM
//! $A000-$BFFF - Cartridge RAM
//! $C000-$CFFF - Work RAM bank 0
//! $D000-$DFFF - Work RAM bank 1 (1-7 in colour mode)
//! $E000-$FDFF - Mirror of $C000-$DDFF
//! $FE00-$FE9F - Sprite attribute table (OAM)
//! $FEA0-$FEFF - Unusable
//! $FF00-$FF7F - I/O registers
//! $FF80-$FFFE - High RAM
//! $FFFF       - Interrupt enable
//!
//! CPU accesses do not hit memory when issued: the CPU schedules them and the
//! bus services every access due at the end of the machine cycle.

use std::collections::VecDeque;

use log::{debug, warn};
use thiserror::Error;

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::cpu::{Bus as CpuBus, StopOutcome};
use crate::joypad::Joypad;
use crate::ppu::{Ppu, OAM_SIZE};
use crate::serial::Serial;
use crate::timer::Timer;

/// Work RAM: eight 4 KiB banks (only two reachable outside colour mode)
pub const WRAM_SIZE: usize = 0x8000;
const WRAM_BANK_SIZE: usize = 0x1000;

/// High RAM size in bytes
pub const HRAM_SIZE: usize = 0x7F;

/// Boot ROM size in bytes
pub const BOOT_ROM_SIZE: usize = 0x100;

/// Maximum outstanding scheduled accesses
pub const QUEUE_CAPACITY: usize = 16;

/// Machine cycles an OAM DMA transfer occupies
pub const DMA_CYCLES: u8 = OAM_SIZE as u8;

/// Fatal memory router faults
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("memory access queue overflow (capacity {capacity})")]
    QueueOverflow { capacity: usize },
    #[error("access to ${address:04X} due at cycle {due} still queued at cycle {now}")]
    StaleAccess { address: u16, due: u64, now: u64 },
}

/// Interrupt sources, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    Stat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::Stat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    /// Bit in IF and IE
    pub fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Handler address
    pub fn vector(self) -> u16 {
        0x0040 + 8 * self as u16
    }

    /// Highest-priority interrupt set in `pending`
    pub fn highest(pending: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|i| pending & i.bit() != 0)
    }
}

/// CPU-internal register a scheduled read lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    /// Instruction register
    Ir,
    Z,
    W,
}

/// Direction of a scheduled access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read(Latch),
    Write(u8),
}

/// A memory access waiting for its machine cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub cycle: u64,
    pub address: u16,
    pub kind: AccessKind,
}

/// Receiver of scheduled reads
pub trait LatchSink {
    fn latch(&mut self, latch: Latch, value: u8);
}

/// Bounded FIFO of scheduled accesses
#[derive(Debug, Clone, Default)]
pub struct AccessQueue {
    entries: VecDeque<Access>,
}

impl AccessQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(QUEUE_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, access: Access) -> Result<(), BusError> {
        if self.entries.len() == QUEUE_CAPACITY {
            return Err(BusError::QueueOverflow {
                capacity: QUEUE_CAPACITY,
            });
        }
        self.entries.push_back(access);
        Ok(())
    }

    /// Pop the oldest access if it is due at cycle `now`
    pub fn pop_due(&mut self, now: u64) -> Result<Option<Access>, BusError> {
        match self.entries.front() {
            Some(access) if access.cycle < now => Err(BusError::StaleAccess {
                address: access.address,
                due: access.cycle,
                now,
            }),
            Some(access) if access.cycle == now => Ok(self.entries.pop_front()),
            _ => Ok(None),
        }
    }
}

/// Memory-mapped I/O registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum IoReg {
    P1 = 0xFF00,
    Sb = 0xFF01,
    Sc = 0xFF02,
    Div = 0xFF04,
    Tima = 0xFF05,
    Tma = 0xFF06,
    Tac = 0xFF07,
    If = 0xFF0F,
    Nr10 = 0xFF10,
    Nr11 = 0xFF11,
    Nr12 = 0xFF12,
    Nr13 = 0xFF13,
    Nr14 = 0xFF14,
    Nr21 = 0xFF16,
    Nr22 = 0xFF17,
    Nr23 = 0xFF18,
    Nr24 = 0xFF19,
    Nr30 = 0xFF1A,
    Nr31 = 0xFF1B,
    Nr32 = 0xFF1C,
    Nr33 = 0xFF1D,
    Nr34 = 0xFF1E,
    Nr41 = 0xFF20,
    Nr42 = 0xFF21,
    Nr43 = 0xFF22,
    Nr44 = 0xFF23,
    Nr50 = 0xFF24,
    Nr51 = 0xFF25,
    Nr52 = 0xFF26,
    Lcdc = 0xFF40,
    Stat = 0xFF41,
    Scy = 0xFF42,
    Scx = 0xFF43,
    Ly = 0xFF44,
    Lyc = 0xFF45,
    Dma = 0xFF46,
    Bgp = 0xFF47,
    Obp0 = 0xFF48,
    Obp1 = 0xFF49,
    Wy = 0xFF4A,
    Wx = 0xFF4B,
    Key1 = 0xFF4D,
    Boot = 0xFF50,
    Rp = 0xFF56,
    Svbk = 0xFF70,
    Ie = 0xFFFF,
}

impl IoReg {
    pub fn address(self) -> u16 {
        self as u16
    }

    pub fn from_address(address: u16) -> Option<Self> {
        use IoReg::*;
        let reg = match address {
            0xFF00 => P1,
            0xFF01 => Sb,
            0xFF02 => Sc,
            0xFF04 => Div,
            0xFF05 => Tima,
            0xFF06 => Tma,
            0xFF07 => Tac,
            0xFF0F => If,
            0xFF10 => Nr10,
            0xFF11 => Nr11,
            0xFF12 => Nr12,
            0xFF13 => Nr13,
            0xFF14 => Nr14,
            0xFF16 => Nr21,
            0xFF17 => Nr22,
            0xFF18 => Nr23,
            0xFF19 => Nr24,
            0xFF1A => Nr30,
            0xFF1B => Nr31,
            0xFF1C => Nr32,
            0xFF1D => Nr33,
            0xFF1E => Nr34,
            0xFF20 => Nr41,
            0xFF21 => Nr42,
            0xFF22 => Nr43,
            0xFF23 => Nr44,
            0xFF24 => Nr50,
            0xFF25 => Nr51,
            0xFF26 => Nr52,
            0xFF40 => Lcdc,
            0xFF41 => Stat,
            0xFF42 => Scy,
            0xFF43 => Scx,
            0xFF44 => Ly,
            0xFF45 => Lyc,
            0xFF46 => Dma,
            0xFF47 => Bgp,
            0xFF48 => Obp0,
            0xFF49 => Obp1,
            0xFF4A => Wy,
            0xFF4B => Wx,
            0xFF4D => Key1,
            0xFF50 => Boot,
            0xFF56 => Rp,
            0xFF70 => Svbk,
            0xFFFF => Ie,
            _ => return None,
        };
        Some(reg)
    }

    fn is_sound(self) -> bool {
        (0xFF10..=0xFF26).contains(&self.address())
    }

    fn is_lcd(self) -> bool {
        (0xFF40..=0xFF4B).contains(&self.address()) && self != IoReg::Dma
    }
}

/// Register state left behind by the DMG boot ROM, in write order
const POST_BOOT_REGISTERS: [(IoReg, u8); 31] = [
    (IoReg::Nr52, 0xF1),
    (IoReg::P1, 0xCF),
    (IoReg::Sc, 0x00),
    (IoReg::Tima, 0x00),
    (IoReg::Tma, 0x00),
    (IoReg::Tac, 0x00),
    (IoReg::Nr10, 0x80),
    (IoReg::Nr11, 0xBF),
    (IoReg::Nr12, 0xF3),
    (IoReg::Nr13, 0xFF),
    (IoReg::Nr14, 0xBF),
    (IoReg::Nr21, 0x3F),
    (IoReg::Nr22, 0x00),
    (IoReg::Nr23, 0xFF),
    (IoReg::Nr24, 0xBF),
    (IoReg::Nr30, 0x7F),
    (IoReg::Nr31, 0xFF),
    (IoReg::Nr32, 0x9F),
    (IoReg::Nr33, 0xFF),
    (IoReg::Nr34, 0xBF),
    (IoReg::Nr41, 0xFF),
    (IoReg::Nr42, 0x00),
    (IoReg::Nr43, 0x00),
    (IoReg::Nr44, 0xBF),
    (IoReg::Nr50, 0x77),
    (IoReg::Nr51, 0xF3),
    (IoReg::Lcdc, 0x91),
    (IoReg::Stat, 0x85),
    (IoReg::Bgp, 0xFC),
    (IoReg::Obp0, 0xFF),
    (IoReg::Obp1, 0xFF),
];

/// Internal divider value at the first instruction after the boot ROM
const POST_BOOT_DIVIDER: u16 = 0xABCC;

/// OAM DMA transfer
#[derive(Debug, Clone, Default)]
struct Dma {
    /// Last value written to $FF46
    source: u8,
    base: u16,
    /// Bytes copied so far; `None` when idle
    progress: Option<u8>,
}

impl Dma {
    fn start(&mut self, value: u8) {
        self.source = value;
        let mut base = (value as u16) << 8;
        // $E000-$FFFF sources fold onto work RAM
        if base >= 0xE000 {
            base -= 0x2000;
        }
        self.base = base;
        self.progress = Some(0);
        debug!("OAM DMA from {:04X}", base);
    }

    fn active(&self) -> bool {
        self.progress.is_some()
    }
}

/// Memory bus structure
#[derive(Debug, Clone)]
pub struct Bus {
    cartridge: Option<Cartridge>,
    boot_rom: Option<Vec<u8>>,
    boot_mapped: bool,
    wram: Vec<u8>,
    hram: [u8; HRAM_SIZE],

    ppu: Ppu,
    apu: Apu,
    timer: Timer,
    joypad: Joypad,
    serial: Serial,

    interrupt_flag: u8,
    interrupt_enable: u8,

    dma: Dma,
    queue: AccessQueue,
    /// Machine cycles since power on
    cycle: u64,

    cgb_mode: bool,
    wram_bank: u8,
    double_speed: bool,
    speed_armed: bool,
    warned_infrared: bool,
}

impl Bus {
    /// Create a bus with no cartridge
    pub fn new(sample_rate: u32) -> Self {
        Self {
            cartridge: None,
            boot_rom: None,
            boot_mapped: false,
            wram: vec![0; WRAM_SIZE],
            hram: [0; HRAM_SIZE],
            ppu: Ppu::new(),
            apu: Apu::new(sample_rate),
            timer: Timer::new(),
            joypad: Joypad::new(),
            serial: Serial::new(),
            interrupt_flag: 0,
            interrupt_enable: 0,
            dma: Dma::default(),
            queue: AccessQueue::new(),
            cycle: 0,
            cgb_mode: false,
            wram_bank: 1,
            double_speed: false,
            speed_armed: false,
            warned_infrared: false,
        }
    }

    /// Set the cartridge for this bus
    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        self.cartridge = Some(cartridge);
    }

    /// Map a 256-byte boot ROM over the start of the cartridge
    pub fn map_boot_rom(&mut self, image: Vec<u8>) {
        self.boot_rom = Some(image);
        self.boot_mapped = true;
    }

    /// Enable the colour-mode registers (KEY1, SVBK)
    pub fn set_cgb_mode(&mut self, enabled: bool) {
        self.cgb_mode = enabled;
    }

    /// Put the hardware registers in the state the boot ROM leaves them in
    pub fn apply_post_boot(&mut self) {
        for (reg, value) in POST_BOOT_REGISTERS {
            self.set_register(reg, value);
        }
        self.interrupt_flag = 0x01;
        self.timer.set_divider(POST_BOOT_DIVIDER);
        self.boot_mapped = false;
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    pub fn apu_mut(&mut self) -> &mut Apu {
        &mut self.apu
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    pub fn joypad(&self) -> &Joypad {
        &self.joypad
    }

    pub fn joypad_mut(&mut self) -> &mut Joypad {
        &mut self.joypad
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn double_speed(&self) -> bool {
        self.double_speed
    }

    pub fn dma_active(&self) -> bool {
        self.dma.active()
    }

    pub fn boot_rom_mapped(&self) -> bool {
        self.boot_mapped
    }

    pub fn interrupt_flag(&self) -> u8 {
        self.interrupt_flag
    }

    pub fn request(&mut self, interrupt: Interrupt) {
        self.interrupt_flag |= interrupt.bit();
    }

    /// Advance the dot-clocked components by one dot
    pub fn tick_dot(&mut self) {
        self.ppu.tick();
        self.interrupt_flag |= self.ppu.take_requests();
        self.apu.tick();
        if self.serial.tick() {
            self.request(Interrupt::Serial);
        }
    }

    /// Advance the timer by one CPU clock
    pub fn tick_clock(&mut self) {
        if self.timer.tick() {
            self.request(Interrupt::Timer);
        }
    }

    /// Start a machine cycle: advance the cycle counter and any DMA transfer
    pub fn begin_machine_cycle(&mut self) {
        self.cycle += 1;

        if let Some(index) = self.dma.progress {
            let value = self.dma_read(self.dma.base + index as u16);
            self.ppu.write_oam_raw(index as usize, value);
            let next = index + 1;
            self.dma.progress = if next == DMA_CYCLES { None } else { Some(next) };
        }
    }

    /// Service every scheduled access due this cycle
    pub fn drain<S: LatchSink>(&mut self, sink: &mut S) -> Result<(), BusError> {
        while let Some(access) = self.queue.pop_due(self.cycle)? {
            match access.kind {
                AccessKind::Read(latch) => sink.latch(latch, self.read(access.address)),
                AccessKind::Write(value) => self.write(access.address, value),
            }
        }
        Ok(())
    }

    /// Scheduled accesses not yet serviced
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// DMA source read; ignores PPU blocking
    fn dma_read(&self, address: u16) -> u8 {
        match address {
            0x8000..=0x9FFF => self.ppu.vram_raw(address),
            _ => self.read(address),
        }
    }

    /// Read a byte from the given address
    pub fn read(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x00FF if self.boot_mapped => self
                .boot_rom
                .as_ref()
                .and_then(|rom| rom.get(address as usize).copied())
                .unwrap_or(0xFF),
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cartridge.as_ref().map_or(0xFF, |cart| cart.read(address))
            }
            0x8000..=0x9FFF => self.ppu.read_vram(address),
            0xC000..=0xDFFF => self.wram[self.wram_index(address)],
            0xE000..=0xFDFF => self.read(address - 0x2000),
            0xFE00..=0xFE9F => {
                if self.dma.active() {
                    0xFF
                } else {
                    self.ppu.read_oam(address)
                }
            }
            0xFEA0..=0xFEFF => {
                if !self.dma.active() && self.ppu.oam_blocked() {
                    0xFF
                } else {
                    0x00
                }
            }
            0xFF00..=0xFF7F | 0xFFFF => match IoReg::from_address(address) {
                Some(reg) => self.get_register(reg),
                None if (0xFF30..=0xFF3F).contains(&address) => self.apu.read_wave(address),
                None => 0xFF,
            },
            0xFF80..=0xFFFE => self.hram[(address - 0xFF80) as usize],
        }
    }

    /// Write a byte to the given address
    pub fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cartridge.as_mut() {
                    cart.write(address, value);
                }
            }
            0x8000..=0x9FFF => self.ppu.write_vram(address, value),
            0xC000..=0xDFFF => {
                let index = self.wram_index(address);
                self.wram[index] = value;
            }
            0xE000..=0xFDFF => self.write(address - 0x2000, value),
            0xFE00..=0xFE9F => {
                if !self.dma.active() {
                    self.ppu.write_oam(address, value);
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F | 0xFFFF => match IoReg::from_address(address) {
                Some(reg) => self.set_register(reg, value),
                None if (0xFF30..=0xFF3F).contains(&address) => {
                    self.apu.write_wave(address, value)
                }
                None => {}
            },
            0xFF80..=0xFFFE => self.hram[(address - 0xFF80) as usize] = value,
        }
    }

    fn wram_index(&self, address: u16) -> usize {
        let offset = (address & 0x0FFF) as usize;
        if address < 0xD000 {
            offset
        } else {
            self.wram_bank as usize * WRAM_BANK_SIZE + offset
        }
    }

    /// Read an I/O register, with unused bits masked to 1
    pub fn get_register(&self, reg: IoReg) -> u8 {
        match reg {
            IoReg::P1 => self.joypad.read(),
            IoReg::Sb | IoReg::Sc => self.serial.read(reg),
            IoReg::Div | IoReg::Tima | IoReg::Tma | IoReg::Tac => self.timer.read(reg),
            IoReg::If => self.interrupt_flag | 0xE0,
            IoReg::Dma => self.dma.source,
            IoReg::Key1 if self.cgb_mode => {
                0x7E | (self.double_speed as u8) << 7 | self.speed_armed as u8
            }
            IoReg::Svbk if self.cgb_mode => 0xF8 | self.wram_bank,
            IoReg::Key1 | IoReg::Svbk | IoReg::Boot | IoReg::Rp => 0xFF,
            IoReg::Ie => self.interrupt_enable,
            _ if reg.is_sound() => self.apu.read(reg),
            _ if reg.is_lcd() => self.ppu.read_register(reg),
            _ => 0xFF,
        }
    }

    /// Write an I/O register and apply its side effects
    pub fn set_register(&mut self, reg: IoReg, value: u8) {
        match reg {
            IoReg::P1 => {
                if self.joypad.write(value) {
                    self.request(Interrupt::Joypad);
                }
            }
            IoReg::Sb | IoReg::Sc => self.serial.write(reg, value),
            IoReg::Div | IoReg::Tima | IoReg::Tma | IoReg::Tac => self.timer.write(reg, value),
            IoReg::If => self.interrupt_flag = value & 0x1F,
            IoReg::Dma => self.dma.start(value),
            IoReg::Key1 => {
                if self.cgb_mode {
                    self.speed_armed = value & 0x01 != 0;
                }
            }
            IoReg::Svbk => {
                if self.cgb_mode {
                    // Bank 0 selects bank 1
                    self.wram_bank = (value & 0x07).max(1);
                }
            }
            IoReg::Boot => {
                if value != 0 && self.boot_mapped {
                    debug!("boot ROM unmapped");
                    self.boot_mapped = false;
                }
            }
            IoReg::Rp => {
                if !self.warned_infrared {
                    warn!("infrared port is not supported");
                    self.warned_infrared = true;
                }
            }
            IoReg::Ie => self.interrupt_enable = value,
            _ if reg.is_sound() => self.apu.write(reg, value),
            _ if reg.is_lcd() => self.ppu.write_register(reg, value),
            _ => {}
        }
    }
}

impl CpuBus for Bus {
    fn schedule(&mut self, address: u16, kind: AccessKind) -> Result<(), BusError> {
        self.queue.push(Access {
            cycle: self.cycle,
            address,
            kind,
        })
    }

    fn pending_interrupts(&self) -> u8 {
        self.interrupt_flag & self.interrupt_enable & 0x1F
    }

    fn acknowledge_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt_flag &= !interrupt.bit();
    }

    fn stop(&mut self) -> StopOutcome {
        self.timer.reset_divider();
        if self.cgb_mode && self.speed_armed {
            self.speed_armed = false;
            self.double_speed = !self.double_speed;
            debug!("speed switch, double speed {}", self.double_speed);
            StopOutcome::SpeedSwitch
        } else {
            StopOutcome::Sleep
        }
    }

    fn stop_released(&self) -> bool {
        self.joypad.any_line_low()
    }
}
