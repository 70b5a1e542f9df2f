//! Game Boy System Integration
//!
//! This module wires the CPU to the bus and drives every component from a
//! single dot clock. Per dot: the PPU, APU and serial port advance, then the
//! timer advances once per CPU clock (twice in double speed). Every fourth CPU
//! clock a machine cycle begins: DMA moves a byte, the CPU steps, and the bus
//! services the accesses the CPU scheduled for that cycle.

use log::warn;
use thiserror::Error;

use crate::bus::{Bus, BusError, Interrupt, BOOT_ROM_SIZE};
use crate::cartridge::{Cartridge, CartridgeError};
use crate::cpu::Cpu;
use crate::joypad::Button;
use crate::ppu::{Frame, Ppu, DOTS_PER_FRAME};
use crate::serial::TestVerdict;

/// CPU clocks per machine cycle
const CLOCKS_PER_CYCLE: u8 = 4;

/// Hardware model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    /// Always behave as the original monochrome model
    Dmg,
    /// Enable colour-mode registers when the cartridge asks for them
    #[default]
    Auto,
}

/// System configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio output rate in stereo frames per second
    pub sample_rate: u32,
    /// 256-byte boot ROM; without one the system starts in the post-boot state
    pub boot_rom: Option<Vec<u8>>,
    pub model: Model,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            boot_rom: None,
            model: Model::Auto,
        }
    }
}

/// Fatal emulation errors
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("cartridge: {0}")]
    Cartridge(#[from] CartridgeError),
    #[error("memory router: {0}")]
    Bus(#[from] BusError),
    #[error("no cartridge loaded")]
    NoCartridge,
    #[error("boot ROM must be 256 bytes, got {0}")]
    BootRomSize(usize),
}

/// Game Boy system - integrates all components
#[derive(Debug, Clone)]
pub struct GbSystem {
    config: Config,
    cpu: Cpu,
    bus: Bus,
    /// CPU clocks into the current machine cycle
    clock_phase: u8,
    /// Dots since power on
    dots: u64,
    /// Frames run through `run_frame`
    frame_count: u64,
}

impl GbSystem {
    /// Create a new system with no cartridge
    pub fn new(config: Config) -> Self {
        let bus = Bus::new(config.sample_rate);
        Self {
            config,
            cpu: Cpu::new(),
            bus,
            clock_phase: 0,
            dots: 0,
            frame_count: 0,
        }
    }

    /// Load a ROM image and power the system on with it
    pub fn load_rom(&mut self, rom: &[u8]) -> Result<(), SystemError> {
        let cartridge = Cartridge::from_rom(rom)?;
        self.power_on(cartridge)
    }

    /// Restart with the same cartridge; external RAM survives
    pub fn reset(&mut self) -> Result<(), SystemError> {
        let mut cartridge = self
            .bus
            .cartridge()
            .cloned()
            .ok_or(SystemError::NoCartridge)?;
        cartridge.reset();
        self.power_on(cartridge)
    }

    fn power_on(&mut self, cartridge: Cartridge) -> Result<(), SystemError> {
        let cgb = self.config.model == Model::Auto && cartridge.header().cgb_supported();
        if cgb {
            warn!("colour palettes and VRAM banking are not supported; rendering in monochrome");
        }

        let mut bus = Bus::new(self.config.sample_rate);
        bus.set_cgb_mode(cgb);
        bus.insert_cartridge(cartridge);

        let cpu = match &self.config.boot_rom {
            Some(image) => {
                if image.len() != BOOT_ROM_SIZE {
                    return Err(SystemError::BootRomSize(image.len()));
                }
                bus.map_boot_rom(image.clone());
                Cpu::new()
            }
            None => {
                bus.apply_post_boot();
                Cpu::post_boot()
            }
        };

        self.bus = bus;
        self.cpu = cpu;
        self.clock_phase = 0;
        self.dots = 0;
        self.frame_count = 0;
        Ok(())
    }

    /// Advance one dot. Returns true if the CPU reached an instruction
    /// boundary during it.
    pub fn tick_dot(&mut self) -> Result<bool, SystemError> {
        if self.bus.cartridge().is_none() {
            return Err(SystemError::NoCartridge);
        }

        self.bus.tick_dot();

        let clocks = if self.bus.double_speed() { 2 } else { 1 };
        let mut boundary = false;
        for _ in 0..clocks {
            self.bus.tick_clock();
            self.clock_phase += 1;
            if self.clock_phase == CLOCKS_PER_CYCLE {
                self.clock_phase = 0;
                self.bus.begin_machine_cycle();
                boundary |= self.cpu.tick(&mut self.bus)?;
                self.bus.drain(&mut self.cpu)?;
            }
        }

        self.dots += 1;
        Ok(boundary)
    }

    /// Run until the CPU reaches its next instruction boundary, giving up
    /// after one frame (a halted or locked CPU). Returns whether a boundary
    /// was reached.
    pub fn step_instruction(&mut self) -> Result<bool, SystemError> {
        for _ in 0..DOTS_PER_FRAME {
            if self.tick_dot()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run exactly one frame's worth of dots and return the last completed picture
    pub fn run_frame(&mut self) -> Result<Frame, SystemError> {
        for _ in 0..DOTS_PER_FRAME {
            self.tick_dot()?;
        }
        self.frame_count += 1;
        Ok(self.bus.ppu().frame())
    }

    /// Run `frames` frames
    pub fn run_frames(&mut self, frames: u64) -> Result<(), SystemError> {
        for _ in 0..frames {
            self.run_frame()?;
        }
        Ok(())
    }

    /// Fill `out` with interleaved stereo samples; returns the count written
    pub fn audio_samples(&mut self, out: &mut [i16]) -> usize {
        self.bus.apu_mut().fill(out)
    }

    pub fn press(&mut self, button: Button) {
        if self.bus.joypad_mut().press(button) {
            self.bus.request(Interrupt::Joypad);
        }
    }

    pub fn release(&mut self, button: Button) {
        self.bus.joypad_mut().release(button);
    }

    /// Get CPU reference
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get bus reference
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Get PPU reference
    pub fn ppu(&self) -> &Ppu {
        self.bus.ppu()
    }

    /// Bytes sent over the serial port
    pub fn serial_output(&self) -> &[u8] {
        self.bus.serial().output()
    }

    /// Pass/fail reported by a conformance ROM over serial
    pub fn test_verdict(&self) -> Option<TestVerdict> {
        self.bus.serial().verdict()
    }

    /// Read a byte from memory via the bus, without side effects
    pub fn read_memory(&self, address: u16) -> u8 {
        self.bus.read(address)
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn dots(&self) -> u64 {
        self.dots
    }
}

impl Default for GbSystem {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
