//! GB Core - Pure Rust Game Boy emulator library
//!
//! This crate provides cycle-accurate emulation of the Game Boy: an SM83 CPU
//! whose memory accesses land on the machine cycle they belong to, a PPU that
//! renders through a per-dot pixel FIFO, and the memory router between them.
//! Windowing and audio-device plumbing live in the front-end crates.

#![forbid(unsafe_code)]

/// Arithmetic and flag computation
pub mod alu;
/// Sound channels, frame sequencer and sample output
pub mod apu;
/// Memory router, scheduled accesses, OAM DMA and I/O registers
pub mod bus;
/// Cartridge header and memory bank controllers
pub mod cartridge;
/// SM83 CPU
pub mod cpu;
pub mod joypad;
/// Opcode decoding
pub mod opcodes;
/// PPU (Picture Processing Unit) with pixel FIFO
pub mod ppu;
pub mod serial;
/// Integration module driving all components from the dot clock
pub mod system;
pub mod timer;

pub use cartridge::{Cartridge, CartridgeError};
pub use cpu::{Cpu, CpuMode};
pub use joypad::Button;
pub use ppu::{Frame, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use serial::TestVerdict;
pub use system::{Config, GbSystem, Model, SystemError};
