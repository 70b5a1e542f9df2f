//! Integration tests for the Game Boy system

use gb_core::cartridge::header_checksum;
use gb_core::joypad::Button;
use gb_core::serial::TestVerdict;
use gb_core::system::{Config, GbSystem, Model};

fn rom_with_program(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x100 + program.len()].copy_from_slice(program);
    rom[0x14D] = header_checksum(&rom);
    rom
}

fn boot(rom: &[u8]) -> GbSystem {
    let mut system = GbSystem::default();
    system.load_rom(rom).unwrap();
    system
}

/// Program that sends each byte over serial, then spins
fn serial_program(bytes: &[u8]) -> Vec<u8> {
    let mut program = Vec::new();
    for &byte in bytes {
        program.extend_from_slice(&[0x3E, byte, 0xE0, 0x01, 0x3E, 0x81, 0xE0, 0x02]);
    }
    program.extend_from_slice(&[0x18, 0xFE]);
    program
}

#[test]
fn test_system_creation() {
    let system = GbSystem::default();
    assert_eq!(system.frame_count(), 0);
    assert!(system.bus().cartridge().is_none());
}

#[test]
fn test_loaded_header_is_readable_from_bus() {
    let mut rom = rom_with_program(&[0x18, 0xFE]);
    rom[0x134..0x139].copy_from_slice(b"HELLO");
    rom[0x14D] = header_checksum(&rom);
    let system = boot(&rom);

    let cartridge = system.bus().cartridge().unwrap();
    assert_eq!(cartridge.header().title, "HELLO");
    assert_eq!(cartridge.header().rom_banks, 2);
    assert!(!cartridge.has_ram());
}

#[test]
fn test_dma_occupies_160_cycles() {
    // LD A,$01 ; LDH ($46),A ; JR -2
    let rom = rom_with_program(&[0x3E, 0x01, 0xE0, 0x46, 0x18, 0xFE]);
    let mut system = boot(&rom);

    let mut last_cycle = system.bus().cycle();
    let mut active_cycles = 0;
    for _ in 0..2000 {
        system.tick_dot().unwrap();
        let cycle = system.bus().cycle();
        if cycle != last_cycle {
            last_cycle = cycle;
            if system.bus().dma_active() {
                active_cycles += 1;
            }
        }
    }
    assert_eq!(active_cycles, 160);
    for i in 0..160 {
        assert_eq!(system.ppu().oam_raw(i), rom[0x100 + i], "OAM byte {}", i);
    }
}

#[test]
fn test_echo_ram_through_cpu() {
    // LD A,$5A ; LD ($E010),A ; LD A,$A5 ; LD ($C011),A ; JR -2
    let rom = rom_with_program(&[
        0x3E, 0x5A, 0xEA, 0x10, 0xE0, 0x3E, 0xA5, 0xEA, 0x11, 0xC0, 0x18, 0xFE,
    ]);
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    assert_eq!(system.read_memory(0xC010), 0x5A);
    assert_eq!(system.read_memory(0xE011), 0xA5);
}

#[test]
fn test_rom_only_writes_ignored() {
    // LD A,$12 ; LD ($2000),A ; LD ($4000),A ; JR -2
    let mut rom = rom_with_program(&[0x3E, 0x12, 0xEA, 0x00, 0x20, 0xEA, 0x00, 0x40, 0x18, 0xFE]);
    rom[0x4000] = 0x77;
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    assert_eq!(system.read_memory(0x4000), 0x77);
    assert_eq!(system.read_memory(0x2000), 0x00);
}

#[test]
fn test_serial_pass_detection() {
    let rom = rom_with_program(&serial_program(&[3, 5, 8, 13, 21, 34]));
    let mut system = boot(&rom);
    assert_eq!(system.test_verdict(), None);
    system.run_frame().unwrap();
    assert_eq!(system.test_verdict(), Some(TestVerdict::Passed));
    assert_eq!(system.serial_output(), &[3, 5, 8, 13, 21, 34]);
}

#[test]
fn test_serial_failure_detection() {
    let rom = rom_with_program(&serial_program(&[0x42; 6]));
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    assert_eq!(system.test_verdict(), Some(TestVerdict::Failed));
}

#[test]
fn test_serial_interrupt_dispatch() {
    let mut program = vec![
        0x3E, 0x08, // LD A,$08
        0xE0, 0xFF, // LDH (IE),A
        0xFB, // EI
    ];
    program.extend_from_slice(&serial_program(b"A"));
    let mut rom = rom_with_program(&program);
    // Serial handler: LD B,$77 ; JR -2
    rom[0x58..0x5C].copy_from_slice(&[0x06, 0x77, 0x18, 0xFE]);
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    assert_eq!(system.cpu().registers().bc.high(), 0x77);
    assert_eq!(system.cpu().instruction_address(), 0x005A);
}

#[test]
fn test_audio_stream_cadence() {
    let rom = rom_with_program(&[0x18, 0xFE]);
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    let mut samples = vec![0i16; 4096];
    let written = system.audio_samples(&mut samples);
    // 48 kHz stereo over one 70224-dot frame
    assert!((1600..=1610).contains(&written), "{} samples", written);
    assert_eq!(system.audio_samples(&mut samples), 0);
}

#[test]
fn test_joypad_press_requests_interrupt() {
    let rom = rom_with_program(&[0x18, 0xFE]);
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    system.press(Button::A);
    assert_eq!(system.read_memory(0xFF0F) & 0x10, 0x10);
    system.release(Button::A);
}

#[test]
fn test_reset_keeps_cartridge() {
    let rom = rom_with_program(&[0x04, 0x18, 0xFD]);
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    assert_ne!(system.cpu().registers().bc.high(), 0x00);
    system.reset().unwrap();
    assert_eq!(system.cpu().registers().pc, 0x0100);
    assert_eq!(system.cpu().registers().bc.high(), 0x00);
    assert_eq!(system.frame_count(), 0);
}

#[test]
fn test_colour_mode_follows_header() {
    let mut rom = rom_with_program(&[0x18, 0xFE]);
    rom[0x143] = 0x80;
    rom[0x14D] = header_checksum(&rom);

    let mut system = boot(&rom);
    assert_eq!(system.read_memory(0xFF4D), 0x7E);

    let config = Config {
        model: Model::Dmg,
        ..Config::default()
    };
    let mut system = GbSystem::new(config);
    system.load_rom(&rom).unwrap();
    assert_eq!(system.read_memory(0xFF4D), 0xFF);
}

#[test]
fn test_speed_switch() {
    // LD A,1 ; LDH (KEY1),A ; STOP ; NOP ; JR -2
    let mut rom = rom_with_program(&[0x3E, 0x01, 0xE0, 0x4D, 0x10, 0x00, 0x18, 0xFE]);
    rom[0x143] = 0xC0;
    rom[0x14D] = header_checksum(&rom);
    let mut system = boot(&rom);
    system.run_frame().unwrap();
    assert!(system.bus().double_speed());
    assert_eq!(system.read_memory(0xFF4D), 0xFE);
    // Twice the machine cycles per frame once switched
    let start = system.bus().cycle();
    system.run_frame().unwrap();
    assert_eq!(system.bus().cycle() - start, 70224 / 2);
}
