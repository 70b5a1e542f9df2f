//! Cartridge and memory bank controller support
//!
//! This module parses the cartridge header and implements the bank
//! switching of the common memory bank controllers (MBC1, MBC2, MBC3, MBC5).

use log::{info, warn};
use thiserror::Error;

/// End of the cartridge header
pub const HEADER_END: usize = 0x150;

/// ROM bank size in bytes
pub const ROM_BANK_SIZE: usize = 0x4000;

/// External RAM bank size in bytes
pub const RAM_BANK_SIZE: usize = 0x2000;

/// MBC2 built-in RAM (512 nibbles)
const MBC2_RAM_SIZE: usize = 0x200;

/// Cartridge loading errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("ROM image too small for a header: {0} bytes")]
    TooSmall(usize),
    #[error("unsupported cartridge type ${0:02X}")]
    UnsupportedType(u8),
    #[error("unknown ROM size code ${0:02X}")]
    UnknownRomSize(u8),
    #[error("unknown RAM size code ${0:02X}")]
    UnknownRamSize(u8),
    #[error("ROM image truncated: header declares {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Memory bank controller family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    RomOnly,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

/// Hardware present on a cartridge, decoded from the type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub kind: MbcKind,
    pub ram: bool,
    pub battery: bool,
    pub timer: bool,
}

impl Features {
    fn decode(code: u8) -> Option<Self> {
        use MbcKind::*;
        let (kind, ram, battery, timer) = match code {
            0x00 => (RomOnly, false, false, false),
            0x08 => (RomOnly, true, false, false),
            0x09 => (RomOnly, true, true, false),
            0x01 => (Mbc1, false, false, false),
            0x02 => (Mbc1, true, false, false),
            0x03 => (Mbc1, true, true, false),
            0x05 => (Mbc2, true, false, false),
            0x06 => (Mbc2, true, true, false),
            0x0F => (Mbc3, false, true, true),
            0x10 => (Mbc3, true, true, true),
            0x11 => (Mbc3, false, false, false),
            0x12 => (Mbc3, true, false, false),
            0x13 => (Mbc3, true, true, false),
            // Rumble variants behave as plain MBC5
            0x19 | 0x1C => (Mbc5, false, false, false),
            0x1A | 0x1D => (Mbc5, true, false, false),
            0x1B | 0x1E => (Mbc5, true, true, false),
            _ => return None,
        };
        Some(Self {
            kind,
            ram,
            battery,
            timer,
        })
    }
}

/// Cartridge header ($0100-$014F)
#[derive(Debug, Clone)]
pub struct Header {
    pub title: String,
    /// $0143: bit 7 set when the game supports colour mode
    pub cgb_flag: u8,
    pub cartridge_type: u8,
    pub rom_banks: usize,
    /// External RAM in bytes
    pub ram_size: usize,
    pub header_checksum: u8,
    computed_checksum: u8,
}

impl Header {
    /// Parse a header from the start of a ROM image
    pub fn parse(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_END {
            return Err(CartridgeError::TooSmall(rom.len()));
        }

        let title = rom[0x134..0x144]
            .iter()
            .take_while(|&&b| b != 0)
            .filter(|b| b.is_ascii_graphic() || **b == b' ')
            .map(|&b| b as char)
            .collect::<String>();

        let rom_banks = match rom[0x148] {
            code @ 0x00..=0x08 => 2usize << code,
            0x52 => 72,
            0x53 => 80,
            0x54 => 96,
            code => return Err(CartridgeError::UnknownRomSize(code)),
        };

        let ram_size = match rom[0x149] {
            0x00 => 0,
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            code => return Err(CartridgeError::UnknownRamSize(code)),
        };

        Ok(Self {
            title,
            cgb_flag: rom[0x143],
            cartridge_type: rom[0x147],
            rom_banks,
            ram_size,
            header_checksum: rom[0x14D],
            computed_checksum: header_checksum(rom),
        })
    }

    /// Whether the stored header checksum matches the header bytes
    pub fn checksum_ok(&self) -> bool {
        self.header_checksum == self.computed_checksum
    }

    pub fn cgb_supported(&self) -> bool {
        (self.cgb_flag & 0x80) != 0
    }
}

/// Header checksum over $0134-$014C
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom[0x134..=0x14C]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

/// Bank registers of the mapped controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mbc {
    RomOnly,
    Mbc1 {
        /// 5-bit ROM bank register; never 0
        rom_bank: u8,
        /// 2-bit secondary register (upper ROM bits or RAM bank)
        upper: u8,
        advanced: bool,
    },
    Mbc2 {
        rom_bank: u8,
    },
    Mbc3 {
        rom_bank: u8,
        /// RAM bank 0-3, or an RTC register 8-C
        ram_select: u8,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
    },
}

impl Mbc {
    fn new(kind: MbcKind) -> Self {
        match kind {
            MbcKind::RomOnly => Mbc::RomOnly,
            MbcKind::Mbc1 => Mbc::Mbc1 {
                rom_bank: 1,
                upper: 0,
                advanced: false,
            },
            MbcKind::Mbc2 => Mbc::Mbc2 { rom_bank: 1 },
            MbcKind::Mbc3 => Mbc::Mbc3 {
                rom_bank: 1,
                ram_select: 0,
            },
            MbcKind::Mbc5 => Mbc::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
            },
        }
    }
}

/// Cartridge structure
#[derive(Debug, Clone)]
pub struct Cartridge {
    header: Header,
    features: Features,
    rom: Vec<u8>,
    ram: Vec<u8>,
    ram_enabled: bool,
    mbc: Mbc,
}

impl Cartridge {
    /// Create a new cartridge from a ROM image
    pub fn from_rom(rom: &[u8]) -> Result<Self, CartridgeError> {
        let header = Header::parse(rom)?;
        let features = Features::decode(header.cartridge_type)
            .ok_or(CartridgeError::UnsupportedType(header.cartridge_type))?;

        let expected = header.rom_banks * ROM_BANK_SIZE;
        if rom.len() < expected {
            return Err(CartridgeError::Truncated {
                expected,
                actual: rom.len(),
            });
        }

        if !header.checksum_ok() {
            warn!(
                "header checksum mismatch: stored ${:02X}, computed ${:02X}",
                header.header_checksum, header.computed_checksum
            );
        }
        if features.timer {
            warn!("MBC3 real-time clock is not supported; RTC registers read $FF");
        }

        let ram_size = match features.kind {
            MbcKind::Mbc2 => MBC2_RAM_SIZE,
            _ if features.ram => header.ram_size,
            _ => 0,
        };

        info!(
            "loaded \"{}\": {:?}, {} ROM banks, {} KiB RAM{}",
            header.title,
            features.kind,
            header.rom_banks,
            ram_size / 1024,
            if features.battery { ", battery" } else { "" }
        );

        Ok(Self {
            features,
            rom: rom[..expected].to_vec(),
            ram: vec![0; ram_size],
            ram_enabled: false,
            mbc: Mbc::new(features.kind),
            header,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn kind(&self) -> MbcKind {
        self.features.kind
    }

    pub fn has_ram(&self) -> bool {
        !self.ram.is_empty()
    }

    pub fn has_battery(&self) -> bool {
        self.features.battery
    }

    /// External RAM contents
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Return the bank registers to their power-on state; RAM is kept
    pub fn reset(&mut self) {
        self.mbc = Mbc::new(self.features.kind);
        self.ram_enabled = false;
    }

    fn rom_banks(&self) -> usize {
        self.header.rom_banks
    }

    fn rom_byte(&self, bank: usize, offset: u16) -> u8 {
        let bank = bank % self.rom_banks();
        self.rom[bank * ROM_BANK_SIZE + offset as usize]
    }

    fn ram_index(&self, bank: usize, offset: u16) -> usize {
        (bank * RAM_BANK_SIZE + offset as usize) % self.ram.len()
    }

    /// Read from ROM ($0000-$7FFF) or external RAM ($A000-$BFFF)
    pub fn read(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x3FFF => {
                let bank = match self.mbc {
                    Mbc::Mbc1 {
                        upper,
                        advanced: true,
                        ..
                    } => (upper as usize) << 5,
                    _ => 0,
                };
                self.rom_byte(bank, address)
            }
            0x4000..=0x7FFF => {
                let bank = match self.mbc {
                    Mbc::RomOnly => 1,
                    Mbc::Mbc1 {
                        rom_bank, upper, ..
                    } => (upper as usize) << 5 | rom_bank as usize,
                    Mbc::Mbc2 { rom_bank } | Mbc::Mbc3 { rom_bank, .. } => rom_bank as usize,
                    Mbc::Mbc5 { rom_bank, .. } => rom_bank as usize,
                };
                self.rom_byte(bank, address - 0x4000)
            }
            0xA000..=0xBFFF => self.read_ram(address - 0xA000),
            _ => 0xFF,
        }
    }

    fn read_ram(&self, offset: u16) -> u8 {
        if self.ram.is_empty() {
            return 0xFF;
        }
        match self.mbc {
            Mbc::RomOnly => self.ram[self.ram_index(0, offset)],
            _ if !self.ram_enabled => 0xFF,
            Mbc::Mbc1 {
                upper, advanced, ..
            } => {
                let bank = if advanced { upper as usize } else { 0 };
                self.ram[self.ram_index(bank, offset)]
            }
            Mbc::Mbc2 { .. } => 0xF0 | self.ram[(offset as usize) & (MBC2_RAM_SIZE - 1)],
            Mbc::Mbc3 { ram_select, .. } => match ram_select {
                0x00..=0x03 => self.ram[self.ram_index(ram_select as usize, offset)],
                _ => 0xFF,
            },
            Mbc::Mbc5 { ram_bank, .. } => self.ram[self.ram_index(ram_bank as usize, offset)],
        }
    }

    /// Write to the controller registers ($0000-$7FFF) or external RAM
    pub fn write(&mut self, address: u16, value: u8) {
        if (0xA000..=0xBFFF).contains(&address) {
            self.write_ram(address - 0xA000, value);
            return;
        }

        let enable = (value & 0x0F) == 0x0A;
        match &mut self.mbc {
            // No controller: ROM writes are ignored
            Mbc::RomOnly => {}
            Mbc::Mbc1 {
                rom_bank,
                upper,
                advanced,
            } => match address {
                0x0000..=0x1FFF => self.ram_enabled = enable,
                0x2000..=0x3FFF => *rom_bank = (value & 0x1F).max(1),
                0x4000..=0x5FFF => *upper = value & 0x03,
                _ => *advanced = (value & 0x01) != 0,
            },
            Mbc::Mbc2 { rom_bank } => {
                if address < 0x4000 {
                    if address & 0x0100 == 0 {
                        self.ram_enabled = enable;
                    } else {
                        *rom_bank = (value & 0x0F).max(1);
                    }
                }
            }
            Mbc::Mbc3 {
                rom_bank,
                ram_select,
            } => match address {
                0x0000..=0x1FFF => self.ram_enabled = enable,
                0x2000..=0x3FFF => *rom_bank = (value & 0x7F).max(1),
                0x4000..=0x5FFF => *ram_select = value & 0x0F,
                // RTC latch
                _ => {}
            },
            Mbc::Mbc5 { rom_bank, ram_bank } => match address {
                0x0000..=0x1FFF => self.ram_enabled = enable,
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | value as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0xFF) | ((value as u16 & 1) << 8),
                0x4000..=0x5FFF => *ram_bank = value & 0x0F,
                _ => {}
            },
        }
    }

    fn write_ram(&mut self, offset: u16, value: u8) {
        if self.ram.is_empty() {
            return;
        }
        let index = match self.mbc {
            Mbc::RomOnly => Some(self.ram_index(0, offset)),
            _ if !self.ram_enabled => None,
            Mbc::Mbc1 {
                upper, advanced, ..
            } => Some(self.ram_index(if advanced { upper as usize } else { 0 }, offset)),
            Mbc::Mbc2 { .. } => {
                let index = (offset as usize) & (MBC2_RAM_SIZE - 1);
                self.ram[index] = value & 0x0F;
                None
            }
            Mbc::Mbc3 { ram_select, .. } if ram_select <= 0x03 => {
                Some(self.ram_index(ram_select as usize, offset))
            }
            Mbc::Mbc3 { .. } => None,
            Mbc::Mbc5 { ram_bank, .. } => Some(self.ram_index(ram_bank as usize, offset)),
        };
        if let Some(index) = index {
            self.ram[index] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ROM image whose banks start with their own bank number
    fn make_rom(cartridge_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let banks = 2usize << rom_code;
        let mut rom = vec![0u8; banks * ROM_BANK_SIZE];
        for bank in 0..banks {
            rom[bank * ROM_BANK_SIZE] = bank as u8;
            rom[bank * ROM_BANK_SIZE + 1] = (bank >> 8) as u8;
        }
        rom[0x134..0x138].copy_from_slice(b"TEST");
        rom[0x147] = cartridge_type;
        rom[0x148] = rom_code;
        rom[0x149] = ram_code;
        rom[0x14D] = header_checksum(&rom);
        rom
    }

    #[test]
    fn test_header_parsing() {
        let rom = make_rom(0x03, 0x02, 0x03);
        let cart = Cartridge::from_rom(&rom).unwrap();
        let header = cart.header();
        assert_eq!(header.title, "TEST");
        assert_eq!(header.rom_banks, 8);
        assert_eq!(header.ram_size, 0x8000);
        assert!(header.checksum_ok());
        assert_eq!(cart.kind(), MbcKind::Mbc1);
        assert!(cart.has_ram());
        assert!(cart.has_battery());
    }

    #[test]
    fn test_checksum_mismatch_is_not_fatal() {
        let mut rom = make_rom(0x00, 0x00, 0x00);
        rom[0x14D] ^= 0xFF;
        let cart = Cartridge::from_rom(&rom).unwrap();
        assert!(!cart.header().checksum_ok());
    }

    #[test]
    fn test_load_errors() {
        assert_eq!(
            Cartridge::from_rom(&[0; 0x100]).unwrap_err(),
            CartridgeError::TooSmall(0x100)
        );
        let rom = make_rom(0x22, 0x00, 0x00);
        assert_eq!(
            Cartridge::from_rom(&rom).unwrap_err(),
            CartridgeError::UnsupportedType(0x22)
        );
        let mut rom = make_rom(0x00, 0x00, 0x00);
        rom[0x148] = 0x09;
        assert_eq!(
            Cartridge::from_rom(&rom).unwrap_err(),
            CartridgeError::UnknownRomSize(0x09)
        );
        let mut rom = make_rom(0x00, 0x00, 0x00);
        rom[0x149] = 0x07;
        assert_eq!(
            Cartridge::from_rom(&rom).unwrap_err(),
            CartridgeError::UnknownRamSize(0x07)
        );
        let rom = make_rom(0x01, 0x02, 0x00);
        assert_eq!(
            Cartridge::from_rom(&rom[..0x8000]).unwrap_err(),
            CartridgeError::Truncated {
                expected: 0x20000,
                actual: 0x8000
            }
        );
    }

    #[test]
    fn test_rom_only_ignores_writes() {
        let rom = make_rom(0x00, 0x00, 0x00);
        let mut cart = Cartridge::from_rom(&rom).unwrap();
        cart.write(0x2000, 0x05);
        cart.write(0x0000, 0x99);
        assert_eq!(cart.read(0x0000), 0x00);
        assert_eq!(cart.read(0x4000), 0x01);
        assert_eq!(cart.read(0xA000), 0xFF);
    }

    #[test]
    fn test_mbc1_banking() {
        let rom = make_rom(0x01, 0x05, 0x00);
        let mut cart = Cartridge::from_rom(&rom).unwrap();
        assert_eq!(cart.read(0x4000), 1);
        cart.write(0x2000, 0x00);
        assert_eq!(cart.read(0x4000), 1);
        cart.write(0x2000, 0x05);
        assert_eq!(cart.read(0x4000), 5);
        cart.write(0x4000, 0x01);
        assert_eq!(cart.read(0x4000), 0x25);
        // Bank 0 area follows the upper bits only in advanced mode
        assert_eq!(cart.read(0x0000), 0);
        cart.write(0x6000, 0x01);
        assert_eq!(cart.read(0x0000), 0x20);
        cart.reset();
        assert_eq!(cart.read(0x4000), 1);
    }

    #[test]
    fn test_mbc1_ram_gate() {
        let rom = make_rom(0x03, 0x00, 0x03);
        let mut cart = Cartridge::from_rom(&rom).unwrap();
        cart.write(0xA000, 0x12);
        assert_eq!(cart.read(0xA000), 0xFF);
        cart.write(0x0000, 0x0A);
        cart.write(0xA000, 0x12);
        assert_eq!(cart.read(0xA000), 0x12);
        cart.write(0x6000, 0x01);
        cart.write(0x4000, 0x02);
        assert_eq!(cart.read(0xA000), 0x00);
        cart.write(0xA001, 0x34);
        cart.write(0x0000, 0x00);
        assert_eq!(cart.read(0xA000), 0xFF);

        let ram = cart.ram();
        assert_eq!(ram.len(), 0x8000);
        assert_eq!(ram[0x0000], 0x12);
        assert_eq!(ram[0x4001], 0x34);
        cart.reset();
        assert_eq!(cart.ram()[0x4001], 0x34);
    }

    #[test]
    fn test_mbc2_nibble_ram() {
        let rom = make_rom(0x05, 0x01, 0x00);
        let mut cart = Cartridge::from_rom(&rom).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0xA000, 0xAB);
        assert_eq!(cart.read(0xA000), 0xFB);
        assert_eq!(cart.read(0xA200), 0xFB);
        cart.write(0x0100, 0x03);
        assert_eq!(cart.read(0x4000), 3);
    }

    #[test]
    fn test_mbc3_rtc_reads_ff() {
        let rom = make_rom(0x10, 0x02, 0x02);
        let mut cart = Cartridge::from_rom(&rom).unwrap();
        cart.write(0x0000, 0x0A);
        cart.write(0xA000, 0x42);
        cart.write(0x4000, 0x08);
        assert_eq!(cart.read(0xA000), 0xFF);
        cart.write(0x4000, 0x00);
        assert_eq!(cart.read(0xA000), 0x42);
        cart.write(0x2000, 0x06);
        assert_eq!(cart.read(0x4000), 6);
    }

    #[test]
    fn test_mbc5_nine_bit_banks() {
        let rom = make_rom(0x19, 0x08, 0x00);
        let mut cart = Cartridge::from_rom(&rom).unwrap();
        cart.write(0x2000, 0x00);
        assert_eq!(cart.read(0x4000), 0);
        cart.write(0x2000, 0x05);
        cart.write(0x3000, 0x01);
        assert_eq!(cart.read(0x4000), 0x05);
        assert_eq!(cart.read(0x4001), 0x01);
    }
}
