//! Timer (DIV, TIMA, TMA, TAC)
//!
//! A 16-bit divider counts every CPU clock; DIV exposes its upper byte. TIMA
//! counts falling edges of one divider bit, gated by the TAC enable bit, so
//! writes to DIV or TAC can themselves produce an increment.

use crate::bus::IoReg;

/// Clocks between a TIMA overflow and the reload from TMA
const RELOAD_DELAY: u8 = 4;

/// Timer state
#[derive(Debug, Clone, Default)]
pub struct Timer {
    divider: u16,
    tima: u8,
    tma: u8,
    tac: u8,
    /// Clocks left until an overflowed TIMA reloads; 0 when idle
    reload_delay: u8,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Internal 16-bit divider
    pub fn divider(&self) -> u16 {
        self.divider
    }

    /// Set the divider directly (post-boot state)
    pub fn set_divider(&mut self, value: u16) {
        self.divider = value;
    }

    /// Advance one clock. Returns true when the timer interrupt is requested.
    pub fn tick(&mut self) -> bool {
        let mut interrupt = false;
        if self.reload_delay > 0 {
            self.reload_delay -= 1;
            if self.reload_delay == 0 {
                self.tima = self.tma;
                interrupt = true;
            }
        }

        let before = self.input();
        self.divider = self.divider.wrapping_add(1);
        self.detect_edge(before);
        interrupt
    }

    /// Divider bit watched by TIMA for the current TAC clock select
    fn selected_bit(&self) -> u16 {
        match self.tac & 0x03 {
            0b00 => 1 << 9,
            0b01 => 1 << 3,
            0b10 => 1 << 5,
            _ => 1 << 7,
        }
    }

    fn input(&self) -> bool {
        (self.tac & 0x04) != 0 && (self.divider & self.selected_bit()) != 0
    }

    fn detect_edge(&mut self, before: bool) {
        if before && !self.input() {
            let (value, overflow) = self.tima.overflowing_add(1);
            self.tima = value;
            if overflow {
                self.reload_delay = RELOAD_DELAY;
            }
        }
    }

    /// Reset the divider, as a DIV write or `STOP` does
    pub fn reset_divider(&mut self) {
        let before = self.input();
        self.divider = 0;
        self.detect_edge(before);
    }

    pub fn read(&self, reg: IoReg) -> u8 {
        match reg {
            IoReg::Div => (self.divider >> 8) as u8,
            IoReg::Tima => self.tima,
            IoReg::Tma => self.tma,
            IoReg::Tac => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, reg: IoReg, value: u8) {
        match reg {
            IoReg::Div => self.reset_divider(),
            IoReg::Tima => {
                // A write during the reload delay cancels the reload
                self.reload_delay = 0;
                self.tima = value;
            }
            IoReg::Tma => self.tma = value,
            IoReg::Tac => {
                let before = self.input();
                self.tac = value & 0x07;
                self.detect_edge(before);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(timer: &mut Timer, clocks: u32) -> u32 {
        (0..clocks).filter(|_| timer.tick()).count() as u32
    }

    #[test]
    fn test_div_counts_every_256_clocks() {
        let mut timer = Timer::new();
        run(&mut timer, 255);
        assert_eq!(timer.read(IoReg::Div), 0);
        run(&mut timer, 1);
        assert_eq!(timer.read(IoReg::Div), 1);
        timer.write(IoReg::Div, 0x55);
        assert_eq!(timer.divider(), 0);
    }

    #[test]
    fn test_tima_frequencies() {
        for (tac, period) in [(0x04u8, 1024u32), (0x05, 16), (0x06, 64), (0x07, 256)] {
            let mut timer = Timer::new();
            timer.write(IoReg::Tac, tac);
            run(&mut timer, period * 3);
            assert_eq!(timer.read(IoReg::Tima), 3, "TAC {:02X}", tac);
        }
    }

    #[test]
    fn test_disabled_timer_does_not_count() {
        let mut timer = Timer::new();
        timer.write(IoReg::Tac, 0x01);
        run(&mut timer, 1000);
        assert_eq!(timer.read(IoReg::Tima), 0);
        assert_eq!(timer.read(IoReg::Tac), 0xF9);
    }

    #[test]
    fn test_overflow_reloads_after_delay() {
        let mut timer = Timer::new();
        timer.write(IoReg::Tma, 0x10);
        timer.write(IoReg::Tima, 0xFF);
        timer.write(IoReg::Tac, 0x05);
        assert_eq!(run(&mut timer, 16), 0);
        assert_eq!(timer.read(IoReg::Tima), 0x00);
        assert_eq!(run(&mut timer, 3), 0);
        assert_eq!(timer.read(IoReg::Tima), 0x00);
        assert_eq!(run(&mut timer, 1), 1);
        assert_eq!(timer.read(IoReg::Tima), 0x10);
    }

    #[test]
    fn test_tima_write_cancels_reload() {
        let mut timer = Timer::new();
        timer.write(IoReg::Tma, 0x10);
        timer.write(IoReg::Tima, 0xFF);
        timer.write(IoReg::Tac, 0x05);
        run(&mut timer, 17);
        timer.write(IoReg::Tima, 0x42);
        assert_eq!(run(&mut timer, 4), 0);
        assert_eq!(timer.read(IoReg::Tima), 0x42);
    }

    #[test]
    fn test_div_write_falling_edge_increments() {
        let mut timer = Timer::new();
        timer.write(IoReg::Tac, 0x05);
        // Bit 3 set, not yet fallen
        run(&mut timer, 8);
        assert_eq!(timer.read(IoReg::Tima), 0);
        timer.write(IoReg::Div, 0);
        assert_eq!(timer.read(IoReg::Tima), 1);
    }
}
