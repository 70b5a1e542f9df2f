//! Joypad input handling
//!
//! P1 multiplexes the direction pad and the action buttons onto four
//! active-low lines, chosen by two select bits written by software.

/// Game Boy buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Bit in the pressed mask: directions in the low nibble, actions in the high
    fn mask(self) -> u8 {
        match self {
            Button::Right => 0x01,
            Button::Left => 0x02,
            Button::Up => 0x04,
            Button::Down => 0x08,
            Button::A => 0x10,
            Button::B => 0x20,
            Button::Select => 0x40,
            Button::Start => 0x80,
        }
    }
}

/// Select bits in P1 (active low)
const SELECT_DIRECTIONS: u8 = 0x10;
const SELECT_ACTIONS: u8 = 0x20;

/// Joypad state
#[derive(Debug, Clone)]
pub struct Joypad {
    select: u8,
    pressed: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: SELECT_DIRECTIONS | SELECT_ACTIONS,
            pressed: 0,
        }
    }

    /// Lines currently pulled low, as an active-high nibble
    fn lines(&self) -> u8 {
        let mut lines = 0;
        if self.select & SELECT_DIRECTIONS == 0 {
            lines |= self.pressed & 0x0F;
        }
        if self.select & SELECT_ACTIONS == 0 {
            lines |= self.pressed >> 4;
        }
        lines
    }

    /// Any selected line low; wakes the CPU from `STOP`
    pub fn any_line_low(&self) -> bool {
        self.lines() != 0
    }

    pub fn read(&self) -> u8 {
        0xC0 | self.select | (!self.lines() & 0x0F)
    }

    /// Write the select bits. Returns true if a line went low.
    pub fn write(&mut self, value: u8) -> bool {
        let before = self.lines();
        self.select = value & (SELECT_DIRECTIONS | SELECT_ACTIONS);
        self.lines() & !before != 0
    }

    /// Press a button. Returns true if a line went low.
    pub fn press(&mut self, button: Button) -> bool {
        let before = self.lines();
        self.pressed |= button.mask();
        self.lines() & !before != 0
    }

    pub fn release(&mut self, button: Button) {
        self.pressed &= !button.mask();
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}
