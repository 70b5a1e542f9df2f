//! PPU (Picture Processing Unit) implementation
//!
//! The Game Boy PPU draws one pixel per dot through a pixel FIFO fed by a
//! tile fetcher. Key timings:
//! - 456 dots per line, 154 lines per frame (144 visible + 10 V-blank)
//! - OAM search: 80 dots, one OAM entry every 2 dots, up to 10 sprites
//! - Pixel transfer: 172 dots minimum, longer for fine scroll, sprites and
//!   the window; H-blank absorbs the difference so every line is 456 dots
//! - 160x144 output, four shades resolved through the palettes as each
//!   pixel leaves the FIFO

use log::debug;

use crate::bus::IoReg;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
pub const DOTS_PER_LINE: u16 = 456;
pub const LINES_PER_FRAME: u8 = 154;
pub const DOTS_PER_FRAME: u32 = DOTS_PER_LINE as u32 * LINES_PER_FRAME as u32;

pub const VRAM_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;

/// Dots spent in OAM search
const OAM_SEARCH_DOTS: u16 = 80;
/// Dots at the start of pixel transfer before the fetcher runs
const TRANSFER_STARTUP_DOTS: u8 = 6;
/// Dots a sprite fetch stalls the pipeline
const MAX_SPRITES_PER_LINE: usize = 10;

/// Interrupt request bits raised by the PPU (same layout as IF)
pub const VBLANK_REQUEST: u8 = 0x01;
pub const STAT_REQUEST: u8 = 0x02;

/// LCD control register (LCDC)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lcdc(u8);

impl Lcdc {
    pub const ENABLE: u8 = 0b1000_0000;
    pub const WINDOW_MAP: u8 = 0b0100_0000;
    pub const WINDOW_ENABLE: u8 = 0b0010_0000;
    pub const TILE_DATA: u8 = 0b0001_0000;
    pub const BG_MAP: u8 = 0b0000_1000;
    pub const SPRITE_SIZE: u8 = 0b0000_0100;
    pub const SPRITE_ENABLE: u8 = 0b0000_0010;
    pub const BG_ENABLE: u8 = 0b0000_0001;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn enabled(&self) -> bool {
        (self.0 & Self::ENABLE) != 0
    }

    pub fn window_map(&self) -> u16 {
        if (self.0 & Self::WINDOW_MAP) != 0 { 0x1C00 } else { 0x1800 }
    }

    pub fn window_enabled(&self) -> bool {
        (self.0 & Self::WINDOW_ENABLE) != 0
    }

    pub fn bg_map(&self) -> u16 {
        if (self.0 & Self::BG_MAP) != 0 { 0x1C00 } else { 0x1800 }
    }

    /// VRAM offset of a background/window tile row
    pub fn tile_address(&self, tile: u8, row: u8) -> u16 {
        let base = if (self.0 & Self::TILE_DATA) != 0 {
            tile as u16 * 16
        } else {
            (0x1000i32 + (tile as i8 as i32) * 16) as u16
        };
        base + row as u16 * 2
    }

    pub fn sprite_height(&self) -> u8 {
        if (self.0 & Self::SPRITE_SIZE) != 0 { 16 } else { 8 }
    }

    pub fn sprites_enabled(&self) -> bool {
        (self.0 & Self::SPRITE_ENABLE) != 0
    }

    pub fn bg_enabled(&self) -> bool {
        (self.0 & Self::BG_ENABLE) != 0
    }
}

/// PPU mode as reported in STAT bits 0-1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamSearch = 2,
    Transfer = 3,
}

/// Sprite pixel waiting in the FIFO on top of a background pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpritePixel {
    pub color: u8,
    pub palette1: bool,
    pub behind_bg: bool,
}

/// One FIFO entry: background color index plus an optional sprite pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pixel {
    pub color: u8,
    pub sprite: Option<SpritePixel>,
}

/// Pixel FIFO (16 entries)
#[derive(Debug, Clone)]
pub struct PixelFifo {
    entries: [Pixel; 16],
    head: usize,
    len: usize,
}

impl PixelFifo {
    pub const CAPACITY: usize = 16;

    pub fn new() -> Self {
        Self {
            entries: [Pixel::default(); Self::CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Append a tile row. Refused when fewer than 8 slots are free.
    pub fn push_row(&mut self, row: &[Pixel; 8]) -> bool {
        if self.len + 8 > Self::CAPACITY {
            return false;
        }
        for pixel in row {
            let index = (self.head + self.len) % Self::CAPACITY;
            self.entries[index] = *pixel;
            self.len += 1;
        }
        true
    }

    pub fn pop(&mut self) -> Option<Pixel> {
        if self.len == 0 {
            return None;
        }
        let pixel = self.entries[self.head];
        self.head = (self.head + 1) % Self::CAPACITY;
        self.len -= 1;
        Some(pixel)
    }

    /// Overlay a sprite row onto the head of the FIFO.
    ///
    /// The first `skip` columns of `row` are off the left edge. Transparent
    /// sprite pixels and slots already holding a sprite pixel are left alone,
    /// so the length never changes.
    pub fn merge_sprite(&mut self, skip: usize, row: &[SpritePixel; 8]) {
        for (slot, pixel) in row.iter().skip(skip).enumerate() {
            if slot >= self.len {
                break;
            }
            let entry = &mut self.entries[(self.head + slot) % Self::CAPACITY];
            if pixel.color != 0 && entry.sprite.is_none() {
                entry.sprite = Some(*pixel);
            }
        }
    }
}

impl Default for PixelFifo {
    fn default() -> Self {
        Self::new()
    }
}

/// Background fetcher steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStep {
    TileId,
    LowByte,
    HighByte,
    /// Waiting for room in the FIFO
    Push,
}

/// Background/window tile fetcher
#[derive(Debug, Clone)]
struct Fetcher {
    step: FetchStep,
    /// Second dot of a two-dot step
    second_dot: bool,
    /// Tile column counter for this line
    tile_x: u8,
    window: bool,
    tile_id: u8,
    low: u8,
    high: u8,
}

impl Fetcher {
    fn new() -> Self {
        Self {
            step: FetchStep::TileId,
            second_dot: false,
            tile_x: 0,
            window: false,
            tile_id: 0,
            low: 0,
            high: 0,
        }
    }

    fn row(&self, bg_enabled: bool) -> [Pixel; 8] {
        let mut row = [Pixel::default(); 8];
        if bg_enabled {
            for (i, pixel) in row.iter_mut().enumerate() {
                let bit = 7 - i;
                pixel.color = ((self.low >> bit) & 1) | (((self.high >> bit) & 1) << 1);
            }
        }
        row
    }
}

/// OAM entry selected for the current line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sprite {
    pub y: u8,
    pub x: u8,
    pub tile: u8,
    pub flags: u8,
    pub oam_index: u8,
}

impl Sprite {
    pub fn behind_bg(&self) -> bool {
        (self.flags & 0x80) != 0
    }

    pub fn y_flip(&self) -> bool {
        (self.flags & 0x40) != 0
    }

    pub fn x_flip(&self) -> bool {
        (self.flags & 0x20) != 0
    }

    pub fn palette1(&self) -> bool {
        (self.flags & 0x10) != 0
    }
}

/// Sprite fetch in progress, stepping through the same fetch steps as the background
#[derive(Debug, Clone, Copy)]
struct SpriteFetch {
    slot: usize,
    step: FetchStep,
    second_dot: bool,
    tile: u8,
    low: u8,
}

impl SpriteFetch {
    fn new(slot: usize) -> Self {
        Self {
            slot,
            step: FetchStep::TileId,
            second_dot: false,
            tile: 0,
            low: 0,
        }
    }
}

/// A completed 160x144 picture of 2-bit shades (0 = lightest)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pixels: Vec<u8>,
}

impl Frame {
    pub fn blank() -> Self {
        Self {
            pixels: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * SCREEN_WIDTH + x]
    }

    /// Convert to 0RGB pixels for display
    pub fn to_rgb(&self) -> Vec<u32> {
        self.pixels.iter().map(|&shade| shade_to_rgb(shade)).collect()
    }
}

/// Classic green-tinted display colours, lightest first
pub fn shade_to_rgb(shade: u8) -> u32 {
    match shade & 0x03 {
        0 => 0x00E0_F8D0,
        1 => 0x0088_C070,
        2 => 0x0034_6856,
        _ => 0x0008_1820,
    }
}

fn palette_shade(palette: u8, color: u8) -> u8 {
    (palette >> (color * 2)) & 0x03
}

/// PPU state
#[derive(Debug, Clone)]
pub struct Ppu {
    vram: Vec<u8>,
    oam: Vec<u8>,

    lcdc: Lcdc,
    /// STAT interrupt select bits (3-6)
    stat_select: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    mode: Mode,
    /// Dots since the start of the current line
    line_dot: u16,

    sprites: Vec<Sprite>,
    /// Bit per entry of `sprites` already fetched this line
    sprites_fetched: u16,
    sprite_fetch: Option<SpriteFetch>,

    fifo: PixelFifo,
    fetcher: Fetcher,
    startup: u8,
    /// Pixels still to be dropped before output (fine scroll, window left edge)
    discard: u8,
    /// Pixels emitted on this line
    lx: u8,

    /// LY matched WY at some point this frame
    window_y_hit: bool,
    /// Window rows drawn so far this frame
    window_line: u8,

    /// Shared STAT interrupt line level
    stat_line: bool,
    /// Pending interrupt requests, drained by the bus
    requests: u8,

    back: Vec<u8>,
    front: Vec<u8>,
    frames: u64,
}

impl Ppu {
    /// Create a PPU with the LCD off
    pub fn new() -> Self {
        Self {
            vram: vec![0; VRAM_SIZE],
            oam: vec![0; OAM_SIZE],
            lcdc: Lcdc::default(),
            stat_select: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            mode: Mode::HBlank,
            line_dot: 0,
            sprites: Vec::with_capacity(MAX_SPRITES_PER_LINE),
            sprites_fetched: 0,
            sprite_fetch: None,
            fifo: PixelFifo::new(),
            fetcher: Fetcher::new(),
            startup: 0,
            discard: 0,
            lx: 0,
            window_y_hit: false,
            window_line: 0,
            stat_line: false,
            requests: 0,
            back: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            front: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            frames: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn line_dot(&self) -> u16 {
        self.line_dot
    }

    pub fn lcdc(&self) -> Lcdc {
        self.lcdc
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc.enabled()
    }

    /// Sprites selected for the current line, in OAM order
    pub fn line_sprites(&self) -> &[Sprite] {
        &self.sprites
    }

    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    /// Frames completed (V-blank entries) since power on
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Snapshot of the last completed picture
    pub fn frame(&self) -> Frame {
        Frame {
            pixels: self.front.clone(),
        }
    }

    /// Take the interrupt requests raised since the last call
    pub fn take_requests(&mut self) -> u8 {
        std::mem::take(&mut self.requests)
    }

    pub fn vram_blocked(&self) -> bool {
        self.lcdc.enabled() && self.mode == Mode::Transfer
    }

    pub fn oam_blocked(&self) -> bool {
        self.lcdc.enabled() && matches!(self.mode, Mode::OamSearch | Mode::Transfer)
    }

    pub fn read_vram(&self, address: u16) -> u8 {
        if self.vram_blocked() {
            0xFF
        } else {
            self.vram_raw(address)
        }
    }

    pub fn write_vram(&mut self, address: u16, value: u8) {
        if !self.vram_blocked() {
            self.vram[(address & 0x1FFF) as usize] = value;
        }
    }

    /// VRAM read that ignores mode blocking (DMA source)
    pub fn vram_raw(&self, address: u16) -> u8 {
        self.vram[(address & 0x1FFF) as usize]
    }

    pub fn read_oam(&self, address: u16) -> u8 {
        if self.oam_blocked() {
            0xFF
        } else {
            self.oam[(address - 0xFE00) as usize % OAM_SIZE]
        }
    }

    pub fn write_oam(&mut self, address: u16, value: u8) {
        if !self.oam_blocked() {
            self.oam[(address - 0xFE00) as usize % OAM_SIZE] = value;
        }
    }

    /// OAM write from DMA; never blocked
    pub fn write_oam_raw(&mut self, index: usize, value: u8) {
        self.oam[index % OAM_SIZE] = value;
    }

    pub fn oam_raw(&self, index: usize) -> u8 {
        self.oam[index % OAM_SIZE]
    }

    /// Read one of the LCD registers
    pub fn read_register(&self, reg: IoReg) -> u8 {
        match reg {
            IoReg::Lcdc => self.lcdc.bits(),
            IoReg::Stat => {
                let mode = if self.lcdc.enabled() { self.mode as u8 } else { 0 };
                let coincidence = if self.ly == self.lyc { 0x04 } else { 0 };
                0x80 | self.stat_select | coincidence | mode
            }
            IoReg::Scy => self.scy,
            IoReg::Scx => self.scx,
            IoReg::Ly => self.ly,
            IoReg::Lyc => self.lyc,
            IoReg::Bgp => self.bgp,
            IoReg::Obp0 => self.obp0,
            IoReg::Obp1 => self.obp1,
            IoReg::Wy => self.wy,
            IoReg::Wx => self.wx,
            _ => 0xFF,
        }
    }

    /// Write one of the LCD registers
    pub fn write_register(&mut self, reg: IoReg, value: u8) {
        match reg {
            IoReg::Lcdc => self.write_lcdc(value),
            IoReg::Stat => {
                self.stat_select = value & 0x78;
                self.update_stat_line();
            }
            IoReg::Scy => self.scy = value,
            IoReg::Scx => self.scx = value,
            // LY is read-only
            IoReg::Ly => {}
            IoReg::Lyc => {
                self.lyc = value;
                self.update_stat_line();
            }
            IoReg::Bgp => self.bgp = value,
            IoReg::Obp0 => self.obp0 = value,
            IoReg::Obp1 => self.obp1 = value,
            IoReg::Wy => self.wy = value,
            IoReg::Wx => self.wx = value,
            _ => {}
        }
    }

    fn write_lcdc(&mut self, value: u8) {
        let was_enabled = self.lcdc.enabled();
        self.lcdc = Lcdc::new(value);
        match (was_enabled, self.lcdc.enabled()) {
            (true, false) => {
                debug!("LCD off at line {}", self.ly);
                self.ly = 0;
                self.line_dot = 0;
                self.mode = Mode::HBlank;
                self.stat_line = false;
                self.front.fill(0);
            }
            (false, true) => {
                debug!("LCD on");
                self.ly = 0;
                self.line_dot = 0;
                self.window_line = 0;
                self.window_y_hit = false;
                self.start_line();
                self.update_stat_line();
            }
            _ => {}
        }
    }

    /// Advance one dot
    pub fn tick(&mut self) {
        if !self.lcdc.enabled() {
            return;
        }

        match self.mode {
            Mode::OamSearch => {
                if self.line_dot % 2 == 0 {
                    self.scan_oam_entry((self.line_dot / 2) as usize);
                }
            }
            Mode::Transfer => self.transfer_dot(),
            Mode::HBlank | Mode::VBlank => {}
        }

        self.line_dot += 1;
        if self.line_dot == DOTS_PER_LINE {
            self.line_dot = 0;
            self.next_line();
        } else if self.mode == Mode::OamSearch && self.line_dot == OAM_SEARCH_DOTS {
            self.start_transfer();
        } else if self.mode == Mode::Transfer && self.line_dot == DOTS_PER_LINE - 1 {
            // Cannot happen with hardware-sized sprite lists; keep the line length fixed
            self.finish_transfer();
        }

        self.update_stat_line();
    }

    fn next_line(&mut self) {
        self.ly += 1;
        if self.ly == SCREEN_HEIGHT as u8 {
            self.mode = Mode::VBlank;
            self.requests |= VBLANK_REQUEST;
            self.front.copy_from_slice(&self.back);
            self.frames += 1;
        } else if self.ly == LINES_PER_FRAME {
            self.ly = 0;
            self.window_line = 0;
            self.window_y_hit = false;
            self.start_line();
        } else if self.ly < SCREEN_HEIGHT as u8 {
            self.start_line();
        }
    }

    /// Begin OAM search for the current line
    fn start_line(&mut self) {
        self.mode = Mode::OamSearch;
        self.sprites.clear();
        self.sprites_fetched = 0;
        self.sprite_fetch = None;
        self.fifo.clear();
        self.fetcher = Fetcher::new();
        if self.ly == self.wy {
            self.window_y_hit = true;
        }
    }

    fn scan_oam_entry(&mut self, index: usize) {
        if self.sprites.len() >= MAX_SPRITES_PER_LINE {
            return;
        }
        let base = index * 4;
        let y = self.oam[base];
        let x = self.oam[base + 1];
        let line = self.ly as u16 + 16;
        let height = self.lcdc.sprite_height() as u16;
        if x > 0 && line >= y as u16 && line < y as u16 + height {
            self.sprites.push(Sprite {
                y,
                x,
                tile: self.oam[base + 2],
                flags: self.oam[base + 3],
                oam_index: index as u8,
            });
        }
    }

    fn start_transfer(&mut self) {
        self.mode = Mode::Transfer;
        self.fifo.clear();
        self.fetcher = Fetcher::new();
        self.startup = TRANSFER_STARTUP_DOTS;
        self.discard = self.scx % 8;
        self.lx = 0;
    }

    fn finish_transfer(&mut self) {
        if self.fetcher.window {
            self.window_line = self.window_line.wrapping_add(1);
        }
        self.mode = Mode::HBlank;
    }

    fn transfer_dot(&mut self) {
        if self.startup > 0 {
            self.startup -= 1;
            return;
        }

        if let Some(fetch) = self.sprite_fetch {
            self.sprite_fetch_dot(fetch);
            return;
        }

        if self.window_triggered() {
            self.fifo.clear();
            self.fetcher = Fetcher::new();
            self.fetcher.window = true;
            self.discard = 7u8.saturating_sub(self.wx);
        }

        if let Some(slot) = self.due_sprite() {
            // The background fetcher finishes its tile before a sprite fetch takes over
            if self.fetcher_idle() && !self.fifo.is_empty() {
                self.sprite_fetch_dot(SpriteFetch::new(slot));
            } else {
                self.fetcher_dot();
            }
            return;
        }

        if let Some(pixel) = self.fifo.pop() {
            if self.discard > 0 {
                self.discard -= 1;
            } else {
                self.emit(pixel);
                if self.lx as usize == SCREEN_WIDTH {
                    self.finish_transfer();
                    return;
                }
            }
        }

        self.fetcher_dot();
    }

    fn window_triggered(&self) -> bool {
        self.lcdc.window_enabled()
            && self.window_y_hit
            && !self.fetcher.window
            && self.wx <= 166
            && self.lx as u16 + 7 >= self.wx as u16
    }

    /// Earliest not-yet-fetched sprite whose left edge has been reached
    fn due_sprite(&self) -> Option<usize> {
        if !self.lcdc.sprites_enabled() || self.discard > 0 {
            return None;
        }
        let reach = self.lx as u16 + 8;
        self.sprites
            .iter()
            .enumerate()
            .filter(|&(slot, sprite)| {
                self.sprites_fetched & (1 << slot) == 0 && sprite.x as u16 <= reach
            })
            .min_by_key(|(_, sprite)| (sprite.x, sprite.oam_index))
            .map(|(slot, _)| slot)
    }

    /// Between tiles or holding a finished one for the FIFO
    fn fetcher_idle(&self) -> bool {
        match self.fetcher.step {
            FetchStep::Push => true,
            FetchStep::TileId => !self.fetcher.second_dot,
            FetchStep::LowByte | FetchStep::HighByte => false,
        }
    }

    fn sprite_fetch_dot(&mut self, mut fetch: SpriteFetch) {
        if fetch.second_dot {
            match fetch.step {
                FetchStep::TileId => {
                    let sprite = self.sprites[fetch.slot];
                    fetch.tile = if self.lcdc.sprite_height() == 16 {
                        sprite.tile & 0xFE
                    } else {
                        sprite.tile
                    };
                    fetch.step = FetchStep::LowByte;
                }
                FetchStep::LowByte => {
                    fetch.low = self.vram[self.sprite_row_address(&fetch)];
                    fetch.step = FetchStep::HighByte;
                }
                FetchStep::HighByte | FetchStep::Push => {
                    let high = self.vram[self.sprite_row_address(&fetch) + 1];
                    self.merge_sprite(fetch.slot, fetch.low, high);
                    self.sprite_fetch = None;
                    return;
                }
            }
        }
        fetch.second_dot = !fetch.second_dot;
        self.sprite_fetch = Some(fetch);
    }

    fn sprite_row_address(&self, fetch: &SpriteFetch) -> usize {
        let sprite = self.sprites[fetch.slot];
        let height = self.lcdc.sprite_height();
        let mut row = (self.ly.wrapping_add(16).wrapping_sub(sprite.y)) & (height - 1);
        if sprite.y_flip() {
            row = height - 1 - row;
        }
        fetch.tile as usize * 16 + row as usize * 2
    }

    fn merge_sprite(&mut self, slot: usize, low: u8, high: u8) {
        self.sprites_fetched |= 1 << slot;
        let sprite = self.sprites[slot];

        let mut pixels = [SpritePixel::default(); 8];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let bit = if sprite.x_flip() { i } else { 7 - i };
            *pixel = SpritePixel {
                color: ((low >> bit) & 1) | (((high >> bit) & 1) << 1),
                palette1: sprite.palette1(),
                behind_bg: sprite.behind_bg(),
            };
        }

        let skip = (self.lx as usize + 8).saturating_sub(sprite.x as usize);
        self.fifo.merge_sprite(skip, &pixels);
    }

    fn fetcher_dot(&mut self) {
        match self.fetcher.step {
            FetchStep::TileId => {
                if self.fetcher.second_dot {
                    self.fetch_tile_id();
                    self.fetcher.step = FetchStep::LowByte;
                }
                self.fetcher.second_dot = !self.fetcher.second_dot;
            }
            FetchStep::LowByte => {
                if self.fetcher.second_dot {
                    self.fetcher.low = self.vram[self.tile_row_address() as usize];
                    self.fetcher.step = FetchStep::HighByte;
                }
                self.fetcher.second_dot = !self.fetcher.second_dot;
            }
            FetchStep::HighByte => {
                if self.fetcher.second_dot {
                    self.fetcher.high = self.vram[self.tile_row_address() as usize + 1];
                    self.fetcher.step = FetchStep::Push;
                    self.fetcher.second_dot = false;
                    self.push_row();
                } else {
                    self.fetcher.second_dot = true;
                }
            }
            FetchStep::Push => self.push_row(),
        }
    }

    fn push_row(&mut self) {
        if self.fifo.len() >= 8 {
            return;
        }
        let row = self.fetcher.row(self.lcdc.bg_enabled());
        if self.fifo.push_row(&row) {
            self.fetcher.tile_x = self.fetcher.tile_x.wrapping_add(1);
            self.fetcher.step = FetchStep::TileId;
        }
    }

    /// Y coordinate within the background or window map for this line
    fn map_y(&self) -> u8 {
        if self.fetcher.window {
            self.window_line
        } else {
            self.ly.wrapping_add(self.scy)
        }
    }

    fn fetch_tile_id(&mut self) {
        let y = self.map_y();
        let (map, x) = if self.fetcher.window {
            (self.lcdc.window_map(), self.fetcher.tile_x & 31)
        } else {
            (
                self.lcdc.bg_map(),
                ((self.scx / 8).wrapping_add(self.fetcher.tile_x)) & 31,
            )
        };
        let address = map + (y as u16 / 8) * 32 + x as u16;
        self.fetcher.tile_id = self.vram[address as usize];
    }

    fn tile_row_address(&self) -> u16 {
        self.lcdc.tile_address(self.fetcher.tile_id, self.map_y() % 8)
    }

    /// Resolve a FIFO pixel through the palettes and store it
    fn emit(&mut self, pixel: Pixel) {
        let shade = match pixel.sprite {
            Some(sprite) if !(sprite.behind_bg && pixel.color != 0) => {
                let palette = if sprite.palette1 { self.obp1 } else { self.obp0 };
                palette_shade(palette, sprite.color)
            }
            _ => palette_shade(self.bgp, pixel.color),
        };
        let index = self.ly as usize * SCREEN_WIDTH + self.lx as usize;
        self.back[index] = shade;
        self.lx += 1;
    }

    /// Recompute the shared STAT line and request on its rising edge
    fn update_stat_line(&mut self) {
        if !self.lcdc.enabled() {
            self.stat_line = false;
            return;
        }
        let line = (self.stat_select & 0x08 != 0 && self.mode == Mode::HBlank)
            || (self.stat_select & 0x10 != 0 && self.mode == Mode::VBlank)
            || (self.stat_select & 0x20 != 0 && self.mode == Mode::OamSearch)
            || (self.stat_select & 0x40 != 0 && self.ly == self.lyc);
        if line && !self.stat_line {
            self.requests |= STAT_REQUEST;
        }
        self.stat_line = line;
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}
