//! APU (Audio Processing Unit)
//!
//! Four channels:
//! - 2 pulse channels (channel 1 with frequency sweep)
//! - 1 wave channel playing 32 4-bit samples from wave RAM
//! - 1 noise channel (15- or 7-bit LFSR)
//!
//! A 512 Hz frame sequencer clocks lengths, sweep and envelopes. The mixed
//! output is downsampled into interleaved stereo `i16` frames and pulled by
//! the front end.

use std::collections::VecDeque;

use crate::bus::IoReg;

/// Base clock rate (dots per second)
pub const CLOCK_HZ: u32 = 4_194_304;

/// Dots per frame-sequencer step (512 Hz)
const SEQUENCER_PERIOD: u32 = 8192;

/// Buffered audio is capped at this many seconds' worth / 4
const BUFFER_DIVISOR: usize = 4;

/// Output amplitude per DAC unit after master volume
const MIX_SCALE: i32 = 64;

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

const NOISE_DIVISORS: [u32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

/// Bits that read back as 1, indexed from NR10 (0xFF10) to NR52 (0xFF26)
const READ_MASKS: [u8; 0x17] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, // NR10-NR14
    0xFF, 0x3F, 0x00, 0xFF, 0xBF, // unused, NR21-NR24
    0x7F, 0xFF, 0x9F, 0xFF, 0xBF, // NR30-NR34
    0xFF, 0xFF, 0x00, 0x00, 0xBF, // unused, NR41-NR44
    0x00, 0x00, 0x70, // NR50-NR52
];

fn register_index(reg: IoReg) -> Option<usize> {
    let address = reg as u16;
    if (0xFF10..=0xFF26).contains(&address) {
        Some((address - 0xFF10) as usize)
    } else {
        None
    }
}

/// Length counter
#[derive(Debug, Clone, Default)]
struct Length {
    counter: u16,
    enabled: bool,
}

impl Length {
    fn load(&mut self, max: u16, value: u16) {
        self.counter = max - value;
    }

    fn trigger(&mut self, max: u16) {
        if self.counter == 0 {
            self.counter = max;
        }
    }

    /// Returns true when the counter just expired
    fn clock(&mut self) -> bool {
        if self.enabled && self.counter > 0 {
            self.counter -= 1;
            return self.counter == 0;
        }
        false
    }
}

/// Volume envelope (NRx2)
#[derive(Debug, Clone, Default)]
struct Envelope {
    initial: u8,
    increase: bool,
    period: u8,
    volume: u8,
    timer: u8,
}

impl Envelope {
    fn set(&mut self, value: u8) {
        self.initial = value >> 4;
        self.increase = (value & 0x08) != 0;
        self.period = value & 0x07;
    }

    /// DAC power comes from the upper five bits of NRx2
    fn dac_enabled(value: u8) -> bool {
        (value & 0xF8) != 0
    }

    fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = self.period;
    }

    fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period;
            if self.increase && self.volume < 15 {
                self.volume += 1;
            } else if !self.increase && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }
}

/// Frequency sweep (NR10)
#[derive(Debug, Clone, Default)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn set(&mut self, value: u8) {
        self.period = (value >> 4) & 0x07;
        self.negate = (value & 0x08) != 0;
        self.shift = value & 0x07;
    }

    fn reload_timer(&mut self) {
        self.timer = if self.period == 0 { 8 } else { self.period };
    }

    fn next_frequency(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow + delta
        }
    }
}

/// Pulse channel (1 and 2)
#[derive(Debug, Clone, Default)]
struct PulseChannel {
    enabled: bool,
    dac: bool,
    duty: u8,
    duty_position: u8,
    frequency: u16,
    timer: u32,
    length: Length,
    envelope: Envelope,
    sweep: Sweep,
}

impl PulseChannel {
    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 4
    }

    fn set_duty_length(&mut self, value: u8) {
        self.duty = value >> 6;
        self.length.load(64, (value & 0x3F) as u16);
    }

    fn set_envelope(&mut self, value: u8) {
        self.envelope.set(value);
        self.dac = Envelope::dac_enabled(value);
        if !self.dac {
            self.enabled = false;
        }
    }

    fn set_freq_low(&mut self, value: u8) {
        self.frequency = (self.frequency & 0x0700) | value as u16;
    }

    /// NRx4; returns true on trigger
    fn set_freq_high(&mut self, value: u8) -> bool {
        self.frequency = (self.frequency & 0x00FF) | (((value & 0x07) as u16) << 8);
        self.length.enabled = (value & 0x40) != 0;
        (value & 0x80) != 0
    }

    fn trigger(&mut self, with_sweep: bool) {
        self.enabled = self.dac;
        self.length.trigger(64);
        self.timer = self.period();
        self.envelope.trigger();

        if with_sweep {
            self.sweep.shadow = self.frequency;
            self.sweep.reload_timer();
            self.sweep.enabled = self.sweep.period != 0 || self.sweep.shift != 0;
            if self.sweep.shift != 0 && self.sweep.next_frequency() > 0x7FF {
                self.enabled = false;
            }
        }
    }

    fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    fn clock_sweep(&mut self) {
        if self.sweep.timer > 0 {
            self.sweep.timer -= 1;
        }
        if self.sweep.timer != 0 {
            return;
        }
        self.sweep.reload_timer();
        if !self.sweep.enabled || self.sweep.period == 0 {
            return;
        }

        let frequency = self.sweep.next_frequency();
        if frequency > 0x7FF {
            self.enabled = false;
        } else if self.sweep.shift != 0 {
            self.sweep.shadow = frequency;
            self.frequency = frequency;
            if self.sweep.next_frequency() > 0x7FF {
                self.enabled = false;
            }
        }
    }

    fn tick(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period();
            self.duty_position = (self.duty_position + 1) % 8;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_position as usize] * self.envelope.volume
    }
}

/// Wave channel
#[derive(Debug, Clone, Default)]
struct WaveChannel {
    enabled: bool,
    dac: bool,
    volume_code: u8,
    frequency: u16,
    timer: u32,
    position: u8,
    length: Length,
}

impl WaveChannel {
    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 2
    }

    fn trigger(&mut self) {
        self.enabled = self.dac;
        self.length.trigger(256);
        self.timer = self.period();
        self.position = 0;
    }

    fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    fn tick(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period();
            self.position = (self.position + 1) % 32;
        }
    }

    fn output(&self, wave_ram: &[u8; 16]) -> u8 {
        if !self.enabled {
            return 0;
        }
        let byte = wave_ram[(self.position / 2) as usize];
        let sample = if self.position % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        match self.volume_code {
            0 => 0,
            1 => sample,
            2 => sample >> 1,
            _ => sample >> 2,
        }
    }
}

/// Noise channel
#[derive(Debug, Clone)]
struct NoiseChannel {
    enabled: bool,
    dac: bool,
    shift: u8,
    width7: bool,
    divisor: u8,
    timer: u32,
    lfsr: u16,
    length: Length,
    envelope: Envelope,
}

impl NoiseChannel {
    fn new() -> Self {
        Self {
            enabled: false,
            dac: false,
            shift: 0,
            width7: false,
            divisor: 0,
            timer: 0,
            lfsr: 0x7FFF,
            length: Length::default(),
            envelope: Envelope::default(),
        }
    }

    fn period(&self) -> u32 {
        NOISE_DIVISORS[self.divisor as usize] << self.shift
    }

    fn set_polynomial(&mut self, value: u8) {
        self.shift = value >> 4;
        self.width7 = (value & 0x08) != 0;
        self.divisor = value & 0x07;
    }

    fn set_envelope(&mut self, value: u8) {
        self.envelope.set(value);
        self.dac = Envelope::dac_enabled(value);
        if !self.dac {
            self.enabled = false;
        }
    }

    fn trigger(&mut self) {
        self.enabled = self.dac;
        self.length.trigger(64);
        self.timer = self.period();
        self.envelope.trigger();
        self.lfsr = 0x7FFF;
    }

    fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    fn tick(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period();
            let bit = (self.lfsr & 1) ^ ((self.lfsr >> 1) & 1);
            self.lfsr = (self.lfsr >> 1) | (bit << 14);
            if self.width7 {
                self.lfsr = (self.lfsr & !0x40) | (bit << 6);
            }
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        (!self.lfsr & 1) as u8 * self.envelope.volume
    }
}

/// APU state
#[derive(Debug, Clone)]
pub struct Apu {
    /// Last value written to each register NR10..NR52
    registers: [u8; 0x17],
    wave_ram: [u8; 16],
    powered: bool,

    pulse1: PulseChannel,
    pulse2: PulseChannel,
    wave: WaveChannel,
    noise: NoiseChannel,

    sequencer_timer: u32,
    sequencer_step: u8,

    sample_rate: u32,
    /// Fractional sample-clock accumulator
    sample_phase: u32,
    samples: VecDeque<i16>,
    capacity: usize,
}

impl Apu {
    /// Create a powered-off APU producing `sample_rate` stereo frames per second
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.clamp(1, CLOCK_HZ);
        let capacity = (sample_rate as usize * 2 / BUFFER_DIVISOR).max(2);
        Self {
            registers: [0; 0x17],
            wave_ram: [0; 16],
            powered: false,
            pulse1: PulseChannel::default(),
            pulse2: PulseChannel::default(),
            wave: WaveChannel::default(),
            noise: NoiseChannel::new(),
            sequencer_timer: SEQUENCER_PERIOD,
            sequencer_step: 0,
            sample_rate,
            sample_phase: 0,
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel status bits as reported in NR52
    pub fn channel_status(&self) -> u8 {
        (self.pulse1.enabled as u8)
            | (self.pulse2.enabled as u8) << 1
            | (self.wave.enabled as u8) << 2
            | (self.noise.enabled as u8) << 3
    }

    /// Advance one dot
    pub fn tick(&mut self) {
        if self.powered {
            self.pulse1.tick();
            self.pulse2.tick();
            self.wave.tick();
            self.noise.tick();

            self.sequencer_timer -= 1;
            if self.sequencer_timer == 0 {
                self.sequencer_timer = SEQUENCER_PERIOD;
                self.step_sequencer();
            }
        }

        self.sample_phase += self.sample_rate;
        if self.sample_phase >= CLOCK_HZ {
            self.sample_phase -= CLOCK_HZ;
            let (left, right) = self.mix();
            self.push_frame(left, right);
        }
    }

    fn step_sequencer(&mut self) {
        let step = self.sequencer_step;
        if step % 2 == 0 {
            self.pulse1.clock_length();
            self.pulse2.clock_length();
            self.wave.clock_length();
            self.noise.clock_length();
        }
        if step == 2 || step == 6 {
            self.pulse1.clock_sweep();
        }
        if step == 7 {
            self.pulse1.envelope.clock();
            self.pulse2.envelope.clock();
            self.noise.envelope.clock();
        }
        self.sequencer_step = (step + 1) % 8;
    }

    /// Current stereo output
    fn mix(&self) -> (i16, i16) {
        if !self.powered {
            return (0, 0);
        }
        let channels = [
            (self.pulse1.dac, self.pulse1.output()),
            (self.pulse2.dac, self.pulse2.output()),
            (self.wave.dac, self.wave.output(&self.wave_ram)),
            (self.noise.dac, self.noise.output()),
        ];
        let panning = self.register(IoReg::Nr51);
        let (mut left, mut right) = (0i32, 0i32);
        for (i, &(dac, value)) in channels.iter().enumerate() {
            if !dac {
                continue;
            }
            let analog = value as i32 * 2 - 15;
            if panning & (0x10 << i) != 0 {
                left += analog;
            }
            if panning & (0x01 << i) != 0 {
                right += analog;
            }
        }
        let volume = self.register(IoReg::Nr50);
        left *= (((volume >> 4) & 0x07) + 1) as i32;
        right *= ((volume & 0x07) + 1) as i32;
        ((left * MIX_SCALE) as i16, (right * MIX_SCALE) as i16)
    }

    fn push_frame(&mut self, left: i16, right: i16) {
        if self.samples.len() + 2 > self.capacity {
            self.samples.pop_front();
            self.samples.pop_front();
        }
        self.samples.push_back(left);
        self.samples.push_back(right);
    }

    /// Samples (interleaved left/right) waiting to be pulled
    pub fn buffered(&self) -> usize {
        self.samples.len()
    }

    /// Move buffered samples into `out`; returns how many were written
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        let count = out.len().min(self.samples.len()) & !1;
        for (slot, sample) in out.iter_mut().zip(self.samples.drain(..count)) {
            *slot = sample;
        }
        count
    }

    fn register(&self, reg: IoReg) -> u8 {
        register_index(reg).map_or(0, |i| self.registers[i])
    }

    pub fn read(&self, reg: IoReg) -> u8 {
        match reg {
            IoReg::Nr52 => 0x70 | (self.powered as u8) << 7 | self.channel_status(),
            _ => match register_index(reg) {
                Some(i) => self.registers[i] | READ_MASKS[i],
                None => 0xFF,
            },
        }
    }

    pub fn write(&mut self, reg: IoReg, value: u8) {
        if reg == IoReg::Nr52 {
            self.set_power(value & 0x80 != 0);
            return;
        }
        if !self.powered {
            return;
        }
        let Some(index) = register_index(reg) else {
            return;
        };
        self.registers[index] = value;

        match reg {
            IoReg::Nr10 => self.pulse1.sweep.set(value),
            IoReg::Nr11 => self.pulse1.set_duty_length(value),
            IoReg::Nr12 => self.pulse1.set_envelope(value),
            IoReg::Nr13 => self.pulse1.set_freq_low(value),
            IoReg::Nr14 => {
                if self.pulse1.set_freq_high(value) {
                    self.pulse1.trigger(true);
                }
            }
            IoReg::Nr21 => self.pulse2.set_duty_length(value),
            IoReg::Nr22 => self.pulse2.set_envelope(value),
            IoReg::Nr23 => self.pulse2.set_freq_low(value),
            IoReg::Nr24 => {
                if self.pulse2.set_freq_high(value) {
                    self.pulse2.trigger(false);
                }
            }
            IoReg::Nr30 => {
                self.wave.dac = (value & 0x80) != 0;
                if !self.wave.dac {
                    self.wave.enabled = false;
                }
            }
            IoReg::Nr31 => self.wave.length.load(256, value as u16),
            IoReg::Nr32 => self.wave.volume_code = (value >> 5) & 0x03,
            IoReg::Nr33 => self.wave.frequency = (self.wave.frequency & 0x0700) | value as u16,
            IoReg::Nr34 => {
                self.wave.frequency =
                    (self.wave.frequency & 0x00FF) | (((value & 0x07) as u16) << 8);
                self.wave.length.enabled = (value & 0x40) != 0;
                if value & 0x80 != 0 {
                    self.wave.trigger();
                }
            }
            IoReg::Nr41 => self.noise.length.load(64, (value & 0x3F) as u16),
            IoReg::Nr42 => self.noise.set_envelope(value),
            IoReg::Nr43 => self.noise.set_polynomial(value),
            IoReg::Nr44 => {
                self.noise.length.enabled = (value & 0x40) != 0;
                if value & 0x80 != 0 {
                    self.noise.trigger();
                }
            }
            _ => {}
        }
    }

    fn set_power(&mut self, on: bool) {
        if on == self.powered {
            return;
        }
        self.powered = on;
        if on {
            self.sequencer_timer = SEQUENCER_PERIOD;
            self.sequencer_step = 0;
        } else {
            self.registers = [0; 0x17];
            self.pulse1 = PulseChannel::default();
            self.pulse2 = PulseChannel::default();
            self.wave = WaveChannel::default();
            self.noise = NoiseChannel::new();
        }
    }

    /// Wave RAM stays accessible while powered off
    pub fn read_wave(&self, address: u16) -> u8 {
        self.wave_ram[(address & 0x0F) as usize]
    }

    pub fn write_wave(&mut self, address: u16, value: u8) {
        self.wave_ram[(address & 0x0F) as usize] = value;
    }
}
