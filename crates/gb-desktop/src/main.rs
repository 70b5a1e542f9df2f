//! GB Desktop - Desktop Game Boy emulator with minifb rendering
//!
//! Keys: arrows for the pad, Z = A, X = B, Enter = Start, Right Shift = Select.
//! There is no audio device; generated samples are discarded each frame.

use clap::Parser;
use gb_core::joypad::Button;
use gb_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use gb_core::system::{Config, GbSystem};
use log::{error, info};
use minifb::{Key, Window, WindowOptions};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Host keys and the buttons they drive
const KEY_MAP: [(Key, Button); 8] = [
    (Key::Right, Button::Right),
    (Key::Left, Button::Left),
    (Key::Up, Button::Up),
    (Key::Down, Button::Down),
    (Key::Z, Button::A),
    (Key::X, Button::B),
    (Key::RightShift, Button::Select),
    (Key::Enter, Button::Start),
];

/// Game Boy Emulator Desktop App
#[derive(Parser, Debug)]
#[command(name = "gb-desktop")]
#[command(about = "A Game Boy emulator desktop app", long_about = None)]
struct Args {
    /// Path to the ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Screen scale factor (1-8)
    #[arg(short, long, default_value = "3")]
    scale: usize,

    /// Optional 256-byte boot ROM image
    #[arg(short, long)]
    boot_rom: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();

    let rom_data = match fs::read(&args.rom) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read ROM file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let boot_rom = match &args.boot_rom {
        Some(path) => match fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                error!("Failed to read boot ROM: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut system = GbSystem::new(Config {
        boot_rom,
        ..Config::default()
    });
    if let Err(e) = system.load_rom(&rom_data) {
        error!("Failed to load ROM: {}", e);
        return ExitCode::FAILURE;
    }
    if let Some(cartridge) = system.bus().cartridge() {
        info!(
            "Loaded \"{}\" ({:?})",
            cartridge.header().title,
            cartridge.kind()
        );
    }

    let scale = args.scale.clamp(1, 8);
    let mut window = match Window::new(
        "Game Boy Emulator",
        SCREEN_WIDTH * scale,
        SCREEN_HEIGHT * scale,
        WindowOptions {
            resize: false,
            ..WindowOptions::default()
        },
    ) {
        Ok(window) => window,
        Err(e) => {
            error!("Failed to create window: {}", e);
            return ExitCode::FAILURE;
        }
    };
    window.set_target_fps(60);

    let mut pressed = [false; KEY_MAP.len()];
    let mut samples = vec![0i16; 8192];

    info!("Press ESC or close the window to exit.");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        for (state, &(key, button)) in pressed.iter_mut().zip(KEY_MAP.iter()) {
            let down = window.is_key_down(key);
            if down != *state {
                *state = down;
                if down {
                    system.press(button);
                } else {
                    system.release(button);
                }
            }
        }

        let frame = match system.run_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Emulation stopped: {}", e);
                return ExitCode::FAILURE;
            }
        };
        while system.audio_samples(&mut samples) > 0 {}

        if let Err(e) = window.update_with_buffer(&frame.to_rgb(), SCREEN_WIDTH, SCREEN_HEIGHT) {
            error!("Failed to update window: {}", e);
            return ExitCode::FAILURE;
        }
    }

    info!("Emulator closed after {} frames.", system.frame_count());
    ExitCode::SUCCESS
}
