//! GB CLI - Headless runner for the Game Boy emulator
//!
//! Exit status: 0 when a conformance ROM reports success over serial, 1 on
//! failure or error, 2 when no verdict was seen.

use clap::Parser;
use gb_core::serial::TestVerdict;
use gb_core::system::{Config, GbSystem, Model, SystemError};
use log::{error, info, warn};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Game Boy Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "gb-cli")]
#[command(about = "A headless Game Boy emulator runner", long_about = None)]
struct Args {
    /// Path to the ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: u64,

    /// Optional 256-byte boot ROM image
    #[arg(short, long)]
    boot_rom: Option<PathBuf>,

    /// Force monochrome mode even for colour-aware cartridges
    #[arg(long)]
    dmg: bool,

    /// Stop as soon as the ROM reports a result over serial
    #[arg(short, long)]
    until_result: bool,

    /// Print the CPU state at each of the first N instruction boundaries
    #[arg(short, long, default_value = "0")]
    trace: u64,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    // Load ROM file
    let rom_data = match fs::read(&args.rom) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read ROM file: {}", e);
            return ExitCode::from(1);
        }
    };

    let boot_rom = match &args.boot_rom {
        Some(path) => match fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                error!("Failed to read boot ROM: {}", e);
                return ExitCode::from(1);
            }
        },
        None => None,
    };

    let config = Config {
        boot_rom,
        model: if args.dmg { Model::Dmg } else { Model::Auto },
        ..Config::default()
    };
    let mut system = GbSystem::new(config);
    if let Err(e) = system.load_rom(&rom_data) {
        error!("Failed to load ROM: {}", e);
        return ExitCode::from(1);
    }

    if let Some(cartridge) = system.bus().cartridge() {
        let header = cartridge.header();
        println!("Loaded cartridge:");
        println!("  Title: {}", header.title);
        println!("  Controller: {:?}", cartridge.kind());
        println!("  ROM: {} banks", header.rom_banks);
        println!("  RAM: {} bytes", header.ram_size);
        println!("  Colour support: {}", header.cgb_supported());
    }

    if args.trace > 0 {
        if let Err(e) = trace(&mut system, args.trace) {
            error!("Error while tracing: {}", e);
            return ExitCode::from(1);
        }
    }

    println!("\nRunning {} frames...", args.frames);

    for _ in 0..args.frames {
        if let Err(e) = system.run_frame() {
            error!("Error running system: {}", e);
            return ExitCode::from(1);
        }
        if args.until_result && system.test_verdict().is_some() {
            break;
        }
    }

    println!("Completed {} frames.", system.frame_count());

    if let Some((opcode, address)) = system.cpu().lockup() {
        warn!("CPU locked up on ${:02X} at ${:04X}", opcode, address);
    }

    let output = system.serial_output();
    if !output.is_empty() {
        println!("\nSerial output:");
        println!("{}", String::from_utf8_lossy(output));
    }

    // Dump state if requested
    if args.dump_cpu {
        dump_cpu_state(&system);
    }

    if args.dump_ppu {
        dump_ppu_state(&system);
    }

    match system.test_verdict() {
        Some(TestVerdict::Passed) => {
            info!("Passed");
            ExitCode::SUCCESS
        }
        Some(TestVerdict::Failed) => {
            info!("Failed");
            ExitCode::from(1)
        }
        None => ExitCode::from(2),
    }
}

/// Step instruction by instruction, printing the state before each one
fn trace(system: &mut GbSystem, count: u64) -> Result<(), SystemError> {
    println!("\nTracing {} instructions:", count);
    for _ in 0..count {
        if !system.step_instruction()? {
            println!("  (no instruction boundary within a frame, CPU {:?})", system.cpu().mode());
            break;
        }
        println!(
            "  {:04X} {} CYC:{}",
            system.cpu().instruction_address(),
            system.cpu().registers(),
            system.bus().cycle()
        );
    }
    Ok(())
}

fn dump_cpu_state(system: &GbSystem) {
    let cpu = system.cpu();
    let regs = cpu.registers();
    let flags = regs.flags();

    println!("\nCPU State:");
    println!("  {}", regs);
    println!(
        "  Flags: Z={} N={} H={} C={}",
        flags.zero() as u8,
        flags.subtract() as u8,
        flags.half_carry() as u8,
        flags.carry() as u8
    );
    println!("  IME: {}", cpu.ime());
    println!("  Mode: {:?}", cpu.mode());
    println!("  Cycles: {}", cpu.cycles());
    println!("  Instructions: {}", cpu.instructions());
}

fn dump_ppu_state(system: &GbSystem) {
    let ppu = system.ppu();

    println!("\nPPU State:");
    println!("  LY: {}", ppu.ly());
    println!("  Dot: {}", ppu.line_dot());
    println!("  Mode: {:?}", ppu.mode());
    println!("  LCDC: ${:02X}", ppu.lcdc().bits());
    println!("  Frames: {}", ppu.frames());
}
