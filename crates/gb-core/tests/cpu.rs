//! CPU tests for the Game Boy emulator

use gb_core::cartridge::header_checksum;
use gb_core::cpu::CpuMode;
use gb_core::system::GbSystem;

/// Register state at each instruction boundary, before the instruction runs,
/// with the machine cycle its opcode fetch happened in.
const GOLDEN_TRACE: &str = "\
0100 A:01 F:B0 B:00 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:1
0102 A:0F F:B0 B:00 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:3
0104 A:10 F:20 B:00 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:5
0105 A:16 F:00 B:00 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:6
0107 A:16 F:00 B:99 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:8
0108 A:AF F:00 B:99 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:9
0109 A:15 F:10 B:99 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:10
010C A:15 F:10 B:99 C:13 D:00 E:D8 H:C0 L:00 SP:FFFE CYC:13
010D A:15 F:10 B:99 C:13 D:00 E:D8 H:C0 L:00 SP:FFFE CYC:15
010E A:15 F:10 B:99 C:13 D:00 E:D8 H:C0 L:00 SP:FFFE CYC:18
010F A:16 F:10 B:99 C:13 D:00 E:D8 H:C0 L:01 SP:FFFE CYC:20
0110 A:16 F:10 B:99 C:13 D:00 E:D8 H:59 L:14 SP:FFFE CYC:22
0111 A:16 F:10 B:99 C:13 D:00 E:D8 H:59 L:14 SP:FFFC CYC:26
0112 A:99 F:10 B:99 C:13 D:00 E:D8 H:59 L:14 SP:FFFE CYC:29
0113 A:99 F:10 B:99 C:13 D:00 E:D8 H:59 L:14 SP:FFFE CYC:30
0114 A:99 F:00 B:99 C:13 D:00 E:D8 H:59 L:14 SP:FFFE CYC:31
0114 A:99 F:00 B:99 C:13 D:00 E:D8 H:59 L:14 SP:FFFE CYC:34
";

const GOLDEN_PROGRAM: &[u8] = &[
    0x3E, 0x0F, // LD A,$0F
    0xC6, 0x01, // ADD A,$01
    0x27, // DAA
    0x06, 0x99, // LD B,$99
    0x80, // ADD A,B
    0x27, // DAA
    0x21, 0x00, 0xC0, // LD HL,$C000
    0x77, // LD (HL),A
    0x34, // INC (HL)
    0x2A, // LD A,(HL+)
    0x09, // ADD HL,BC
    0xC5, // PUSH BC
    0xF1, // POP AF
    0x37, // SCF
    0x3F, // CCF
    0x18, 0xFE, // JR -2
];

fn rom_with_program(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x100 + program.len()].copy_from_slice(program);
    rom[0x14D] = header_checksum(&rom);
    rom
}

fn boot(program: &[u8]) -> GbSystem {
    let mut system = GbSystem::default();
    system.load_rom(&rom_with_program(program)).unwrap();
    system
}

#[derive(Debug, PartialEq, Eq)]
struct TraceEntry {
    pc: u16,
    registers: String,
    cycle: u64,
}

fn parse_trace_line(line: &str) -> Option<TraceEntry> {
    // Format: 0100 A:01 F:B0 B:00 C:13 D:00 E:D8 H:01 L:4D SP:FFFE CYC:1
    let line = line.trim();
    let pc = u16::from_str_radix(line.get(0..4)?, 16).ok()?;
    let cyc = line.find("CYC:")?;
    let registers = line.get(5..cyc)?.trim().to_string();
    let cycle = line.get(cyc + 4..)?.parse().ok()?;
    Some(TraceEntry {
        pc,
        registers,
        cycle,
    })
}

fn current_entry(system: &GbSystem) -> TraceEntry {
    let regs = system.cpu().registers();
    // Registers display ends with PC, which has already moved past the opcode
    let display = regs.to_string();
    let registers = display
        .split(" PC:")
        .next()
        .unwrap_or_default()
        .to_string();
    TraceEntry {
        pc: system.cpu().instruction_address(),
        registers,
        cycle: system.bus().cycle(),
    }
}

#[test]
fn test_golden_trace() {
    let mut system = boot(GOLDEN_PROGRAM);
    for (n, line) in GOLDEN_TRACE.lines().enumerate() {
        let expected = parse_trace_line(line).expect("malformed trace line");
        assert!(system.step_instruction().unwrap(), "no boundary at line {}", n + 1);
        assert_eq!(current_entry(&system), expected, "trace line {}", n + 1);
    }

    assert_eq!(system.read_memory(0xC000), 0x16);
    assert_eq!(system.read_memory(0xFFFD), 0x99);
    assert_eq!(system.read_memory(0xFFFC), 0x13);
}

#[test]
fn test_interrupt_serviced_at_next_boundary() {
    // LD A,1 ; LDH (IE),A ; EI ; NOP ; NOP
    let mut system = boot(&[0x3E, 0x01, 0xE0, 0xFF, 0xFB, 0x00, 0x00]);
    // V-blank is already pending after boot
    assert_eq!(system.read_memory(0xFF0F) & 0x01, 0x01);

    for _ in 0..4 {
        assert!(system.step_instruction().unwrap());
    }
    assert_eq!(system.cpu().instruction_address(), 0x0105);
    assert!(!system.cpu().ime());

    // The boundary after the NOP starts dispatch instead of fetching $0106
    assert!(system.step_instruction().unwrap());
    assert_eq!(system.cpu().instruction_address(), 0x0105);
    let dispatch_cycle = system.bus().cycle();

    assert!(system.step_instruction().unwrap());
    assert_eq!(system.cpu().instruction_address(), 0x0040);
    assert_eq!(system.bus().cycle() - dispatch_cycle, 5);
    assert_eq!(system.cpu().registers().sp, 0xFFFC);
    assert_eq!(system.read_memory(0xFFFD), 0x01);
    assert_eq!(system.read_memory(0xFFFC), 0x06);
    assert_eq!(system.read_memory(0xFF0F) & 0x01, 0x00);
    assert!(!system.cpu().ime());
}

#[test]
fn test_halt_wakes_on_timer_without_ime() {
    let program = [
        0x3E, 0x04, // LD A,$04
        0xE0, 0xFF, // LDH (IE),A
        0x3E, 0x05, // LD A,$05
        0xE0, 0x07, // LDH (TAC),A
        0xAF, // XOR A
        0xE0, 0x0F, // LDH (IF),A
        0x76, // HALT
        0x04, // INC B
        0x18, 0xFD, // JR -3
    ];
    let mut system = boot(&program);
    for _ in 0..7 {
        assert!(system.step_instruction().unwrap());
    }
    assert_eq!(system.cpu().instruction_address(), 0x010B);

    assert!(system.step_instruction().unwrap());
    assert_eq!(system.cpu().mode(), CpuMode::Running);
    assert_eq!(system.cpu().instruction_address(), 0x010C);
    // Not serviced: IME is off
    assert_eq!(system.read_memory(0xFF0F) & 0x04, 0x04);
}

#[test]
fn test_undefined_opcode_locks_cpu() {
    // NOP ; $D3
    let mut system = boot(&[0x00, 0xD3]);
    system.run_frame().unwrap();
    assert_eq!(system.cpu().lockup(), Some((0xD3, 0x0101)));
    let pc = system.cpu().registers().pc;

    // Everything else keeps running
    system.run_frame().unwrap();
    assert_eq!(system.ppu().frames(), 2);
    assert_eq!(system.cpu().registers().pc, pc);
}

#[test]
fn test_conditional_call_not_taken_still_reads_operands() {
    // XOR A (sets Z) ; CALL NZ,$1234 ; NOP
    let mut system = boot(&[0xAF, 0xC4, 0x34, 0x12, 0x00]);
    system.step_instruction().unwrap();
    system.step_instruction().unwrap();
    assert_eq!(system.cpu().instruction_address(), 0x0101);
    let start = system.bus().cycle();
    system.step_instruction().unwrap();
    assert_eq!(system.cpu().instruction_address(), 0x0104);
    assert_eq!(system.bus().cycle() - start, 3);
}
