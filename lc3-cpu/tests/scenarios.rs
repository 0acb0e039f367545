//! Whole-machine scenario tests: a real [`Memory`] with its OS ROM loaded,
//! stepped by [`Lc3Cpu`] through the OS's trap handlers.
//!
//! Unlike `src/cpu.rs`'s unit tests (a bare in-crate `Bus` fixture with no
//! OS image), these exercise GETC/PUTS/HALT and the exception handlers as
//! the bootstrap and user programs actually see them.

use lc3_core::{Bus, Cpu};
use lc3_cpu::Lc3Cpu;
use lc3_machine::Memory;

/// Boots a fresh machine, points the OS bootstrap's user-PC slot at
/// `user_program_origin`, and returns a CPU parked at the OS entry point
/// (mirrors what `lc3-sim` does before handing control to `cpu.run`).
fn boot(user_program_origin: u16) -> (Lc3Cpu, Memory) {
    let rom = lc3_machine::os_rom::build();
    let mut memory = Memory::new();
    memory.poke(rom.user_pc_slot, user_program_origin);
    let mut cpu = Lc3Cpu::new();
    cpu.set_pc_raw(rom.entry);
    (cpu, memory)
}

#[test]
fn lea_and_puts_prints_to_output_buffer() {
    let (mut cpu, mut memory) = boot(0x3000);
    // LEA R0, #2; TRAP x22 (PUTS); TRAP x25 (HALT); "hi"
    memory.poke(0x3000, 0b1110_000_000000010); // LEA R0, #2 -> R0 = 0x3003
    memory.poke(0x3001, 0xF022); // TRAP x22
    memory.poke(0x3002, 0xF025); // TRAP x25
    memory.poke(0x3003, u16::from(b'h'));
    memory.poke(0x3004, u16::from(b'i'));
    memory.poke(0x3005, 0);

    cpu.run(&mut memory);

    assert!(!memory.clock_running());
    let output = memory.take_output();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("hi"), "expected \"hi\" in output, got {text:?}");
    assert!(text.contains("Halting"), "expected halt banner, got {text:?}");
}

#[test]
fn user_mode_access_violation_runs_the_exception_handler_then_halts() {
    let (mut cpu, mut memory) = boot(0x3000);
    // LDR R0, R0, #0 with R0 = 0x0000: outside [0x3000, 0xFE00).
    memory.poke(0x3000, 0b0110_000_000_000000);

    cpu.run(&mut memory);

    assert!(!memory.clock_running());
    let output = memory.take_output();
    let text = String::from_utf8_lossy(&output);
    assert!(
        text.contains("Violation Exception"),
        "expected access-violation message, got {text:?}"
    );
}

#[test]
fn rti_in_user_mode_runs_the_privilege_exception_handler() {
    let (mut cpu, mut memory) = boot(0x3000);
    memory.poke(0x3000, 0b1000_000_000_000000); // RTI

    cpu.run(&mut memory);

    assert!(!memory.clock_running());
    let output = memory.take_output();
    let text = String::from_utf8_lossy(&output);
    assert!(
        text.contains("Privilege mode exception"),
        "expected privilege-violation message, got {text:?}"
    );
}

#[test]
fn scripted_keyboard_input_feeds_two_getc_traps() {
    let (mut cpu, mut memory) = boot(0x3000);
    memory.feed_input("AB");
    // GETC; ST R0,[0x4000]; GETC; ST R0,[0x4001]; HALT
    memory.poke(0x3000, 0xF020); // TRAP x20 GETC
    memory.poke(0x3001, encode_st(0, pc_offset(0x3002, 0x4000)));
    memory.poke(0x3002, 0xF020); // TRAP x20 GETC
    memory.poke(0x3003, encode_st(0, pc_offset(0x3004, 0x4001)));
    memory.poke(0x3004, 0xF025); // TRAP x25 HALT

    cpu.run(&mut memory);

    assert_eq!(memory.peek(0x4000), u16::from(b'A'));
    assert_eq!(memory.peek(0x4001), u16::from(b'B'));
}

fn pc_offset(next_pc: u16, target: u16) -> i16 {
    (target as i32 - next_pc as i32) as i16
}

fn encode_st(sr: u16, offset9: i16) -> u16 {
    0x3000 | (sr << 9) | ((offset9 as u16) & 0x1FF)
}
