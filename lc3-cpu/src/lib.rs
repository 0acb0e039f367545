//! Bit-field decoder, privilege/interrupt unit, fetch-decode-execute loop,
//! and debug hooks for the LC-3.
//!
//! [`Lc3Cpu`] is generic over `lc3_core::Bus` and never depends on
//! `lc3-machine`'s concrete [`Memory`](../lc3_machine/struct.Memory.html) —
//! the execute engine only ever talks to a bus. Unit tests below use a
//! small in-crate `Bus` fixture; whole-machine scenario tests that
//! exercise the real OS ROM live in `tests/` with `lc3-machine` as a
//! dev-dependency.

mod cpu;
mod decode;

pub use cpu::{
    Lc3Cpu, EXC_ACCESS_VIOLATION, EXC_ILLEGAL, EXC_PRIVILEGE, INT_TABLE_BASE, PSR_ADDR,
    TRAP_TABLE_BASE, USER_HIGH, USER_LOW,
};
pub use decode::{decode, sign_extend, Instruction, JsrTarget, Operand};
