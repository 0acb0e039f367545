//! Core traits shared between the LC-3 execute engine and its memory image.
//!
//! These are the seam `lc3-cpu` and `lc3-machine` talk across: the engine
//! only ever sees a `Bus`, and never depends on `Memory` directly.

mod bus;
mod cpu;

pub use bus::Bus;
pub use cpu::Cpu;
