//! LC-3 memory image, memory-mapped I/O, OS ROM image, and object loader.
//!
//! This is the workspace's sole implementation of `lc3_core::Bus`.
//! `lc3-cpu`'s execute engine depends only on the trait, never on
//! [`Memory`] directly.

pub mod loader;
pub mod memory;
pub mod mmio;
pub mod os_rom;

pub use loader::{LoadError, LoadedImage};
pub use memory::Memory;
