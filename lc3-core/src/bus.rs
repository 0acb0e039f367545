/// A 16-bit word-addressed bus.
///
/// A single implementation (`lc3_machine::Memory`) backs this trait, but
/// the execute engine in `lc3-cpu` is written against the trait so that
/// tests can swap in a bare fixture without pulling in the OS ROM or MMIO
/// side effects.
///
/// Addresses are full 16-bit words, not bytes: LC-3 memory is word
/// addressed throughout.
pub trait Bus {
    /// Read the word at `address`.
    ///
    /// A handful of addresses are not plain RAM (KBSR, KBDR, DSR, DDR,
    /// PSR, MCR) and a read may have a side effect, e.g. reading KBDR
    /// consumes one character of scripted input.
    fn read(&mut self, address: u16) -> u16;

    /// Write `value` to the word at `address`.
    ///
    /// A store to DDR appends a byte to the host output buffer instead of
    /// writing RAM.
    fn write(&mut self, address: u16, value: u16);

    /// Whether the machine clock is still running (MCR bit 15 set).
    ///
    /// The execute engine's run loop polls this after every instruction;
    /// clearing it (via the HALT trap's store to MCR) stops execution.
    fn clock_running(&self) -> bool;

    /// Refresh KBSR/KBDR from the scripted input stream ahead of a fetch.
    ///
    /// Called once per instruction, before the opcode fetch: KBSR's ready
    /// bit and KBDR's pending character must reflect the input stream's
    /// state before the instruction that might read them executes.
    fn service_io(&mut self);

    /// The supervisor stack pointer shadow cell (saved R6 while in user
    /// mode).
    ///
    /// Not part of the 16-bit address space: the privilege unit swaps it
    /// with R6 on a user-to-supervisor transition, the same way the real
    /// hardware keeps a second physical register banked out during user
    /// mode rather than mapping it to a memory address.
    fn ssp(&self) -> u16;

    /// Overwrite the supervisor stack pointer shadow cell.
    fn set_ssp(&mut self, value: u16);

    /// The user stack pointer shadow cell (saved R6 while in supervisor
    /// mode).
    fn usp(&self) -> u16;

    /// Overwrite the user stack pointer shadow cell.
    fn set_usp(&mut self, value: u16);
}
