//! Privilege/interrupt unit, execute engine, and debug hooks.
//!
//! Address constants below (PSR, vector table bases, user access bounds,
//! exception codes) are CPU-intrinsic to the privilege/exception dispatch
//! logic, so they live here as plain constants rather than being imported
//! from `lc3-machine`. `lc3-machine`'s own `mmio` module defines the same
//! addresses independently for its side of the `Bus`.

use std::collections::HashSet;

use lc3_core::{Bus, Cpu};

use crate::decode::{self, Instruction, JsrTarget, Operand};

/// Address of the Processor Status Register.
pub const PSR_ADDR: u16 = 0xFFFC;
/// Base of the trap vector table.
pub const TRAP_TABLE_BASE: u16 = 0x0000;
/// Base of the interrupt/exception vector table.
pub const INT_TABLE_BASE: u16 = 0x0100;
/// Lowest address a user-mode program may access.
pub const USER_LOW: u16 = 0x3000;
/// Lowest address of the MMIO block; user-mode accesses at or above this
/// are also access violations.
pub const USER_HIGH: u16 = 0xFE00;

/// Exception code: RTI executed in user mode.
pub const EXC_PRIVILEGE: u8 = 0;
/// Exception code: reserved opcode 1101 with the extended ISA disabled.
pub const EXC_ILLEGAL: u8 = 1;
/// Exception code: user-mode access outside `[USER_LOW, USER_HIGH)`.
pub const EXC_ACCESS_VIOLATION: u8 = 2;

const PSR_PRIVILEGE_BIT: u16 = 1 << 15;
const PSR_NZP_MASK: u16 = 0b111;
const PSR_N: u16 = 0b100;
const PSR_Z: u16 = 0b010;
const PSR_P: u16 = 0b001;

/// The LC-3 execute engine: registers, program counter, breakpoints, and
/// the fetch-decode-execute loop. PSR and memory state live on whatever
/// [`Bus`] this is stepped against.
pub struct Lc3Cpu {
    r: [u16; 8],
    pc: u16,
    breakpoints: HashSet<u16>,
}

impl Lc3Cpu {
    pub fn new() -> Self {
        Self {
            r: [0; 8],
            pc: 0,
            breakpoints: HashSet::new(),
        }
    }

    pub fn reg(&self, index: u16) -> u16 {
        self.r[index as usize]
    }

    pub fn set_reg(&mut self, index: u16, value: u16) {
        self.r[index as usize] = value;
    }

    /// Set the program counter directly, bypassing instruction execution.
    /// Used to point the engine at the OS ROM's bootstrap entry point
    /// before the first `step`/`run`.
    pub fn set_pc_raw(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn psr<B: Bus>(&self, bus: &mut B) -> u16 {
        bus.read(PSR_ADDR)
    }

    pub fn set_psr<B: Bus>(&self, bus: &mut B, value: u16) {
        bus.write(PSR_ADDR, value);
    }

    pub fn add_breakpoint(&mut self, address: u16) {
        self.breakpoints.insert(address);
    }

    pub fn remove_breakpoint(&mut self, address: u16) {
        self.breakpoints.remove(&address);
    }

    pub fn breakpoints(&self) -> &HashSet<u16> {
        &self.breakpoints
    }

    /// Run until the clock stops or `self.pc` matches a breakpoint
    /// (checked before each step).
    pub fn run<B: Bus>(&mut self, bus: &mut B) {
        while bus.clock_running() && !self.breakpoints.contains(&self.pc) {
            self.step(bus);
        }
    }

    /// Run until `predicate(pc)` is true (checked before each step, with
    /// `pc` being the address about to be fetched) or the clock stops.
    pub fn run_until<B: Bus>(&mut self, bus: &mut B, mut predicate: impl FnMut(u16) -> bool) {
        while bus.clock_running() && !predicate(self.pc) {
            self.step(bus);
        }
    }

    fn in_user_mode<B: Bus>(&self, bus: &mut B) -> bool {
        self.psr(bus) & PSR_PRIVILEGE_BIT != 0
    }

    fn update_condition_codes<B: Bus>(&mut self, bus: &mut B, value: u16) {
        let mut psr = self.psr(bus) & !PSR_NZP_MASK;
        psr |= match value as i16 {
            v if v < 0 => PSR_N,
            0 => PSR_Z,
            _ => PSR_P,
        };
        self.set_psr(bus, psr);
    }

    /// `check-access`: true iff the instruction may proceed. Raises
    /// the access-violation exception and returns false otherwise.
    fn check_access<B: Bus>(&mut self, bus: &mut B, address: u16) -> bool {
        if !self.in_user_mode(bus) || (USER_LOW..USER_HIGH).contains(&address) {
            return true;
        }
        self.raise_exception(bus, EXC_ACCESS_VIOLATION);
        false
    }

    /// `enter_vector`: swaps to the supervisor stack if not already
    /// there, pushes the old PSR and the return PC, then dispatches
    /// through `table_base[code]`.
    fn enter_vector<B: Bus>(&mut self, bus: &mut B, table_base: u16, code: u8, return_pc: u16) {
        let old_psr = self.psr(bus);
        if old_psr & PSR_PRIVILEGE_BIT != 0 {
            bus.set_usp(self.r[6]);
            self.r[6] = bus.ssp();
            self.set_psr(bus, old_psr & !PSR_PRIVILEGE_BIT);
        }
        self.r[6] = self.r[6].wrapping_sub(1);
        bus.write(self.r[6], old_psr);
        self.r[6] = self.r[6].wrapping_sub(1);
        bus.write(self.r[6], return_pc);
        self.pc = bus.read(table_base.wrapping_add(u16::from(code)));
    }

    fn raise_exception<B: Bus>(&mut self, bus: &mut B, code: u8) {
        let return_pc = self.pc;
        self.enter_vector(bus, INT_TABLE_BASE, code, return_pc);
    }

    /// `RTI`: pops PC then PSR; if the restored PSR is user mode,
    /// swaps R6 back to the saved user stack pointer. RTI in user mode is
    /// itself a privilege violation.
    fn rti<B: Bus>(&mut self, bus: &mut B) {
        if self.in_user_mode(bus) {
            self.raise_exception(bus, EXC_PRIVILEGE);
            return;
        }
        let new_pc = bus.read(self.r[6]);
        self.r[6] = self.r[6].wrapping_add(1);
        let new_psr = bus.read(self.r[6]);
        self.r[6] = self.r[6].wrapping_add(1);
        self.pc = new_pc;
        self.set_psr(bus, new_psr);
        if new_psr & PSR_PRIVILEGE_BIT != 0 {
            bus.set_ssp(self.r[6]);
            self.r[6] = bus.usp();
        }
    }

    fn operand_value(&self, operand: Operand) -> u16 {
        match operand {
            Operand::Reg(r) => self.r[r as usize],
            Operand::Imm(i) => i as u16,
        }
    }

    fn execute<B: Bus>(&mut self, bus: &mut B, instr: Instruction) {
        match instr {
            Instruction::Add { dr, sr1, operand } => {
                let value = self.r[sr1 as usize].wrapping_add(self.operand_value(operand));
                self.r[dr as usize] = value;
                self.update_condition_codes(bus, value);
            }
            Instruction::And { dr, sr1, operand } => {
                let value = self.r[sr1 as usize] & self.operand_value(operand);
                self.r[dr as usize] = value;
                self.update_condition_codes(bus, value);
            }
            Instruction::Not { dr, sr1 } => {
                let value = !self.r[sr1 as usize];
                self.r[dr as usize] = value;
                self.update_condition_codes(bus, value);
            }
            Instruction::Lea { dr, offset9 } => {
                let value = self.pc.wrapping_add(offset9 as u16);
                self.r[dr as usize] = value;
                self.update_condition_codes(bus, value);
            }
            Instruction::Br { nzp, offset9 } => {
                if nzp & (self.psr(bus) & PSR_NZP_MASK) != 0 {
                    self.pc = self.pc.wrapping_add(offset9 as u16);
                }
            }
            Instruction::Jmp { base } => {
                self.pc = self.r[base as usize];
            }
            Instruction::Jsr { target } => {
                let link = self.pc;
                self.pc = match target {
                    JsrTarget::PcOffset(offset11) => self.pc.wrapping_add(offset11 as u16),
                    JsrTarget::Register(base) => self.r[base as usize],
                };
                self.r[7] = link;
            }
            Instruction::Ld { dr, offset9 } => {
                let addr = self.pc.wrapping_add(offset9 as u16);
                if self.check_access(bus, addr) {
                    let value = bus.read(addr);
                    self.r[dr as usize] = value;
                    self.update_condition_codes(bus, value);
                }
            }
            Instruction::Ldi { dr, offset9 } => {
                let ptr_addr = self.pc.wrapping_add(offset9 as u16);
                if self.check_access(bus, ptr_addr) {
                    let target_addr = bus.read(ptr_addr);
                    if self.check_access(bus, target_addr) {
                        let value = bus.read(target_addr);
                        self.r[dr as usize] = value;
                        self.update_condition_codes(bus, value);
                    }
                }
            }
            Instruction::Ldr { dr, base, offset6 } => {
                let addr = self.r[base as usize].wrapping_add(offset6 as u16);
                if self.check_access(bus, addr) {
                    let value = bus.read(addr);
                    self.r[dr as usize] = value;
                    self.update_condition_codes(bus, value);
                }
            }
            Instruction::St { sr, offset9 } => {
                let addr = self.pc.wrapping_add(offset9 as u16);
                if self.check_access(bus, addr) {
                    bus.write(addr, self.r[sr as usize]);
                }
            }
            Instruction::Sti { sr, offset9 } => {
                let ptr_addr = self.pc.wrapping_add(offset9 as u16);
                if self.check_access(bus, ptr_addr) {
                    let target_addr = bus.read(ptr_addr);
                    if self.check_access(bus, target_addr) {
                        bus.write(target_addr, self.r[sr as usize]);
                    }
                }
            }
            Instruction::Str { sr, base, offset6 } => {
                let addr = self.r[base as usize].wrapping_add(offset6 as u16);
                if self.check_access(bus, addr) {
                    bus.write(addr, self.r[sr as usize]);
                }
            }
            Instruction::Trap { vec8 } => {
                let return_pc = self.pc;
                self.enter_vector(bus, TRAP_TABLE_BASE, vec8, return_pc);
            }
            Instruction::Rti => self.rti(bus),
            Instruction::Reserved => self.raise_exception(bus, EXC_ILLEGAL),
        }
    }
}

impl Default for Lc3Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Bus> Cpu<B> for Lc3Cpu {
    fn step(&mut self, bus: &mut B) {
        bus.service_io();
        let ir = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        let instr = decode::decode(ir);
        self.execute(bus, instr);
    }

    fn reset(&mut self, _bus: &mut B) {
        self.r = [0; 8];
        self.pc = 0;
    }

    fn pc(&self) -> u16 {
        self.pc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        mem: [u16; 0x1_0000],
        clock: bool,
        ssp: u16,
        usp: u16,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                mem: [0; 0x1_0000],
                clock: true,
                ssp: 0x3000,
                usp: 0x3000,
            }
        }

        fn supervisor() -> Self {
            let mut bus = Self::new();
            bus.mem[PSR_ADDR as usize] = 0x0002; // supervisor, Z set
            bus
        }

        fn user() -> Self {
            let mut bus = Self::new();
            bus.mem[PSR_ADDR as usize] = 0x8002; // user, Z set
            bus
        }
    }

    impl Bus for TestBus {
        fn read(&mut self, address: u16) -> u16 {
            self.mem[address as usize]
        }

        fn write(&mut self, address: u16, value: u16) {
            self.mem[address as usize] = value;
        }

        fn clock_running(&self) -> bool {
            self.clock
        }

        fn service_io(&mut self) {}

        fn ssp(&self) -> u16 {
            self.ssp
        }

        fn set_ssp(&mut self, value: u16) {
            self.ssp = value;
        }

        fn usp(&self) -> u16 {
            self.usp
        }

        fn set_usp(&mut self, value: u16) {
            self.usp = value;
        }
    }

    #[test]
    fn add_immediate_sets_condition_codes() {
        // Scenario: R1 = 3, ADD R2, R1, #-5 -> R2 = 0xFFFE, N set.
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::supervisor();
        cpu.set_reg(1, 3);
        bus.mem[0x3000] = 0b0001_010_001_1_11011;
        cpu.set_pc_raw(0x3000);

        cpu.step(&mut bus);

        assert_eq!(cpu.reg(2), 0xFFFE);
        assert_eq!(cpu.psr(&mut bus) & PSR_NZP_MASK, PSR_N);
    }

    #[test]
    fn br_condition_matrix() {
        for psr_nzp in 0u16..8 {
            for br_nzp in 0u16..8 {
                let mut cpu = Lc3Cpu::new();
                let mut bus = TestBus::supervisor();
                bus.mem[PSR_ADDR as usize] = psr_nzp;
                bus.mem[0x3000] = (br_nzp << 9) | 0x002; // BR <nzp> #2
                cpu.set_pc_raw(0x3000);

                cpu.step(&mut bus);

                let taken = cpu.pc() != 0x3001;
                assert_eq!(
                    taken,
                    br_nzp & psr_nzp != 0,
                    "psr_nzp={psr_nzp:#05b} br_nzp={br_nzp:#05b}"
                );
            }
        }
    }

    #[test]
    fn jmp_r7_is_ret() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::supervisor();
        cpu.set_reg(7, 0x4000);
        bus.mem[0x3000] = 0b1100_000_111_000000; // JMP R7
        cpu.set_pc_raw(0x3000);

        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x4000);
    }

    #[test]
    fn access_violation_redirects_through_interrupt_vector_and_suppresses_write() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::user();
        bus.mem[INT_TABLE_BASE as usize + EXC_ACCESS_VIOLATION as usize] = 0x1000;
        // LDR R0, R0, #0 with R0 = 0x0000 (outside [0x3000, 0xFE00)).
        bus.mem[0x3000] = 0b0110_000_000_000000;
        cpu.set_pc_raw(0x3000);
        cpu.set_reg(6, 0x3FFE); // user stack pointer

        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x1000);
        assert_eq!(cpu.psr(&mut bus) & PSR_PRIVILEGE_BIT, 0); // now supervisor
        assert_eq!(bus.mem[0x3FFD], 0x3001); // saved return PC (successor)
        assert_eq!(bus.mem[0x3FFE], 0x8002); // saved old (user) PSR
    }

    #[test]
    fn trap_pushes_psr_and_pc_then_rti_restores_them() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::user();
        bus.mem[TRAP_TABLE_BASE as usize + 0x25] = 0x0200; // handler: RTI
        bus.mem[0x0200] = 0b1000_000_000_000000; // RTI
        bus.mem[0x3000] = 0xF000 | 0x25; // TRAP x25
        cpu.set_pc_raw(0x3000);
        cpu.set_reg(6, 0x3FFE);

        cpu.step(&mut bus); // TRAP
        assert_eq!(cpu.pc(), 0x0200);
        assert_eq!(cpu.psr(&mut bus) & PSR_PRIVILEGE_BIT, 0);
        assert_eq!(cpu.reg(6), 0x3FFC);

        cpu.step(&mut bus); // RTI

        assert_eq!(cpu.pc(), 0x3001);
        assert_eq!(cpu.psr(&mut bus), 0x8002);
        assert_eq!(cpu.reg(6), 0x3FFE);
    }

    #[test]
    fn rti_in_user_mode_raises_privilege_violation() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::user();
        bus.mem[INT_TABLE_BASE as usize + EXC_PRIVILEGE as usize] = 0x1100;
        bus.mem[0x3000] = 0b1000_000_000_000000; // RTI
        cpu.set_pc_raw(0x3000);
        cpu.set_reg(6, 0x3FFE);

        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x1100);
        assert_eq!(cpu.psr(&mut bus) & PSR_PRIVILEGE_BIT, 0);
    }

    #[test]
    fn reserved_opcode_raises_illegal_instruction() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::supervisor();
        bus.mem[INT_TABLE_BASE as usize + EXC_ILLEGAL as usize] = 0x1200;
        bus.mem[0x3000] = 0b1101_000_000_000000;
        cpu.set_pc_raw(0x3000);
        cpu.set_reg(6, 0x3000);

        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x1200);
    }

    #[test]
    fn ldi_checks_both_pointer_and_target_addresses() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::user();
        bus.mem[INT_TABLE_BASE as usize + EXC_ACCESS_VIOLATION as usize] = 0x1000;
        // LDI R0, #0 with memory[pc] pointing at an out-of-range target.
        bus.mem[0x3000] = 0b1010_000_000000000; // LDI R0, #0 -> pointer at 0x3001
        bus.mem[0x3001] = 0x0000; // target address, out of range
        cpu.set_pc_raw(0x3000);
        cpu.set_reg(6, 0x3FFE);

        cpu.step(&mut bus);

        assert_eq!(cpu.pc(), 0x1000); // redirected to access-violation handler
    }

    #[test]
    fn run_until_stops_after_predicate_matches() {
        let mut cpu = Lc3Cpu::new();
        let mut bus = TestBus::supervisor();
        bus.mem[0x3000] = 0b0001_000_000_1_00001; // ADD R0, R0, #1
        bus.mem[0x3001] = (0b111 << 9) | (((-2i16) as u16) & 0x1FF); // BR nzp, #-2: loop to 0x3000
        cpu.set_pc_raw(0x3000);

        let mut visits = 0;
        cpu.run_until(&mut bus, |pc| {
            if pc == 0x3000 {
                visits += 1;
            }
            visits > 3
        });

        assert_eq!(cpu.reg(0), 3);
    }
}
