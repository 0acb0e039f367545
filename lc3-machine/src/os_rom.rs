//! Builder for the LC-3 OS ROM image: trap/interrupt vector tables plus the
//! handler bodies that back them, expressed as LC-3 machine words.
//!
//! Rather than transcribe a hand-unrolled 0x500-word literal array, this
//! assembles the image from named blocks with symbolic labels and
//! PC-relative fixups, the way a tiny single-pass assembler would. This
//! keeps the trap/interrupt vector tables and the handler bodies correct by
//! construction even as handlers are added or resized.
//!
//! Interrupt vector table slots 0/1/2 are wired to their handlers' actual
//! entry points (see `DESIGN.md` for why this matters — some widely copied
//! LC-3 OS images wire these incorrectly), and PUTSP (trap vector 0x24) is
//! a full implementation rather than a no-op stub.

use std::collections::HashMap;

use crate::mmio;

/// Total size of the OS ROM image.
pub const IMAGE_LEN: usize = 0x500;

/// The assembled OS ROM image.
pub struct OsImage {
    pub words: [u16; IMAGE_LEN],
    /// Address of the bootstrap routine; the engine's PC starts here.
    pub entry: u16,
    /// Address of the data slot the bootstrap loads as the initial user
    /// PC. The loader overwrites this with the loaded program's origin
    /// before execution starts.
    pub user_pc_slot: u16,
}

pub fn build() -> OsImage {
    let mut asm = Asm::new();

    // Trap and interrupt vector tables, patched once every handler has a
    // known address.
    for _ in 0..0x100 {
        asm.word(0);
    }
    for _ in 0..0x100 {
        asm.word(0);
    }

    build_bad_trap(&mut asm);
    build_halt_trap(&mut asm);
    build_bootstrap(&mut asm);
    build_puts_trap(&mut asm);
    build_out_trap(&mut asm);
    build_getc_trap(&mut asm);
    build_in_trap(&mut asm);
    build_putsp_trap(&mut asm);
    build_hi_byte_sub(&mut asm);
    build_priv_exception(&mut asm);
    build_illegal_exception(&mut asm);
    build_access_violation(&mut asm);
    build_bad_interrupt(&mut asm);

    for vec in 0u16..0x100 {
        asm.set_trap(vec as u8, "bad_trap");
    }
    asm.set_trap(0x20, "getc_trap");
    asm.set_trap(0x21, "out_trap");
    asm.set_trap(0x22, "puts_trap");
    asm.set_trap(0x23, "in_trap");
    asm.set_trap(0x24, "putsp_trap");
    asm.set_trap(0x25, "halt_trap");

    for code in 0u16..0x100 {
        asm.set_interrupt(code as u8, "bad_interrupt");
    }
    asm.set_interrupt(mmio::EXC_PRIVILEGE as u16, "priv_exception");
    asm.set_interrupt(mmio::EXC_ILLEGAL as u16, "illegal_exception");
    asm.set_interrupt(mmio::EXC_ACCESS_VIOLATION as u16, "access_violation");

    asm.finish()
}

fn build_bad_trap(asm: &mut Asm) {
    asm.label("bad_trap");
    asm.pc_rel(lea_base(0), "bad_trap_msg", 9);
    asm.word(trap(0x22));
    asm.word(trap(0x25));
    asm.label("bad_trap_msg");
    emit_string(asm, "\n\nBad Trap Executed!\n\n");
}

fn build_halt_trap(asm: &mut Asm) {
    asm.label("halt_trap");
    asm.pc_rel(lea_base(0), "halt_trap_msg", 9);
    asm.word(trap(0x22));
    asm.label("halt_loop");
    asm.pc_rel(ldi_base(0), "halt_mcr_addr", 9);
    asm.pc_rel(ld_base(1), "halt_mask_high", 9);
    asm.word(and_reg(0, 0, 1));
    asm.pc_rel(sti_base(0), "halt_mcr_addr", 9);
    asm.pc_rel(br_base(0b111), "halt_loop", 9);
    asm.label("halt_mcr_addr");
    asm.word(mmio::MCR);
    asm.label("halt_mask_high");
    asm.word(0x7FFF);
    asm.label("halt_trap_msg");
    emit_string(asm, "\n\nHalting!\n\n");
}

fn build_bootstrap(asm: &mut Asm) {
    asm.label("os_start");
    asm.pc_rel(ld_base(6), "ssp_init", 9);
    asm.pc_rel(ld_base(0), "initial_psr", 9);
    asm.word(add_imm(6, 6, -1));
    asm.word(str_(0, 6, 0));
    asm.pc_rel(ld_base(0), "initial_pc", 9);
    asm.word(add_imm(6, 6, -1));
    asm.word(str_(0, 6, 0));
    asm.word(rti());
    asm.label("initial_psr");
    asm.word(0x8002); // user mode, Z set
    asm.label("ssp_init");
    asm.word(0x3000);
    asm.label("initial_pc");
    asm.word(0x3000); // overwritten by the loader with the main program's origin
}

fn build_puts_trap(asm: &mut Asm) {
    asm.label("puts_trap");
    asm.word(add_imm(6, 6, -1));
    asm.word(str_(0, 6, 0));
    asm.word(add_imm(6, 6, -1));
    asm.word(str_(1, 6, 0));
    asm.word(add_imm(1, 0, 0));
    asm.label("puts_loop");
    asm.word(ldr(0, 1, 0));
    asm.pc_rel(br_base(0b010), "puts_done", 9);
    asm.word(trap(0x21));
    asm.word(add_imm(1, 1, 1));
    asm.pc_rel(br_base(0b111), "puts_loop", 9);
    asm.label("puts_done");
    asm.word(ldr(1, 6, 0));
    asm.word(add_imm(6, 6, 1));
    asm.word(ldr(0, 6, 0));
    asm.word(add_imm(6, 6, 1));
    asm.word(rti());
}

fn build_out_trap(asm: &mut Asm) {
    asm.label("out_trap");
    asm.word(add_imm(6, 6, -1));
    asm.word(str_(1, 6, 0));
    asm.label("out_wait");
    asm.pc_rel(ldi_base(1), "out_dsr_addr", 9);
    asm.pc_rel(br_base(0b011), "out_wait", 9);
    asm.pc_rel(sti_base(0), "out_ddr_addr", 9);
    asm.word(ldr(1, 6, 0));
    asm.word(add_imm(6, 6, 1));
    asm.word(rti());
    asm.label("out_dsr_addr");
    asm.word(mmio::DSR);
    asm.label("out_ddr_addr");
    asm.word(mmio::DDR);
}

fn build_getc_trap(asm: &mut Asm) {
    asm.label("getc_trap");
    asm.label("getc_wait");
    asm.pc_rel(ldi_base(0), "getc_kbsr_addr", 9);
    asm.pc_rel(br_base(0b011), "getc_wait", 9);
    asm.pc_rel(ldi_base(0), "getc_kbdr_addr", 9);
    asm.word(rti());
    asm.label("getc_kbsr_addr");
    asm.word(mmio::KBSR);
    asm.label("getc_kbdr_addr");
    asm.word(mmio::KBDR);
}

fn build_in_trap(asm: &mut Asm) {
    asm.label("in_trap");
    asm.pc_rel(lea_base(0), "in_prompt_msg", 9);
    asm.word(trap(0x22));
    asm.word(trap(0x20));
    asm.word(trap(0x21));
    asm.word(add_imm(6, 6, -1));
    asm.word(str_(0, 6, 0));
    asm.word(and_imm(0, 0, 0));
    asm.word(add_imm(0, 0, 10)); // '\n'
    asm.word(trap(0x21));
    asm.word(ldr(0, 6, 0));
    asm.word(add_imm(6, 6, 1));
    asm.word(rti());
    asm.label("in_prompt_msg");
    emit_string(asm, "Enter a Character: ");
}

/// PUTSP: R0 points at a string packed two characters per word (low byte
/// first), terminated by a zero byte. Preserves every register it uses.
fn build_putsp_trap(asm: &mut Asm) {
    asm.label("putsp_trap");
    for r in [0u16, 1, 2, 3, 4, 7] {
        asm.word(add_imm(6, 6, -1));
        asm.word(str_(r, 6, 0));
    }
    asm.word(add_imm(1, 0, 0)); // r1 = pointer
    asm.label("putsp_loop");
    asm.word(ldr(3, 1, 0)); // r3 = current word
    asm.pc_rel(ld_base(2), "putsp_maskff", 9);
    asm.word(and_reg(4, 3, 2)); // r4 = low byte
    asm.pc_rel(br_base(0b010), "putsp_done", 9); // low byte zero -> done
    asm.word(add_imm(0, 3, 0)); // r0 = word; OUT only uses the low byte
    asm.word(trap(0x21));
    asm.pc_rel(jsr_base(), "hi_byte_sub", 11); // r0 = high byte of r3
    asm.pc_rel(br_base(0b010), "putsp_done", 9); // high byte zero -> done
    asm.word(trap(0x21));
    asm.word(add_imm(1, 1, 1));
    asm.pc_rel(br_base(0b111), "putsp_loop", 9);
    asm.label("putsp_done");
    for r in [7u16, 4, 3, 2, 1, 0] {
        asm.word(ldr(r, 6, 0));
        asm.word(add_imm(6, 6, 1));
    }
    asm.word(rti());
    asm.label("putsp_maskff");
    asm.word(0x00FF);
}

/// Extracts the high byte of `r3` into `r0` (logical shift right by 8),
/// using only ADD/AND/NOT — LC-3 has no shift instruction. Clobbers r1/r4.
/// Called via JSR; returns via RET (JMP R7).
///
/// Works by clearing bit 15 as a special case (adding 0x8000 to a value
/// with bit 15 set clears it, mod 2^16, leaving the low 15 bits intact),
/// then greedily testing bits 14 down to 8 against precomputed thresholds
/// now that the remaining value is guaranteed non-negative as an i16.
fn build_hi_byte_sub(asm: &mut Asm) {
    asm.label("hi_byte_sub");
    asm.word(and_imm(0, 0, 0));
    asm.word(add_imm(4, 3, 0)); // test sign of r3
    asm.pc_rel(br_base(0b011), "hb_skip15", 9);
    asm.pc_rel(ld_base(1), "putsp_thresh_7", 9);
    asm.word(add_reg(3, 3, 1));
    asm.pc_rel(ld_base(1), "putsp_contrib_7", 9);
    asm.word(add_reg(0, 0, 1));
    asm.label("hb_skip15");
    for i in (0..=6).rev() {
        let skip = format!("hb_skip{i}");
        asm.pc_rel(ld_base(1), &format!("putsp_negthresh_{i}"), 9);
        asm.word(add_reg(4, 3, 1));
        asm.pc_rel(br_base(0b100), &skip, 9); // negative -> threshold too big, skip
        asm.word(add_reg(3, 3, 1));
        asm.pc_rel(ld_base(1), &format!("putsp_contrib_{i}"), 9);
        asm.word(add_reg(0, 0, 1));
        asm.label(&skip);
    }
    asm.word(ret());

    asm.label("putsp_contrib_7");
    asm.word(128);
    asm.label("putsp_thresh_7");
    asm.word(32768);
    for i in (0..=6).rev() {
        asm.label(&format!("putsp_contrib_{i}"));
        asm.word(1u16 << i);
        asm.label(&format!("putsp_negthresh_{i}"));
        asm.word((256i32 << i).wrapping_neg() as u16);
    }
}

fn build_priv_exception(asm: &mut Asm) {
    asm.label("priv_exception");
    asm.pc_rel(lea_base(0), "priv_msg", 9);
    asm.word(trap(0x22));
    asm.word(trap(0x25));
    asm.label("priv_msg");
    emit_string(asm, "\n\nPrivilege mode exception!\n\n");
}

fn build_illegal_exception(asm: &mut Asm) {
    asm.label("illegal_exception");
    asm.pc_rel(lea_base(0), "illegal_msg", 9);
    asm.word(trap(0x22));
    asm.word(trap(0x25));
    asm.label("illegal_msg");
    emit_string(asm, "\n\nIllegal instruction exception!\n\n");
}

fn build_access_violation(asm: &mut Asm) {
    asm.label("access_violation");
    asm.pc_rel(lea_base(0), "access_msg", 9);
    asm.word(trap(0x22));
    asm.word(trap(0x25));
    asm.label("access_msg");
    emit_string(asm, "\n\nAcess Violation Exception!\n\n");
}

fn build_bad_interrupt(asm: &mut Asm) {
    asm.label("bad_interrupt");
    asm.pc_rel(lea_base(0), "bad_interrupt_msg", 9);
    asm.word(trap(0x22));
    asm.word(trap(0x25));
    asm.label("bad_interrupt_msg");
    emit_string(asm, "\n\nBad Interrupt Executed!\n\n");
}

fn emit_string(asm: &mut Asm, s: &str) {
    for ch in s.chars() {
        asm.word(ch as u16);
    }
    asm.word(0);
}

// ---- instruction encoding helpers ----
//
// `*_base` functions return an opcode word with its offset field left at
// zero, for use with `Asm::pc_rel`. The rest return a fully-resolved word.

fn add_reg(dr: u16, sr1: u16, sr2: u16) -> u16 {
    0x1000 | (dr << 9) | (sr1 << 6) | sr2
}
fn add_imm(dr: u16, sr1: u16, imm5: i16) -> u16 {
    0x1000 | (dr << 9) | (sr1 << 6) | 0x20 | (imm5 as u16 & 0x1F)
}
fn and_reg(dr: u16, sr1: u16, sr2: u16) -> u16 {
    0x5000 | (dr << 9) | (sr1 << 6) | sr2
}
fn and_imm(dr: u16, sr1: u16, imm5: i16) -> u16 {
    0x5000 | (dr << 9) | (sr1 << 6) | 0x20 | (imm5 as u16 & 0x1F)
}
fn ldr(dr: u16, base: u16, off6: i16) -> u16 {
    0x6000 | (dr << 9) | (base << 6) | (off6 as u16 & 0x3F)
}
fn str_(sr: u16, base: u16, off6: i16) -> u16 {
    0x7000 | (sr << 9) | (base << 6) | (off6 as u16 & 0x3F)
}
fn ret() -> u16 {
    0xC000 | (7 << 6)
}
fn trap(vec8: u8) -> u16 {
    0xF000 | vec8 as u16
}
fn rti() -> u16 {
    0x8000
}
fn lea_base(dr: u16) -> u16 {
    0xE000 | (dr << 9)
}
fn ld_base(dr: u16) -> u16 {
    0x2000 | (dr << 9)
}
fn ldi_base(dr: u16) -> u16 {
    0xA000 | (dr << 9)
}
fn sti_base(sr: u16) -> u16 {
    0xB000 | (sr << 9)
}
fn br_base(nzp: u16) -> u16 {
    nzp << 9
}
fn jsr_base() -> u16 {
    0x4800
}

/// A tiny single-pass assembler: emit words and labels in any order, push
/// PC-relative or absolute-slot references by label name, then resolve
/// everything once every label is known.
struct Asm {
    words: Vec<u16>,
    labels: HashMap<String, u16>,
    pc_rel_fixups: Vec<(usize, u16, String, u8)>,
    table_fixups: Vec<(u16, String)>,
}

impl Asm {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            labels: HashMap::new(),
            pc_rel_fixups: Vec::new(),
            table_fixups: Vec::new(),
        }
    }

    fn here(&self) -> u16 {
        self.words.len() as u16
    }

    fn label(&mut self, name: &str) {
        let prev = self.labels.insert(name.to_string(), self.here());
        assert!(prev.is_none(), "duplicate OS ROM label: {name}");
    }

    fn word(&mut self, w: u16) {
        self.words.push(w);
    }

    /// Emit a placeholder for a PC-relative instruction (LEA/LD/LDI/ST/STI/
    /// BR/JSR), to be patched in `finish` once `target`'s address is known.
    fn pc_rel(&mut self, opcode_base: u16, target: &str, width: u8) {
        let pos = self.words.len();
        self.words.push(0);
        self.pc_rel_fixups
            .push((pos, opcode_base, target.to_string(), width));
    }

    /// Record that the trap-table slot for `vec8` should hold `target`'s
    /// resolved address.
    fn set_trap(&mut self, vec8: u8, target: &str) {
        self.table_fixups.push((vec8 as u16, target.to_string()));
    }

    /// Record that the interrupt-table slot for `code` should hold
    /// `target`'s resolved address.
    fn set_interrupt(&mut self, code: u8, target: &str) {
        self.table_fixups
            .push((mmio::INT_TABLE_BASE + code as u16, target.to_string()));
    }

    fn resolve(&self, name: &str) -> u16 {
        *self
            .labels
            .get(name)
            .unwrap_or_else(|| panic!("unresolved OS ROM label: {name}"))
    }

    fn finish(mut self) -> OsImage {
        for (pos, opcode_base, target, width) in &self.pc_rel_fixups {
            let target_addr = self.resolve(target);
            let offset = i32::from(target_addr) - i32::from(*pos as u16) - 1;
            let (lo, hi) = (-(1i32 << (width - 1)), (1i32 << (width - 1)) - 1);
            assert!(
                (lo..=hi).contains(&offset),
                "OS ROM PC-relative reference to {target} out of range: {offset}"
            );
            let mask = (1u16 << width) - 1;
            self.words[*pos] = opcode_base | (offset as u16 & mask);
        }

        for (slot, target) in &self.table_fixups {
            let target_addr = self.resolve(target);
            self.words[*slot as usize] = target_addr;
        }

        assert!(
            self.words.len() <= IMAGE_LEN,
            "OS ROM overflowed its {IMAGE_LEN}-word budget: {} words",
            self.words.len()
        );
        self.words.resize(IMAGE_LEN, 0);

        let entry = self.resolve("os_start");
        let user_pc_slot = self.resolve("initial_pc");
        let mut words = [0u16; IMAGE_LEN];
        words.copy_from_slice(&self.words);
        OsImage {
            words,
            entry,
            user_pc_slot,
        }
    }
}
