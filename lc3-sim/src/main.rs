//! Command-line front end for the LC-3 simulator.
//!
//! Argument parsing is hand-rolled `std::env::args()` matching rather than
//! a parsing crate. Host-level failures are reported with `eprintln!` plus
//! a non-zero exit code rather than a panic.

use std::fs;
use std::process::ExitCode;

use lc3_core::{Bus, Cpu};
use lc3_cpu::Lc3Cpu;
use lc3_machine::{loader, Memory};
use rand::Rng;

struct Args {
    programs: Vec<String>,
    debug: bool,
    randomize: bool,
    silent: bool,
    input: Option<String>,
    dump: Vec<u16>,
    memory: Vec<(u16, u16)>,
}

fn print_help() {
    println!("lc3-sim [FLAGS] <program.obj>...");
    println!();
    println!("The last object file given is the \"main\" program; its origin becomes");
    println!("the initial user PC.");
    println!();
    println!("Flags:");
    println!("  --help                     print this help and exit");
    println!("  --debug                    enable debug hooks; break and trace at the entry point");
    println!("  --randomize                seed R0..R7 with random values before start");
    println!("  --silent                   suppress the output buffer and halt banner");
    println!("  --input=<string>           supply scripted keyboard input");
    println!("  --dump=<hex>,<hex>,...     print these memory addresses after halt");
    println!("  --memory=<addr>,<val>,...  pre-set memory words before start");
}

/// Parses a comma-separated list of hex tokens (an optional `0x` prefix is
/// accepted but not required).
fn parse_hex_list(s: &str) -> Vec<u16> {
    s.split(',')
        .filter(|tok| !tok.is_empty())
        .filter_map(|tok| u16::from_str_radix(tok.trim_start_matches("0x"), 16).ok())
        .collect()
}

fn parse_memory_presets(s: &str) -> Vec<(u16, u16)> {
    parse_hex_list(s)
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

fn parse_args() -> Args {
    let mut args = Args {
        programs: Vec::new(),
        debug: false,
        randomize: false,
        silent: false,
        input: None,
        dump: Vec::new(),
        memory: Vec::new(),
    };

    for arg in std::env::args().skip(1) {
        if arg == "--help" {
            print_help();
            std::process::exit(0);
        } else if arg == "--debug" {
            args.debug = true;
        } else if arg == "--randomize" {
            args.randomize = true;
        } else if arg == "--silent" {
            args.silent = true;
        } else if let Some(value) = arg.strip_prefix("--input=") {
            args.input = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--dump=") {
            args.dump = parse_hex_list(value);
        } else if let Some(value) = arg.strip_prefix("--memory=") {
            args.memory = parse_memory_presets(value);
        } else if arg.starts_with("--") {
            // Unrecognised flags are silently ignored.
        } else {
            args.programs.push(arg);
        }
    }

    args
}

fn main() -> ExitCode {
    let args = parse_args();

    if args.programs.is_empty() {
        eprintln!("lc3-sim: no program specified");
        return ExitCode::FAILURE;
    }

    let mut memory = Memory::new();

    // All but the last path are preparatory data: a load failure is
    // reported but not fatal. The last path is "main"; only its load
    // outcome decides the initial user PC, and its failure is fatal even
    // if every earlier file loaded fine.
    let (main_path, prep_paths) = args
        .programs
        .split_last()
        .expect("args.programs is non-empty, checked above");

    for path in prep_paths {
        match fs::read(path) {
            Ok(bytes) => {
                if let Err(e) = loader::load(&mut memory, &bytes) {
                    eprintln!("lc3-sim: failed to load {path}: {e}");
                }
            }
            Err(e) => eprintln!("lc3-sim: could not read {path}: {e}"),
        }
    }

    let main_bytes = match fs::read(main_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("lc3-sim: could not read {main_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let main_origin = match loader::load(&mut memory, &main_bytes) {
        Ok(image) => image.origin,
        Err(e) => {
            eprintln!("lc3-sim: failed to load {main_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The OS bootstrap's data slot for the initial user PC is overwritten
    // with the last-loaded program's origin: that program is "main" and
    // its base becomes the initial user PC.
    let rom = lc3_machine::os_rom::build();
    memory.poke(rom.user_pc_slot, main_origin);

    for (addr, val) in &args.memory {
        memory.poke(*addr, *val);
    }

    if let Some(input) = &args.input {
        memory.feed_input(input);
    }

    let mut cpu = Lc3Cpu::new();
    cpu.set_pc_raw(rom.entry);

    if args.randomize {
        let mut rng = rand::rng();
        for r in 0..8 {
            cpu.set_reg(r, rng.random());
        }
    }

    if args.debug {
        cpu.add_breakpoint(main_origin);
        run_debug(&mut cpu, &mut memory);
    } else {
        cpu.run(&mut memory);
    }

    if !args.silent {
        let output = memory.take_output();
        print!("{}", String::from_utf8_lossy(&output));
        println!("\n--- machine halted ---");
    }

    for addr in &args.dump {
        println!("{addr:#06x}: {:#06x}", memory.peek(*addr));
    }

    ExitCode::SUCCESS
}

/// `--debug`'s step trace: print each instruction's address and the
/// register file after it executes, flagging breakpoints the way an
/// external debugger's single-step view would render them.
fn run_debug(cpu: &mut Lc3Cpu, memory: &mut Memory) {
    while memory.clock_running() {
        if cpu.breakpoints().contains(&cpu.pc()) {
            println!("--- breakpoint at {:#06x} ---", cpu.pc());
        }
        let pc = cpu.pc();
        cpu.step(memory);
        print!("{pc:#06x}:");
        for r in 0..8 {
            print!(" r{r}={:#06x}", cpu.reg(r));
        }
        println!();
    }
}
