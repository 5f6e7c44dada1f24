//! Interactive debugger console over a [TraceRunner].

use std::cell::{Cell, RefCell};

use anyhow::{anyhow, Result};
use easy_repl::{command, repl::LoopStatus, CommandStatus, Repl};
use nom::combinator::all_consuming;

use crate::{
    dbg::{breakpoints::BreakpointId, registers::StatusFlags},
    plat::{Access, RegisterFile, Target},
    trace::{parser::parse_hex, Span, TraceRunner},
};

/// Index of `P` in the CPU register table.
const STATUS_INDEX: usize = 4;

fn parse_addr(arg: &str) -> Result<u16> {
    let (_, value) = all_consuming(parse_hex)(Span::new_extra(arg, "argument"))
        .map_err(|_| anyhow!("not a hex address: {}", arg))?;
    Ok(u16::try_from(value)?)
}

fn report_hits(hits: &[BreakpointId]) {
    for id in hits {
        eprintln!("hit breakpoint {}", id);
    }
}

pub struct Console<'a> {
    pub runner: RefCell<&'a mut TraceRunner>,
    resumed: Cell<bool>,
    quit: Cell<bool>,
}

impl<'a> Console<'a> {
    pub fn new(runner: &'a mut TraceRunner) -> Self {
        Self {
            runner: RefCell::new(runner),
            resumed: Cell::new(false),
            quit: Cell::new(false),
        }
    }

    fn watch(&self, access: Access, target: &str, addr: &str) -> Result<()> {
        let target = target.parse::<Target>()?;
        let addr = parse_addr(addr)?;
        let id = self
            .runner
            .borrow_mut()
            .debugger_mut()
            .watch_memory(target, access, addr)?;
        eprintln!("added breakpoint {}", id);
        Ok(())
    }

    fn print_location(&self) {
        let runner = self.runner.borrow();
        let dbg = runner.debugger();
        match dbg.current_location() {
            Some(loc) => {
                let line = dbg
                    .current_source_line()
                    .map(|l| format!("line {}", l))
                    .unwrap_or_else(|| "no source".to_owned());
                eprintln!("[pc={:04X} abs={:06X}] {}", loc.logical, loc.absolute, line);
            }
            None => eprintln!("no instruction retired yet"),
        }
        if let Some(next) = runner.next_line() {
            eprintln!("next: trace line {} --> {:?}", next.line, next.record);
        } else {
            eprintln!("end of trace");
        }
    }

    fn print_registers(&self, file: RegisterFile) {
        let runner = self.runner.borrow();
        let regs = runner.debugger().registers();
        if file == RegisterFile::Mapper {
            match regs.mapper_name() {
                Some(name) => eprintln!("mapper: {}", name),
                None => eprintln!("mapper: unknown"),
            }
        }
        for index in 0..regs.count(file) {
            let Some(label) = regs.describe(file, index) else {
                continue;
            };
            let Some(value) = regs.value(file, index) else {
                eprintln!("{}=??", label);
                continue;
            };
            if file == RegisterFile::Cpu && index == STATUS_INDEX {
                let flags = StatusFlags::from_bits_retain(value as u8);
                eprintln!("{}={:02X} {}", label, value, flags.to_letters());
                continue;
            }
            eprintln!("{}={:04X}", label, value);
            for field in regs.bitfields(file, index) {
                let v = field.extract(value);
                match field.value_name(v) {
                    Some(name) => eprintln!("    {}={} ({})", field.name, v, name),
                    None => eprintln!("    {}={}", field.name, v),
                }
            }
        }
    }

    /// Replays until a breakpoint or the end of the trace, then hands control to the user.
    /// Returns when the user quits.
    pub fn run(&self) -> Result<()> {
        let mut repl = Repl::builder()
            .description("NES Debug REPL")
            .add(
                "c",
                command! {
                    "Continue execution",
                    () => || {
                        self.runner.borrow_mut().debugger_mut().resume();
                        self.resumed.set(true);
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .add(
                "s",
                command! {
                    "Step one trace record",
                    () => || {
                        let hits = self.runner.borrow_mut().step()?;
                        report_hits(&hits);
                        self.print_location();
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "b",
                command! {
                    "Toggle a breakpoint on a source line (add, disable, remove)",
                    (sloc:usize) => |sloc| {
                        let mut runner = self.runner.borrow_mut();
                        match runner.debugger_mut().toggle_breakpoint_at_line(sloc)? {
                            Some(id) => eprintln!("{}", runner.debugger().breakpoints().get(id).map(|bp| bp.to_string()).unwrap_or_default()),
                            None => eprintln!("breakpoint on line {} removed", sloc),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "bx",
                command! {
                    "Break when the instruction at a logical address retires",
                    (addr:String) => |addr: String| {
                        let addr = parse_addr(&addr)?;
                        let id = self.runner.borrow_mut().debugger_mut().break_at_address(addr)?;
                        eprintln!("added breakpoint {}", id);
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "bw",
                command! {
                    "Break on writes to an address (cpu, ppu, apu, mapper)",
                    (target:String, addr:String) => |target: String, addr: String| {
                        self.watch(Access::Write, &target, &addr)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "br",
                command! {
                    "Break on reads from an address (cpu, ppu, apu, mapper)",
                    (target:String, addr:String) => |target: String, addr: String| {
                        self.watch(Access::Read, &target, &addr)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "d",
                command! {
                    "Delete a breakpoint",
                    (id:u32) => |id| {
                        self.runner.borrow_mut().debugger_mut().breakpoints_mut().remove(BreakpointId(id));
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "t",
                command! {
                    "Enable or disable a breakpoint",
                    (id:u32) => |id| {
                        self.runner.borrow_mut().debugger_mut().breakpoints_mut().toggle_enabled(BreakpointId(id));
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "ls",
                command! {
                    "List breakpoints",
                    () => || {
                        let runner = self.runner.borrow();
                        let bps = runner.debugger().breakpoints();
                        eprintln!("{}/{} breakpoints", bps.len(), bps.capacity());
                        for bp in bps.iter() {
                            eprintln!("{}", bp);
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "ms",
                command! {
                    "Start an execution marker at a source line",
                    (sloc:usize) => |sloc| {
                        let id = self.runner.borrow_mut().debugger_mut().start_marker_at_line(sloc)?;
                        eprintln!("marker {} started", id);
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "me",
                command! {
                    "End the open execution marker at a source line",
                    (sloc:usize) => |sloc| {
                        let id = self.runner.borrow_mut().debugger_mut().end_marker_at_line(sloc)?;
                        eprintln!("marker {} completed", id);
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "mc",
                command! {
                    "Clear all execution markers",
                    () => || {
                        self.runner.borrow_mut().debugger_mut().clear_markers();
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "lm",
                command! {
                    "List execution markers",
                    () => || {
                        let runner = self.runner.borrow();
                        for marker in runner.debugger().markers().iter() {
                            eprintln!("{}", marker);
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "pr",
                command! {
                    "Print a register file (cpu, ppu, apu, mapper, oam)",
                    (file:String) => |file: String| {
                        self.print_registers(file.parse()?);
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "runto",
                command! {
                    "Run until a source line executes",
                    (sloc:usize) => |sloc| {
                        let id = self.runner.borrow_mut().debugger_mut().run_to_line(sloc)?;
                        log::debug!("running to line {} with {}", sloc, id);
                        self.resumed.set(true);
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .add(
                "where",
                command! {
                    "Show the current location and bank layout",
                    () => || {
                        self.print_location();
                        let mapping = self.runner.borrow().debugger().translator().mapping();
                        for window in 0..crate::plat::PRG_WINDOW_COUNT {
                            match mapping.bank_at(window) {
                                Some(bank) => eprintln!("window {}: bank {}", window, bank),
                                None => eprintln!("window {}: unmapped", window),
                            }
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "reset",
                command! {
                    "Rewind the trace (breakpoints and markers are kept)",
                    () => || {
                        self.runner.borrow_mut().rewind();
                        self.print_location();
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "q",
                command! {
                    "Quit",
                    () => || {
                        self.quit.set(true);
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .build()?;
        eprintln!("NES Debug REPL");
        'session: loop {
            if let Err(e) = self.runner.borrow_mut().run() {
                log::error!("{:#}", e);
            }
            {
                let mut runner = self.runner.borrow_mut();
                if !runner.debugger().is_paused() {
                    runner.debugger_mut().pause(true);
                }
            }
            self.resumed.set(false);
            'repl: loop {
                eprintln!();
                self.print_location();
                let status = repl.next()?;
                if let LoopStatus::Break = status {
                    break 'repl;
                }
                if self.quit.get() {
                    break 'session;
                }
            }
            if self.quit.get() || !self.resumed.get() {
                break 'session;
            }
        }
        Ok(())
    }
}
