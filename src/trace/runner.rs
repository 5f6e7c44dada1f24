use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use tokio::{
    runtime::{Builder, Runtime},
    time::{interval, Interval},
};

use crate::{
    addr::{MappingTable, SharedMapping, SourceMap},
    dbg::{
        breakpoints::BreakpointId,
        debugger::Debugger,
        registers::{MachineState, RegisterInspector},
        DebuggerConfig,
    },
    plat::{RegisterFile, Target, PPU_OAMADDR_INDEX, PPU_OAMDATA_INDEX},
};

use super::{Record, Script, TraceLine};

/// Index of `PC` in the CPU register table.
const PC_INDEX: usize = 5;

/// Register file contents as replayed so far.
#[derive(Debug, Default)]
pub struct TraceState {
    registers: RefCell<FxHashMap<(RegisterFile, usize), u16>>,
    cycle: Cell<u64>,
    mapper: Cell<Option<u16>>,
}

impl TraceState {
    pub fn set_register(&self, file: RegisterFile, index: usize, value: u16) {
        self.registers.borrow_mut().insert((file, index), value);
    }

    pub fn set_mapper(&self, mapper_id: Option<u16>) {
        self.mapper.set(mapper_id);
    }

    pub fn advance(&self, cycles: u64) {
        self.cycle.set(self.cycle.get().saturating_add(cycles));
    }

    pub fn reset(&self) {
        self.registers.borrow_mut().clear();
        self.cycle.set(0);
    }
}

impl MachineState for TraceState {
    fn register_value(&self, file: RegisterFile, index: usize) -> Option<u16> {
        self.registers.borrow().get(&(file, index)).copied()
    }

    fn cpu_cycle(&self) -> u64 {
        self.cycle.get()
    }

    fn mapper_id(&self) -> Option<u16> {
        self.mapper.get()
    }
}

/// Replays a [Script] into a [Debugger], one record per step.
pub struct TraceRunner {
    debugger: Debugger,
    mapping: Rc<SharedMapping>,
    state: Rc<TraceState>,
    lines: Vec<TraceLine>,
    pos: usize,
    clock: Option<Interval>,
    rt: Runtime,
}

impl TraceRunner {
    /// Loads a script. `sym` records become the debug info up front; a `clock_hz` of zero
    /// replays as fast as possible.
    ///
    /// # Errors
    ///
    /// This function will return an error if the Tokio runtime fails to initialize.
    pub fn new(script: Script, config: &DebuggerConfig, clock_hz: f64) -> Result<Self> {
        let rt = Builder::new_current_thread()
            .enable_time()
            .global_queue_interval(1)
            .build()?;
        let clock = (clock_hz > 0.0)
            .then(|| rt.block_on(async { interval(Duration::from_secs_f64(clock_hz.recip())) }));

        let mut symbols = SourceMap::new();
        let mut lines = Vec::with_capacity(script.lines.len());
        for line in script.lines {
            match line.record {
                Record::Symbol { sloc, absolute } => symbols.insert(sloc, absolute),
                _ => lines.push(line),
            }
        }
        log::info!(
            "loaded {}: {} records, {} source lines",
            script.name,
            lines.len(),
            symbols.len()
        );

        let mapping = Rc::new(SharedMapping::new(MappingTable::unmapped()));
        let state = Rc::new(TraceState::default());
        let mut debugger = Debugger::new(config, mapping.clone(), Rc::new(symbols), state.clone());
        debugger.cartridge_loaded(None);
        Ok(Self {
            debugger,
            mapping,
            state,
            lines,
            pos: 0,
            clock,
            rt,
        })
    }

    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    pub fn state(&self) -> &TraceState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.pos >= self.lines.len()
    }

    /// The record the next [step](TraceRunner::step) will replay.
    pub fn next_line(&self) -> Option<&TraceLine> {
        self.lines.get(self.pos)
    }

    /// Replays the setup records ahead of the first executed or accessed address, leaving the
    /// machine in its power-on bank layout.
    pub fn power_on(&mut self) -> Result<()> {
        while let Some(line) = self.next_line() {
            if matches!(line.record, Record::Exec { .. } | Record::Access { .. }) {
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    /// Rewinds to the first record, as a soft reset of the machine.
    pub fn rewind(&mut self) {
        self.pos = 0;
        self.mapping.reset();
        self.state.reset();
        self.debugger.emulator_reset();
    }

    /// Replays one record. Returns the breakpoints it hit.
    pub fn step(&mut self) -> Result<Vec<BreakpointId>> {
        let Some(line) = self.lines.get(self.pos).copied() else {
            return Ok(Vec::new());
        };
        self.pos += 1;
        if let Some(clock) = self.clock.as_mut() {
            self.rt.block_on(async {
                // snap!
                clock.tick().await;
            });
        }
        log::trace!("line {}: {:?}", line.line, line.record);
        self.apply(line.record)
            .with_context(|| format!("replaying line {}", line.line))
    }

    fn apply(&mut self, record: Record) -> Result<Vec<BreakpointId>> {
        match record {
            Record::Symbol { .. } => {}
            Record::Bank { window, bank } => self.mapping.switch(window, bank)?,
            Record::Mapper(id) => self.state.set_mapper(Some(id)),
            Record::Register { file, index, value } => self.state.set_register(file, index, value),
            Record::Exec { logical, cycles } => {
                let absolute = self.debugger.translator().to_absolute(logical)?;
                self.state.set_register(RegisterFile::Cpu, PC_INDEX, logical);
                self.state.advance(cycles);
                return Ok(self.debugger.on_instruction_retired(logical, absolute));
            }
            Record::Access {
                target,
                address,
                value,
                is_write,
            } => {
                let hits = self.debugger.on_access(target, address, value, is_write);
                if is_write {
                    self.latch(target, address, value);
                }
                return Ok(hits);
            }
        }
        Ok(Vec::new())
    }

    /// Mirrors a register write into the replayed state.
    fn latch(&self, target: Target, address: u16, value: u8) {
        let file = RegisterFile::of_target(target);
        let regs: &RegisterInspector = self.debugger.registers();
        let Some(index) = regs.index_for_address(file, address) else {
            return;
        };
        self.state.set_register(file, index, value as u16);
        if file == RegisterFile::Ppu && index == PPU_OAMDATA_INDEX {
            let oam_addr = regs.value(RegisterFile::Ppu, PPU_OAMADDR_INDEX).unwrap_or(0);
            self.state.set_register(RegisterFile::Oam, oam_addr as usize, value as u16);
            self.state
                .set_register(RegisterFile::Ppu, PPU_OAMADDR_INDEX, (oam_addr + 1) & 0xFF);
        }
    }

    /// Replays until the debugger pauses or the script ends.
    pub fn run(&mut self) -> Result<()> {
        while !self.debugger.is_paused() && !self.is_finished() {
            self.step()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dbg::breakpoints::{BreakpointSpec, Condition},
        plat::Access,
        trace::parse_script,
    };

    const BOOT: &str = "\
sym 1 018000
sym 2 018003
sym 3 01A000
bank 0 12
bank 1 13
exec 8000 2
exec 8003 4
write ppu 2003 10
write ppu 2004 AA
bank 0 -
bank 0 13
exec 8000 2
";

    fn runner() -> TraceRunner {
        let script = parse_script(BOOT, "boot").unwrap();
        TraceRunner::new(script, &DebuggerConfig::default(), 0.0).unwrap()
    }

    #[test]
    fn test_run_to_completion() {
        let mut runner = runner();
        runner.run().unwrap();
        assert!(runner.is_finished());
        assert_eq!(runner.state().cpu_cycle(), 8);
        assert_eq!(runner.state().register_value(RegisterFile::Oam, 0x10), Some(0xAA));
        assert_eq!(
            runner.state().register_value(RegisterFile::Ppu, PPU_OAMADDR_INDEX),
            Some(0x11)
        );
        let loc = runner.debugger().current_location().unwrap();
        assert_eq!(loc.absolute, 0x01A000);
        assert_eq!(runner.debugger().current_source_line(), Some(3));
    }

    #[test]
    fn test_stops_at_breakpoint() {
        let mut runner = runner();
        let err = runner.debugger_mut().break_at_line(3).unwrap_err();
        // line 3 is only visible once bank 13 is mapped
        assert!(matches!(err, crate::dbg::DbgError::Translate(_)));

        runner.step().unwrap();
        runner.step().unwrap();
        let id = runner.debugger_mut().break_at_line(3).unwrap();
        runner.run().unwrap();
        assert!(runner.debugger().is_paused());
        assert!(runner.is_finished());
        assert_eq!(runner.debugger().breakpoints().get(id).unwrap().hit_count(), 1);
    }

    #[test]
    fn test_oam_portal_breakpoint() {
        let mut runner = runner();
        let id = runner
            .debugger_mut()
            .breakpoints_mut()
            .add(
                BreakpointSpec::oam_portal(Access::Write, Some(0x10)).when_data(Condition::Equal(0xAA)),
                false,
            )
            .unwrap();
        runner.run().unwrap();
        assert!(runner.debugger().is_paused());
        assert_eq!(runner.next_line().map(|l| l.line), Some(10));
        assert!(runner.debugger().breakpoints().get(id).unwrap().is_hit());
    }

    #[test]
    fn test_rewind_keeps_breakpoints() {
        let mut runner = runner();
        runner.run().unwrap();
        runner.debugger_mut().break_at_address(0x8000).unwrap();
        runner.rewind();
        assert_eq!(runner.state().cpu_cycle(), 0);
        assert_eq!(runner.debugger().breakpoints().len(), 1);
        assert!(runner.debugger().translator().to_absolute(0x8000).is_err());
    }

    #[test]
    fn test_power_on_maps_banks() {
        let mut runner = runner();
        runner.power_on().unwrap();
        assert_eq!(runner.next_line().map(|l| l.line), Some(6));
        assert_eq!(runner.debugger().translator().to_absolute(0xA000).unwrap(), 0x01A000);
        assert!(runner.debugger_mut().break_at_line(3).is_ok());
    }

    #[test]
    fn test_huge_values_do_not_panic() {
        let script = parse_script(
            "bank 0 12\nexec 8000 18446744073709551615\nexec 8000 5\nbank 1 600000\n",
            "huge",
        )
        .unwrap();
        let mut runner = TraceRunner::new(script, &DebuggerConfig::default(), 0.0).unwrap();
        runner.step().unwrap();
        runner.step().unwrap();
        runner.step().unwrap();
        assert_eq!(runner.state().cpu_cycle(), u64::MAX);
        assert!(runner.step().is_err());
    }

    #[test]
    fn test_exec_in_unmapped_window_fails() {
        let script = parse_script("exec 8000", "bad").unwrap();
        let mut runner = TraceRunner::new(script, &DebuggerConfig::default(), 0.0).unwrap();
        assert!(runner.step().is_err());
    }
}
