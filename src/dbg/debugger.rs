use std::rc::Rc;

use crate::{
    addr::{AResult, AddressTranslator, BankMapping, SymbolTable},
    plat::{Access, Target},
};

use super::{
    breakpoints::{BreakpointDatabase, BreakpointId, BreakpointSpec, BreakpointStatus, StepEvent},
    markers::{MarkerDatabase, MarkerId},
    notify::{DebugEvent, NotificationBus},
    registers::{MachineState, RegisterInspector},
    DResult, DbgError, DebuggerConfig,
};

/// Whether the emulation loop may advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Stopped on a breakpoint or an explicit pause, until [Debugger::resume].
    Paused,
}

/// Where the last retired instruction was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub logical: u16,
    pub absolute: u32,
}

/// The debugger core for one session.
///
/// The emulation side drives it through [on_instruction_retired](Debugger::on_instruction_retired)
/// and [on_access](Debugger::on_access) and checks [is_paused](Debugger::is_paused) before
/// advancing; views subscribe to [bus](Debugger::bus) and read through the accessors.
pub struct Debugger {
    bus: Rc<NotificationBus>,
    breakpoints: BreakpointDatabase,
    markers: MarkerDatabase,
    translator: AddressTranslator,
    registers: RegisterInspector,
    state: RunState,
    last: Option<Location>,
}

impl Debugger {
    pub fn new(
        config: &DebuggerConfig,
        mapping: Rc<dyn BankMapping>,
        symbols: Rc<dyn SymbolTable>,
        machine: Rc<dyn MachineState>,
    ) -> Self {
        let bus = Rc::new(NotificationBus::new());
        let mut breakpoints = BreakpointDatabase::new(config.breakpoint_capacity, bus.clone());
        breakpoints.set_index_threshold(config.exec_index_threshold);
        Self {
            markers: MarkerDatabase::new(config.marker_capacity, bus.clone()),
            breakpoints,
            translator: AddressTranslator::new(mapping, symbols),
            registers: RegisterInspector::new(machine),
            state: RunState::Running,
            last: None,
            bus,
        }
    }

    pub fn bus(&self) -> &Rc<NotificationBus> {
        &self.bus
    }

    pub fn breakpoints(&self) -> &BreakpointDatabase {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointDatabase {
        &mut self.breakpoints
    }

    pub fn markers(&self) -> &MarkerDatabase {
        &self.markers
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    pub fn registers(&self) -> &RegisterInspector {
        &self.registers
    }

    pub fn run_state(&self) -> RunState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == RunState::Paused
    }

    pub fn current_location(&self) -> Option<Location> {
        self.last
    }

    /// Source line of the last retired instruction, under the current bank layout.
    pub fn current_source_line(&self) -> Option<usize> {
        let last = self.last?;
        self.translator.source_line_from_address(last.logical).ok()
    }

    /// Emulation step callback: an instruction at `logical`/`absolute` just retired.
    pub fn on_instruction_retired(&mut self, logical: u16, absolute: u32) -> Vec<BreakpointId> {
        self.last = Some(Location { logical, absolute });
        if !self.markers.is_empty() {
            self.markers
                .update(absolute, self.registers.state().cpu_cycle());
        }
        let hits = self
            .breakpoints
            .evaluate(&StepEvent::Retired { logical, absolute }, &self.registers);
        self.stop_on(&hits);
        hits
    }

    /// Memory/register access callback.
    pub fn on_access(&mut self, target: Target, address: u16, value: u8, is_write: bool) -> Vec<BreakpointId> {
        let absolute = self.absolute_for(target, address).ok();
        let event = StepEvent::Access {
            target,
            logical: address,
            absolute,
            value,
            is_write,
        };
        let hits = self.breakpoints.evaluate(&event, &self.registers);
        self.stop_on(&hits);
        hits
    }

    fn absolute_for(&self, target: Target, logical: u16) -> AResult<u32> {
        // only the CPU bus is bank switched by the PRG mapper
        match target {
            Target::Cpu => self.translator.to_absolute(logical),
            _ => Ok(logical as u32),
        }
    }

    fn stop_on(&mut self, hits: &[BreakpointId]) {
        if !hits.is_empty() {
            self.state = RunState::Paused;
        }
    }

    /// Stops execution and tells views; `show` asks them to come forward.
    pub fn pause(&mut self, show: bool) {
        self.state = RunState::Paused;
        log::info!("emulation paused");
        self.bus.publish(&DebugEvent::Paused { show });
    }

    /// Lets the emulation loop advance again. Resuming acknowledges every pending hit.
    pub fn resume(&mut self) {
        self.breakpoints.clear_hits();
        self.state = RunState::Running;
        log::debug!("emulation resumed");
    }

    /// Adds a persistent CPU-execution breakpoint at whatever `logical` currently maps to.
    pub fn break_at_address(&mut self, logical: u16) -> DResult<BreakpointId> {
        let absolute = self.translator.to_absolute(logical)?;
        self.breakpoints
            .add(BreakpointSpec::execution(logical, absolute), false)
    }

    /// Adds a persistent memory breakpoint on `target`'s bus at `logical`.
    pub fn watch_memory(&mut self, target: Target, access: Access, logical: u16) -> DResult<BreakpointId> {
        let absolute = self.absolute_for(target, logical)?;
        self.breakpoints
            .add(BreakpointSpec::memory(target, access, logical, absolute), false)
    }

    pub fn break_at_line(&mut self, sloc: usize) -> DResult<BreakpointId> {
        let logical = self.translator.address_from_source_line(sloc)?;
        self.break_at_address(logical)
    }

    /// Cycles the execution breakpoint on a source line: none → enabled → disabled → none.
    ///
    /// Returns the breakpoint left on the line, if any.
    pub fn toggle_breakpoint_at_line(&mut self, sloc: usize) -> DResult<Option<BreakpointId>> {
        let (logical, absolute) = self.translator.resolve_line(sloc)?;
        let spec = BreakpointSpec::execution(logical, absolute);
        match self.breakpoints.find_exact_match(&spec) {
            None => self.breakpoints.add(spec, false).map(Some),
            Some(id) => match self.breakpoints.status(id) {
                Some(BreakpointStatus::Disabled) | None => {
                    self.breakpoints.remove(id);
                    Ok(None)
                }
                Some(BreakpointStatus::Enabled) => {
                    self.breakpoints.set_enabled(id, false);
                    Ok(Some(id))
                }
            },
        }
    }

    /// "Run to here": a transient breakpoint at `logical`, then resume.
    ///
    /// Cancel it before it fires with [BreakpointDatabase::remove].
    pub fn run_to_address(&mut self, logical: u16) -> DResult<BreakpointId> {
        let absolute = self.translator.to_absolute(logical)?;
        let id = self
            .breakpoints
            .add(BreakpointSpec::execution(logical, absolute), true)?;
        log::info!("running to ${:04X} (${:06X})", logical, absolute);
        self.resume();
        Ok(id)
    }

    pub fn run_to_line(&mut self, sloc: usize) -> DResult<BreakpointId> {
        let logical = self.translator.address_from_source_line(sloc)?;
        self.run_to_address(logical)
    }

    pub fn start_marker_at_line(&mut self, sloc: usize) -> DResult<MarkerId> {
        let (logical, absolute) = self.translator.resolve_line(sloc)?;
        self.markers.add(logical, absolute)
    }

    pub fn end_marker_at_line(&mut self, sloc: usize) -> DResult<MarkerId> {
        let open = self
            .markers
            .find_in_progress()
            .ok_or(DbgError::NoMarkerInProgress)?;
        let (logical, absolute) = self.translator.resolve_line(sloc)?;
        self.markers.complete(open, logical, absolute)?;
        Ok(open)
    }

    pub fn start_marker_at(&mut self, logical: u16) -> DResult<MarkerId> {
        let absolute = self.translator.to_absolute(logical)?;
        self.markers.add(logical, absolute)
    }

    pub fn end_marker_at(&mut self, logical: u16) -> DResult<MarkerId> {
        let open = self
            .markers
            .find_in_progress()
            .ok_or(DbgError::NoMarkerInProgress)?;
        let absolute = self.translator.to_absolute(logical)?;
        self.markers.complete(open, logical, absolute)?;
        Ok(open)
    }

    pub fn clear_markers(&mut self) {
        self.markers.clear();
    }

    /// A cartridge was (re)loaded, optionally with fresh debug info.
    pub fn cartridge_loaded(&mut self, symbols: Option<Rc<dyn SymbolTable>>) {
        if let Some(symbols) = symbols {
            self.translator.set_symbols(symbols);
        }
        self.last = None;
        log::info!("cartridge loaded");
        self.bus.publish(&DebugEvent::CartridgeLoaded);
    }

    /// Full debugger reset: forgets every breakpoint and marker.
    pub fn cartridge_unloaded(&mut self) {
        self.breakpoints.clear();
        self.markers.clear();
        self.state = RunState::Running;
        self.last = None;
        log::info!("cartridge unloaded, debugger reset");
    }

    /// Emulator soft reset. Breakpoints and markers survive it.
    pub fn emulator_reset(&mut self) {
        self.last = None;
        log::info!("emulator reset");
        self.bus.publish(&DebugEvent::EmulatorReset);
    }
}
