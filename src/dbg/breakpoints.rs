//! The breakpoint table and the per-step hit test.
//!
//! Breakpoints live in insertion order behind stable [BreakpointId] handles. The table is bounded;
//! enabled CPU-execution breakpoints are additionally indexed by address once there are enough
//! of them for a scan to cost more than a hash lookup.

use std::{fmt, rc::Rc};

use rustc_hash::FxHashMap;

use crate::plat::{Access, RegisterFile, Target, PPU_OAMADDR_INDEX, PPU_OAMDATA_INDEX};

use super::{
    notify::{DebugEvent, NotificationBus},
    registers::RegisterInspector,
    DResult, DbgError,
};

/// Stable handle to a breakpoint. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an address breakpoint decides that an access hit its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressScope {
    /// Match the absolute address: follows the code through bank switches.
    Pinned,
    /// Match the logical address: whatever currently occupies that CPU address.
    Floating,
}

/// What a breakpoint watches. Each variant carries only the fields it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    CpuExecution {
        logical: u16,
        absolute: u32,
        scope: AddressScope,
    },
    /// A register of `target` (CPU, PPU, APU or mapper), optionally narrowed to one bitfield.
    State {
        target: Target,
        register: u8,
        bitfield: Option<u8>,
    },
    /// Accesses through the OAM data portal, optionally only while `OAMADDR == oam_addr`.
    OamPortal { access: Access, oam_addr: Option<u8> },
    Memory {
        target: Target,
        access: Access,
        logical: u16,
        absolute: u32,
        scope: AddressScope,
    },
}

impl BreakpointKind {
    pub fn target(&self) -> Target {
        match self {
            Self::CpuExecution { .. } => Target::Cpu,
            Self::State { target, .. } | Self::Memory { target, .. } => *target,
            Self::OamPortal { .. } => Target::Ppu,
        }
    }

    pub fn logical(&self) -> Option<u16> {
        match self {
            Self::CpuExecution { logical, .. } | Self::Memory { logical, .. } => Some(*logical),
            _ => None,
        }
    }

    pub fn absolute(&self) -> Option<u32> {
        match self {
            Self::CpuExecution { absolute, .. } | Self::Memory { absolute, .. } => Some(*absolute),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CpuExecution { .. } => "CPU execution",
            Self::State { target, .. } => match target {
                Target::Cpu => "CPU state",
                Target::Ppu => "PPU state",
                Target::Apu => "APU state",
                Target::Mapper => "mapper state",
            },
            Self::OamPortal { access, .. } => match access {
                Access::Read => "OAM portal read",
                Access::Write => "OAM portal write",
                Access::Any => "OAM portal access",
            },
            Self::Memory { access, .. } => match access {
                Access::Read => "memory read",
                Access::Write => "memory write",
                Access::Any => "memory access",
            },
        }
    }
}

impl fmt::Display for BreakpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CpuExecution {
                logical, absolute, ..
            }
            | Self::Memory {
                logical, absolute, ..
            } => write!(
                f,
                "{} ({}) @ ${:04X} (${:06X})",
                self.name(),
                self.target(),
                logical,
                absolute
            ),
            Self::State {
                register, bitfield, ..
            } => {
                write!(f, "{} register {}", self.name(), register)?;
                if let Some(bitfield) = bitfield {
                    write!(f, " bitfield {}", bitfield)?;
                }
                Ok(())
            }
            Self::OamPortal { oam_addr, .. } => {
                write!(f, "{}", self.name())?;
                if let Some(addr) = oam_addr {
                    write!(f, " @ OAM ${:02X}", addr)?;
                }
                Ok(())
            }
        }
    }
}

/// A comparison applied to an observed value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Condition {
    /// No comparison: the breakpoint fires whenever its kind matches.
    #[default]
    Always,
    Equal(u16),
    NotEqual(u16),
    LessThan(u16),
    LessOrEqual(u16),
    GreaterThan(u16),
    GreaterOrEqual(u16),
    BitSet(u8),
    BitClear(u8),
}

impl Condition {
    #[inline]
    pub fn test(self, value: u16) -> bool {
        match self {
            Self::Always => true,
            Self::Equal(v) => value == v,
            Self::NotEqual(v) => value != v,
            Self::LessThan(v) => value < v,
            Self::LessOrEqual(v) => value <= v,
            Self::GreaterThan(v) => value > v,
            Self::GreaterOrEqual(v) => value >= v,
            Self::BitSet(bit) => bit < 16 && value & (1 << bit) != 0,
            Self::BitClear(bit) => bit < 16 && value & (1 << bit) == 0,
        }
    }

    /// A data predicate against a byte the access may not have carried.
    #[inline]
    fn test_data(self, data: Option<u8>) -> bool {
        match (self, data) {
            (Self::Always, _) => true,
            (cond, Some(byte)) => cond.test(byte as u16),
            (_, None) => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("always"),
            Self::Equal(v) => write!(f, "== ${:02X}", v),
            Self::NotEqual(v) => write!(f, "!= ${:02X}", v),
            Self::LessThan(v) => write!(f, "< ${:02X}", v),
            Self::LessOrEqual(v) => write!(f, "<= ${:02X}", v),
            Self::GreaterThan(v) => write!(f, "> ${:02X}", v),
            Self::GreaterOrEqual(v) => write!(f, ">= ${:02X}", v),
            Self::BitSet(b) => write!(f, "bit {} set", b),
            Self::BitClear(b) => write!(f, "bit {} clear", b),
        }
    }
}

/// Everything that identifies a breakpoint for exact matching.
///
/// `condition` compares the watched item's value: the executed address for CPU execution,
/// the register (or bitfield) value for state breakpoints, the data byte for memory and OAM
/// portal accesses. `data_condition` compares the accessed data byte and never matches an
/// event that carried none. Both must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointSpec {
    pub kind: BreakpointKind,
    pub condition: Condition,
    pub data_condition: Condition,
}

impl BreakpointSpec {
    pub fn new(kind: BreakpointKind) -> Self {
        Self {
            kind,
            condition: Condition::Always,
            data_condition: Condition::Always,
        }
    }

    /// Breaks when the instruction at this address executes, whichever window it is mapped in.
    pub fn execution(logical: u16, absolute: u32) -> Self {
        Self::new(BreakpointKind::CpuExecution {
            logical,
            absolute,
            scope: AddressScope::Pinned,
        })
    }

    pub fn memory(target: Target, access: Access, logical: u16, absolute: u32) -> Self {
        Self::new(BreakpointKind::Memory {
            target,
            access,
            logical,
            absolute,
            scope: AddressScope::Pinned,
        })
    }

    pub fn state(target: Target, register: u8, bitfield: Option<u8>) -> Self {
        Self::new(BreakpointKind::State {
            target,
            register,
            bitfield,
        })
    }

    pub fn oam_portal(access: Access, oam_addr: Option<u8>) -> Self {
        Self::new(BreakpointKind::OamPortal { access, oam_addr })
    }

    /// Match by logical address instead of following the code through bank switches.
    pub fn floating(mut self) -> Self {
        match &mut self.kind {
            BreakpointKind::CpuExecution { scope, .. } | BreakpointKind::Memory { scope, .. } => {
                *scope = AddressScope::Floating
            }
            _ => {}
        }
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn when_data(mut self, condition: Condition) -> Self {
        self.data_condition = condition;
        self
    }
}

/// A breakpoint record as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    id: BreakpointId,
    spec: BreakpointSpec,
    enabled: bool,
    hit: bool,
    transient: bool,
    hit_count: u64,
}

impl Breakpoint {
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn spec(&self) -> &BreakpointSpec {
        &self.spec
    }

    pub fn kind(&self) -> &BreakpointKind {
        &self.spec.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the breakpoint fired and has not been acknowledged. Never true while disabled.
    pub fn is_hit(&self) -> bool {
        self.hit && self.enabled
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}{}{}] {}",
            self.id,
            if self.enabled { 'E' } else { 'D' },
            if self.is_hit() { 'H' } else { '-' },
            if self.transient { 'T' } else { '-' },
            self.spec.kind
        )?;
        if self.spec.condition != Condition::Always {
            write!(f, " if {}", self.spec.condition)?;
        }
        if self.spec.data_condition != Condition::Always {
            write!(f, " data {}", self.spec.data_condition)?;
        }
        write!(f, " hits={}", self.hit_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointStatus {
    Enabled,
    Disabled,
}

/// Something the emulation side just did, as seen by the hit test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// An instruction at `logical` (resolving to `absolute`) retired.
    Retired { logical: u16, absolute: u32 },
    /// `target` accessed `logical`. `absolute` is absent when nothing is mapped there.
    Access {
        target: Target,
        logical: u16,
        absolute: Option<u32>,
        value: u8,
        is_write: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ExecKey {
    Absolute(u32),
    Logical(u16),
}

impl ExecKey {
    fn of(kind: &BreakpointKind) -> Option<Self> {
        match *kind {
            BreakpointKind::CpuExecution {
                logical,
                absolute,
                scope,
            } => Some(match scope {
                AddressScope::Pinned => Self::Absolute(absolute),
                AddressScope::Floating => Self::Logical(logical),
            }),
            _ => None,
        }
    }
}

#[inline]
fn address_matches(
    scope: AddressScope,
    bp_logical: u16,
    bp_absolute: u32,
    logical: u16,
    absolute: Option<u32>,
) -> bool {
    match scope {
        AddressScope::Pinned => absolute == Some(bp_absolute),
        AddressScope::Floating => logical == bp_logical,
    }
}

/// Default number of CPU-execution breakpoints below which the hit test scans instead of
/// consulting the address index.
pub const DEFAULT_INDEX_THRESHOLD: usize = 8;

/// The bounded breakpoint table.
#[derive(Debug)]
pub struct BreakpointDatabase {
    records: Vec<Breakpoint>,
    capacity: usize,
    next_id: u32,
    bus: Rc<NotificationBus>,
    index_threshold: usize,
    /// positions of enabled execution breakpoints, rebuilt on every mutation
    exec_index: FxHashMap<ExecKey, Vec<usize>>,
    enabled_exec: usize,
    enabled_cpu_state: usize,
    enabled_access: usize,
}

impl BreakpointDatabase {
    pub fn new(capacity: usize, bus: Rc<NotificationBus>) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            next_id: 0,
            bus,
            index_threshold: DEFAULT_INDEX_THRESHOLD,
            exec_index: FxHashMap::default(),
            enabled_exec: 0,
            enabled_cpu_state: 0,
            enabled_access: 0,
        }
    }

    pub fn set_index_threshold(&mut self, threshold: usize) {
        self.index_threshold = threshold;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Breakpoints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.records.iter()
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.records.iter().find(|bp| bp.id == id)
    }

    fn position(&self, id: BreakpointId) -> Option<usize> {
        self.records.iter().position(|bp| bp.id == id)
    }

    pub fn find_exact_match(&self, spec: &BreakpointSpec) -> Option<BreakpointId> {
        self.records
            .iter()
            .find(|bp| bp.spec == *spec)
            .map(|bp| bp.id)
    }

    pub fn status(&self, id: BreakpointId) -> Option<BreakpointStatus> {
        self.get(id).map(|bp| {
            if bp.enabled {
                BreakpointStatus::Enabled
            } else {
                BreakpointStatus::Disabled
            }
        })
    }

    /// Adds a breakpoint, or returns the handle of an identical one already in the table.
    ///
    /// Adding a persistent breakpoint identical to a pending transient one makes the existing
    /// breakpoint persistent.
    ///
    /// # Errors
    ///
    /// Returns [DbgError::CapacityExceeded] if the table is full; nothing is added.
    pub fn add(&mut self, spec: BreakpointSpec, transient: bool) -> DResult<BreakpointId> {
        if let Some(existing) = self.find_exact_match(&spec) {
            if !transient {
                if let Some(pos) = self.position(existing) {
                    if self.records[pos].transient {
                        self.records[pos].transient = false;
                        self.changed();
                    }
                }
            }
            log::debug!("breakpoint {} already covers {}", existing, spec.kind);
            return Ok(existing);
        }
        if self.records.len() >= self.capacity {
            log::warn!(
                "cannot add breakpoint, maximum of {} already used",
                self.capacity
            );
            return Err(DbgError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let id = BreakpointId(self.next_id);
        self.next_id += 1;
        self.records.push(Breakpoint {
            id,
            spec,
            enabled: true,
            hit: false,
            transient,
            hit_count: 0,
        });
        log::debug!("added breakpoint {}: {}", id, spec.kind);
        self.changed();
        Ok(id)
    }

    /// Removes a breakpoint. Unknown handles are ignored.
    pub fn remove(&mut self, id: BreakpointId) {
        if let Some(pos) = self.position(id) {
            self.records.remove(pos);
            log::debug!("removed breakpoint {}", id);
            self.changed();
        }
    }

    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) {
        if let Some(pos) = self.position(id) {
            if self.records[pos].enabled != enabled {
                self.records[pos].enabled = enabled;
                self.changed();
            }
        }
    }

    pub fn toggle_enabled(&mut self, id: BreakpointId) {
        if let Some(enabled) = self.get(id).map(|bp| bp.enabled) {
            self.set_enabled(id, !enabled);
        }
    }

    /// Clears the sticky hit flag of one breakpoint.
    pub fn acknowledge(&mut self, id: BreakpointId) {
        if let Some(pos) = self.position(id) {
            if self.records[pos].hit {
                self.records[pos].hit = false;
                self.changed();
            }
        }
    }

    pub fn clear_hits(&mut self) {
        let mut any = false;
        for bp in self.records.iter_mut() {
            any |= bp.hit;
            bp.hit = false;
        }
        if any {
            self.changed();
        }
    }

    /// Empties the table.
    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.records.clear();
            log::debug!("breakpoint table cleared");
            self.changed();
        }
    }

    fn changed(&mut self) {
        self.rebuild_index();
        self.bus.publish(&DebugEvent::BreakpointsChanged);
    }

    fn rebuild_index(&mut self) {
        self.exec_index.clear();
        self.enabled_exec = 0;
        self.enabled_cpu_state = 0;
        self.enabled_access = 0;
        for (pos, bp) in self.records.iter().enumerate() {
            if !bp.enabled {
                continue;
            }
            match bp.spec.kind {
                BreakpointKind::CpuExecution { .. } => {
                    self.enabled_exec += 1;
                    if let Some(key) = ExecKey::of(&bp.spec.kind) {
                        self.exec_index.entry(key).or_default().push(pos);
                    }
                }
                BreakpointKind::State {
                    target: Target::Cpu,
                    ..
                } => self.enabled_cpu_state += 1,
                _ => self.enabled_access += 1,
            }
        }
    }

    /// Tests every enabled breakpoint that watches `event`, in insertion order.
    ///
    /// Each match sets its hit flag and is published as [DebugEvent::BreakpointHit] before this
    /// returns; transient matches are then removed. All matches are reported, not just the first.
    pub fn evaluate(&mut self, event: &StepEvent, regs: &RegisterInspector) -> Vec<BreakpointId> {
        let mut matched: Vec<usize> = Vec::new();
        match *event {
            StepEvent::Retired { logical, absolute } => {
                if self.enabled_exec == 0 && self.enabled_cpu_state == 0 {
                    return Vec::new();
                }
                self.match_execution(logical, absolute, &mut matched);
                if self.enabled_cpu_state > 0 {
                    self.match_cpu_state(regs, &mut matched);
                }
            }
            StepEvent::Access {
                target,
                logical,
                absolute,
                value,
                is_write,
            } => {
                if self.enabled_access == 0 {
                    return Vec::new();
                }
                self.match_access(target, logical, absolute, value, is_write, regs, &mut matched);
            }
        }
        if matched.is_empty() {
            return Vec::new();
        }
        matched.sort_unstable();
        matched.dedup();
        self.fire(matched)
    }

    fn match_execution(&self, logical: u16, absolute: u32, matched: &mut Vec<usize>) {
        if self.enabled_exec == 0 {
            return;
        }
        let value = logical;
        if self.enabled_exec > self.index_threshold {
            for key in [ExecKey::Absolute(absolute), ExecKey::Logical(logical)] {
                if let Some(positions) = self.exec_index.get(&key) {
                    for &pos in positions {
                        let spec = &self.records[pos].spec;
                        if spec.condition.test(value) && spec.data_condition.test_data(None) {
                            matched.push(pos);
                        }
                    }
                }
            }
            return;
        }
        for (pos, bp) in self.records.iter().enumerate() {
            if !bp.enabled {
                continue;
            }
            if let BreakpointKind::CpuExecution {
                logical: bp_logical,
                absolute: bp_absolute,
                scope,
            } = bp.spec.kind
            {
                if address_matches(scope, bp_logical, bp_absolute, logical, Some(absolute))
                    && bp.spec.condition.test(value)
                    && bp.spec.data_condition.test_data(None)
                {
                    matched.push(pos);
                }
            }
        }
    }

    fn match_cpu_state(&self, regs: &RegisterInspector, matched: &mut Vec<usize>) {
        for (pos, bp) in self.records.iter().enumerate() {
            if !bp.enabled {
                continue;
            }
            if let BreakpointKind::State {
                target: Target::Cpu,
                register,
                bitfield,
            } = bp.spec.kind
            {
                let value = match bitfield {
                    Some(field) => regs.bitfield_value(RegisterFile::Cpu, register as usize, field as usize),
                    None => regs.value(RegisterFile::Cpu, register as usize),
                };
                if let Some(value) = value {
                    if bp.spec.condition.test(value) && bp.spec.data_condition.test_data(None) {
                        matched.push(pos);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn match_access(
        &self,
        target: Target,
        logical: u16,
        absolute: Option<u32>,
        value: u8,
        is_write: bool,
        regs: &RegisterInspector,
        matched: &mut Vec<usize>,
    ) {
        let data = Some(value);
        let file = RegisterFile::of_target(target);
        // resolved lazily: most accesses never reach a state breakpoint
        let mut register: Option<Option<usize>> = None;
        for (pos, bp) in self.records.iter().enumerate() {
            if !bp.enabled {
                continue;
            }
            let spec = &bp.spec;
            let item = match spec.kind {
                BreakpointKind::CpuExecution { .. } => continue,
                BreakpointKind::State {
                    target: bp_target,
                    register: bp_register,
                    bitfield,
                } => {
                    if bp_target != target || target == Target::Cpu {
                        continue;
                    }
                    let index = *register.get_or_insert_with(|| regs.index_for_address(file, logical));
                    if index != Some(bp_register as usize) {
                        continue;
                    }
                    match bitfield {
                        Some(field) => match regs.bitfields(file, bp_register as usize).get(field as usize) {
                            Some(field) => field.extract(value as u16),
                            None => continue,
                        },
                        None => value as u16,
                    }
                }
                BreakpointKind::OamPortal { access, oam_addr } => {
                    if target != Target::Ppu
                        || !access.admits(is_write)
                        || regs.index_for_address(RegisterFile::Ppu, logical) != Some(PPU_OAMDATA_INDEX)
                    {
                        continue;
                    }
                    if let Some(oam_addr) = oam_addr {
                        if regs.value(RegisterFile::Ppu, PPU_OAMADDR_INDEX) != Some(oam_addr as u16) {
                            continue;
                        }
                    }
                    value as u16
                }
                BreakpointKind::Memory {
                    target: bp_target,
                    access,
                    logical: bp_logical,
                    absolute: bp_absolute,
                    scope,
                } => {
                    if bp_target != target
                        || !access.admits(is_write)
                        || !address_matches(scope, bp_logical, bp_absolute, logical, absolute)
                    {
                        continue;
                    }
                    value as u16
                }
            };
            if spec.condition.test(item) && spec.data_condition.test_data(data) {
                matched.push(pos);
            }
        }
    }

    fn fire(&mut self, matched: Vec<usize>) -> Vec<BreakpointId> {
        let mut ids = Vec::with_capacity(matched.len());
        let mut spent = Vec::new();
        for pos in matched {
            let bp = &mut self.records[pos];
            bp.hit = true;
            bp.hit_count += 1;
            ids.push(bp.id);
            if bp.transient {
                spent.push(bp.id);
            }
            log::info!("breakpoint {} hit: {}", bp.id, bp.spec.kind);
            let snapshot = bp.clone();
            self.bus.publish(&DebugEvent::BreakpointHit(snapshot));
        }
        if !spent.is_empty() {
            self.records.retain(|bp| !spent.contains(&bp.id));
            log::debug!("removed {} spent transient breakpoint(s)", spent.len());
            self.changed();
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{
        dbg::notify::tests::{event_log, Recorder},
        dbg::registers::MachineState,
    };

    #[derive(Default)]
    struct Regs {
        values: RefCell<FxHashMap<(u8, usize), u16>>,
    }

    impl Regs {
        fn set(&self, file: RegisterFile, index: usize, value: u16) {
            self.values.borrow_mut().insert((file as u8, index), value);
        }
    }

    impl MachineState for Regs {
        fn register_value(&self, file: RegisterFile, index: usize) -> Option<u16> {
            self.values.borrow().get(&(file as u8, index)).copied()
        }
    }

    fn setup(capacity: usize) -> (Rc<NotificationBus>, BreakpointDatabase, Rc<Regs>, RegisterInspector) {
        let bus = Rc::new(NotificationBus::new());
        let db = BreakpointDatabase::new(capacity, bus.clone());
        let regs = Rc::new(Regs::default());
        let inspector = RegisterInspector::new(regs.clone());
        (bus, db, regs, inspector)
    }

    fn retired(logical: u16, absolute: u32) -> StepEvent {
        StepEvent::Retired { logical, absolute }
    }

    fn write(target: Target, logical: u16, value: u8) -> StepEvent {
        StepEvent::Access {
            target,
            logical,
            absolute: Some(logical as u32),
            value,
            is_write: true,
        }
    }

    #[test]
    fn test_add_then_find_returns_same_handle() {
        let (_, mut db, _, _) = setup(4);
        let spec = BreakpointSpec::execution(0x8000, 0x018000);
        let id = db.add(spec, false).unwrap();
        assert_eq!(db.find_exact_match(&spec), Some(id));
        assert_eq!(db.add(spec, false).unwrap(), id);
        assert_eq!(db.len(), 1);
        assert_eq!(
            db.find_exact_match(&spec.when(Condition::Equal(0x8000))),
            None
        );
    }

    #[test]
    fn test_capacity_exceeded() {
        let (_, mut db, _, _) = setup(4);
        for i in 0..4u16 {
            db.add(BreakpointSpec::execution(0x8000 + i, 0x018000 + i as u32), false)
                .unwrap();
        }
        let err = db
            .add(BreakpointSpec::execution(0x9000, 0x019000), false)
            .unwrap_err();
        assert_eq!(err, DbgError::CapacityExceeded { capacity: 4 });
        assert_eq!(db.len(), 4);
        // duplicates are still answered when full
        assert!(db.add(BreakpointSpec::execution(0x8001, 0x018001), false).is_ok());
    }

    #[test]
    fn test_execution_hit() {
        let (bus, mut db, _, regs) = setup(4);
        let log = event_log();
        let id = db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        Recorder::attach(&bus, "view", &log);

        assert!(db.evaluate(&retired(0x8002, 0x018002), &regs).is_empty());
        assert_eq!(db.evaluate(&retired(0x8000, 0x018000), &regs), vec![id]);
        assert!(db.get(id).unwrap().is_hit());
        assert_eq!(db.get(id).unwrap().hit_count(), 1);

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        match &log[0].1 {
            DebugEvent::BreakpointHit(bp) => assert_eq!(bp.id(), id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_pinned_and_floating_across_bank_switch() {
        let (_, mut db, _, regs) = setup(4);
        let pinned = db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        let floating = db
            .add(BreakpointSpec::execution(0x8000, 0x018000).floating(), false)
            .unwrap();
        // bank 12 moved to $C000, something else now sits at $8000
        assert_eq!(db.evaluate(&retired(0xC000, 0x018000), &regs), vec![pinned]);
        assert_eq!(db.evaluate(&retired(0x8000, 0x004000), &regs), vec![floating]);
        assert_eq!(
            db.evaluate(&retired(0x8000, 0x018000), &regs),
            vec![pinned, floating]
        );
    }

    #[test]
    fn test_index_agrees_with_scan() {
        let (_, mut db, _, regs) = setup(32);
        db.set_index_threshold(2);
        let mut ids = vec![];
        for i in 0..6u16 {
            ids.push(
                db.add(BreakpointSpec::execution(0x8000 + i * 2, 0x018000 + (i * 2) as u32), false)
                    .unwrap(),
            );
        }
        let floating = db
            .add(BreakpointSpec::execution(0x8004, 0).floating(), false)
            .unwrap();
        assert_eq!(
            db.evaluate(&retired(0x8004, 0x018004), &regs),
            vec![ids[2], floating]
        );
        db.set_enabled(ids[2], false);
        assert_eq!(db.evaluate(&retired(0x8004, 0x018004), &regs), vec![floating]);
    }

    #[test]
    fn test_transient_removed_after_first_hit() {
        let (bus, mut db, _, regs) = setup(4);
        let log = event_log();
        Recorder::attach(&bus, "view", &log);
        let id = db.add(BreakpointSpec::execution(0x8010, 0x018010), true).unwrap();

        assert_eq!(db.evaluate(&retired(0x8010, 0x018010), &regs), vec![id]);
        assert!(db.get(id).is_none());
        assert!(db.evaluate(&retired(0x8010, 0x018010), &regs).is_empty());

        let hits = log
            .borrow()
            .iter()
            .filter(|(_, e)| matches!(e, DebugEvent::BreakpointHit(_)))
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_persistent_add_promotes_transient() {
        let (_, mut db, _, regs) = setup(4);
        let spec = BreakpointSpec::execution(0x8010, 0x018010);
        let id = db.add(spec, true).unwrap();
        assert_eq!(db.add(spec, false).unwrap(), id);
        assert!(!db.get(id).unwrap().is_transient());
        db.evaluate(&retired(0x8010, 0x018010), &regs);
        assert!(db.get(id).is_some());
    }

    #[test]
    fn test_toggle_does_not_change_hit() {
        let (_, mut db, _, regs) = setup(4);
        let id = db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        db.evaluate(&retired(0x8000, 0x018000), &regs);
        db.toggle_enabled(id);
        assert_eq!(db.status(id), Some(BreakpointStatus::Disabled));
        assert!(!db.get(id).unwrap().is_hit());
        db.toggle_enabled(id);
        assert_eq!(db.status(id), Some(BreakpointStatus::Enabled));
        assert!(db.get(id).unwrap().is_hit());
        db.acknowledge(id);
        assert!(!db.get(id).unwrap().is_hit());
    }

    #[test]
    fn test_disabled_breakpoints_do_not_fire() {
        let (_, mut db, _, regs) = setup(4);
        let id = db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        db.set_enabled(id, false);
        assert!(db.evaluate(&retired(0x8000, 0x018000), &regs).is_empty());
        assert!(!db.get(id).unwrap().is_hit());
    }

    #[test]
    fn test_invalid_handles_are_ignored() {
        let (_, mut db, _, _) = setup(4);
        let a = db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        let b = db.add(BreakpointSpec::execution(0x8001, 0x018001), false).unwrap();
        db.remove(a);
        db.remove(a);
        db.toggle_enabled(a);
        db.set_enabled(a, true);
        assert_eq!(db.status(a), None);
        assert_eq!(db.status(b), Some(BreakpointStatus::Enabled));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_memory_write_with_data_condition() {
        let (_, mut db, _, regs) = setup(4);
        let id = db
            .add(
                BreakpointSpec::memory(Target::Cpu, Access::Write, 0x0300, 0x0300)
                    .when_data(Condition::GreaterThan(0x7F)),
                false,
            )
            .unwrap();
        assert!(db.evaluate(&write(Target::Cpu, 0x0300, 0x10), &regs).is_empty());
        assert_eq!(db.evaluate(&write(Target::Cpu, 0x0300, 0x80), &regs), vec![id]);
        let read = StepEvent::Access {
            target: Target::Cpu,
            logical: 0x0300,
            absolute: Some(0x0300),
            value: 0x80,
            is_write: false,
        };
        assert!(db.evaluate(&read, &regs).is_empty());
    }

    #[test]
    fn test_ppu_state_bitfield() {
        let (_, mut db, _, regs) = setup(4);
        // PPUCTRL NMI enable turned on
        let id = db
            .add(
                BreakpointSpec::state(Target::Ppu, 0, Some(6)).when(Condition::Equal(1)),
                false,
            )
            .unwrap();
        assert!(db.evaluate(&write(Target::Ppu, 0x2000, 0x00), &regs).is_empty());
        assert!(db.evaluate(&write(Target::Ppu, 0x2001, 0x80), &regs).is_empty());
        // mirrored at $2008
        assert_eq!(db.evaluate(&write(Target::Ppu, 0x2008, 0x80), &regs), vec![id]);
    }

    #[test]
    fn test_cpu_state_on_retire() {
        let (_, mut db, state, regs) = setup(4);
        let id = db
            .add(
                BreakpointSpec::state(Target::Cpu, 1, None).when(Condition::Equal(0x10)),
                false,
            )
            .unwrap();
        state.set(RegisterFile::Cpu, 1, 0x0F);
        assert!(db.evaluate(&retired(0x8000, 0x018000), &regs).is_empty());
        state.set(RegisterFile::Cpu, 1, 0x10);
        assert_eq!(db.evaluate(&retired(0x8001, 0x018001), &regs), vec![id]);
    }

    #[test]
    fn test_oam_portal_with_oam_address() {
        let (_, mut db, state, regs) = setup(4);
        let id = db
            .add(BreakpointSpec::oam_portal(Access::Write, Some(0x04)), false)
            .unwrap();
        state.set(RegisterFile::Ppu, PPU_OAMADDR_INDEX, 0x03);
        assert!(db.evaluate(&write(Target::Ppu, 0x2004, 0x55), &regs).is_empty());
        state.set(RegisterFile::Ppu, PPU_OAMADDR_INDEX, 0x04);
        assert_eq!(db.evaluate(&write(Target::Ppu, 0x2004, 0x55), &regs), vec![id]);
        // a plain CPU memory access at the same address is not a portal access
        assert!(db.evaluate(&write(Target::Cpu, 0x2004, 0x55), &regs).is_empty());
    }

    #[test]
    fn test_all_matches_reported_in_insertion_order() {
        let (_, mut db, _, regs) = setup(8);
        let any = db
            .add(BreakpointSpec::memory(Target::Cpu, Access::Any, 0x0010, 0x0010), false)
            .unwrap();
        let exec = db.add(BreakpointSpec::execution(0x0010, 0x0010), false).unwrap();
        let write_only = db
            .add(BreakpointSpec::memory(Target::Cpu, Access::Write, 0x0010, 0x0010), false)
            .unwrap();
        let matched = db.evaluate(&write(Target::Cpu, 0x0010, 1), &regs);
        assert_eq!(matched, vec![any, write_only]);
        assert!(!db.get(exec).unwrap().is_hit());
    }

    #[test]
    fn test_mutations_publish_changes() {
        let (bus, mut db, _, _) = setup(4);
        let log = event_log();
        Recorder::attach(&bus, "view", &log);
        let id = db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        db.add(BreakpointSpec::execution(0x8000, 0x018000), false).unwrap();
        db.toggle_enabled(id);
        db.remove(id);
        db.remove(id);
        assert_eq!(log.borrow().len(), 3);
        assert!(log
            .borrow()
            .iter()
            .all(|(_, e)| *e == DebugEvent::BreakpointsChanged));
    }
}
