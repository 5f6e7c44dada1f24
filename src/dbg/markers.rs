//! Execution markers: address spans bracketed by a start and an end, used to tag and measure
//! stretches of execution. At most one marker is open (in progress) at any time.

use std::{fmt, rc::Rc};

use super::{
    notify::{DebugEvent, NotificationBus},
    DResult, DbgError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u32);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    InProgress,
    Completed,
}

/// Colours handed out to markers in creation order, for execution visualisers.
pub const MARKER_PALETTE: [(u8, u8, u8); 8] = [
    (0xE0, 0x40, 0x40),
    (0x40, 0xC0, 0x40),
    (0x40, 0x70, 0xE0),
    (0xE0, 0xD0, 0x40),
    (0x40, 0xD0, 0xD0),
    (0xD0, 0x40, 0xD0),
    (0xF0, 0x90, 0x30),
    (0x90, 0x50, 0xD0),
];

/// CPU cycles spent between a marker's start and end, over every completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanStats {
    pub count: u64,
    pub last: u64,
    pub min: u64,
    pub max: u64,
    pub total: u64,
}

impl SpanStats {
    fn record(&mut self, cycles: u64) {
        self.min = if self.count == 0 {
            cycles
        } else {
            self.min.min(cycles)
        };
        self.max = self.max.max(cycles);
        self.last = cycles;
        self.total += cycles;
        self.count += 1;
    }

    pub fn average(&self) -> Option<u64> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    id: MarkerId,
    start_logical: u16,
    start_absolute: u32,
    end: Option<(u16, u32)>,
    state: MarkerState,
    color: (u8, u8, u8),
    open_since: Option<u64>,
    stats: SpanStats,
}

impl Marker {
    pub fn id(&self) -> MarkerId {
        self.id
    }

    pub fn start_logical(&self) -> u16 {
        self.start_logical
    }

    pub fn start_absolute(&self) -> u32 {
        self.start_absolute
    }

    pub fn end_logical(&self) -> Option<u16> {
        self.end.map(|(logical, _)| logical)
    }

    pub fn end_absolute(&self) -> Option<u32> {
        self.end.map(|(_, absolute)| absolute)
    }

    pub fn state(&self) -> MarkerState {
        self.state
    }

    pub fn color(&self) -> (u8, u8, u8) {
        self.color
    }

    pub fn stats(&self) -> &SpanStats {
        &self.stats
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ${:04X} (${:06X})",
            self.id, self.start_logical, self.start_absolute
        )?;
        match self.end {
            Some((logical, absolute)) => write!(f, " .. ${:04X} (${:06X})", logical, absolute)?,
            None => f.write_str(" .. (in progress)")?,
        }
        if let Some(avg) = self.stats.average() {
            write!(
                f,
                " passes={} last={} min={} max={} avg={}",
                self.stats.count, self.stats.last, self.stats.min, self.stats.max, avg
            )?;
        }
        Ok(())
    }
}

pub const DEFAULT_MARKER_CAPACITY: usize = 16;

/// Owns every marker. Views only read through the accessors.
#[derive(Debug)]
pub struct MarkerDatabase {
    markers: Vec<Marker>,
    capacity: usize,
    next_id: u32,
    bus: Rc<NotificationBus>,
}

impl MarkerDatabase {
    pub fn new(capacity: usize, bus: Rc<NotificationBus>) -> Self {
        Self {
            markers: Vec::new(),
            capacity,
            next_id: 0,
            bus,
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.iter()
    }

    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn find_in_progress(&self) -> Option<MarkerId> {
        self.markers
            .iter()
            .find(|m| m.state == MarkerState::InProgress)
            .map(|m| m.id)
    }

    /// Opens a new marker at the given start address.
    ///
    /// # Errors
    ///
    /// [DbgError::MarkerAlreadyInProgress] while another marker is open,
    /// [DbgError::CapacityExceeded] when the table is full.
    pub fn add(&mut self, logical: u16, absolute: u32) -> DResult<MarkerId> {
        if let Some(open) = self.find_in_progress() {
            log::warn!("marker {} is still in progress", open);
            return Err(DbgError::MarkerAlreadyInProgress(open));
        }
        if self.markers.len() >= self.capacity {
            log::warn!("cannot add marker, maximum of {} already used", self.capacity);
            return Err(DbgError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        self.markers.push(Marker {
            id,
            start_logical: logical,
            start_absolute: absolute,
            end: None,
            state: MarkerState::InProgress,
            color: MARKER_PALETTE[id.0 as usize % MARKER_PALETTE.len()],
            open_since: None,
            stats: SpanStats::default(),
        });
        log::debug!("marker {} started at ${:04X} (${:06X})", id, logical, absolute);
        self.bus.publish(&DebugEvent::BreakpointsChanged);
        Ok(id)
    }

    /// Closes the in-progress marker `id`.
    ///
    /// # Errors
    ///
    /// [DbgError::MarkerNotFound] if `id` does not name the in-progress marker.
    pub fn complete(&mut self, id: MarkerId, end_logical: u16, end_absolute: u32) -> DResult<()> {
        let marker = self
            .markers
            .iter_mut()
            .find(|m| m.id == id && m.state == MarkerState::InProgress)
            .ok_or(DbgError::MarkerNotFound(id))?;
        marker.end = Some((end_logical, end_absolute));
        marker.state = MarkerState::Completed;
        log::debug!(
            "marker {} completed at ${:04X} (${:06X})",
            id,
            end_logical,
            end_absolute
        );
        self.bus.publish(&DebugEvent::BreakpointsChanged);
        Ok(())
    }

    /// Removes every marker, including an open one.
    pub fn clear(&mut self) {
        if !self.markers.is_empty() {
            self.markers.clear();
            log::debug!("markers cleared");
            self.bus.publish(&DebugEvent::BreakpointsChanged);
        }
    }

    /// Accounts the instruction retired at `absolute` on `cycle` against completed markers.
    pub fn update(&mut self, absolute: u32, cycle: u64) {
        for marker in self.markers.iter_mut() {
            let Some((_, end_absolute)) = marker.end else {
                continue;
            };
            if end_absolute == absolute {
                if let Some(start) = marker.open_since.take() {
                    let span = cycle.saturating_sub(start);
                    marker.stats.record(span);
                    log::trace!("marker {} span closed after {} cycles", marker.id, span);
                }
            }
            if marker.start_absolute == absolute {
                marker.open_since = Some(cycle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbg::notify::tests::{event_log, Recorder};

    fn markers() -> MarkerDatabase {
        MarkerDatabase::new(DEFAULT_MARKER_CAPACITY, Rc::new(NotificationBus::new()))
    }

    #[test]
    fn test_only_one_marker_in_progress() {
        let mut db = markers();
        let id = db.add(0x8010, 0x010010).unwrap();
        assert_eq!(db.add(0x8020, 0x010020), Err(DbgError::MarkerAlreadyInProgress(id)));
        assert_eq!(db.len(), 1);

        db.complete(id, 0x8040, 0x010040).unwrap();
        let marker = db.get(id).unwrap();
        assert_eq!(marker.state(), MarkerState::Completed);
        assert_eq!(marker.end_absolute(), Some(0x010040));
        assert_eq!(marker.end_logical(), Some(0x8040));
        assert_eq!(db.find_in_progress(), None);
    }

    #[test]
    fn test_complete_requires_open_marker() {
        let mut db = markers();
        let id = db.add(0x8010, 0x010010).unwrap();
        db.complete(id, 0x8040, 0x010040).unwrap();
        assert_eq!(db.complete(id, 0x8050, 0x010050), Err(DbgError::MarkerNotFound(id)));
        assert_eq!(
            db.complete(MarkerId(42), 0x8050, 0x010050),
            Err(DbgError::MarkerNotFound(MarkerId(42)))
        );
        assert_eq!(db.get(id).unwrap().end_absolute(), Some(0x010040));
    }

    #[test]
    fn test_clear_removes_open_marker() {
        let mut db = markers();
        let first = db.add(0x8000, 0x018000).unwrap();
        db.complete(first, 0x8010, 0x018010).unwrap();
        db.add(0x8020, 0x018020).unwrap();
        db.clear();
        assert!(db.is_empty());
        assert_eq!(db.find_in_progress(), None);
        assert!(db.add(0x8020, 0x018020).is_ok());
    }

    #[test]
    fn test_capacity() {
        let mut db = MarkerDatabase::new(2, Rc::new(NotificationBus::new()));
        for i in 0..2u16 {
            let id = db.add(0x8000 + i, 0x018000 + i as u32).unwrap();
            db.complete(id, 0x9000, 0x019000).unwrap();
        }
        assert_eq!(db.add(0x8100, 0x018100), Err(DbgError::CapacityExceeded { capacity: 2 }));
    }

    #[test]
    fn test_span_statistics() {
        let mut db = markers();
        let id = db.add(0x8000, 0x018000).unwrap();
        // open markers are not measured
        db.update(0x018000, 10);
        db.complete(id, 0x8010, 0x018010).unwrap();

        db.update(0x018000, 100);
        db.update(0x018004, 120);
        db.update(0x018010, 150);
        db.update(0x018000, 200);
        db.update(0x018010, 230);
        db.update(0x018010, 300);

        let stats = db.get(id).unwrap().stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 30);
        assert_eq!(stats.max, 50);
        assert_eq!(stats.last, 30);
        assert_eq!(stats.average(), Some(40));
    }

    #[test]
    fn test_palette_cycles() {
        let mut db = markers();
        let a = db.add(0x8000, 0x018000).unwrap();
        db.complete(a, 0x8001, 0x018001).unwrap();
        let b = db.add(0x8002, 0x018002).unwrap();
        assert_eq!(db.get(a).unwrap().color(), MARKER_PALETTE[0]);
        assert_eq!(db.get(b).unwrap().color(), MARKER_PALETTE[1]);
    }

    #[test]
    fn test_changes_are_published() {
        let bus = Rc::new(NotificationBus::new());
        let log = event_log();
        Recorder::attach(&bus, "view", &log);
        let mut db = MarkerDatabase::new(4, bus);
        let id = db.add(0x8000, 0x018000).unwrap();
        let _ = db.add(0x8001, 0x018001);
        db.complete(id, 0x8010, 0x018010).unwrap();
        db.clear();
        db.clear();
        assert_eq!(log.borrow().len(), 3);
    }
}
