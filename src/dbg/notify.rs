//! Synchronous, ordered fan-out of debugger events.
//!
//! Publishing runs every registered subscriber, in registration order, before `publish` returns.
//! Subscribers may unsubscribe themselves or others while an event is being dispatched; a
//! subscriber removed mid-dispatch is not invoked afterwards, and no subscriber is invoked twice.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use super::breakpoints::Breakpoint;

/// The events fanned out to consumer views.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    /// Execution stopped. `show` asks views to bring themselves forward.
    Paused { show: bool },
    /// The breakpoint or marker tables were mutated.
    BreakpointsChanged,
    /// A breakpoint matched. Carries the record as it was when it fired.
    BreakpointHit(Breakpoint),
    CartridgeLoaded,
    EmulatorReset,
}

/// Opaque registration handle returned by [NotificationBus::subscribe].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u32);

/// A consumer of debugger events. Every capability is optional.
///
/// Handlers may publish on the same bus. That nested event reaches every other subscriber
/// synchronously, but not the subscriber whose handler published it: it is still busy and is
/// skipped for the nested event (a warning is logged). Subscribers that need to see their own
/// follow-up events must record them themselves.
pub trait Subscriber {
    fn on_paused(&mut self, _show: bool) {}
    fn on_breakpoints_changed(&mut self) {}
    fn on_breakpoint_hit(&mut self, _breakpoint: &Breakpoint) {}
    fn on_cartridge_loaded(&mut self) {}
    fn on_emulator_reset(&mut self) {}
}

/// Adapts a closure over [DebugEvent] into a [Subscriber].
pub struct FnSubscriber<F>(pub F);

impl<F: FnMut(&DebugEvent)> Subscriber for FnSubscriber<F> {
    fn on_paused(&mut self, show: bool) {
        (self.0)(&DebugEvent::Paused { show })
    }

    fn on_breakpoints_changed(&mut self) {
        (self.0)(&DebugEvent::BreakpointsChanged)
    }

    fn on_breakpoint_hit(&mut self, breakpoint: &Breakpoint) {
        (self.0)(&DebugEvent::BreakpointHit(breakpoint.clone()))
    }

    fn on_cartridge_loaded(&mut self) {
        (self.0)(&DebugEvent::CartridgeLoaded)
    }

    fn on_emulator_reset(&mut self) {
        (self.0)(&DebugEvent::EmulatorReset)
    }
}

type SharedSubscriber = Rc<RefCell<dyn Subscriber>>;

/// The publish/subscribe channel. Shared by `Rc` between the databases that publish and the
/// views that subscribe; all access is single-threaded.
#[derive(Default)]
pub struct NotificationBus {
    subscribers: RefCell<Vec<(SubscriberId, SharedSubscriber)>>,
    next_id: Cell<u32>,
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: SharedSubscriber) -> SubscriberId {
        let id = SubscriberId(self.next_id.get());
        self.next_id.set(id.0.wrapping_add(1));
        self.subscribers.borrow_mut().push((id, subscriber));
        log::debug!("subscriber {:?} registered", id);
        id
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().retain(|(sid, _)| *sid != id);
    }

    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.borrow().is_empty()
    }

    fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow().iter().any(|(sid, _)| *sid == id)
    }

    /// Delivers `event` to every current subscriber before returning.
    pub fn publish(&self, event: &DebugEvent) {
        // dispatch over a snapshot so handlers can (un)subscribe while we iterate
        let snapshot: Vec<(SubscriberId, SharedSubscriber)> = self.subscribers.borrow().clone();
        log::debug!("publishing {:?} to {} subscriber(s)", event, snapshot.len());
        for (id, subscriber) in snapshot {
            if !self.is_subscribed(id) {
                continue;
            }
            let Ok(mut subscriber) = subscriber.try_borrow_mut() else {
                log::warn!("subscriber {:?} is already handling an event, skipping", id);
                continue;
            };
            match event {
                DebugEvent::Paused { show } => subscriber.on_paused(*show),
                DebugEvent::BreakpointsChanged => subscriber.on_breakpoints_changed(),
                DebugEvent::BreakpointHit(bp) => subscriber.on_breakpoint_hit(bp),
                DebugEvent::CartridgeLoaded => subscriber.on_cartridge_loaded(),
                DebugEvent::EmulatorReset => subscriber.on_emulator_reset(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every event it sees, tagged with a name, into a shared log.
    pub(crate) struct Recorder {
        pub name: &'static str,
        pub log: Rc<RefCell<Vec<(&'static str, DebugEvent)>>>,
    }

    impl Recorder {
        pub(crate) fn attach(
            bus: &NotificationBus,
            name: &'static str,
            log: &Rc<RefCell<Vec<(&'static str, DebugEvent)>>>,
        ) -> SubscriberId {
            bus.subscribe(Rc::new(RefCell::new(Recorder {
                name,
                log: log.clone(),
            })))
        }

        fn push(&self, event: DebugEvent) {
            self.log.borrow_mut().push((self.name, event));
        }
    }

    impl Subscriber for Recorder {
        fn on_paused(&mut self, show: bool) {
            self.push(DebugEvent::Paused { show })
        }
        fn on_breakpoints_changed(&mut self) {
            self.push(DebugEvent::BreakpointsChanged)
        }
        fn on_breakpoint_hit(&mut self, breakpoint: &Breakpoint) {
            self.push(DebugEvent::BreakpointHit(breakpoint.clone()))
        }
        fn on_cartridge_loaded(&mut self) {
            self.push(DebugEvent::CartridgeLoaded)
        }
        fn on_emulator_reset(&mut self) {
            self.push(DebugEvent::EmulatorReset)
        }
    }

    /// A shared event log for tests.
    pub(crate) fn event_log() -> Rc<RefCell<Vec<(&'static str, DebugEvent)>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_publish_in_registration_order() {
        let bus = NotificationBus::new();
        let log = event_log();
        Recorder::attach(&bus, "a", &log);
        Recorder::attach(&bus, "b", &log);
        bus.publish(&DebugEvent::Paused { show: true });
        assert_eq!(
            *log.borrow(),
            vec![
                ("a", DebugEvent::Paused { show: true }),
                ("b", DebugEvent::Paused { show: true })
            ]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let log = event_log();
        let a = Recorder::attach(&bus, "a", &log);
        Recorder::attach(&bus, "b", &log);
        bus.unsubscribe(a);
        bus.unsubscribe(a);
        bus.publish(&DebugEvent::EmulatorReset);
        assert_eq!(*log.borrow(), vec![("b", DebugEvent::EmulatorReset)]);
        assert_eq!(bus.len(), 1);
    }

    struct Leaver {
        bus: Rc<NotificationBus>,
        target: Rc<Cell<Option<SubscriberId>>>,
        calls: Rc<Cell<u32>>,
    }

    impl Subscriber for Leaver {
        fn on_emulator_reset(&mut self) {
            self.calls.set(self.calls.get() + 1);
            if let Some(id) = self.target.get() {
                self.bus.unsubscribe(id);
            }
        }
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let bus = Rc::new(NotificationBus::new());
        let log = event_log();
        let own_id = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));

        Recorder::attach(&bus, "first", &log);
        let leaver = bus.subscribe(Rc::new(RefCell::new(Leaver {
            bus: bus.clone(),
            target: own_id.clone(),
            calls: calls.clone(),
        })));
        own_id.set(Some(leaver));
        Recorder::attach(&bus, "last", &log);

        bus.publish(&DebugEvent::EmulatorReset);
        bus.publish(&DebugEvent::EmulatorReset);

        assert_eq!(calls.get(), 1);
        let names: Vec<_> = log.borrow().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["first", "last", "first", "last"]);
    }

    #[test]
    fn test_removing_a_later_subscriber_mid_dispatch_skips_it() {
        let bus = Rc::new(NotificationBus::new());
        let log = event_log();
        let victim = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));

        bus.subscribe(Rc::new(RefCell::new(Leaver {
            bus: bus.clone(),
            target: victim.clone(),
            calls: calls.clone(),
        })));
        victim.set(Some(Recorder::attach(&bus, "victim", &log)));
        Recorder::attach(&bus, "survivor", &log);

        bus.publish(&DebugEvent::EmulatorReset);
        assert_eq!(*log.borrow(), vec![("survivor", DebugEvent::EmulatorReset)]);
    }

    /// Publishes a follow-up event from inside its own handler.
    struct Echo {
        bus: Rc<NotificationBus>,
        seen: Rc<RefCell<Vec<DebugEvent>>>,
    }

    impl Subscriber for Echo {
        fn on_paused(&mut self, show: bool) {
            self.seen.borrow_mut().push(DebugEvent::Paused { show });
            self.bus.publish(&DebugEvent::BreakpointsChanged);
        }

        fn on_breakpoints_changed(&mut self) {
            self.seen.borrow_mut().push(DebugEvent::BreakpointsChanged);
        }
    }

    #[test]
    fn test_nested_publish_skips_busy_publisher() {
        let bus = Rc::new(NotificationBus::new());
        let log = event_log();
        let seen = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(Rc::new(RefCell::new(Echo {
            bus: bus.clone(),
            seen: seen.clone(),
        })));
        Recorder::attach(&bus, "view", &log);

        bus.publish(&DebugEvent::Paused { show: false });

        assert_eq!(*seen.borrow(), vec![DebugEvent::Paused { show: false }]);
        assert_eq!(
            *log.borrow(),
            vec![
                ("view", DebugEvent::BreakpointsChanged),
                ("view", DebugEvent::Paused { show: false })
            ]
        );
    }

    #[test]
    fn test_closure_subscriber() {
        let bus = NotificationBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(Rc::new(RefCell::new(FnSubscriber(move |e: &DebugEvent| {
            sink.borrow_mut().push(e.clone())
        }))));
        bus.publish(&DebugEvent::CartridgeLoaded);
        bus.publish(&DebugEvent::BreakpointsChanged);
        assert_eq!(
            *seen.borrow(),
            vec![DebugEvent::CartridgeLoaded, DebugEvent::BreakpointsChanged]
        );
    }
}
