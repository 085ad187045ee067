//! Injected clock and one-shot timers.
//!
//! All asynchrony in the runtime flows through this seam: the host owns
//! the event loop and hands the runtime a [`Scheduler`]. A cancelled timer
//! is guaranteed never to fire. [`ManualScheduler`] is the reference
//! implementation; hosts with a real loop adapt their own timer wheel.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

pub type TimerId = u64;
pub type SchedulerPtr = Rc<dyn Scheduler>;

type TimerCallback = Box<dyn FnOnce()>;

pub trait Scheduler {
    /// Current time in milliseconds. Only differences are meaningful.
    fn now(&self) -> u64;

    /// Schedules `callback` to run once, `delay_ms` from now.
    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> TimerId;

    /// Cancels a pending timer. Returns false if it already fired or was
    /// cancelled. After a true return the callback will never run.
    fn cancel(&self, id: TimerId) -> bool;
}

/// A manually advanced scheduler.
///
/// Timers fire during [`ManualScheduler::advance`], in deadline order and
/// FIFO among equal deadlines. Callbacks may schedule further timers; a
/// timer scheduled inside a callback fires in the same `advance` call if
/// its deadline falls within the window.
#[derive(Default)]
pub struct ManualScheduler {
    now: Cell<u64>,
    next_id: Cell<TimerId>,
    // Key is (deadline, id); ids are monotonic so equal deadlines fire FIFO.
    timers: RefCell<BTreeMap<(u64, TimerId), TimerCallback>>,
}

impl ManualScheduler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Advances the clock by `delta_ms`, firing every timer that comes due.
    pub fn advance(&self, delta_ms: u64) {
        let target = self.now.get() + delta_ms;
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                match timers.keys().next().copied() {
                    Some(key) if key.0 <= target => timers.remove_entry(&key),
                    _ => None,
                }
            };
            match due {
                Some(((deadline, _), callback)) => {
                    // Fire with the clock at the timer's own deadline so a
                    // callback scheduling a follow-up sees consistent time.
                    self.now.set(deadline);
                    callback();
                }
                None => break,
            }
        }
        self.now.set(target);
    }

    /// Fires every remaining timer, including ones they schedule.
    pub fn advance_to_end(&self) {
        loop {
            let last = self.timers.borrow().keys().next_back().copied();
            match last {
                Some((deadline, _)) => self.advance(deadline.saturating_sub(self.now.get())),
                None => break,
            }
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> u64 {
        self.now.get()
    }

    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> TimerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.timers
            .borrow_mut()
            .insert((self.now.get() + delay_ms, id), callback);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let key = {
            let timers = self.timers.borrow();
            timers.keys().find(|(_, timer)| *timer == id).copied()
        };
        match key {
            Some(key) => {
                self.timers.borrow_mut().remove(&key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically() {
        let scheduler = ManualScheduler::new();
        assert_eq!(scheduler.now(), 0);
        scheduler.advance(250);
        scheduler.advance(50);
        assert_eq!(scheduler.now(), 300);
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let scheduler = ManualScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (delay, tag) in [(30u64, "c"), (10, "a"), (20, "b")] {
            let sink = order.clone();
            scheduler.schedule(delay, Box::new(move || sink.borrow_mut().push(tag)));
        }
        scheduler.advance(25);
        assert_eq!(order.borrow().as_slice(), &["a", "b"]);
        scheduler.advance(10);
        assert_eq!(order.borrow().as_slice(), &["a", "b", "c"]);
    }

    #[test]
    fn test_equal_deadlines_fire_fifo() {
        let scheduler = ManualScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let sink = order.clone();
            scheduler.schedule(5, Box::new(move || sink.borrow_mut().push(tag)));
        }
        scheduler.advance(5);
        assert_eq!(order.borrow().as_slice(), &["first", "second"]);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let scheduler = ManualScheduler::new();
        let id = scheduler.schedule(10, Box::new(|| panic!("cancelled timer fired")));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        scheduler.advance(100);
    }

    #[test]
    fn test_callback_may_schedule_followup() {
        let scheduler = ManualScheduler::new();
        let fired = Rc::new(Cell::new(false));
        let inner = scheduler.clone();
        let sink = fired.clone();
        scheduler.schedule(
            10,
            Box::new(move || {
                let sink = sink.clone();
                inner.schedule(10, Box::new(move || sink.set(true)));
            }),
        );
        scheduler.advance(20);
        assert!(fired.get());
    }

    #[test]
    fn test_advance_to_end_drains_everything() {
        let scheduler = ManualScheduler::new();
        let count = Rc::new(Cell::new(0u32));
        for delay in [5u64, 500, 50_000] {
            let sink = count.clone();
            scheduler.schedule(delay, Box::new(move || sink.set(sink.get() + 1)));
        }
        scheduler.advance_to_end();
        assert_eq!(count.get(), 3);
        assert_eq!(scheduler.pending_timers(), 0);
    }
}
