//! A one-shot virtual-time timer used as the timeout side of a [`crate::waiter::Waiter`]
//! (SPEC_FULL.md §4.3). Structurally a [`crate::descriptor::StatusSource`] whose status becomes
//! `READABLE` exactly once, at expiration.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::descriptor::{DescriptorListener, DescriptorStatus, StatusSource};
use crate::scheduler::{Scheduler, SimulationTime};

pub struct Timer {
    deadline: SimulationTime,
    fired: Cell<bool>,
    listeners: RefCell<Vec<Rc<DescriptorListener>>>,
}

impl Timer {
    /// Arms a timer to expire `delay` virtual-time ticks after `scheduler`'s current time, per
    /// the `timeout` parameter of `listenForStatus` (SPEC_FULL.md §4.3). The returned `Rc<Timer>`
    /// must be kept alive until it fires or is no longer needed; the scheduled task below holds
    /// its own clone so the timer fires even if the caller drops its reference early, matching
    /// the "timer expiring causes exactly one resume call" testable scenario.
    pub fn new(scheduler: &dyn Scheduler, delay: SimulationTime) -> Rc<Self> {
        let deadline = scheduler.current_time() + delay;
        let timer = Rc::new(Self {
            deadline,
            fired: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
        });
        let fire_timer = Rc::clone(&timer);
        scheduler.schedule_task(Box::new(move || fire_timer.fire()), delay);
        timer
    }

    pub fn deadline(&self) -> SimulationTime {
        self.deadline
    }

    pub fn has_fired(&self) -> bool {
        self.fired.get()
    }

    fn fire(self: &Rc<Self>) {
        if self.fired.replace(true) {
            return;
        }
        let listeners: Vec<_> = self.listeners.borrow().iter().cloned().collect();
        for listener in listeners {
            listener.notify(DescriptorStatus::READABLE);
        }
    }
}

impl StatusSource for Timer {
    fn add_listener(&self, listener: Rc<DescriptorListener>) {
        self.listeners.borrow_mut().push(listener);
    }

    fn remove_listener(&self, listener: &Rc<DescriptorListener>) {
        self.listeners
            .borrow_mut()
            .retain(|l| !Rc::ptr_eq(l, listener));
    }
}
