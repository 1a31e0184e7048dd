//! Single-fire composite wait (SPEC_FULL.md §4.3): `listen_for_status` arms a [`Waiter`] on a
//! timer and/or a descriptor, and `notify_status_changed` tears both listeners down before
//! resuming the guest, so a side effect of the resumed guest cannot re-enter the same waiter.
use std::cell::RefCell;
use std::rc::Rc;

use crate::descriptor::{Descriptor, DescriptorListener, DescriptorStatus, EdgeMode, StatusSource};
use crate::process::Process;
use crate::thread::ThreadHandle;
use crate::timer::Timer;
use crate::utility::ObjectCounter;

/// A single-use wait condition coupling a timer and/or a descriptor status to a one-shot resume
/// of a guest thread. Never reused: once it fires, both listener slots are left `None` and any
/// further attempt to arm the same underlying timer/descriptor produces a brand new `Waiter`.
pub struct Waiter {
    thread: ThreadHandle,
    timer: Option<Rc<Timer>>,
    timer_listener: RefCell<Option<Rc<DescriptorListener>>>,
    descriptor: Option<Rc<dyn Descriptor>>,
    descriptor_listener: RefCell<Option<Rc<DescriptorListener>>>,
    _counter: ObjectCounter,
}

/// Arms a wait for whichever of `timer`/`descriptor` fires first. Returns `None` (a no-op) if
/// both are absent, per SPEC_FULL.md §4.3.
pub fn listen_for_status(
    process: &Rc<Process>,
    thread: ThreadHandle,
    timer: Option<Rc<Timer>>,
    descriptor: Option<(Rc<dyn Descriptor>, DescriptorStatus)>,
) -> Option<Rc<Waiter>> {
    if timer.is_none() && descriptor.is_none() {
        return None;
    }

    let waiter = Rc::new(Waiter {
        thread,
        timer: timer.clone(),
        timer_listener: RefCell::new(None),
        descriptor: descriptor.as_ref().map(|(d, _)| Rc::clone(d)),
        descriptor_listener: RefCell::new(None),
        _counter: ObjectCounter::new("Waiter"),
    });

    if let Some(t) = &timer {
        // Each installed listener holds one strong ref to the process and one to the waiter,
        // per SPEC_FULL.md §4.3's refcounting rule; both are released together when the listener
        // itself is dropped (on removal in `notify_status_changed`, or never if it fires first).
        let process_ref = Rc::clone(process);
        let waiter_ref = Rc::clone(&waiter);
        let listener = DescriptorListener::new(move || {
            notify_status_changed(&process_ref, &waiter_ref);
        });
        listener.set_monitor_status(DescriptorStatus::READABLE, EdgeMode::OffToOn);
        t.add_listener(Rc::clone(&listener));
        *waiter.timer_listener.borrow_mut() = Some(listener);
    }

    if let Some((d, status)) = &descriptor {
        let process_ref = Rc::clone(process);
        let waiter_ref = Rc::clone(&waiter);
        let listener = DescriptorListener::new(move || {
            notify_status_changed(&process_ref, &waiter_ref);
        });
        listener.set_monitor_status(*status, EdgeMode::OffToOn);
        d.add_listener(Rc::clone(&listener));
        *waiter.descriptor_listener.borrow_mut() = Some(listener);
    }

    Some(waiter)
}

/// Fires (at most once) for a given `Waiter`: removes both listeners *before* resuming the guest,
/// so a side effect of the resumed guest (closing the descriptor, rearming the timer) cannot
/// re-enter this function for the same waiter (SPEC_FULL.md §4.3's design rationale).
pub fn notify_status_changed(process: &Rc<Process>, waiter: &Rc<Waiter>) {
    // `RefCell::take` makes this idempotent: a waiter whose listeners have already been removed
    // (i.e. this is a re-entrant or duplicate call) finds `None` in both slots and does nothing.
    let timer_listener = waiter.timer_listener.borrow_mut().take();
    if let Some(listener) = &timer_listener {
        if let Some(timer) = &waiter.timer {
            timer.remove_listener(listener);
        }
        listener.disable();
    }

    let descriptor_listener = waiter.descriptor_listener.borrow_mut().take();
    if let Some(listener) = &descriptor_listener {
        if let Some(descriptor) = &waiter.descriptor {
            descriptor.remove_listener(listener);
        }
        listener.disable();
    }

    if timer_listener.is_none() && descriptor_listener.is_none() {
        return;
    }

    let thread = Rc::clone(&waiter.thread);
    process.continue_process(Some(thread));
}
