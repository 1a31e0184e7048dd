//! The descriptor-listener contract consumed from the (out-of-scope) descriptor layer
//! (SPEC_FULL.md §6, redesigned per §9).
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bitflags::bitflags;

bitflags! {
    /// Readiness bits describing a simulated file/socket, per the GLOSSARY's "Descriptor status".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptorStatus: u32 {
        const READABLE = 0b0000_0001;
        const WRITABLE = 0b0000_0010;
        const CLOSED   = 0b0000_0100;
    }
}

/// Whether a listener fires on an OFF→ON transition of its monitored mask, or is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    OffToOn,
    Never,
}

/// A status source a [`DescriptorListener`] can be attached to: a generic [`Descriptor`] or a
/// [`crate::timer::Timer`]. Both shapes are structurally the same — "a status bitmask that can
/// transition and that listeners can observe" — so they share this trait instead of the timer
/// being a wholly separate mini-API.
pub trait StatusSource {
    fn add_listener(&self, listener: Rc<DescriptorListener>);
    fn remove_listener(&self, listener: &Rc<DescriptorListener>);
}

/// A simulated file/socket descriptor. The core only needs to observe status transitions; the
/// actual descriptor table, network stack, etc. are out of scope (SPEC_FULL.md §1).
pub trait Descriptor: StatusSource {
    fn status(&self) -> DescriptorStatus;
}

/// A listener object carrying an owning `FnMut` closure, replacing the original's "callback with
/// two opaque free-funcs (object + argument)" idiom (SPEC_FULL.md §9): whatever the closure
/// captures (e.g. an `Rc<Process>` and an `Rc<Waiter>`) is released when the `Rc<DescriptorListener>`
/// drops to zero, which happens once it is removed from its timer/descriptor and no other `Rc`
/// clone remains.
pub struct DescriptorListener {
    on_fire: RefCell<Box<dyn FnMut()>>,
    monitor: Cell<(DescriptorStatus, EdgeMode)>,
    /// Tracks the previous status so we can detect an OFF→ON edge rather than a level.
    last_status: Cell<DescriptorStatus>,
}

impl DescriptorListener {
    pub fn new(on_fire: impl FnMut() + 'static) -> Rc<Self> {
        Rc::new(Self {
            on_fire: RefCell::new(Box::new(on_fire)),
            monitor: Cell::new((DescriptorStatus::empty(), EdgeMode::Never)),
            last_status: Cell::new(DescriptorStatus::empty()),
        })
    }

    /// Arms (or disarms, with `EdgeMode::Never`) this listener for a status mask and edge mode.
    pub fn set_monitor_status(&self, mask: DescriptorStatus, edge: EdgeMode) {
        self.monitor.set((mask, edge));
    }

    /// Disables further firing. Called as part of tearing a listener down so that a detach
    /// followed by a stray notification (if any ever reached the listener directly) is a no-op.
    pub fn disable(&self) {
        self.monitor.set((DescriptorStatus::empty(), EdgeMode::Never));
    }

    /// Called by a [`Descriptor`]/[`crate::timer::Timer`] implementation whenever its status
    /// changes, so the listener can decide whether this is the OFF→ON edge it is watching for.
    pub fn notify(&self, new_status: DescriptorStatus) {
        let (mask, edge) = self.monitor.get();
        let old_status = self.last_status.replace(new_status);
        if edge != EdgeMode::OffToOn {
            return;
        }
        let was_on = old_status.intersects(mask);
        let now_on = new_status.intersects(mask);
        if !was_on && now_on {
            (self.on_fire.borrow_mut())();
        }
    }
}

impl std::fmt::Debug for DescriptorListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorListener")
            .field("monitor", &self.monitor.get())
            .finish()
    }
}
