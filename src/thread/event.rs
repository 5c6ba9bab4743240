//! Event subsystem.
//!
//! An event is a numbered rendezvous slot. Hardware IRQs arrive on slots
//! [0, 16) and are level-latched: arrivals while nobody waits collapse into
//! one latch, consumed by the next waiter and cleared for good by RESET
//! (which also unmasks the line). All other slots carry software posts with
//! a payload, queued FIFO until a waiter shows up, so the k-th post always
//! pairs with the k-th wait.
//!
//! A woken waiter sees the event id in its saved `rax` and the payload in
//! `rdi`. Posts deliver straight to the head waiter; wait and resume run
//! the reconcile step against the stored latch and pending posts. Between
//! them, a slot never holds waiters and undelivered posts at once.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::arch;
use crate::debug_warn;
use crate::kernel::Kernel;
use crate::thread::tcb::{ThreadState, Tid};

/// Number of event slots.
pub const EV_COUNT: usize = 256;

/// Slots below this are IRQ-latched; the rest are software events.
pub const IRQ_EVENTS: usize = 16;

/// Bound on undelivered software posts per slot. Virtual timers post every
/// period whether or not anyone listens; without a bound an un-listened
/// timer is a slow kernel memory leak.
pub const EV_PENDING_MAX: usize = 32;

/// Virtual timer `n` (0..16) fires at `2^(n-5)` Hz on this event id.
pub const fn ev_vtimer(n: u8) -> u8 {
    255 - n
}

pub(crate) struct EventSlot {
    waiters: VecDeque<Tid>,
    pending: VecDeque<u64>,
    latched: bool,
}

pub struct EventTable {
    slots: Vec<EventSlot>,
}

impl EventTable {
    pub fn new() -> Self {
        EventTable {
            slots: (0..EV_COUNT)
                .map(|_| EventSlot {
                    waiters: VecDeque::new(),
                    pending: VecDeque::new(),
                    latched: false,
                })
                .collect(),
        }
    }

    pub(crate) fn link_waiter(&mut self, event: u8, tid: Tid) {
        self.slots[event as usize].waiters.push_back(tid);
    }

    pub(crate) fn unlink_waiter(&mut self, event: u8, tid: Tid) {
        self.slots[event as usize].waiters.retain(|&t| t != tid);
    }

    pub fn waiter_count(&self, event: u8) -> usize {
        self.slots[event as usize].waiters.len()
    }

    pub fn pending_count(&self, event: u8) -> usize {
        self.slots[event as usize].pending.len()
    }

    pub fn is_latched(&self, event: u8) -> bool {
        self.slots[event as usize].latched
    }

    pub fn waiters_contain(&self, event: u8, tid: Tid) -> bool {
        self.slots[event as usize].waiters.contains(&tid)
    }
}

impl Kernel {
    /// Block the RUNNING `tid` on `event`, or deliver immediately if a
    /// latch or pending post is already there (the trivial-wait path: the
    /// thread passes straight through WAITING back to QUEUED).
    pub(crate) fn event_wait(&mut self, tid: Tid, event: u8) {
        self.threads.must_mut(tid).event = Some(event);
        self.events.link_waiter(event, tid);
        self.set_state(tid, ThreadState::Waiting);
        self.event_reconcile(event);
    }

    /// Post to a slot. A waiting head thread is woken immediately with the
    /// payload; with nobody waiting, IRQ-latched slots collapse the post
    /// into their latch (the payload is the latch's boolean existence) and
    /// software slots queue it for the next waiter.
    ///
    /// The only producer for IRQ-latched slots is the interrupt router,
    /// with payload 0; the dispatcher keeps user POSTs out of that range.
    pub(crate) fn event_post(&mut self, event: u8, payload: u64) {
        if let Some(tid) = self.events.slots[event as usize].waiters.pop_front() {
            self.event_deliver(tid, event, payload);
            return;
        }
        let slot = &mut self.events.slots[event as usize];
        if (event as usize) < IRQ_EVENTS {
            slot.latched = true;
        } else if slot.pending.len() >= EV_PENDING_MAX {
            debug_warn!("event {}: pending queue full, dropping post", event);
        } else {
            slot.pending.push_back(payload);
        }
    }

    /// IRQ arrival on line `line`: mask the line at the interrupt
    /// controller and post. The line stays masked until RESET.
    pub(crate) fn event_irq(&mut self, line: u8) {
        arch::irq_mask(line);
        self.event_post(line, 0);
    }

    /// Clear a slot's latch; for IRQ slots also unmask the line.
    pub(crate) fn event_reset(&mut self, event: u8) {
        self.events.slots[event as usize].latched = false;
        if (event as usize) < IRQ_EVENTS {
            arch::irq_unmask(event);
        }
    }

    /// Match waiters against stored state (latch, pending posts) until one
    /// side runs dry. Wait and resume funnel through this, which is what
    /// keeps a slot from holding waiters and pending posts at once.
    pub(crate) fn event_reconcile(&mut self, event: u8) {
        loop {
            let slot = &mut self.events.slots[event as usize];
            if slot.waiters.is_empty() {
                break;
            }
            let payload = if slot.latched {
                slot.latched = false;
                0
            } else {
                match slot.pending.pop_front() {
                    Some(payload) => payload,
                    None => break,
                }
            };
            let tid = match slot.waiters.pop_front() {
                Some(tid) => tid,
                None => break,
            };
            self.event_deliver(tid, event, payload);
        }
    }

    /// Wake a dequeued waiter: event id in its saved `rax`, payload in
    /// `rdi`, back onto the run queue.
    fn event_deliver(&mut self, tid: Tid, event: u8, payload: u64) {
        let tcb = self.threads.must_mut(tid);
        tcb.frame.rax = event as u64;
        tcb.frame.rdi = payload;
        tcb.event = None;
        self.set_state(tid, ThreadState::Queued);
    }
}
