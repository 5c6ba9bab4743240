//! Thread table: the bounded arena that owns every TCB.
//!
//! Slots are indexed by thread id; a vacant slot is a FREE thread. The table
//! also tracks the single RUNNING thread, if any.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::tcb::{Tcb, Tid};

/// Maximum number of concurrently allocated threads.
pub const THREAD_COUNT: usize = 1024;

pub struct ThreadTable {
    slots: Vec<Option<Box<Tcb>>>,
    active: Option<Tid>,
}

impl ThreadTable {
    pub fn new() -> Self {
        ThreadTable {
            slots: (0..THREAD_COUNT).map(|_| None).collect(),
            active: None,
        }
    }

    /// Allocate a TCB in the lowest free slot. The new thread starts out
    /// PAUSED and unlinked. Returns `None` when the table is full.
    pub fn alloc(&mut self) -> Option<Tid> {
        let index = self.slots.iter().position(|slot| slot.is_none())?;
        let tid = Tid(index as i32);
        self.slots[index] = Some(Box::new(Tcb::new(tid)));
        Some(tid)
    }

    /// Release a slot back to FREE.
    pub fn free(&mut self, tid: Tid) {
        if self.slots[tid.index()].take().is_none() {
            panic!("thread {}: freeing an unallocated slot", tid);
        }
    }

    pub fn get(&self, tid: Tid) -> Option<&Tcb> {
        if tid.0 < 0 || tid.index() >= THREAD_COUNT {
            return None;
        }
        self.slots[tid.index()].as_deref()
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Tcb> {
        if tid.0 < 0 || tid.index() >= THREAD_COUNT {
            return None;
        }
        self.slots[tid.index()].as_deref_mut()
    }

    /// Like `get`, but an absent thread is a kernel bug, not a user error.
    pub fn must(&self, tid: Tid) -> &Tcb {
        match self.get(tid) {
            Some(tcb) => tcb,
            None => panic!("thread {}: not allocated", tid),
        }
    }

    pub fn must_mut(&mut self, tid: Tid) -> &mut Tcb {
        match self.get_mut(tid) {
            Some(tcb) => tcb,
            None => panic!("thread {}: not allocated", tid),
        }
    }

    /// The unique RUNNING thread, if any.
    pub fn active(&self) -> Option<Tid> {
        self.active
    }

    pub fn set_active(&mut self, tid: Option<Tid>) {
        self.active = tid;
    }

    /// Iterate over all allocated TCBs.
    pub fn iter(&self) -> impl Iterator<Item = &Tcb> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }
}
