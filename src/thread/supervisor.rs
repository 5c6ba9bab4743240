//! Fault queue and dead queue.
//!
//! Both have the same producer/consumer shape: a FIFO of parked thread ids
//! (faulted threads, dead threads) paired with a FIFO of supervisor threads
//! (debuggers, reapers) that blocked because the parked side was empty.
//! Whichever side arrives second completes the rendezvous: the supervisor
//! is woken with the subject's id in its saved `rax`.
//!
//! Parked threads are PAUSED and supervisors block PAUSED, so neither side
//! occupies the run queue or an event slot while linked here.

use alloc::collections::VecDeque;

use crate::kernel::Kernel;
use crate::thread::tcb::{ThreadState, Tid};

/// One parked-FIFO + consumer-FIFO pair.
pub struct SupervisorQueue {
    parked: VecDeque<Tid>,
    consumers: VecDeque<Tid>,
}

impl SupervisorQueue {
    pub fn new() -> Self {
        SupervisorQueue {
            parked: VecDeque::new(),
            consumers: VecDeque::new(),
        }
    }

    fn push_parked(&mut self, tid: Tid) {
        self.parked.push_back(tid);
    }

    fn pop_parked(&mut self) -> Option<Tid> {
        self.parked.pop_front()
    }

    fn push_consumer(&mut self, tid: Tid) {
        self.consumers.push_back(tid);
    }

    fn pop_consumer(&mut self) -> Option<Tid> {
        self.consumers.pop_front()
    }

    /// Drop every trace of a thread, parked or consuming. Called when a
    /// thread is resumed, killed or reaped so no stale id survives it.
    pub(crate) fn purge(&mut self, tid: Tid) {
        self.parked.retain(|&t| t != tid);
        self.consumers.retain(|&t| t != tid);
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    pub fn parked_contains(&self, tid: Tid) -> bool {
        self.parked.contains(&tid)
    }

    pub fn consumer_contains(&self, tid: Tid) -> bool {
        self.consumers.contains(&tid)
    }
}

impl Kernel {
    /// Surface a faulted (already PAUSED) thread to the debugger side.
    pub(crate) fn park_fault(&mut self, tid: Tid) {
        match self.faults.pop_consumer() {
            Some(consumer) => self.deliver_supervisor(consumer, tid),
            None => self.faults.push_parked(tid),
        }
    }

    /// Surface a dead (already PAUSED) thread to the reaper side.
    pub(crate) fn park_dead(&mut self, tid: Tid) {
        match self.dead.pop_consumer() {
            Some(consumer) => self.deliver_supervisor(consumer, tid),
            None => self.dead.push_parked(tid),
        }
    }

    /// GETFAULT: next faulted thread's id, or block the caller.
    pub(crate) fn consume_fault(&mut self, caller: Tid) -> Option<Tid> {
        match self.faults.pop_parked() {
            Some(subject) => Some(subject),
            None => {
                self.set_state(caller, ThreadState::Paused);
                self.faults.push_consumer(caller);
                None
            }
        }
    }

    /// GETDEAD: next dead thread's id, or block the caller.
    pub(crate) fn consume_dead(&mut self, caller: Tid) -> Option<Tid> {
        match self.dead.pop_parked() {
            Some(subject) => Some(subject),
            None => {
                self.set_state(caller, ThreadState::Paused);
                self.dead.push_consumer(caller);
                None
            }
        }
    }

    fn deliver_supervisor(&mut self, consumer: Tid, subject: Tid) {
        self.threads.must_mut(consumer).frame.rax = subject.0 as u64;
        self.set_state(consumer, ThreadState::Queued);
    }
}
