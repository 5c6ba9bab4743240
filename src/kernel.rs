//! The kernel object.
//!
//! Every table the core owns lives here, built once at boot in dependency
//! order: frame pool, then context 0, then the thread table and queues.
//! There is exactly one `Kernel` per machine, reached from trap context
//! through the global cell at the bottom of this file; tests build their own
//! instances directly.
//!
//! This file also holds the thread state machine. Every lifecycle change
//! goes through [`Kernel::set_state`], which performs the queue linkage for
//! the transition and panics on any (from, to) pair the lifecycle does not
//! permit. That panic is the single most important invariant check in the
//! kernel: no code path may move a thread between states behind its back.

use spin::{Mutex, Once};

use crate::arch;
use crate::kcall::abi::KcallError;
use crate::mm::frame_pool::FramePool;
use crate::mm::pctx::PctxTable;
use crate::thread::event::EventTable;
use crate::thread::run_queue::RunQueue;
use crate::thread::supervisor::SupervisorQueue;
use crate::thread::table::{ThreadTable, THREAD_COUNT};
use crate::thread::tcb::{ThreadFlags, ThreadState, Tid};
use crate::{debug_info, debug_trace};

/// Default PIT frequency, in Hz.
pub const TIMER_HZ: u64 = 64;

pub struct Kernel {
    pub(crate) threads: ThreadTable,
    pub(crate) run_queue: RunQueue,
    pub(crate) events: EventTable,
    /// Faulted threads awaiting a debugger.
    pub(crate) faults: SupervisorQueue,
    /// Dead threads awaiting a reaper.
    pub(crate) dead: SupervisorQueue,
    pub(crate) pctxs: PctxTable,
    pub(crate) frames: FramePool,
    /// Monotonic timer tick count.
    pub(crate) ticks: u64,
    pub(crate) timer_hz: u64,
}

impl Kernel {
    /// Assemble the kernel over a frame pool. Init order matters: context 0
    /// takes its root frame from the pool before anything else runs.
    pub fn new(mut frames: FramePool) -> Self {
        let pctxs = PctxTable::new(&mut frames);
        let kernel = Kernel {
            threads: ThreadTable::new(),
            run_queue: RunQueue::new(),
            events: EventTable::new(),
            faults: SupervisorQueue::new(),
            dead: SupervisorQueue::new(),
            pctxs,
            frames,
            ticks: 0,
            timer_hz: TIMER_HZ,
        };
        debug_info!(
            "kernel: {} thread slots, {} free frames",
            THREAD_COUNT,
            kernel.frames.free_frames()
        );
        kernel
    }

    /// The RUNNING thread, if any.
    pub fn current(&self) -> Option<Tid> {
        self.threads.active()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Resolve a kernel-call thread argument: `-1` names the caller.
    pub(crate) fn target(&self, caller: Tid, raw: u64) -> Result<Tid, KcallError> {
        let raw = raw as i64;
        if raw == -1 {
            return Ok(caller);
        }
        if raw < 0 || raw >= THREAD_COUNT as i64 {
            return Err(KcallError::Exist);
        }
        let tid = Tid(raw as i32);
        if self.threads.get(tid).is_some() {
            Ok(tid)
        } else {
            Err(KcallError::Exist)
        }
    }

    /// Move a thread through the lifecycle, maintaining queue linkage.
    ///
    /// Permitted transitions only; anything else is a kernel bug and panics
    /// with the offending (id, from, to) triple.
    pub(crate) fn set_state(&mut self, tid: Tid, to: ThreadState) {
        use ThreadState::*;

        let from = self.threads.must(tid).state;
        match (from, to) {
            (Queued, Running) => {
                if !self.run_queue.remove(tid) {
                    panic!("thread {}: QUEUED but not in the run queue", tid);
                }
                if let Some(active) = self.threads.active() {
                    panic!("thread {}: scheduling while {} is RUNNING", tid, active);
                }
                self.threads.set_active(Some(tid));
            }
            (Queued, Paused) => {
                self.run_queue.remove(tid);
            }
            (Running, Queued) => {
                self.drop_active(tid);
                self.run_queue.push(tid);
            }
            (Running, Waiting) | (Running, Paused) => {
                self.drop_active(tid);
            }
            (Waiting, Queued) => {
                // The waker unlinks the thread from its event slot.
                self.run_queue.push(tid);
            }
            (Waiting, PausedWaiting) => {
                let event = match self.threads.must(tid).event {
                    Some(event) => event,
                    None => panic!("thread {}: WAITING with no event", tid),
                };
                self.events.unlink_waiter(event, tid);
            }
            (Paused, Queued) => {
                self.run_queue.push(tid);
            }
            (PausedWaiting, Waiting) => {
                let event = match self.threads.must(tid).event {
                    Some(event) => event,
                    None => panic!("thread {}: PAUSED_WAITING with no event", tid),
                };
                self.events.link_waiter(event, tid);
            }
            (from, to) => {
                panic!("thread {}: illegal transition {:?} -> {:?}", tid, from, to);
            }
        }
        self.threads.must_mut(tid).state = to;
        debug_trace!("thread {}: {:?} -> {:?}", tid, from, to);
    }

    fn drop_active(&mut self, tid: Tid) {
        if self.threads.active() != Some(tid) {
            panic!("thread {}: RUNNING but not the active thread", tid);
        }
        self.threads.set_active(None);
    }

    /// Create a thread ready to run a supervisor continuation. This is the
    /// boot-time spawn; user-driven creation goes through the SPAWN call.
    pub fn spawn_raw(&mut self, entry: u64, stack_top: u64, pctx: i32) -> Option<Tid> {
        if !self.pctxs.exists(pctx) {
            return None;
        }
        let tid = self.threads.alloc()?;
        let tcb = self.threads.must_mut(tid);
        tcb.frame.rip = entry;
        tcb.frame.rsp = stack_top;
        tcb.frame.rflags = 0x202; // IF set
        tcb.frame.cs = arch::USER_CS;
        tcb.frame.ss = arch::USER_SS;
        tcb.sys_ip = entry;
        tcb.sys_sp = stack_top;
        tcb.pctx = pctx;
        self.set_state(tid, ThreadState::Queued);
        Some(tid)
    }

    /// Mark a thread dead and surface it on the dead queue. The lifecycle
    /// permits dead-marking only from RUNNING, PAUSED and PAUSED_WAITING;
    /// SETSTATE's access check guarantees exactly those (the caller itself,
    /// or a paused target). Idempotent for an already-dead thread.
    pub(crate) fn kill(&mut self, tid: Tid) {
        if self.threads.must(tid).flags.contains(ThreadFlags::DEAD) {
            return;
        }
        match self.threads.must(tid).state {
            ThreadState::Running => {
                self.set_state(tid, ThreadState::Paused);
            }
            ThreadState::PausedWaiting => {
                let tcb = self.threads.must_mut(tid);
                tcb.event = None;
                tcb.state = ThreadState::Paused;
            }
            ThreadState::Paused => {}
            from => {
                // QUEUED and WAITING: the lifecycle has no dead-marking
                // edge from either.
                panic!("thread {}: illegal transition {:?} -> DEAD", tid, from);
            }
        }
        // A dying thread must not linger in the supervisor queues: a parked
        // fault would otherwise dangle once the reaper frees the slot.
        self.faults.purge(tid);
        self.dead.purge(tid);

        self.threads.must_mut(tid).flags.insert(ThreadFlags::DEAD);
        self.park_dead(tid);
    }

    /// Resume a paused thread: PAUSED re-enters the run queue,
    /// PAUSED_WAITING re-enters its event slot (and wakes immediately if
    /// the event already arrived).
    pub(crate) fn resume_thread(&mut self, tid: Tid) -> Result<(), KcallError> {
        let (state, dead, event) = {
            let tcb = self.threads.get(tid).ok_or(KcallError::Exist)?;
            (tcb.state, tcb.flags.contains(ThreadFlags::DEAD), tcb.event)
        };
        if dead {
            return Err(KcallError::State);
        }
        match state {
            ThreadState::Paused => {
                // If it was parked (a blocked supervisor, or an unclaimed
                // fault), the parking is cancelled by the resume.
                self.faults.purge(tid);
                self.dead.purge(tid);
                self.set_state(tid, ThreadState::Queued);
                Ok(())
            }
            ThreadState::PausedWaiting => {
                let event = match event {
                    Some(event) => event,
                    None => panic!("thread {}: PAUSED_WAITING with no event", tid),
                };
                self.set_state(tid, ThreadState::Waiting);
                self.event_reconcile(event);
                Ok(())
            }
            _ => Err(KcallError::State),
        }
    }

    /// Return a PAUSED thread's slot to FREE.
    pub(crate) fn destroy(&mut self, tid: Tid) {
        self.faults.purge(tid);
        self.dead.purge(tid);
        self.threads.free(tid);
    }
}

/* global kernel cell *******************************************************/

static KERNEL: Once<Mutex<Kernel>> = Once::new();

/// Install the boot-built kernel. Called exactly once.
pub fn init_global(kernel: Kernel) {
    KERNEL.call_once(|| Mutex::new(kernel));
}

/// Run `f` against the global kernel. Trap handlers are the only callers;
/// interrupts stay disabled from trap entry to the scheduling tail, so the
/// lock is never contended on this single CPU.
pub fn with<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let kernel = match KERNEL.get() {
        Some(kernel) => kernel,
        None => panic!("kernel cell used before init"),
    };
    f(&mut kernel.lock())
}
