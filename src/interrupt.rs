//! Interrupt router.
//!
//! Every trap funnels through [`Kernel::handle_trap`] after the arch stubs
//! capture the interrupted thread's registers: CPU faults park the thread
//! on the fault queue (or panic, for kernel-mode faults), IRQs become event
//! deliveries, vector 0x81 goes to the kernel-call dispatcher, and the
//! scheduling tail picks the thread to resume, or reports none so the CPU
//! idles until the next interrupt.
//!
//! Interrupts are disabled from trap entry to the scheduling tail, so
//! nothing here needs finer-grained locking than the one kernel lock.

use crate::kernel::Kernel;
use crate::thread::event::{ev_vtimer, IRQ_EVENTS};
use crate::thread::tcb::{FaultKind, ThreadState, Tid};
use crate::{debug_debug, debug_warn};

/// Page-fault exception vector.
const VECTOR_PAGE_FAULT: u8 = 14;

/// A decoded trap, as classified by the arch layer.
#[derive(Debug, Clone, Copy)]
pub enum Trap {
    /// Software interrupt on the kernel-call vector.
    Kcall,
    /// Hardware interrupt line [0, 16); line 0 is the timer.
    Irq(u8),
    /// CPU exception. `addr` is CR2 for page faults, 0 otherwise;
    /// `kernel_mode` reflects the interrupted privilege level.
    Fault {
        vector: u8,
        code: u64,
        addr: u64,
        kernel_mode: bool,
    },
}

impl Kernel {
    /// Route one trap, then reschedule. Returns the thread whose saved
    /// context the arch layer should resume, or `None` to idle.
    pub fn handle_trap(&mut self, trap: Trap) -> Option<Tid> {
        match trap {
            Trap::Kcall => {
                let caller = match self.current() {
                    Some(tid) => tid,
                    None => panic!("kernel call with no running thread"),
                };
                self.kcall(caller);
            }
            Trap::Irq(0) => self.timer_tick(),
            Trap::Irq(line) if (line as usize) < IRQ_EVENTS => self.event_irq(line),
            Trap::Irq(line) => debug_warn!("irq {}: outside the PIC range, dropped", line),
            Trap::Fault {
                vector,
                code,
                addr,
                kernel_mode,
            } => self.fault(vector, code, addr, kernel_mode),
        }
        self.schedule_tail()
    }

    /// CPU-exception handler: park user faults for the debugger, panic on
    /// kernel ones. This is the only way a user thread ever meets a fault.
    fn fault(&mut self, vector: u8, code: u64, addr: u64, kernel_mode: bool) {
        if kernel_mode {
            panic!(
                "kernel fault: vector {} code {:#x} addr {:#x}",
                vector, code, addr
            );
        }
        let tid = match self.current() {
            Some(tid) => tid,
            None => panic!("user fault with no running thread: vector {}", vector),
        };
        let kind = if vector == VECTOR_PAGE_FAULT {
            FaultKind::Page
        } else {
            FaultKind::Access
        };
        let tcb = self.threads.must_mut(tid);
        tcb.fault = kind;
        tcb.fault_addr = if kind == FaultKind::Page { addr } else { 0 };
        debug_debug!(
            "thread {}: fault vector {} code {:#x} addr {:#x}",
            tid,
            vector,
            code,
            addr
        );
        self.set_state(tid, ThreadState::Paused);
        self.park_fault(tid);
    }

    /// Timer tick: advance the clock, fire the virtual timers whose period
    /// boundary was crossed, and end the running thread's time slice.
    fn timer_tick(&mut self) {
        self.ticks += 1;

        // Times in 1/1024 s units; a set bit in `crossed` means that
        // power-of-two boundary was crossed this tick, and every timer at
        // that rate or faster fires.
        let prev = ((self.ticks - 1) << 10) / self.timer_hz;
        let now = (self.ticks << 10) / self.timer_hz;
        let mut crossed = prev ^ now;
        if crossed != 0 {
            crossed += (crossed & crossed.wrapping_neg()) - 1;
            for n in 0..16u8 {
                if crossed & (1 << (15 - n)) != 0 {
                    self.event_post(ev_vtimer(n), 0);
                }
            }
        }

        if let Some(tid) = self.current() {
            self.threads.must_mut(tid).tick += 1;
            if self.threads.must(tid).state == ThreadState::Running {
                self.set_state(tid, ThreadState::Queued);
            }
        }
    }

    /// Scheduling tail: if no thread is RUNNING, take the run-queue head,
    /// switch paging contexts if it lives in a different one, and make it
    /// RUNNING. An empty queue means the CPU idles.
    pub(crate) fn schedule_tail(&mut self) -> Option<Tid> {
        if let Some(active) = self.threads.active() {
            return Some(active);
        }
        let next = self.run_queue.peek()?;
        self.set_state(next, ThreadState::Running);
        let pctx = self.threads.must(next).pctx;
        if pctx != self.pctxs.active() {
            self.pctx_load(pctx);
        }
        Some(next)
    }
}
