//! Thread control block.
//!
//! The TCB carries everything the kernel knows about one thread: the saved
//! register file captured at trap entry, the FPU/SSE save area, the split
//! user/supervisor continuation, the owning paging context, the last fault,
//! and the five-state lifecycle position. Queue membership is expressed by
//! id links held in the owning queues, never by pointers inside the TCB.

use alloc::boxed::Box;
use core::fmt;

use crate::kcall::abi::{self, TRegs};

/// A thread id: the thread's stable index in the thread table. `-1` is the
/// "calling thread" sentinel at the kernel-call boundary and never names a
/// table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tid(pub i32);

impl Tid {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread execution state.
///
/// A sixth state, FREE, exists on the wire (`TS_FREE`) but not here: a free
/// thread has no TCB at all, only a vacant table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// In the run queue, eligible to be scheduled.
    Queued = abi::TS_QUEUED,
    /// Currently executing; at most one thread is ever in this state.
    Running = abi::TS_RUNNING,
    /// Blocked in some event slot's wait queue.
    Waiting = abi::TS_WAITING,
    /// Out of all queues, waiting for an explicit RESUME.
    Paused = abi::TS_PAUSED,
    /// Paused while waiting; remembers the event to re-enter on resume.
    PausedWaiting = abi::TS_PAUSEDW,
}

impl ThreadState {
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Thread flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadFlags(u8);

impl ThreadFlags {
    pub const NONE: Self = Self(0);
    /// Thread has exited or been killed; awaiting the reaper.
    pub const DEAD: Self = Self(abi::TF_DEAD);
    /// Thread is executing in user mode (its supervisor continuation is
    /// parked in `sys_ip`/`sys_sp`).
    pub const USER: Self = Self(abi::TF_USER);

    #[inline]
    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & (abi::TF_DEAD | abi::TF_USER))
    }
}

/// Kind of the last fault a thread took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultKind {
    None = 0,
    Page = abi::FV_PAGE,
    Access = abi::FV_ACCS,
}

/// Register file captured at trap entry and restored at trap exit.
///
/// `cs`/`ss` ride along so the trap path can tell which privilege level the
/// thread was interrupted at; they are not part of the wire record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
}

/// 512-byte FXSAVE area, kept off the TCB proper like the rest of the large
/// per-thread state.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct FxArea(pub [u8; 512]);

impl Default for FxArea {
    fn default() -> Self {
        FxArea([0; 512])
    }
}

/// Thread control block.
pub struct Tcb {
    pub id: Tid,
    pub state: ThreadState,
    pub flags: ThreadFlags,

    /// Saved register file.
    pub frame: TrapFrame,
    /// FPU/SSE state.
    pub fx: Box<FxArea>,

    /// User-mode continuation, parked while the thread is in its supervisor.
    pub usr_ip: u64,
    pub usr_sp: u64,
    /// Supervisor continuation, entered on a kernel call from user mode.
    pub sys_ip: u64,
    pub sys_sp: u64,

    /// Owning paging context (0 is the kernel's own).
    pub pctx: i32,

    /// Last fault taken, surfaced through the fault queue.
    pub fault: FaultKind,
    pub fault_addr: u64,

    /// Event this thread is waiting on (also remembered across a pause).
    pub event: Option<u8>,

    /// Timer preemptions absorbed.
    pub tick: u64,
}

impl Tcb {
    /// Fresh TCB in the PAUSED state, not linked anywhere.
    pub fn new(id: Tid) -> Self {
        Tcb {
            id,
            state: ThreadState::Paused,
            flags: ThreadFlags::NONE,
            frame: TrapFrame::default(),
            fx: Box::new(FxArea::default()),
            usr_ip: 0,
            usr_sp: 0,
            sys_ip: 0,
            sys_sp: 0,
            pctx: 0,
            fault: FaultKind::None,
            fault_addr: 0,
            event: None,
            tick: 0,
        }
    }

    /// Copy the wire-visible register file out of the saved frame.
    pub fn save_regs(&self) -> TRegs {
        let f = &self.frame;
        TRegs {
            rax: f.rax,
            rbx: f.rbx,
            rcx: f.rcx,
            rdx: f.rdx,
            rsi: f.rsi,
            rdi: f.rdi,
            rbp: f.rbp,
            rsp: f.rsp,
            r8: f.r8,
            r9: f.r9,
            r10: f.r10,
            r11: f.r11,
            r12: f.r12,
            r13: f.r13,
            r14: f.r14,
            r15: f.r15,
            rip: f.rip,
            rflags: f.rflags,
            fxdata: self.fx.0,
        }
    }

    /// Load the wire-visible register file into the saved frame. Segment
    /// selectors are kernel-owned and untouched.
    pub fn load_regs(&mut self, regs: &TRegs) {
        let f = &mut self.frame;
        f.rax = regs.rax;
        f.rbx = regs.rbx;
        f.rcx = regs.rcx;
        f.rdx = regs.rdx;
        f.rsi = regs.rsi;
        f.rdi = regs.rdi;
        f.rbp = regs.rbp;
        f.rsp = regs.rsp;
        f.r8 = regs.r8;
        f.r9 = regs.r9;
        f.r10 = regs.r10;
        f.r11 = regs.r11;
        f.r12 = regs.r12;
        f.r13 = regs.r13;
        f.r14 = regs.r14;
        f.r15 = regs.r15;
        f.rip = regs.rip;
        f.rflags = regs.rflags;
        self.fx.0 = regs.fxdata;
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("pctx", &self.pctx)
            .field("event", &self.event)
            .field("tick", &self.tick)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent_bits() {
        let mut flags = ThreadFlags::NONE;
        assert!(!flags.contains(ThreadFlags::DEAD));

        flags.insert(ThreadFlags::USER);
        assert!(flags.contains(ThreadFlags::USER));
        assert!(!flags.contains(ThreadFlags::DEAD));

        flags.insert(ThreadFlags::DEAD);
        flags.remove(ThreadFlags::USER);
        assert!(flags.contains(ThreadFlags::DEAD));
        assert!(!flags.contains(ThreadFlags::USER));
    }

    #[test]
    fn regs_round_trip_through_wire_form() {
        let mut tcb = Tcb::new(Tid(7));
        tcb.frame.rax = 0xDEAD;
        tcb.frame.rip = 0x1000;
        tcb.fx.0[0] = 0x55;

        let regs = tcb.save_regs();
        let mut other = Tcb::new(Tid(8));
        other.load_regs(&regs);

        assert_eq!(other.frame.rax, 0xDEAD);
        assert_eq!(other.frame.rip, 0x1000);
        assert_eq!(other.fx.0[0], 0x55);
    }
}
