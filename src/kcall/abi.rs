//! Kernel-call ABI: call numbers, error codes, and the thread-info record
//! exchanged with user space.
//!
//! A kernel call is a software interrupt on vector 0x81. The call id goes in
//! `rax`, up to three arguments in `rdi`, `rsi` and `rdx`, and the result
//! comes back in `rax`. Pointer arguments are user virtual addresses in the
//! caller's paging context and are translated through its page tables before
//! any access.

/// Software-interrupt vector for kernel calls.
pub const KCALL_VECTOR: u8 = 0x81;

/* threading calls **********************************************************/

pub const KCALL_SPAWN: u64 = 0x02; // spawn(state_ptr) -> tid | -1
pub const KCALL_GETTID: u64 = 0x03; // gettid() -> tid
pub const KCALL_YIELD: u64 = 0x04; // yield() -> 0
pub const KCALL_PAUSE: u64 = 0x05; // pause(tid | -1) -> 0 | err
pub const KCALL_RESUME: u64 = 0x06; // resume(tid) -> 0 | err
pub const KCALL_GETSTATE: u64 = 0x07; // getstate(tid | -1, buf) -> 0 | err
pub const KCALL_SETSTATE: u64 = 0x08; // setstate(tid | -1, buf) -> 0 | err
pub const KCALL_GETFAULT: u64 = 0x09; // getfault() -> tid (may block)
pub const KCALL_GETDEAD: u64 = 0x0A; // getdead() -> tid (may block)
pub const KCALL_REAP: u64 = 0x0B; // reap(tid, buf | 0) -> 0 | err

/* event calls **************************************************************/

pub const KCALL_POST: u64 = 0x0C; // post(event, payload) -> 0 | err
pub const KCALL_WAIT: u64 = 0x0D; // wait(event) -> event (may block)
pub const KCALL_RESET: u64 = 0x0E; // reset(event) -> 0 | err
pub const KCALL_SYSRET: u64 = 0x0F; // return from supervisor to user mode

/* paging calls *************************************************************/

pub const KCALL_NEWPCTX: u64 = 0x10; // newpctx() -> id | -1
pub const KCALL_FREEPCTX: u64 = 0x11; // freepctx(id) -> 0 | err
pub const KCALL_SETFRAME: u64 = 0x12; // setframe(page, frame) -> 0 | err
pub const KCALL_SETFLAGS: u64 = 0x13; // setflags(page, flags) -> 0 | err
pub const KCALL_GETFRAME: u64 = 0x14; // getframe(page) -> frame | 0
pub const KCALL_GETFLAGS: u64 = 0x15; // getflags(page) -> flags

pub const KCALL_NEWFRAME: u64 = 0x1C; // newframe() -> frame | -1
pub const KCALL_FREEFRAME: u64 = 0x1D; // freeframe(frame) -> 0 | err
pub const KCALL_TAKEFRAME: u64 = 0x1E; // takeframe(frame) -> 0 | err

/* error codes **************************************************************/

pub const TE_STATE: u64 = 1; // state-incompatible request
pub const TE_EXIST: u64 = 2; // no such thread, context, event or frame
pub const TE_RESRC: u64 = 3; // out of table slots or frames

/// User-visible kernel-call failure, encoded into the saved `rax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KcallError {
    /// The target's state is incompatible with the request.
    State,
    /// The named thread, paging context, event or frame does not exist.
    Exist,
    /// Out of table slots or physical frames.
    Resrc,
}

impl KcallError {
    pub fn code(self) -> u64 {
        match self {
            KcallError::State => TE_STATE,
            KcallError::Exist => TE_EXIST,
            KcallError::Resrc => TE_RESRC,
        }
    }
}

/* thread states and flags on the wire **************************************/

pub const TS_FREE: u8 = 0;
pub const TS_QUEUED: u8 = 1;
pub const TS_RUNNING: u8 = 2;
pub const TS_WAITING: u8 = 3;
pub const TS_PAUSED: u8 = 4;
pub const TS_PAUSEDW: u8 = 5;

pub const TF_DEAD: u8 = 1; // thread has exited or been killed
pub const TF_USER: u8 = 2; // thread is executing in user mode

pub const FV_PAGE: u8 = 1; // page fault
pub const FV_ACCS: u8 = 2; // access violation other than a page fault

/* thread information record ************************************************/

/// Saved register file as exchanged with user space.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TRegs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    /// FXSAVE area (FPU/SSE state).
    pub fxdata: [u8; 512],
}

impl TRegs {
    pub const fn zeroed() -> Self {
        TRegs {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
            fxdata: [0; 512],
        }
    }
}

/// Thread information record, exchanged via GETSTATE/SETSTATE/SPAWN/REAP.
///
/// An exiting thread's status rides in `regs.rax` of the snapshot captured
/// at REAP time; there is no separate exit-status channel.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TInfo {
    pub id: i32,
    pub pctx: i32,

    pub state: u8,
    pub flags: u8,
    /// Event being waited on; meaningful only in the WAITING and
    /// PAUSED_WAITING states.
    pub event: u8,
    pub fault: u8,

    pub fault_reserved: [u8; 4],
    /// Faulting linear address, valid when `fault == FV_PAGE`.
    pub fault_addr: u64,

    pub sched_priority: i8,
    pub sched_flags: i8,
    pub sched_reserved: [u8; 2],
    /// Number of timer preemptions this thread has absorbed.
    pub sched_ticks: u32,

    /// Saved user-mode continuation while the thread is in its supervisor.
    pub usr_ip: u64,
    pub usr_sp: u64,

    pub regs: TRegs,
}

impl TInfo {
    pub const fn zeroed() -> Self {
        TInfo {
            id: 0,
            pctx: 0,
            state: 0,
            flags: 0,
            event: 0,
            fault: 0,
            fault_reserved: [0; 4],
            fault_addr: 0,
            sched_priority: 0,
            sched_flags: 0,
            sched_reserved: [0; 2],
            sched_ticks: 0,
            usr_ip: 0,
            usr_sp: 0,
            regs: TRegs::zeroed(),
        }
    }
}
