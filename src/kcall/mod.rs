//! Kernel-call dispatcher.
//!
//! The only interface usable from user mode: a trap on vector 0x81 with the
//! call id in the saved `rax` and arguments in `rdi`/`rsi`/`rdx`. Every call
//! validates its arguments before touching shared state; results and error
//! codes are written back into the caller's saved `rax`.
//!
//! A trap from a thread whose TF_USER flag is set is not a call at all: it
//! is the user half of the split continuation handing control to the
//! thread's supervisor layer (`sys_ip`/`sys_sp`). SYSRET is the way back.

pub mod abi;

use abi::{KcallError, TInfo};

use crate::arch;
use crate::debug_warn;
use crate::kernel::Kernel;
use crate::mm::pctx::PCTX_COUNT;
use crate::thread::event::{EV_COUNT, IRQ_EVENTS};
use crate::thread::tcb::{FaultKind, ThreadFlags, ThreadState, Tid};

fn encode(result: Result<(), KcallError>) -> u64 {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}

impl Kernel {
    /// Entry for a trap on the kernel-call vector from `caller`.
    pub(crate) fn kcall(&mut self, caller: Tid) {
        if self.threads.must(caller).flags.contains(ThreadFlags::USER) {
            self.enter_supervisor(caller);
            return;
        }

        let frame = &self.threads.must(caller).frame;
        let (id, a0, a1, a2) = (frame.rax, frame.rdi, frame.rsi, frame.rdx);

        // `None` means the call blocked or already delivered into `rax`
        // itself; the saved register must not be overwritten.
        if let Some(result) = self.dispatch(caller, id, a0, a1, a2) {
            self.threads.must_mut(caller).frame.rax = result;
        }
    }

    fn dispatch(&mut self, caller: Tid, id: u64, a0: u64, a1: u64, _a2: u64) -> Option<u64> {
        match id {
            abi::KCALL_SPAWN => Some(self.kcall_spawn(caller, a0)),
            abi::KCALL_GETTID => Some(caller.0 as u64),
            abi::KCALL_YIELD => {
                self.set_state(caller, ThreadState::Queued);
                Some(0)
            }
            abi::KCALL_PAUSE => Some(encode(self.kcall_pause(caller, a0))),
            abi::KCALL_RESUME => Some(encode(self.kcall_resume(caller, a0))),
            abi::KCALL_GETSTATE => Some(encode(self.kcall_getstate(caller, a0, a1))),
            abi::KCALL_SETSTATE => Some(encode(self.kcall_setstate(caller, a0, a1))),
            abi::KCALL_GETFAULT => self.consume_fault(caller).map(|tid| tid.0 as u64),
            abi::KCALL_GETDEAD => self.consume_dead(caller).map(|tid| tid.0 as u64),
            abi::KCALL_REAP => Some(encode(self.kcall_reap(caller, a0, a1))),
            abi::KCALL_POST => Some(encode(self.kcall_post(a0, a1))),
            abi::KCALL_WAIT => self.kcall_wait(caller, a0),
            abi::KCALL_RESET => Some(encode(self.kcall_reset(a0))),
            abi::KCALL_SYSRET => self.kcall_sysret(caller),
            abi::KCALL_NEWPCTX => Some(match self.pctx_new() {
                Some(id) => id as u64,
                None => u64::MAX,
            }),
            abi::KCALL_FREEPCTX => Some(encode(if a0 < PCTX_COUNT as u64 {
                self.pctx_free(a0 as i32)
            } else {
                Err(KcallError::Exist)
            })),
            abi::KCALL_SETFRAME => Some(encode(self.page_set_frame(a0, a1))),
            abi::KCALL_SETFLAGS => Some(encode(self.page_set_flags(a0, a1))),
            abi::KCALL_GETFRAME => Some(match self.page_get(a0) {
                Ok((frame, _)) if frame != 0 => frame | (a0 & 0xFFF),
                _ => 0,
            }),
            abi::KCALL_GETFLAGS => Some(match self.page_get(a0) {
                Ok((_, flags)) => flags.bits(),
                Err(_) => 0,
            }),
            abi::KCALL_NEWFRAME => Some(match self.frames.alloc_floating() {
                Some(frame) => frame.as_u64(),
                None => u64::MAX,
            }),
            abi::KCALL_FREEFRAME => Some(encode(
                self.frame_arg(a0).and_then(|frame| self.frames.release(frame)),
            )),
            abi::KCALL_TAKEFRAME => Some(encode(
                self.frame_arg(a0).and_then(|frame| self.frames.retain(frame)),
            )),
            _ => {
                debug_warn!("thread {}: unimplemented kcall {:#x}", caller, id);
                Some(u64::MAX)
            }
        }
    }

    fn frame_arg(&self, raw: u64) -> Result<x86_64::PhysAddr, KcallError> {
        x86_64::PhysAddr::try_new(raw).map_err(|_| KcallError::Exist)
    }

    /* split user/supervisor continuation ***********************************/

    /// Kernel-call trap from user mode: park the user continuation and land
    /// in the thread's supervisor layer.
    fn enter_supervisor(&mut self, caller: Tid) {
        if self.threads.must(caller).sys_ip == 0 {
            // User thread with no supervisor entry; nothing can service the
            // call, so surface it like any other access violation.
            let tcb = self.threads.must_mut(caller);
            tcb.fault = FaultKind::Access;
            tcb.fault_addr = 0;
            self.set_state(caller, ThreadState::Paused);
            self.park_fault(caller);
            return;
        }
        let tcb = self.threads.must_mut(caller);
        tcb.usr_ip = tcb.frame.rip;
        tcb.usr_sp = tcb.frame.rsp;
        tcb.frame.rip = tcb.sys_ip;
        tcb.frame.rsp = tcb.sys_sp;
        tcb.flags.remove(ThreadFlags::USER);
    }

    /// SYSRET: resume the parked user continuation. Registers other than
    /// `rip`/`rsp` pass through untouched, so the supervisor hands results
    /// to its user code in whatever registers it likes.
    fn kcall_sysret(&mut self, caller: Tid) -> Option<u64> {
        let tcb = self.threads.must_mut(caller);
        if tcb.usr_ip == 0 {
            return Some(KcallError::State.code());
        }
        tcb.frame.rip = tcb.usr_ip;
        tcb.frame.rsp = tcb.usr_sp;
        tcb.flags.insert(ThreadFlags::USER);
        None
    }

    /* threading calls ******************************************************/

    fn kcall_spawn(&mut self, caller: Tid, state_ptr: u64) -> u64 {
        let pctx = self.threads.must(caller).pctx;
        let info: TInfo = match self.read_user(pctx, state_ptr) {
            Ok(info) => info,
            Err(_) => return u64::MAX,
        };
        if !self.pctxs.exists(info.pctx) {
            return u64::MAX;
        }
        let tid = match self.threads.alloc() {
            Some(tid) => tid,
            None => {
                debug_warn!("spawn: thread table full");
                return u64::MAX;
            }
        };
        let tcb = self.threads.must_mut(tid);
        tcb.load_regs(&info.regs);
        tcb.frame.rflags |= 0x202;
        tcb.frame.cs = arch::USER_CS;
        tcb.frame.ss = arch::USER_SS;
        tcb.usr_ip = info.usr_ip;
        tcb.usr_sp = info.usr_sp;
        // The spawned continuation is the supervisor side; user mode is
        // entered later via SYSRET.
        tcb.sys_ip = info.regs.rip;
        tcb.sys_sp = info.regs.rsp;
        tcb.pctx = info.pctx;
        tcb.flags = ThreadFlags::from_bits(info.flags & abi::TF_USER);
        self.set_state(tid, ThreadState::Queued);
        tid.0 as u64
    }

    fn kcall_pause(&mut self, caller: Tid, raw: u64) -> Result<(), KcallError> {
        let target = self.target(caller, raw)?;
        match self.threads.must(target).state {
            ThreadState::Running | ThreadState::Queued => {
                self.set_state(target, ThreadState::Paused);
                Ok(())
            }
            ThreadState::Waiting => {
                self.set_state(target, ThreadState::PausedWaiting);
                Ok(())
            }
            ThreadState::Paused | ThreadState::PausedWaiting => Err(KcallError::State),
        }
    }

    fn kcall_resume(&mut self, caller: Tid, raw: u64) -> Result<(), KcallError> {
        let target = self.target(caller, raw)?;
        self.resume_thread(target)
    }

    /// A thread may inspect itself; anyone else must be paused first.
    fn state_access(&self, caller: Tid, raw: u64) -> Result<Tid, KcallError> {
        let target = self.target(caller, raw)?;
        if target == caller {
            return Ok(target);
        }
        match self.threads.must(target).state {
            ThreadState::Paused | ThreadState::PausedWaiting => Ok(target),
            _ => Err(KcallError::State),
        }
    }

    fn snapshot(&self, tid: Tid) -> TInfo {
        let tcb = self.threads.must(tid);
        let mut info = TInfo::zeroed();
        info.id = tcb.id.0;
        info.pctx = tcb.pctx;
        info.state = tcb.state.to_wire();
        info.flags = tcb.flags.bits();
        info.event = tcb.event.unwrap_or(0);
        info.fault = tcb.fault as u8;
        info.fault_addr = tcb.fault_addr;
        info.sched_ticks = tcb.tick as u32;
        info.usr_ip = tcb.usr_ip;
        info.usr_sp = tcb.usr_sp;
        info.regs = tcb.save_regs();
        info
    }

    fn kcall_getstate(&mut self, caller: Tid, raw: u64, buf: u64) -> Result<(), KcallError> {
        let target = self.state_access(caller, raw)?;
        let info = self.snapshot(target);
        let pctx = self.threads.must(caller).pctx;
        self.write_user(pctx, buf, &info)
    }

    fn kcall_setstate(&mut self, caller: Tid, raw: u64, buf: u64) -> Result<(), KcallError> {
        let target = self.state_access(caller, raw)?;
        let pctx = self.threads.must(caller).pctx;
        let info: TInfo = self.read_user(pctx, buf)?;

        if info.pctx != self.threads.must(target).pctx {
            if !self.pctxs.exists(info.pctx) {
                return Err(KcallError::Exist);
            }
            self.threads.must_mut(target).pctx = info.pctx;
            // A RUNNING thread's context is the loaded one; re-targeting
            // the caller itself takes effect now, not at the next switch.
            if target == caller {
                self.pctx_load(info.pctx);
            }
        }

        let tcb = self.threads.must_mut(target);
        tcb.load_regs(&info.regs);
        tcb.usr_ip = info.usr_ip;
        tcb.usr_sp = info.usr_sp;
        if info.flags & abi::TF_USER != 0 {
            tcb.flags.insert(ThreadFlags::USER);
        } else {
            tcb.flags.remove(ThreadFlags::USER);
        }

        // The DEAD flag is a one-way door: setting it routes the target to
        // the dead queue; it is never cleared from here.
        if info.flags & abi::TF_DEAD != 0 {
            self.kill(target);
        }
        Ok(())
    }

    fn kcall_reap(&mut self, caller: Tid, raw: u64, buf: u64) -> Result<(), KcallError> {
        let target = self.target(caller, raw)?;
        if self.threads.must(target).state != ThreadState::Paused {
            return Err(KcallError::State);
        }
        if buf != 0 {
            let info = self.snapshot(target);
            let pctx = self.threads.must(caller).pctx;
            self.write_user(pctx, buf, &info)?;
        }
        self.destroy(target);
        Ok(())
    }

    /* event calls **********************************************************/

    fn kcall_post(&mut self, event: u64, payload: u64) -> Result<(), KcallError> {
        if event >= EV_COUNT as u64 || event < IRQ_EVENTS as u64 {
            // IRQ-latched slots have exactly one producer, the interrupt
            // router; a post there would let user code forge a hardware
            // delivery.
            return Err(KcallError::Exist);
        }
        self.event_post(event as u8, payload);
        Ok(())
    }

    fn kcall_wait(&mut self, caller: Tid, event: u64) -> Option<u64> {
        if event >= EV_COUNT as u64 {
            return Some(KcallError::Exist.code());
        }
        self.event_wait(caller, event as u8);
        None
    }

    fn kcall_reset(&mut self, event: u64) -> Result<(), KcallError> {
        if event >= EV_COUNT as u64 {
            return Err(KcallError::Exist);
        }
        self.event_reset(event as u8);
        Ok(())
    }
}
