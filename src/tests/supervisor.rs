//! Fault-queue and dead-queue scenarios: the debugger/reaper rendezvous.

use super::harness::*;
use crate::kcall::abi::{
    self, KCALL_GETDEAD, KCALL_GETFAULT, KCALL_GETSTATE, KCALL_REAP, KCALL_RESUME,
    KCALL_SETSTATE, TE_STATE,
};
use crate::thread::tcb::{FaultKind, ThreadState};
use crate::Trap;

#[test]
fn fault_to_debugger_to_reaper_lifecycle() {
    let mut k = boot(32);
    let victim = spawn(&mut k);
    let debugger = spawn(&mut k);
    let reaper = spawn(&mut k);

    // The debugger needs a user buffer for GETSTATE/SETSTATE.
    let buf = 0x0040_0000u64;
    activate(&mut k, debugger);
    map_user_page(&mut k, buf);

    // Victim takes a page fault at a recognisable address.
    user_fault(&mut k, victim, 0x1234_5000);
    assert_eq!(k.threads.must(victim).state, ThreadState::Paused);
    assert!(k.faults.parked_contains(victim));

    // Debugger collects it and inspects the fault record.
    let got = kcall(&mut k, debugger, KCALL_GETFAULT, [0; 3]);
    assert_eq!(got, victim.0 as u64);
    assert_eq!(
        kcall(&mut k, debugger, KCALL_GETSTATE, [victim.0 as u64, buf, 0]),
        0
    );
    let info: abi::TInfo = k.read_user(0, buf).expect("getstate buffer");
    assert_eq!(info.id, victim.0);
    assert_eq!(info.fault, abi::FV_PAGE);
    assert_eq!(info.fault_addr, 0x1234_5000);
    assert_eq!(info.state, abi::TS_PAUSED);

    // Debugger gives up on it: mark dead with an exit status in rax.
    let mut patched = info;
    patched.flags |= abi::TF_DEAD;
    patched.regs.rax = 42;
    k.write_user(0, buf, &patched).expect("setstate buffer");
    assert_eq!(
        kcall(&mut k, debugger, KCALL_SETSTATE, [victim.0 as u64, buf, 0]),
        0
    );
    assert!(k.dead.parked_contains(victim));

    // Reaper collects and frees it, snapshotting the exit status.
    let got = kcall(&mut k, reaper, KCALL_GETDEAD, [0; 3]);
    assert_eq!(got, victim.0 as u64);
    let snap_buf = 0x0041_0000u64;
    activate(&mut k, reaper);
    map_user_page(&mut k, snap_buf);
    assert_eq!(
        kcall(&mut k, reaper, KCALL_REAP, [victim.0 as u64, snap_buf, 0]),
        0
    );
    let snapshot: abi::TInfo = k.read_user(0, snap_buf).expect("reap buffer");
    assert_eq!(snapshot.flags & abi::TF_DEAD, abi::TF_DEAD);
    assert_eq!(snapshot.regs.rax, 42);

    // The slot is FREE again and gets reused by the next spawn.
    assert!(k.threads.get(victim).is_none());
    let recycled = spawn(&mut k);
    assert_eq!(recycled, victim);
    assert_invariants(&k);
}

#[test]
fn getfault_blocks_until_a_fault_arrives() {
    let mut k = boot(8);
    let victim = spawn(&mut k);
    let debugger = spawn(&mut k);

    kcall(&mut k, debugger, KCALL_GETFAULT, [0; 3]);
    assert_eq!(k.threads.must(debugger).state, ThreadState::Paused);
    assert!(k.faults.consumer_contains(debugger));

    user_fault(&mut k, victim, 0xBAD0_0000);
    let tcb = k.threads.must(debugger);
    assert_eq!(tcb.frame.rax, victim.0 as u64);
    assert!(matches!(
        tcb.state,
        ThreadState::Queued | ThreadState::Running
    ));
    assert_eq!(k.faults.parked_count(), 0);
    assert_invariants(&k);
}

#[test]
fn getdead_blocks_until_a_thread_dies() {
    let mut k = boot(8);
    let victim = spawn(&mut k);
    let reaper = spawn(&mut k);

    kcall(&mut k, reaper, KCALL_GETDEAD, [0; 3]);
    assert_eq!(k.threads.must(reaper).state, ThreadState::Paused);

    activate(&mut k, victim);
    k.set_state(victim, ThreadState::Paused);
    k.kill(victim);

    assert_eq!(k.threads.must(reaper).frame.rax, victim.0 as u64);
    assert_eq!(k.dead.parked_count(), 0);
    assert_invariants(&k);
}

#[test]
fn resumed_debugger_is_no_longer_a_consumer() {
    let mut k = boot(8);
    let victim = spawn(&mut k);
    let debugger = spawn(&mut k);
    let other = spawn(&mut k);

    kcall(&mut k, debugger, KCALL_GETFAULT, [0; 3]);
    assert!(k.faults.consumer_contains(debugger));

    kcall(&mut k, other, KCALL_RESUME, [debugger.0 as u64, 0, 0]);
    assert!(!k.faults.consumer_contains(debugger));

    // A later fault parks instead of waking the cancelled consumer.
    user_fault(&mut k, victim, 0x5000);
    assert!(k.faults.parked_contains(victim));
    assert_invariants(&k);
}

#[test]
fn resumed_victim_leaves_the_fault_queue() {
    let mut k = boot(8);
    let victim = spawn(&mut k);
    let other = spawn(&mut k);

    user_fault(&mut k, victim, 0x5000);
    assert!(k.faults.parked_contains(victim));

    kcall(&mut k, other, KCALL_RESUME, [victim.0 as u64, 0, 0]);
    assert!(!k.faults.parked_contains(victim));
    assert_eq!(k.threads.must(victim).state, ThreadState::Queued);
    assert_invariants(&k);
}

#[test]
fn reap_requires_a_paused_target() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);
    assert_eq!(kcall(&mut k, a, KCALL_REAP, [b.0 as u64, 0, 0]), TE_STATE);
    assert!(k.threads.get(b).is_some());
}

#[test]
#[should_panic(expected = "illegal transition")]
fn dead_marking_a_runnable_thread_is_a_kernel_bug() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    // Still QUEUED: the lifecycle only allows dead-marking from RUNNING,
    // PAUSED or PAUSED_WAITING.
    k.kill(a);
}

#[test]
#[should_panic(expected = "illegal transition")]
fn dead_marking_a_waiting_thread_is_a_kernel_bug() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    kcall(&mut k, a, crate::kcall::abi::KCALL_WAIT, [200, 0, 0]);
    assert_eq!(k.threads.must(a).state, ThreadState::Waiting);
    k.kill(a);
}

#[test]
fn dead_threads_cannot_be_resumed() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    activate(&mut k, b);
    k.set_state(b, ThreadState::Paused);
    k.kill(b);
    assert_eq!(kcall(&mut k, a, KCALL_RESUME, [b.0 as u64, 0, 0]), TE_STATE);
}

#[test]
fn fault_kind_access_for_non_page_vectors() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    activate(&mut k, a);
    k.handle_trap(Trap::Fault {
        vector: 13,
        code: 0,
        addr: 0,
        kernel_mode: false,
    });
    let tcb = k.threads.must(a);
    assert_eq!(tcb.fault, FaultKind::Access);
    assert_eq!(tcb.fault_addr, 0);
    assert!(k.faults.parked_contains(a));
}

#[test]
#[should_panic(expected = "kernel fault")]
fn kernel_mode_faults_panic() {
    let mut k = boot(8);
    k.handle_trap(Trap::Fault {
        vector: 14,
        code: 0,
        addr: 0xFFFF_8000_0000_0000,
        kernel_mode: true,
    });
}
