//! Event-subsystem scenarios: FIFO pairing, IRQ latching, virtual timers.

use super::harness::*;
use crate::kcall::abi::{KCALL_POST, KCALL_RESET, KCALL_WAIT, TE_EXIST};
use crate::thread::event::{ev_vtimer, EV_PENDING_MAX};
use crate::thread::tcb::ThreadState;
use crate::Trap;

#[test]
fn post_wakes_waiter_with_payload() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    kcall(&mut k, a, KCALL_WAIT, [100, 0, 0]);
    assert_eq!(k.threads.must(a).state, ThreadState::Waiting);
    assert_eq!(k.threads.must(a).event, Some(100));

    assert_eq!(kcall(&mut k, b, KCALL_POST, [100, 0xDEAD, 0]), 0);

    let tcb = k.threads.must(a);
    assert_eq!(tcb.state, ThreadState::Queued);
    assert_eq!(tcb.frame.rax, 100);
    assert_eq!(tcb.frame.rdi, 0xDEAD);
    assert_eq!(tcb.event, None);

    assert_eq!(k.events.waiter_count(100), 0);
    assert_eq!(k.events.pending_count(100), 0);
    assert!(!k.events.is_latched(100));
    assert_invariants(&k);
}

#[test]
fn waiters_wake_in_fifo_order() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);
    let c = spawn(&mut k);
    let d = spawn(&mut k);

    for &waiter in &[a, b, c] {
        kcall(&mut k, waiter, KCALL_WAIT, [200, 0, 0]);
    }
    assert_eq!(k.events.waiter_count(200), 3);

    for (i, &waiter) in [a, b, c].iter().enumerate() {
        kcall(&mut k, d, KCALL_POST, [200, 100 + i as u64, 0]);
        let tcb = k.threads.must(waiter);
        assert_eq!(tcb.state, ThreadState::Queued);
        assert_eq!(tcb.frame.rdi, 100 + i as u64);
    }
    assert_invariants(&k);
}

#[test]
fn posts_are_consumed_in_fifo_order() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    for payload in [1u64, 2, 3] {
        kcall(&mut k, b, KCALL_POST, [200, payload, 0]);
    }
    assert_eq!(k.events.pending_count(200), 3);

    // Each wait is satisfied immediately by the oldest post.
    for payload in [1u64, 2, 3] {
        let rax = kcall(&mut k, a, KCALL_WAIT, [200, 0, 0]);
        assert_eq!(rax, 200);
        assert_eq!(k.threads.must(a).frame.rdi, payload);
        assert_eq!(k.threads.must(a).state, ThreadState::Queued);
    }
    assert_eq!(k.events.pending_count(200), 0);
    assert_invariants(&k);
}

#[test]
fn irq_arrivals_collapse_into_one_latch() {
    let mut k = boot(8);
    let a = spawn(&mut k);

    for _ in 0..5 {
        k.handle_trap(Trap::Irq(3));
    }
    assert!(k.events.is_latched(3));
    assert_eq!(k.events.pending_count(3), 0);

    // One wait consumes the whole burst; as the only thread it is put
    // straight back on the CPU.
    let rax = kcall(&mut k, a, KCALL_WAIT, [3, 0, 0]);
    assert_eq!(rax, 3);
    assert_eq!(k.threads.must(a).state, ThreadState::Running);
    assert!(!k.events.is_latched(3));

    // The next wait blocks: the latch is gone.
    kcall(&mut k, a, KCALL_WAIT, [3, 0, 0]);
    assert_eq!(k.threads.must(a).state, ThreadState::Waiting);

    // A fresh IRQ delivers directly, and the scheduling tail puts the only
    // runnable thread straight back on the CPU.
    k.handle_trap(Trap::Irq(3));
    assert_eq!(k.threads.must(a).state, ThreadState::Running);
    assert_eq!(k.threads.must(a).frame.rax, 3);
    assert_invariants(&k);
}

#[test]
fn reset_clears_the_latch() {
    let mut k = boot(8);
    let a = spawn(&mut k);

    k.handle_trap(Trap::Irq(4));
    assert!(k.events.is_latched(4));
    assert_eq!(kcall(&mut k, a, KCALL_RESET, [4, 0, 0]), 0);
    assert!(!k.events.is_latched(4));
}

#[test]
fn wait_and_reset_reject_bad_event_ids() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    assert_eq!(kcall(&mut k, a, KCALL_WAIT, [256, 0, 0]), TE_EXIST);
    assert_eq!(kcall(&mut k, a, KCALL_RESET, [4096, 0, 0]), TE_EXIST);
    assert_eq!(kcall(&mut k, a, KCALL_POST, [300, 0, 0]), TE_EXIST);
    assert_eq!(k.threads.must(a).state, ThreadState::Running);
}

#[test]
fn posting_into_the_irq_range_is_rejected() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    // A thread waiting on a hardware line must only ever see the router's
    // 0-payload delivery, so user posts are kept out of the latched range.
    kcall(&mut k, a, KCALL_WAIT, [3, 0, 0]);
    assert_eq!(kcall(&mut k, b, KCALL_POST, [3, 0xDEAD, 0]), TE_EXIST);
    assert_eq!(k.threads.must(a).state, ThreadState::Waiting);
    assert!(!k.events.is_latched(3));

    k.handle_trap(Trap::Irq(3));
    let tcb = k.threads.must(a);
    assert_eq!(tcb.frame.rax, 3);
    assert_eq!(tcb.frame.rdi, 0);
    assert_invariants(&k);
}

#[test]
fn pending_posts_are_bounded() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    for payload in 0..(EV_PENDING_MAX as u64 + 8) {
        kcall(&mut k, a, KCALL_POST, [200, payload, 0]);
    }
    assert_eq!(k.events.pending_count(200), EV_PENDING_MAX);
}

#[test]
fn virtual_timers_fire_at_their_rates() {
    let mut k = boot(8);
    // One simulated second at 64 Hz.
    for _ in 0..64 {
        tick(&mut k);
    }
    // 32 Hz timer: one post per boundary crossing.
    assert_eq!(k.events.pending_count(ev_vtimer(10)), 32);
    // 1 Hz timer: exactly one.
    assert_eq!(k.events.pending_count(ev_vtimer(5)), 1);
    // 1/32 Hz timer: nothing yet.
    assert_eq!(k.events.pending_count(ev_vtimer(0)), 0);
}

#[test]
fn waiting_thread_wakes_on_virtual_timer() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    // Fastest virtual timer fires on every tick boundary at 64 Hz.
    kcall(&mut k, a, KCALL_WAIT, [ev_vtimer(15) as u64, 0, 0]);
    assert_eq!(k.threads.must(a).state, ThreadState::Waiting);
    tick(&mut k);
    assert_eq!(k.threads.must(a).state, ThreadState::Running);
    assert_eq!(k.threads.must(a).frame.rax, ev_vtimer(15) as u64);
    assert_invariants(&k);
}
