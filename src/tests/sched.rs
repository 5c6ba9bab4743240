//! Scheduler and thread-lifecycle scenarios.

use super::harness::*;
use crate::kcall::abi::{
    KCALL_PAUSE, KCALL_RESUME, KCALL_WAIT, KCALL_YIELD, TE_EXIST, TE_STATE,
};
use crate::thread::tcb::{ThreadState, Tid};

const MINUS_ONE: u64 = u64::MAX;

#[test]
fn yielding_threads_alternate() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    assert_eq!(k.schedule_tail(), Some(a));
    let mut order = Vec::new();
    for _ in 0..6 {
        let current = k.current().expect("nothing running");
        order.push(current);
        assert_eq!(kcall(&mut k, current, KCALL_YIELD, [0; 3]), 0);
    }
    assert_eq!(order, [a, b, a, b, a, b]);
    assert_invariants(&k);
}

#[test]
fn single_thread_reschedules_itself() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    assert_eq!(k.schedule_tail(), Some(a));
    kcall(&mut k, a, KCALL_YIELD, [0; 3]);
    assert_eq!(k.current(), Some(a));
}

#[test]
fn timer_preempts_round_robin() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);
    assert_eq!(k.schedule_tail(), Some(a));

    tick(&mut k);
    assert_eq!(k.current(), Some(b));
    assert_eq!(k.threads.must(a).tick, 1);

    tick(&mut k);
    assert_eq!(k.current(), Some(a));
    assert_eq!(k.threads.must(b).tick, 1);

    // Each preemption costs exactly one tick on the preempted thread.
    for _ in 0..10 {
        tick(&mut k);
    }
    assert_eq!(k.threads.must(a).tick + k.threads.must(b).tick, 12);
    assert_eq!(k.ticks(), 12);
    assert_invariants(&k);
}

#[test]
fn timer_with_nothing_running_just_counts() {
    let mut k = boot(8);
    tick(&mut k);
    tick(&mut k);
    assert_eq!(k.ticks(), 2);
    assert_eq!(k.current(), None);
}

#[test]
fn pause_of_paused_thread_is_rejected() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);
    let c = spawn(&mut k);

    assert_eq!(kcall(&mut k, a, KCALL_PAUSE, [b.0 as u64, 0, 0]), 0);
    assert_eq!(k.threads.must(b).state, ThreadState::Paused);

    // Second pause fails with TE_STATE and must not corrupt the run queue.
    assert_eq!(kcall(&mut k, a, KCALL_PAUSE, [b.0 as u64, 0, 0]), TE_STATE);
    let queued: Vec<Tid> = k.run_queue.iter().collect();
    assert_eq!(queued, [c]);
    assert_invariants(&k);
}

#[test]
fn pause_resume_round_trips_queued() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    kcall(&mut k, a, KCALL_PAUSE, [b.0 as u64, 0, 0]);
    assert_eq!(k.threads.must(b).state, ThreadState::Paused);
    assert_eq!(kcall(&mut k, a, KCALL_RESUME, [b.0 as u64, 0, 0]), 0);
    assert_eq!(k.threads.must(b).state, ThreadState::Queued);
    assert_invariants(&k);
}

#[test]
fn pause_resume_round_trips_waiting() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    kcall(&mut k, b, KCALL_WAIT, [200, 0, 0]);
    assert_eq!(k.threads.must(b).state, ThreadState::Waiting);

    kcall(&mut k, a, KCALL_PAUSE, [b.0 as u64, 0, 0]);
    assert_eq!(k.threads.must(b).state, ThreadState::PausedWaiting);
    assert_eq!(k.threads.must(b).event, Some(200));

    kcall(&mut k, a, KCALL_RESUME, [b.0 as u64, 0, 0]);
    assert_eq!(k.threads.must(b).state, ThreadState::Waiting);
    assert_invariants(&k);
}

#[test]
fn pause_self_blocks_caller() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);

    kcall(&mut k, a, KCALL_PAUSE, [MINUS_ONE, 0, 0]);
    assert_eq!(k.threads.must(a).state, ThreadState::Paused);
    assert_eq!(k.current(), Some(b));
}

#[test]
fn pause_and_resume_of_missing_thread() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    assert_eq!(kcall(&mut k, a, KCALL_PAUSE, [17, 0, 0]), TE_EXIST);
    assert_eq!(kcall(&mut k, a, KCALL_RESUME, [17, 0, 0]), TE_EXIST);
    assert_eq!(kcall(&mut k, a, KCALL_PAUSE, [9999, 0, 0]), TE_EXIST);
}

#[test]
fn resume_of_runnable_thread_is_rejected() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    let b = spawn(&mut k);
    assert_eq!(kcall(&mut k, a, KCALL_RESUME, [b.0 as u64, 0, 0]), TE_STATE);
}

#[test]
#[should_panic(expected = "illegal transition")]
fn illegal_transition_panics_with_triple() {
    let mut k = boot(8);
    let a = spawn(&mut k);
    k.set_state(a, ThreadState::Paused);
    k.set_state(a, ThreadState::Running);
}
