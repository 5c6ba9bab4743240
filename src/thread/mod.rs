pub mod event;
pub mod run_queue;
pub mod supervisor;
pub mod table;
pub mod tcb;

pub use event::{ev_vtimer, EventTable, EV_COUNT, IRQ_EVENTS};
pub use run_queue::RunQueue;
pub use supervisor::SupervisorQueue;
pub use table::{ThreadTable, THREAD_COUNT};
pub use tcb::{FaultKind, Tcb, ThreadFlags, ThreadState, Tid, TrapFrame};
