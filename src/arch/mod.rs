//! Privileged-operation layer.
//!
//! Everything the core needs from the machine (PIC masking, TLB flushes,
//! CR3 loads, halting) crosses this boundary. Bare-metal builds get the
//! real x86-64 implementation; everything else gets the hosted stubs so the
//! core compiles and tests anywhere.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::{
    flush_all, flush_page, idle, irq_mask, irq_unmask, load_root, KERNEL_CS, KERNEL_SS, USER_CS,
    USER_SS,
};

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod host;
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub use host::*;
