//! Hosted stand-ins for the privileged layer.
//!
//! On anything that is not bare metal there is no PIC, no CR3 and no TLB;
//! the core still calls through the same names, so tests exercise the exact
//! code paths that run on hardware.

use x86_64::PhysAddr;

pub const KERNEL_CS: u64 = 0x08;
pub const KERNEL_SS: u64 = 0x10;
pub const USER_SS: u64 = 0x1B;
pub const USER_CS: u64 = 0x23;

pub fn irq_mask(_line: u8) {}

pub fn irq_unmask(_line: u8) {}

pub fn flush_page(_addr: u64) {}

pub fn flush_all() {}

pub fn load_root(_root: PhysAddr) {}

pub fn idle() -> ! {
    panic!("idle loop on a hosted build");
}
