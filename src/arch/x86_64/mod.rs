//! x86-64 privileged layer: GDT/TSS, IDT and trap stubs, the 8259 PIC pair,
//! and the 8253 PIT.

pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod trap;

use x86_64::instructions::interrupts;
use x86_64::instructions::tlb;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;
use x86_64::{PhysAddr, VirtAddr};

// Fixed by the GDT layout in `gdt.rs`; `gdt::init` checks they agree.
pub const KERNEL_CS: u64 = 0x08;
pub const KERNEL_SS: u64 = 0x10;
pub const USER_SS: u64 = 0x1B;
pub const USER_CS: u64 = 0x23;

pub fn irq_mask(line: u8) {
    pic::mask(line);
}

pub fn irq_unmask(line: u8) {
    pic::unmask(line);
}

pub fn flush_page(addr: u64) {
    tlb::flush(VirtAddr::new(addr));
}

pub fn flush_all() {
    tlb::flush_all();
}

pub fn load_root(root: PhysAddr) {
    let frame = PhysFrame::containing_address(root);
    unsafe { Cr3::write(frame, Cr3Flags::empty()) };
}

/// Wait for interrupts forever. Trap handlers resume threads directly, so
/// control only stays here while nothing is runnable.
pub fn idle() -> ! {
    loop {
        interrupts::enable_and_hlt();
    }
}
