//! IDT construction.
//!
//! All vectors point at the raw trap stubs; the typed handler signatures of
//! the `x86_64` crate are bypassed because the router needs the complete
//! register file in the TCB, not just the interrupt frame. Vector 0x81 is
//! the kernel-call gate and is callable from user privilege.

use lazy_static::lazy_static;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::PrivilegeLevel;

use super::trap;
use crate::kcall::abi::KCALL_VECTOR;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        unsafe {
            idt.divide_error.set_handler_addr(trap::stub_addr(0));
            idt.debug.set_handler_addr(trap::stub_addr(1));
            idt.non_maskable_interrupt.set_handler_addr(trap::stub_addr(2));
            idt.breakpoint.set_handler_addr(trap::stub_addr(3));
            idt.overflow.set_handler_addr(trap::stub_addr(4));
            idt.bound_range_exceeded.set_handler_addr(trap::stub_addr(5));
            idt.invalid_opcode.set_handler_addr(trap::stub_addr(6));
            idt.device_not_available.set_handler_addr(trap::stub_addr(7));
            idt.double_fault.set_handler_addr(trap::stub_addr(8));
            idt.invalid_tss.set_handler_addr(trap::stub_addr(10));
            idt.segment_not_present.set_handler_addr(trap::stub_addr(11));
            idt.stack_segment_fault.set_handler_addr(trap::stub_addr(12));
            idt.general_protection_fault.set_handler_addr(trap::stub_addr(13));
            idt.page_fault.set_handler_addr(trap::stub_addr(14));
            idt.x87_floating_point.set_handler_addr(trap::stub_addr(16));
            idt.alignment_check.set_handler_addr(trap::stub_addr(17));
            idt.machine_check.set_handler_addr(trap::stub_addr(18));
            idt.simd_floating_point.set_handler_addr(trap::stub_addr(19));

            for irq in 0..16u8 {
                let vector = super::pic::PIC_BASE + irq;
                idt[vector as usize].set_handler_addr(trap::stub_addr(vector));
            }

            idt[KCALL_VECTOR as usize]
                .set_handler_addr(trap::stub_addr(KCALL_VECTOR))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }
        idt
    };
}

pub fn init() {
    IDT.load();
    crate::debug_info!("IDT loaded");
}
