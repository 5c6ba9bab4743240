//! GDT and TSS.
//!
//! The layout is fixed so the selector values are compile-time constants
//! elsewhere in the kernel: kernel code 0x08, kernel data 0x10, user data
//! 0x1B, user code 0x23, then the TSS. The TSS only supplies the stack the
//! CPU switches to on a trap from user mode; there is no hardware task
//! switching.

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

/// Kernel stack used for every trap out of user mode.
const TRAP_STACK_SIZE: usize = 4096 * 16;
static mut TRAP_STACK: [u8; TRAP_STACK_SIZE] = [0; TRAP_STACK_SIZE];

struct Selectors {
    kernel_code: SegmentSelector,
    kernel_data: SegmentSelector,
    user_data: SegmentSelector,
    user_code: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.privilege_stack_table[0] = {
            let start = VirtAddr::from_ptr(unsafe { core::ptr::addr_of!(TRAP_STACK) });
            start + TRAP_STACK_SIZE
        };
        tss
    };
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.add_entry(Descriptor::kernel_code_segment());
        let kernel_data = gdt.add_entry(Descriptor::kernel_data_segment());
        let user_data = gdt.add_entry(Descriptor::user_data_segment());
        let user_code = gdt.add_entry(Descriptor::user_code_segment());
        let tss = gdt.add_entry(Descriptor::tss_segment(&TSS));
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_data,
                user_code,
                tss,
            },
        )
    };
}

pub fn init() {
    GDT.0.load();
    let selectors = &GDT.1;
    assert_eq!(selectors.kernel_code.0 as u64, super::KERNEL_CS);
    assert_eq!(selectors.kernel_data.0 as u64, super::KERNEL_SS);
    assert_eq!(selectors.user_data.0 as u64, super::USER_SS);
    assert_eq!(selectors.user_code.0 as u64, super::USER_CS);
    unsafe {
        CS::set_reg(selectors.kernel_code);
        SS::set_reg(selectors.kernel_data);
        DS::set_reg(selectors.kernel_data);
        ES::set_reg(selectors.kernel_data);
        load_tss(selectors.tss);
    }
    crate::debug_info!("GDT and TSS loaded");
}
