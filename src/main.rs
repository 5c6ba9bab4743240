//! Bare-metal entry point.
//!
//! Boot order: debug output, kernel heap, frame pool from the boot memory
//! map, the kernel object (which builds paging context 0), kernel mappings
//! shared into context 0, GDT/IDT/PIC/PIT, then idle. Loading the first
//! system image is outside the kernel core; until a loader hands us one,
//! the machine services interrupts and nothing else.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use bootloader_api::config::{BootloaderConfig, Mapping};
    use bootloader_api::info::MemoryRegionKind;
    use bootloader_api::{entry_point, BootInfo};
    use x86_64::registers::control::Cr3;
    use x86_64::structures::paging::PageTable;

    use quantos::arch::x86_64::{gdt, idt, pic, pit};
    use quantos::kernel::{self, Kernel, TIMER_HZ};
    use quantos::mm::{heap, FramePool, FRAME_SIZE};
    use quantos::{debug_error, debug_info, debug_warn};

    /// Bound on the managed region so the pool's metadata stays small.
    const MAX_POOL_FRAMES: usize = 32768; // 128 MiB

    pub static BOOTLOADER_CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        // The kernel reaches page tables and pool frames through this
        // mapping of all physical memory.
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        quantos::debug::init();
        debug_info!("=== QuantOS kernel starting ===");

        heap::init();

        let phys_offset = match boot_info.physical_memory_offset.into_option() {
            Some(offset) => offset,
            None => panic!("bootloader provided no physical-memory mapping"),
        };

        // The largest usable region backs the frame pool.
        let region = boot_info
            .memory_regions
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .max_by_key(|r| r.end - r.start);
        let region = match region {
            Some(region) => region,
            None => panic!("no usable memory region in the boot map"),
        };
        let start = (region.start + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1);
        let count = (((region.end - start) / FRAME_SIZE as u64) as usize).min(MAX_POOL_FRAMES);
        let pool = unsafe { FramePool::from_region(start, (phys_offset + start) as *mut u8, count) };

        let mut kern = Kernel::new(pool);

        // Context 0 inherits the boot kernel mappings, then takes over CR3.
        let (boot_l4, _) = Cr3::read();
        let boot_table =
            unsafe { &*((phys_offset + boot_l4.start_address().as_u64()) as *const PageTable) };
        unsafe { kern.adopt_kernel_mappings(boot_table) };

        gdt::init();
        idt::init();
        pic::init();
        if !pit::set_frequency(TIMER_HZ as u32) {
            panic!("PIT cannot run at {} Hz", TIMER_HZ);
        }

        kern.pctx_load(0);
        kernel::init_global(kern);

        debug_warn!("no system image loader configured; idling");
        quantos::arch::idle();
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        debug_error!("KERNEL PANIC: {}", info);
        loop {
            x86_64::instructions::interrupts::disable();
            x86_64::instructions::hlt();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("quantos only runs on bare metal; use `cargo test` for the core test suite");
}
