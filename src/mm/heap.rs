//! Bare-metal kernel heap.
//!
//! A fixed region inside the kernel image, handed to `linked_list_allocator`
//! at boot. The heap only backs kernel bookkeeping (TCBs, queues, the frame
//! pool's metadata); user memory comes from the frame pool, never from
//! here. Hosted builds use the host allocator instead.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::Mutex;

use crate::debug_info;

pub const HEAP_SIZE: usize = 1024 * 1024;

static mut HEAP_SPACE: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub struct LockedHeap(Mutex<Option<linked_list_allocator::Heap>>);

impl LockedHeap {
    pub const fn empty() -> Self {
        LockedHeap(Mutex::new(None))
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.0.lock().as_mut() {
            Some(heap) => heap
                .allocate_first_fit(layout)
                .map(|ptr| ptr.as_ptr())
                .unwrap_or(ptr::null_mut()),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(heap) = self.0.lock().as_mut() {
            heap.deallocate(ptr::NonNull::new_unchecked(ptr), layout);
        }
    }
}

pub fn init() {
    let start = unsafe { core::ptr::addr_of_mut!(HEAP_SPACE) as *mut u8 };
    let mut heap = linked_list_allocator::Heap::empty();
    unsafe { heap.init(start, HEAP_SIZE) };
    *ALLOCATOR.0.lock() = Some(heap);
    debug_info!("kernel heap: {} KiB at {:p}", HEAP_SIZE / 1024, start);
}
