//! Physical frame pool.
//!
//! One contiguous region of 4 KiB frames, a free-list stack, and a per-frame
//! reference count covering page-table mappings and explicit user holds.
//! Frame contents are reached through a fixed virtual window over the region
//! (the boot physical-memory mapping on bare metal, the backing allocation
//! itself on hosted builds), so the same walking and teardown code runs in
//! both worlds.
//!
//! Reference-count meanings:
//!   - `alloc` hands out a frame with one reference (kernel-owned tables,
//!     context roots).
//!   - `alloc_floating` hands out a frame with zero references: reserved but
//!     unowned, the NEWFRAME contract. Mapping it takes the first reference.
//!   - `release` at zero or one reference returns the frame to the free
//!     list; above that it just drops one reference (alias removal).

use alloc::boxed::Box;
use alloc::vec::Vec;

use x86_64::structures::paging::PageTable;
use x86_64::PhysAddr;

use crate::kcall::abi::KcallError;

pub const FRAME_SIZE: usize = 4096;

/// Refcount sentinel for frames sitting in the free list.
const REF_FREE: u16 = u16::MAX;

/// 4 KiB-aligned backing storage unit for hosted pools.
#[repr(C, align(4096))]
pub struct RawFrame(pub [u8; FRAME_SIZE]);

pub struct FramePool {
    /// Kernel-visible mapping of the managed region.
    virt_base: *mut u8,
    /// Physical address of the first managed frame.
    phys_base: u64,
    refs: Vec<u16>,
    free: Vec<u32>,
}

// The pool is only ever touched in trap context under the kernel lock; the
// raw window pointer does not escape.
unsafe impl Send for FramePool {}

impl FramePool {
    /// Manage `count` frames starting at `phys_base`, reachable at
    /// `virt_base`.
    ///
    /// # Safety
    /// The region must be unused RAM, exclusively owned by the pool, and
    /// mapped read/write at `virt_base` for its whole extent.
    pub unsafe fn from_region(phys_base: u64, virt_base: *mut u8, count: usize) -> Self {
        crate::debug_info!(
            "frame pool: {} frames ({} KiB) at {:#x}",
            count,
            count * FRAME_SIZE / 1024,
            phys_base
        );
        FramePool {
            virt_base,
            phys_base,
            refs: (0..count).map(|_| REF_FREE).collect(),
            // Reversed so allocation hands out low frames first.
            free: (0..count as u32).rev().collect(),
        }
    }

    /// Hosted pool over a leaked aligned allocation; physical addresses are
    /// the allocation's own addresses, so translation is the identity.
    pub fn with_capacity(count: usize) -> Self {
        let storage: Box<[RawFrame]> = (0..count).map(|_| RawFrame([0; FRAME_SIZE])).collect();
        let region: &'static mut [RawFrame] = Box::leak(storage);
        let virt_base = region.as_mut_ptr() as *mut u8;
        unsafe { Self::from_region(virt_base as u64, virt_base, count) }
    }

    fn index_of(&self, frame: PhysAddr) -> Option<usize> {
        let addr = frame.as_u64();
        if addr < self.phys_base || addr % FRAME_SIZE as u64 != 0 {
            return None;
        }
        let index = ((addr - self.phys_base) / FRAME_SIZE as u64) as usize;
        if index < self.refs.len() {
            Some(index)
        } else {
            None
        }
    }

    fn addr_of(&self, index: usize) -> PhysAddr {
        PhysAddr::new(self.phys_base + (index * FRAME_SIZE) as u64)
    }

    /// True if `frame` names a managed frame (allocated or free).
    pub fn contains(&self, frame: PhysAddr) -> bool {
        self.index_of(frame).is_some()
    }

    /// Take a frame with one reference. Returns `None` when the pool is dry.
    pub fn alloc(&mut self) -> Option<PhysAddr> {
        let index = self.free.pop()? as usize;
        self.refs[index] = 1;
        Some(self.addr_of(index))
    }

    /// Take a frame with zero references (the NEWFRAME contract).
    pub fn alloc_floating(&mut self) -> Option<PhysAddr> {
        let index = self.free.pop()? as usize;
        self.refs[index] = 0;
        Some(self.addr_of(index))
    }

    /// Add a reference to an allocated frame.
    pub fn retain(&mut self, frame: PhysAddr) -> Result<(), KcallError> {
        let index = self.index_of(frame).ok_or(KcallError::Exist)?;
        match self.refs[index] {
            REF_FREE => Err(KcallError::Exist),
            n if n >= REF_FREE - 1 => Err(KcallError::Resrc),
            n => {
                self.refs[index] = n + 1;
                Ok(())
            }
        }
    }

    /// Drop a reference; at zero or one the frame goes back to the free
    /// list. Releasing a free frame is an error (double free).
    pub fn release(&mut self, frame: PhysAddr) -> Result<(), KcallError> {
        let index = self.index_of(frame).ok_or(KcallError::Exist)?;
        match self.refs[index] {
            REF_FREE => Err(KcallError::Exist),
            0 | 1 => {
                self.refs[index] = REF_FREE;
                self.free.push(index as u32);
                Ok(())
            }
            n => {
                self.refs[index] = n - 1;
                Ok(())
            }
        }
    }

    /// Current reference count of an allocated frame.
    pub fn refcount(&self, frame: PhysAddr) -> Option<u16> {
        let index = self.index_of(frame)?;
        match self.refs[index] {
            REF_FREE => None,
            n => Some(n),
        }
    }

    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    pub fn total_frames(&self) -> usize {
        self.refs.len()
    }

    /// Raw window pointer to a managed frame's memory.
    ///
    /// Panics on an unmanaged address: callers pass addresses that came out
    /// of this pool.
    pub fn frame_ptr(&self, frame: PhysAddr) -> *mut u8 {
        match self.index_of(frame) {
            Some(index) => unsafe { self.virt_base.add(index * FRAME_SIZE) },
            None => panic!("frame {:#x}: not managed by the pool", frame.as_u64()),
        }
    }

    /// View a managed frame as a page table.
    ///
    /// # Safety
    /// The caller must ensure the frame actually holds a page table and that
    /// no other live reference to the same frame exists. The lifetime is the
    /// caller's claim, not the borrow checker's.
    pub unsafe fn table_mut<'a>(&self, frame: PhysAddr) -> &'a mut PageTable {
        &mut *(self.frame_ptr(frame) as *mut PageTable)
    }

    pub fn zero_frame(&mut self, frame: PhysAddr) {
        unsafe {
            core::ptr::write_bytes(self.frame_ptr(frame), 0, FRAME_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_release_round_trip() {
        let mut pool = FramePool::with_capacity(4);
        assert_eq!(pool.free_frames(), 4);

        let f = pool.alloc().unwrap();
        assert_eq!(pool.refcount(f), Some(1));
        assert_eq!(pool.free_frames(), 3);

        pool.release(f).unwrap();
        assert_eq!(pool.refcount(f), None);
        assert_eq!(pool.free_frames(), 4);
    }

    #[test]
    fn floating_frames_return_on_first_release() {
        let mut pool = FramePool::with_capacity(2);
        let f = pool.alloc_floating().unwrap();
        assert_eq!(pool.refcount(f), Some(0));
        pool.release(f).unwrap();
        assert_eq!(pool.free_frames(), 2);
    }

    #[test]
    fn aliased_frames_need_every_release() {
        let mut pool = FramePool::with_capacity(2);
        let f = pool.alloc().unwrap();
        pool.retain(f).unwrap();
        pool.release(f).unwrap();
        assert_eq!(pool.refcount(f), Some(1));
        pool.release(f).unwrap();
        assert_eq!(pool.refcount(f), None);
    }

    #[test]
    fn double_free_is_an_error() {
        let mut pool = FramePool::with_capacity(2);
        let f = pool.alloc().unwrap();
        pool.release(f).unwrap();
        assert_eq!(pool.release(f), Err(KcallError::Exist));
    }

    #[test]
    fn unmanaged_addresses_are_rejected() {
        let mut pool = FramePool::with_capacity(2);
        assert_eq!(pool.retain(PhysAddr::new(0x42)), Err(KcallError::Exist));
        assert!(!pool.contains(PhysAddr::new(0x42)));
    }
}
