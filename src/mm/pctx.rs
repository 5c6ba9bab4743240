//! Paging-context table.
//!
//! A paging context is one virtual address space: a top-level page table
//! (PML4) plus the transitive tables under its user half. Context 0 is the
//! kernel's own, created at boot and never freed. The user half (entries
//! 0..256) is private per context; the kernel half is shared by copying the
//! top-level entries from the current context at clone time, so every
//! context sees the same kernel. The last top-level entry refers back to the
//! top-level frame itself, giving each context the classic recursive window
//! onto its own tables.
//!
//! The kernel reaches any context's tables, current or not, through the
//! frame pool's window over physical memory; clone and teardown work on
//! contexts that are not loaded.

use alloc::vec::Vec;

use x86_64::structures::paging::PageTableFlags;
use x86_64::PhysAddr;

use crate::kcall::abi::KcallError;
use crate::kernel::Kernel;
use crate::mm::frame_pool::FramePool;
use crate::{arch, debug_trace, debug_warn};

/// Maximum number of concurrently allocated paging contexts.
pub const PCTX_COUNT: usize = 1024;

/// First top-level index of the shared kernel half.
pub const KERNEL_HALF_START: usize = 256;

/// Top-level slot holding the recursive self-reference.
pub const SELF_MAP_SLOT: usize = 511;

pub struct PctxTable {
    roots: Vec<Option<PhysAddr>>,
    active: i32,
}

impl PctxTable {
    /// Build the table with context 0 installed. Runs once at boot; an
    /// empty frame pool here is a boot bug, not a runtime condition.
    pub(crate) fn new(frames: &mut FramePool) -> Self {
        let root = match frames.alloc() {
            Some(frame) => frame,
            None => panic!("paging init: no frame for context 0"),
        };
        frames.zero_frame(root);
        let table = unsafe { frames.table_mut(root) };
        table[SELF_MAP_SLOT].set_addr(root, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);

        let mut roots: Vec<Option<PhysAddr>> = (0..PCTX_COUNT).map(|_| None).collect();
        roots[0] = Some(root);
        PctxTable { roots, active: 0 }
    }

    pub fn exists(&self, id: i32) -> bool {
        self.root_of(id).is_some()
    }

    pub fn root_of(&self, id: i32) -> Option<PhysAddr> {
        if id < 0 || id as usize >= PCTX_COUNT {
            return None;
        }
        self.roots[id as usize]
    }

    /// The currently loaded context.
    pub fn active(&self) -> i32 {
        self.active
    }

    fn find_free(&self) -> Option<usize> {
        self.roots.iter().position(|slot| slot.is_none())
    }
}

impl Kernel {
    /// Allocate a fresh context: user half empty, kernel half shared with
    /// the current context, self-reference installed. Returns the new id,
    /// or `None` when the table or the frame pool is exhausted.
    pub fn pctx_new(&mut self) -> Option<i32> {
        let slot = match self.pctxs.find_free() {
            Some(slot) => slot,
            None => {
                debug_warn!("newpctx: context table full");
                return None;
            }
        };
        let root = match self.frames.alloc() {
            Some(frame) => frame,
            None => {
                debug_warn!("newpctx: out of frames");
                return None;
            }
        };
        self.frames.zero_frame(root);

        let current = match self.pctxs.root_of(self.pctxs.active) {
            Some(frame) => frame,
            None => panic!("context {}: active context has no root", self.pctxs.active),
        };
        let src = unsafe { self.frames.table_mut(current) };
        let dst = unsafe { self.frames.table_mut(root) };
        for i in KERNEL_HALF_START..SELF_MAP_SLOT {
            dst[i].set_addr(src[i].addr(), src[i].flags());
        }
        dst[SELF_MAP_SLOT].set_addr(root, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);

        self.pctxs.roots[slot] = Some(root);
        debug_trace!("newpctx: context {} at {:#x}", slot, root.as_u64());
        Some(slot as i32)
    }

    /// Tear a context down: free every user-flagged frame mapped in its
    /// user half, then the user-half tables themselves, then the root.
    ///
    /// Context 0, the loaded context, and a context still referenced by a
    /// live thread are refused.
    pub fn pctx_free(&mut self, id: i32) -> Result<(), KcallError> {
        if id <= 0 {
            return Err(KcallError::Exist);
        }
        let root = self.pctxs.root_of(id).ok_or(KcallError::Exist)?;
        if id == self.pctxs.active {
            return Err(KcallError::State);
        }
        if self.threads.iter().any(|tcb| tcb.pctx == id) {
            return Err(KcallError::State);
        }

        let l4 = unsafe { self.frames.table_mut(root) };
        for i4 in 0..KERNEL_HALF_START {
            let entry4 = &l4[i4];
            if !entry4.flags().contains(PageTableFlags::PRESENT) {
                continue;
            }
            let l3_frame = entry4.addr();
            let l3 = unsafe { self.frames.table_mut(l3_frame) };
            for i3 in 0..512 {
                let entry3 = &l3[i3];
                if !entry3.flags().contains(PageTableFlags::PRESENT) {
                    continue;
                }
                let l2_frame = entry3.addr();
                let l2 = unsafe { self.frames.table_mut(l2_frame) };
                for i2 in 0..512 {
                    let entry2 = &l2[i2];
                    if !entry2.flags().contains(PageTableFlags::PRESENT) {
                        continue;
                    }
                    let l1_frame = entry2.addr();
                    let l1 = unsafe { self.frames.table_mut(l1_frame) };
                    for i1 in 0..512 {
                        let entry1 = &l1[i1];
                        let flags = entry1.flags();
                        if flags.contains(PageTableFlags::PRESENT)
                            && flags.contains(PageTableFlags::USER_ACCESSIBLE)
                        {
                            self.release_or_die(id, entry1.addr());
                        }
                    }
                    self.release_or_die(id, l1_frame);
                }
                self.release_or_die(id, l2_frame);
            }
            self.release_or_die(id, l3_frame);
        }
        self.release_or_die(id, root);

        self.pctxs.roots[id as usize] = None;
        debug_trace!("freepctx: context {} torn down", id);
        Ok(())
    }

    fn release_or_die(&mut self, id: i32, frame: PhysAddr) {
        if self.frames.release(frame).is_err() {
            panic!(
                "context {}: teardown found unmanaged frame {:#x}",
                id,
                frame.as_u64()
            );
        }
    }

    /// Copy the kernel-half entries of a live top-level table into context
    /// 0, so every context cloned from it shares the boot kernel mappings.
    /// Boot calls this once before switching onto context 0.
    ///
    /// # Safety
    /// `src` must be the currently loaded top-level table.
    pub unsafe fn adopt_kernel_mappings(&mut self, src: &x86_64::structures::paging::PageTable) {
        let root = match self.pctxs.root_of(0) {
            Some(frame) => frame,
            None => panic!("context 0: no root"),
        };
        let dst = self.frames.table_mut(root);
        for i in KERNEL_HALF_START..SELF_MAP_SLOT {
            dst[i].set_addr(src[i].addr(), src[i].flags());
        }
    }

    /// Switch the loaded context. The id must name an allocated context
    /// (panics otherwise); thread pctx fields are validated at every point
    /// they are written, so a miss here is a kernel bug.
    pub fn pctx_load(&mut self, id: i32) {
        let root = match self.pctxs.root_of(id) {
            Some(root) => root,
            None => panic!("context {}: load of unallocated context", id),
        };
        self.pctxs.active = id;
        arch::load_root(root);
        arch::flush_all();
    }
}
