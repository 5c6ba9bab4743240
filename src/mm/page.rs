//! Page operators over a paging context.
//!
//! Get/set/touch on single leaf entries, expressed as a four-level walk
//! through the frame pool's window. `touch` materialises the intermediate
//! tables on demand, the way the whole user half is built: every table
//! level is PRESENT | WRITABLE | USER_ACCESSIBLE, and access control lives
//! in the leaf entries.

use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch;
use crate::kcall::abi::KcallError;
use crate::kernel::Kernel;
use crate::mm::frame_pool::FramePool;

/// First address above the user region (start of the canonical hole).
pub const USER_SPACE_TOP: u64 = 0x0000_8000_0000_0000;

/// Page-table-entry bits user space may see and set.
pub fn wire_flags() -> PageTableFlags {
    PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE
}

/// True if `[addr, addr + len)` lies entirely inside the user region.
pub fn user_range_ok(addr: u64, len: usize) -> bool {
    (len as u64) <= USER_SPACE_TOP && addr <= USER_SPACE_TOP - len as u64
}

/// Walk to the leaf entry for `addr`, if every level is present.
///
/// The returned borrow aliases pool memory; callers keep it short-lived and
/// never hold two entries of the same table at once.
pub(crate) fn walk_entry<'a>(
    frames: &FramePool,
    root: PhysAddr,
    addr: VirtAddr,
) -> Option<&'a mut PageTableEntry> {
    let l4 = unsafe { frames.table_mut(root) };
    let entry4 = &l4[addr.p4_index()];
    if !entry4.flags().contains(PageTableFlags::PRESENT) {
        return None;
    }
    let l3 = unsafe { frames.table_mut(entry4.addr()) };
    let entry3 = &l3[addr.p3_index()];
    if !entry3.flags().contains(PageTableFlags::PRESENT) {
        return None;
    }
    let l2 = unsafe { frames.table_mut(entry3.addr()) };
    let entry2 = &l2[addr.p2_index()];
    if !entry2.flags().contains(PageTableFlags::PRESENT) {
        return None;
    }
    let l1 = unsafe { frames.table_mut(entry2.addr()) };
    Some(&mut l1[addr.p1_index()])
}

/// Walk to the leaf entry for `addr`, allocating any missing intermediate
/// table along the way.
pub(crate) fn touch_entry<'a>(
    frames: &mut FramePool,
    root: PhysAddr,
    addr: VirtAddr,
) -> Result<&'a mut PageTableEntry, KcallError> {
    let table_flags =
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;

    let mut table = unsafe { frames.table_mut(root) };
    for index in [
        u16::from(addr.p4_index()) as usize,
        u16::from(addr.p3_index()) as usize,
        u16::from(addr.p2_index()) as usize,
    ] {
        let next = if table[index].flags().contains(PageTableFlags::PRESENT) {
            table[index].addr()
        } else {
            let frame = frames.alloc().ok_or(KcallError::Resrc)?;
            frames.zero_frame(frame);
            table[index].set_addr(frame, table_flags);
            frame
        };
        table = unsafe { frames.table_mut(next) };
    }
    Ok(&mut table[addr.p1_index()])
}

impl Kernel {
    fn active_root(&self) -> PhysAddr {
        match self.pctxs.root_of(self.pctxs.active()) {
            Some(root) => root,
            None => panic!("context {}: active context has no root", self.pctxs.active()),
        }
    }

    fn page_addr(page: u64) -> Result<VirtAddr, KcallError> {
        if !user_range_ok(page, 1) {
            return Err(KcallError::Exist);
        }
        Ok(VirtAddr::new(page).align_down(4096u64))
    }

    /// Leaf entry for `page` in the current context: (frame, flags), or
    /// zeros when no mapping or table exists.
    pub fn page_get(&self, page: u64) -> Result<(u64, PageTableFlags), KcallError> {
        let addr = Self::page_addr(page)?;
        match walk_entry(&self.frames, self.active_root(), addr) {
            Some(entry) => Ok((entry.addr().as_u64(), entry.flags() & wire_flags())),
            None => Ok((0, PageTableFlags::empty())),
        }
    }

    /// Point `page` at `frame`, keeping the entry's flag bits. The displaced
    /// frame loses a reference, the installed one gains one; `frame == 0`
    /// unmaps. Validated before any state changes.
    pub fn page_set_frame(&mut self, page: u64, frame: u64) -> Result<(), KcallError> {
        let addr = Self::page_addr(page)?;
        let new = if frame == 0 {
            None
        } else {
            let new = PhysAddr::try_new(frame).map_err(|_| KcallError::Exist)?;
            // Must name an allocated (or floating) frame of the pool.
            if !new.is_aligned(4096u64) || self.frames.refcount(new).is_none() {
                return Err(KcallError::Exist);
            }
            Some(new)
        };

        let root = self.active_root();
        let entry = touch_entry(&mut self.frames, root, addr)?;
        let old = entry.addr();

        // Retain before release so remapping a page to its own frame is the
        // identity.
        if let Some(new) = new {
            self.frames.retain(new)?;
        }
        entry.set_addr(new.unwrap_or(PhysAddr::new(0)), entry.flags());
        if old.as_u64() != 0 {
            if self.frames.release(old).is_err() {
                panic!("page {:#x}: mapped frame {:#x} not in pool", page, old.as_u64());
            }
        }
        arch::flush_page(addr.as_u64());
        Ok(())
    }

    /// Rewrite `page`'s flag bits, keeping its frame.
    pub fn page_set_flags(&mut self, page: u64, flags: u64) -> Result<(), KcallError> {
        let addr = Self::page_addr(page)?;
        let flags = PageTableFlags::from_bits_truncate(flags) & wire_flags();
        let root = self.active_root();
        let entry = touch_entry(&mut self.frames, root, addr)?;
        entry.set_addr(entry.addr(), flags);
        arch::flush_page(addr.as_u64());
        Ok(())
    }

    /// Ensure the page tables covering `page` exist in the current context.
    pub fn page_touch(&mut self, page: u64) -> Result<(), KcallError> {
        let addr = Self::page_addr(page)?;
        let root = self.active_root();
        touch_entry(&mut self.frames, root, addr)?;
        Ok(())
    }
}
