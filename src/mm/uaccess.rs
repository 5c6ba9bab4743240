//! User-memory access.
//!
//! Kernel calls receive user virtual addresses. They are never dereferenced
//! raw: every access is validated against the user region and translated
//! page by page through the owning context's tables, so a hostile or stale
//! pointer yields an error instead of a kernel fault.

use core::mem::{size_of, MaybeUninit};

use x86_64::structures::paging::PageTableFlags;
use x86_64::VirtAddr;

use crate::kcall::abi::KcallError;
use crate::kernel::Kernel;
use crate::mm::page::{user_range_ok, walk_entry};

/// Types that may be exchanged with user memory by byte copy: every bit
/// pattern must be a valid value.
pub(crate) unsafe trait WireSafe: Copy {}

unsafe impl WireSafe for u64 {}
unsafe impl WireSafe for crate::kcall::abi::TInfo {}

impl Kernel {
    fn user_page_ptr(
        &self,
        pctx: i32,
        addr: VirtAddr,
        write: bool,
    ) -> Result<*mut u8, KcallError> {
        let root = self.pctxs.root_of(pctx).ok_or(KcallError::Exist)?;
        let page = addr.align_down(4096u64);
        let entry = walk_entry(&self.frames, root, page).ok_or(KcallError::Exist)?;
        let flags = entry.flags();
        if !flags.contains(PageTableFlags::PRESENT)
            || !flags.contains(PageTableFlags::USER_ACCESSIBLE)
            || (write && !flags.contains(PageTableFlags::WRITABLE))
        {
            return Err(KcallError::Exist);
        }
        let offset = (addr - page) as usize;
        Ok(unsafe { self.frames.frame_ptr(entry.addr()).add(offset) })
    }

    pub(crate) fn copy_from_user(
        &self,
        pctx: i32,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<(), KcallError> {
        if !user_range_ok(addr, buf.len()) {
            return Err(KcallError::Exist);
        }
        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr::new(addr + done as u64);
            let in_page = 4096 - (cur.as_u64() % 4096) as usize;
            let chunk = in_page.min(buf.len() - done);
            let src = self.user_page_ptr(pctx, cur, false)?;
            unsafe {
                core::ptr::copy_nonoverlapping(src, buf[done..].as_mut_ptr(), chunk);
            }
            done += chunk;
        }
        Ok(())
    }

    pub(crate) fn copy_to_user(
        &mut self,
        pctx: i32,
        addr: u64,
        data: &[u8],
    ) -> Result<(), KcallError> {
        if !user_range_ok(addr, data.len()) {
            return Err(KcallError::Exist);
        }
        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr::new(addr + done as u64);
            let in_page = 4096 - (cur.as_u64() % 4096) as usize;
            let chunk = in_page.min(data.len() - done);
            let dst = self.user_page_ptr(pctx, cur, true)?;
            unsafe {
                core::ptr::copy_nonoverlapping(data[done..].as_ptr(), dst, chunk);
            }
            done += chunk;
        }
        Ok(())
    }

    pub(crate) fn read_user<T: WireSafe>(&self, pctx: i32, addr: u64) -> Result<T, KcallError> {
        let mut value = MaybeUninit::<T>::uninit();
        let buf = unsafe {
            core::slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, size_of::<T>())
        };
        self.copy_from_user(pctx, addr, buf)?;
        Ok(unsafe { value.assume_init() })
    }

    pub(crate) fn write_user<T: WireSafe>(
        &mut self,
        pctx: i32,
        addr: u64,
        value: &T,
    ) -> Result<(), KcallError> {
        let buf = unsafe {
            core::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>())
        };
        self.copy_to_user(pctx, addr, buf)
    }
}
