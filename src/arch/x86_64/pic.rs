//! 8259 PIC pair.
//!
//! IRQ lines 0..16 are remapped to vectors 32..48. Per-line masking keeps a
//! shadow of the two mask registers; the event layer masks a line on every
//! IRQ arrival and the RESET kernel call unmasks it.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

/// First vector of the remapped IRQ range.
pub const PIC_BASE: u8 = 32;

static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_BASE, PIC_BASE + 8) });

/// Shadow of the PIC mask registers; bit set = line masked.
static IRQ_MASK: Mutex<u16> = Mutex::new(0);

pub fn init() {
    unsafe { PICS.lock().initialize() };
    write_mask(0);
    crate::debug_info!("PIC remapped to vectors {}..{}", PIC_BASE, PIC_BASE + 16);
}

pub fn end_of_interrupt(line: u8) {
    unsafe { PICS.lock().notify_end_of_interrupt(PIC_BASE + line) };
}

pub(super) fn mask(line: u8) {
    let mut shadow = IRQ_MASK.lock();
    *shadow |= 1 << line;
    write_mask(*shadow);
}

pub(super) fn unmask(line: u8) {
    let mut shadow = IRQ_MASK.lock();
    *shadow &= !(1 << line);
    write_mask(*shadow);
}

fn write_mask(mask: u16) {
    unsafe {
        Port::<u8>::new(0x21).write(mask as u8);
        Port::<u8>::new(0xA1).write((mask >> 8) as u8);
    }
}
