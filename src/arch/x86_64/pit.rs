//! 8253 PIT: the preemption timer on IRQ 0.

use x86_64::instructions::port::Port;

const PIT_INPUT_HZ: u32 = 1193182;

/// Program the PIT to fire at roughly `hz` Hz. Returns false if the divisor
/// does not fit the hardware.
pub fn set_frequency(hz: u32) -> bool {
    let divisor = PIT_INPUT_HZ / hz;
    if divisor == 0 || divisor >= 65536 {
        return false;
    }
    unsafe {
        // Channel 0, lo/hi access, rate generator.
        Port::<u8>::new(0x43).write(0x36);
        Port::<u8>::new(0x40).write((divisor & 0xFF) as u8);
        Port::<u8>::new(0x40).write((divisor >> 8) as u8);
    }
    crate::debug_info!("PIT running at {} Hz", hz);
    true
}
