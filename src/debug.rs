//! Leveled debug output.
//!
//! On bare metal everything goes to the QEMU serial console; on hosted
//! builds (tests) it goes to stderr. Kernel code only ever uses the
//! `debug_*!` macros, never a print function directly.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DebugLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

static mut DEBUG_LEVEL: DebugLevel = DebugLevel::Info;

pub fn set_debug_level(level: DebugLevel) {
    unsafe { DEBUG_LEVEL = level };
}

pub fn get_debug_level() -> DebugLevel {
    unsafe { DEBUG_LEVEL }
}

#[cfg(target_os = "none")]
pub fn sink(args: fmt::Arguments) {
    qemu_print::qemu_print!("{}", args);
}

#[cfg(not(target_os = "none"))]
pub fn sink(args: fmt::Arguments) {
    std::eprint!("{}", args);
}

#[macro_export]
macro_rules! debug_error {
    ($($arg:tt)*) => {
        if $crate::debug::get_debug_level() >= $crate::debug::DebugLevel::Error {
            $crate::debug::sink(format_args!("[ERROR] "));
            $crate::debug::sink(format_args!($($arg)*));
            $crate::debug::sink(format_args!("\n"));
        }
    };
}

#[macro_export]
macro_rules! debug_warn {
    ($($arg:tt)*) => {
        if $crate::debug::get_debug_level() >= $crate::debug::DebugLevel::Warn {
            $crate::debug::sink(format_args!("[WARN ] "));
            $crate::debug::sink(format_args!($($arg)*));
            $crate::debug::sink(format_args!("\n"));
        }
    };
}

#[macro_export]
macro_rules! debug_info {
    ($($arg:tt)*) => {
        if $crate::debug::get_debug_level() >= $crate::debug::DebugLevel::Info {
            $crate::debug::sink(format_args!("[INFO ] "));
            $crate::debug::sink(format_args!($($arg)*));
            $crate::debug::sink(format_args!("\n"));
        }
    };
}

#[macro_export]
macro_rules! debug_debug {
    ($($arg:tt)*) => {
        if $crate::debug::get_debug_level() >= $crate::debug::DebugLevel::Debug {
            $crate::debug::sink(format_args!("[DEBUG] "));
            $crate::debug::sink(format_args!($($arg)*));
            $crate::debug::sink(format_args!("\n"));
        }
    };
}

#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug::get_debug_level() >= $crate::debug::DebugLevel::Trace {
            $crate::debug::sink(format_args!("[TRACE] "));
            $crate::debug::sink(format_args!($($arg)*));
            $crate::debug::sink(format_args!("\n"));
        }
    };
}

pub fn init() {
    set_debug_level(DebugLevel::Info);
    debug_info!("Debug subsystem initialized");
}
