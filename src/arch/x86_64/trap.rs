//! Trap entry and exit.
//!
//! Every vector funnels through one naked stub that pushes the full
//! register file, hands the stack image to `trap_dispatch`, and restores
//! whatever thread the router chose, which need not be the one that
//! trapped. The stack image is rewritten in place, so resuming a different
//! thread is the same `iretq` as resuming the same one.
//!
//! Interrupts stay disabled from the moment the CPU enters the stub until
//! `iretq`; the kernel lock is therefore uncontended by construction.

use core::arch::naked_asm;

use x86_64::instructions::interrupts;
use x86_64::registers::control::Cr2;
use x86_64::VirtAddr;

use super::pic;
use crate::interrupt::Trap;
use crate::kernel;
use crate::thread::tcb::{FxArea, Tid, TrapFrame};

/// Stack image built by the common stub: the pushed register file, the
/// vector and error code pushed by the per-vector stubs, and the interrupt
/// frame pushed by the CPU.
#[repr(C)]
struct TrapStack {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    r11: u64,
    r10: u64,
    r9: u64,
    r8: u64,
    rbp: u64,
    rdi: u64,
    rsi: u64,
    rdx: u64,
    rcx: u64,
    rbx: u64,
    rax: u64,
    vector: u64,
    code: u64,
    // CPU-pushed interrupt frame.
    rip: u64,
    cs: u64,
    rflags: u64,
    rsp: u64,
    ss: u64,
}

macro_rules! trap_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push 0", // dummy error code
                concat!("push ", stringify!($vector)),
                "jmp {common}",
                common = sym trap_common,
            );
        }
    };
    ($name:ident, $vector:expr, err) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                // CPU already pushed the error code
                concat!("push ", stringify!($vector)),
                "jmp {common}",
                common = sym trap_common,
            );
        }
    };
}

trap_stub!(stub0, 0);
trap_stub!(stub1, 1);
trap_stub!(stub2, 2);
trap_stub!(stub3, 3);
trap_stub!(stub4, 4);
trap_stub!(stub5, 5);
trap_stub!(stub6, 6);
trap_stub!(stub7, 7);
trap_stub!(stub8, 8, err);
trap_stub!(stub9, 9);
trap_stub!(stub10, 10, err);
trap_stub!(stub11, 11, err);
trap_stub!(stub12, 12, err);
trap_stub!(stub13, 13, err);
trap_stub!(stub14, 14, err);
trap_stub!(stub16, 16);
trap_stub!(stub17, 17, err);
trap_stub!(stub18, 18);
trap_stub!(stub19, 19);
trap_stub!(stub32, 32);
trap_stub!(stub33, 33);
trap_stub!(stub34, 34);
trap_stub!(stub35, 35);
trap_stub!(stub36, 36);
trap_stub!(stub37, 37);
trap_stub!(stub38, 38);
trap_stub!(stub39, 39);
trap_stub!(stub40, 40);
trap_stub!(stub41, 41);
trap_stub!(stub42, 42);
trap_stub!(stub43, 43);
trap_stub!(stub44, 44);
trap_stub!(stub45, 45);
trap_stub!(stub46, 46);
trap_stub!(stub47, 47);
trap_stub!(stub129, 129);

/// Entry address for a vector's stub; used by the IDT builder.
pub(super) fn stub_addr(vector: u8) -> VirtAddr {
    let stub: unsafe extern "C" fn() = match vector {
        0 => stub0,
        1 => stub1,
        2 => stub2,
        3 => stub3,
        4 => stub4,
        5 => stub5,
        6 => stub6,
        7 => stub7,
        8 => stub8,
        9 => stub9,
        10 => stub10,
        11 => stub11,
        12 => stub12,
        13 => stub13,
        14 => stub14,
        16 => stub16,
        17 => stub17,
        18 => stub18,
        19 => stub19,
        32 => stub32,
        33 => stub33,
        34 => stub34,
        35 => stub35,
        36 => stub36,
        37 => stub37,
        38 => stub38,
        39 => stub39,
        40 => stub40,
        41 => stub41,
        42 => stub42,
        43 => stub43,
        44 => stub44,
        45 => stub45,
        46 => stub46,
        47 => stub47,
        129 => stub129,
        _ => panic!("vector {}: no trap stub", vector),
    };
    VirtAddr::new(stub as usize as u64)
}

#[unsafe(naked)]
unsafe extern "C" fn trap_common() {
    naked_asm!(
        // Stack so far: [error code][vector][CPU frame]. Push the register
        // file so the whole TrapStack image sits at rsp.
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "cld",
        "call {dispatch}",
        // The dispatcher rewrote the image in place with the outgoing
        // thread's context.
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "add rsp, 16", // vector + error code
        "iretq",
        dispatch = sym trap_dispatch,
    );
}

#[no_mangle]
extern "C" fn trap_dispatch(stack: *mut TrapStack) {
    let stack = unsafe { &mut *stack };
    let vector = stack.vector as u8;

    let next = kernel::with(|k| {
        if let Some(current) = k.current() {
            let tcb = match k.threads.get_mut(current) {
                Some(tcb) => tcb,
                None => panic!("thread {}: RUNNING without a TCB", current),
            };
            stack_to_frame(stack, &mut tcb.frame);
            unsafe { fx_save(&mut tcb.fx) };
        }
        k.handle_trap(classify(vector, stack))
    });

    if (pic::PIC_BASE..pic::PIC_BASE + 16).contains(&vector) {
        pic::end_of_interrupt(vector - pic::PIC_BASE);
    }

    match next {
        Some(tid) => restore(tid, stack),
        None => {
            if stack.cs & 3 == 0 {
                // Interrupted the kernel's own idle loop; resume it.
                return;
            }
            // The trapping thread blocked and nothing else is runnable:
            // wait for an interrupt to queue somebody.
            loop {
                interrupts::enable_and_hlt();
                interrupts::disable();
                if let Some(tid) = kernel::with(|k| k.schedule_tail()) {
                    restore(tid, stack);
                    return;
                }
            }
        }
    }
}

fn classify(vector: u8, stack: &TrapStack) -> Trap {
    match vector {
        0x81 => Trap::Kcall,
        v if (pic::PIC_BASE..pic::PIC_BASE + 16).contains(&v) => Trap::Irq(v - pic::PIC_BASE),
        v => Trap::Fault {
            vector: v,
            code: stack.code,
            addr: if v == 14 { Cr2::read().as_u64() } else { 0 },
            kernel_mode: stack.cs & 3 == 0,
        },
    }
}

/// Rewrite the stack image with `tid`'s saved context.
fn restore(tid: Tid, stack: &mut TrapStack) {
    kernel::with(|k| {
        let tcb = match k.threads.get(tid) {
            Some(tcb) => tcb,
            None => panic!("thread {}: resuming without a TCB", tid),
        };
        frame_to_stack(&tcb.frame, stack);
        unsafe { fx_restore(&tcb.fx) };
    });
}

fn stack_to_frame(stack: &TrapStack, frame: &mut TrapFrame) {
    frame.rax = stack.rax;
    frame.rbx = stack.rbx;
    frame.rcx = stack.rcx;
    frame.rdx = stack.rdx;
    frame.rsi = stack.rsi;
    frame.rdi = stack.rdi;
    frame.rbp = stack.rbp;
    frame.r8 = stack.r8;
    frame.r9 = stack.r9;
    frame.r10 = stack.r10;
    frame.r11 = stack.r11;
    frame.r12 = stack.r12;
    frame.r13 = stack.r13;
    frame.r14 = stack.r14;
    frame.r15 = stack.r15;
    frame.rip = stack.rip;
    frame.rsp = stack.rsp;
    frame.rflags = stack.rflags;
    frame.cs = stack.cs;
    frame.ss = stack.ss;
}

fn frame_to_stack(frame: &TrapFrame, stack: &mut TrapStack) {
    stack.rax = frame.rax;
    stack.rbx = frame.rbx;
    stack.rcx = frame.rcx;
    stack.rdx = frame.rdx;
    stack.rsi = frame.rsi;
    stack.rdi = frame.rdi;
    stack.rbp = frame.rbp;
    stack.r8 = frame.r8;
    stack.r9 = frame.r9;
    stack.r10 = frame.r10;
    stack.r11 = frame.r11;
    stack.r12 = frame.r12;
    stack.r13 = frame.r13;
    stack.r14 = frame.r14;
    stack.r15 = frame.r15;
    stack.rip = frame.rip;
    stack.rsp = frame.rsp;
    stack.rflags = frame.rflags;
    stack.cs = frame.cs;
    stack.ss = frame.ss;
}

unsafe fn fx_save(area: &mut FxArea) {
    core::arch::asm!("fxsave64 [{}]", in(reg) area.0.as_mut_ptr());
}

unsafe fn fx_restore(area: &FxArea) {
    core::arch::asm!("fxrstor64 [{}]", in(reg) area.0.as_ptr());
}
