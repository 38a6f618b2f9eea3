//! The first drop into ring 3.
//!
//! Ongoing transitions to user mode ride the interrupt return path, but the
//! very first one starts from a kernel stack that never went through an
//! interrupt entry, so the `iret` frame is built by hand: user data
//! selectors, the prepared user stack, EFLAGS with IF set (re-enabling
//! interrupts atomically with the privilege drop), user code selector, and
//! the fixed program entry point.

use core::arch::asm;

use crate::{arch::x86::gdt, mm::USER_CODE_BASE};

/// Load the ring 3 data selectors and `iret` into the program entry point.
///
/// # Safety
///
/// Interrupts must be disabled. The current address space must map user code
/// at [`USER_CODE_BASE`] and a user stack at `user_stack`, and the TSS must
/// already publish this process's kernel stack.
pub unsafe fn enter_ring3(user_stack: u32) -> ! {
    // SAFETY: the iret frame below matches the layout the CPU expects for a
    // ring 0 to ring 3 transition; the caller guarantees the target
    // mappings exist.
    unsafe {
        asm!(
            "mov ds, {sel:x}",
            "mov es, {sel:x}",
            "mov fs, {sel:x}",
            "mov gs, {sel:x}",
            "push {sel:e}",    // ss
            "push {stack:e}",  // esp
            "push 0x202",      // eflags, IF set
            "push 0x1B",       // cs
            "push {entry:e}",  // eip
            "iretd",
            sel = in(reg) gdt::USER_DATA as u32,
            stack = in(reg) user_stack,
            entry = in(reg) USER_CODE_BASE,
            options(noreturn),
        );
    }
}
