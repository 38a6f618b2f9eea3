//! Kernel-stack switching between processes.
//!
//! A preempted process's kernel stack always ends in the same image: the
//! callee-saved registers pushed by `proc_switch`, a return address inside
//! the common interrupt stub, and the trap frame the stub will pop. Electing
//! a process is therefore just swapping stack pointers and returning.

use core::{arch::global_asm, ptr::NonNull};

use crate::{
    arch::x86::{fpu, gdt},
    mm::paging,
    process::{self, Process},
};

global_asm!(
    r#"
    .global proc_switch
    proc_switch:
        push ebx
        push esi
        push edi
        push ebp
        mov eax, [esp + 20]
        mov ecx, [esp + 24]
        mov [eax], esp
        mov esp, ecx
        pop ebp
        pop edi
        pop esi
        pop ebx
        ret
    "#
);

extern "C" {
    /// Save the callee-saved registers and the stack pointer through
    /// `prev_slot`, then resume on the `next_stack` image.
    fn proc_switch(prev_slot: *mut u32, next_stack: u32);
}

/// Hand the CPU to `next`.
///
/// Publishes the TSS kernel stack and CR3 for the target, updates the
/// current-process pointer, then swaps kernel stacks. For a process that has
/// run before, this returns into its own `switch_process` call; for a new
/// process it returns into the interrupt stub's exit path, which pops the
/// synthesized frame and drops into user mode.
///
/// # Safety
///
/// Must run with interrupts disabled. `next` must be a live process whose
/// saved kernel stack holds a well-formed switch image.
pub unsafe fn switch_process(next: NonNull<Process>) {
    let prev = process::current().expect("process switch without a current process");

    process::set_current(next);

    // SAFETY: the records outlive their scheduler entries; reads below are
    // plain field loads.
    let (kernel_stack, directory, next_stack) = unsafe {
        let next_ref = next.as_ref();
        (next_ref.kernel_stack, next_ref.directory, next_ref.saved_kernel_stack)
    };

    gdt::set_kernel_stack(kernel_stack);
    // The kernel half of every directory is identical, so the switch cannot
    // pull the current stack out from under us.
    paging::switch_directory(directory);

    // SAFETY: prev is live (exited processes are leaked, so the slot write
    // stays valid) and next_stack was built by the synthesizer or by a
    // previous proc_switch.
    unsafe {
        proc_switch(core::ptr::addr_of_mut!((*prev.as_ptr()).saved_kernel_stack), next_stack);
    }
}

/// FPU buffer shuffle accompanying [`switch_process`].
pub fn switch_fpu(prev: NonNull<Process>, next: NonNull<Process>) {
    fpu::switch(prev, next);
}
