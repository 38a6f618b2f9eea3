//! FPU and SSE context handling.
//!
//! One statically allocated, 16-byte aligned 512-byte buffer holds the FPU
//! state of whichever context was last interrupted: the common interrupt
//! stub runs `fxsave` into it on kernel entry and `fxrstor` from it on
//! kernel exit. Switching processes therefore only copies buffers: the
//! outgoing process keeps what the entry path parked, the incoming process's
//! saved state is staged for the exit path to restore.

use core::{arch::asm, ptr::NonNull};

use crate::{
    arch::x86::{idt, trap::{TrapFrame, VECTOR_FPU_ERROR}},
    process::{FpuState, Process},
};

/// FPU context of the interrupted execution, staged for fxsave/fxrstor.
static mut SCRATCH: FpuState = FpuState::new();

/// Enable the FPU and SSE, reset x87 state and hook the SIMD exception
/// vector.
pub fn init() {
    // SAFETY: standard FPU bring-up; CR0/CR4 bit flips below only enable
    // coprocessor instructions and fxsave-based context management, and run
    // once before interrupts are live.
    unsafe {
        asm!(
            "mov {tmp}, cr0",
            "and {tmp}, 0xFFFFFFFB", // clear EM: no emulation
            "or {tmp}, 0x2",         // set MP: monitor coprocessor
            "mov cr0, {tmp}",
            "mov {tmp}, cr4",
            "or {tmp}, 0x600",       // OSFXSR + OSXMMEXCPT
            "mov cr4, {tmp}",
            "fninit",
            tmp = out(reg) _,
        );
    }

    idt::register_handler(VECTOR_FPU_ERROR, fpu_exception_handler);
}

/// Park the interrupted FPU context and give the kernel a clean x87 state.
/// Called by the common interrupt stub on entry.
#[no_mangle]
extern "C" fn fpu_kernel_enter() {
    // SAFETY: SCRATCH is 16-byte aligned and 512 bytes as fxsave requires;
    // single writer because the kernel is never re-entered.
    unsafe {
        asm!(
            "fxsave [{0}]",
            "fninit",
            in(reg) core::ptr::addr_of_mut!(SCRATCH),
        );
    }
}

/// Restore the staged FPU context. Called by the common interrupt stub just
/// before returning to the interrupted (or freshly elected) context.
#[no_mangle]
extern "C" fn fpu_kernel_exit() {
    // SAFETY: SCRATCH always holds a state a previous fxsave produced (or
    // a process's saved buffer copied over it).
    unsafe {
        asm!("fxrstor [{0}]", in(reg) core::ptr::addr_of!(SCRATCH));
    }
}

/// Swap the staged FPU context on a process switch: the scratch buffer
/// belongs to `prev`, then is reloaded with `next`'s saved state.
pub fn switch(prev: NonNull<Process>, next: NonNull<Process>) {
    // SAFETY: both records outlive the scheduler entries pointing at them,
    // and preemption cannot race this copy (interrupts are off in the
    // switch path).
    unsafe {
        let scratch = core::ptr::addr_of_mut!(SCRATCH);
        (*prev.as_ptr()).fpu_registers.0 = (*scratch).0;
        (*scratch).0 = (*next.as_ptr()).fpu_registers.0;
    }
}

/// SIMD exceptions are logged and cleared; the faulting computation simply
/// proceeds with whatever the hardware left behind.
fn fpu_exception_handler(frame: &mut TrapFrame) {
    log::warn!("FPU exception at eip={:#010x}", frame.eip);
    // Clear the pending exception so returning does not immediately
    // re-enter the handler.
    // SAFETY: fnclex only clears x87 exception flags.
    unsafe { asm!("fnclex") };
}
