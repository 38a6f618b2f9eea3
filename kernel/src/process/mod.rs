//! Processes and the preemption entry points.
//!
//! A [`Process`] owns a private address space below [`crate::mm::KERNEL_BASE`],
//! one kernel-heap page of kernel stack, and a saved FPU image. Records are
//! leaked on creation: the scheduler and the switch path keep raw handles to
//! them, and the final stack-pointer store of a terminating process still
//! targets its record.

#![allow(dead_code)]

pub mod creation;
#[cfg(target_arch = "x86")]
pub mod exit;

use core::{
    ptr::NonNull,
    sync::atomic::{AtomicPtr, AtomicU32, Ordering},
};

/// User stack size in pages.
pub const STACK_PAGES: u32 = 4;
/// Kernel stack size in pages.
pub const KERNEL_STACK_PAGES: u32 = 1;

/// 512-byte fxsave/fxrstor image. The alignment is a hardware requirement.
#[repr(C, align(16))]
pub struct FpuState(pub [u8; 512]);

impl FpuState {
    pub const fn new() -> Self {
        Self([0; 512])
    }
}

impl Default for FpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the kernel tracks about one process.
pub struct Process {
    pub pid: u32,
    /// User stack length in pages.
    pub stack_pages: u32,
    /// Program image length in pages.
    pub code_pages: u32,
    /// Physical address of the page directory.
    pub directory: u32,
    /// Top of the kernel stack; published to the TSS while this process
    /// runs.
    pub kernel_stack: u32,
    /// Kernel stack pointer at the last preemption.
    pub saved_kernel_stack: u32,
    /// User stack pointer handed to the first entry into user mode.
    pub initial_user_stack: u32,
    /// Program heap length in bytes.
    pub heap_len: u32,
    pub sleep_ticks: u32,
    pub fpu_registers: FpuState,
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);
static CURRENT: AtomicPtr<Process> = AtomicPtr::new(core::ptr::null_mut());

pub(crate) fn allocate_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// The process owning the CPU, set between the first user-mode entry and
/// kernel shutdown.
pub fn current() -> Option<NonNull<Process>> {
    NonNull::new(CURRENT.load(Ordering::Relaxed))
}

pub(crate) fn set_current(process: NonNull<Process>) {
    CURRENT.store(process.as_ptr(), Ordering::Relaxed);
}

/// PID of the current process, or 0 when no process is running.
pub fn current_pid() -> u32 {
    // SAFETY: the current pointer only ever holds leaked, live records.
    current().map_or(0, |process| unsafe { process.as_ref().pid })
}

/// Ask the scheduler for an election and switch if it picks someone else.
#[cfg(target_arch = "x86")]
pub fn schedule() {
    use crate::arch::x86::context;

    let Some(next) = crate::sched::with(|scheduler| scheduler.next()) else {
        log::warn!("no runnable processes, parking the CPU");
        crate::arch::halt_loop();
    };

    let current = current().expect("schedule before the first user-mode entry");
    if next == current {
        return;
    }

    context::switch_fpu(current, next);
    // SAFETY: called from the timer interrupt or the exit path, both with
    // interrupts off; `next` comes from the scheduler, so it is live and
    // carries a valid switch frame.
    unsafe { context::switch_process(next) };
}

/// Timer callback: every tick is an election opportunity.
#[cfg(target_arch = "x86")]
fn preempt_callback(_frame: &mut crate::arch::x86::trap::TrapFrame) {
    schedule();
}

/// Drop into the first user process. Interrupts are re-enabled atomically by
/// the `iret`'s saved EFLAGS.
#[cfg(target_arch = "x86")]
pub fn enter_usermode() -> ! {
    use crate::arch::x86::{self, gdt, timer, usermode};
    use crate::mm::paging;

    x86::disable_interrupts();

    let first = crate::sched::with(|scheduler| scheduler.current())
        .unwrap_or_else(|| panic!("no process to run"));
    set_current(first);

    if let Err(err) = timer::register_callback(preempt_callback) {
        log::warn!("{}", err);
    }

    // SAFETY: the record is live; plain field reads.
    let (kernel_stack, directory, user_stack) = unsafe {
        let process = first.as_ref();
        (process.kernel_stack, process.directory, process.initial_user_stack)
    };

    gdt::set_kernel_stack(kernel_stack);
    paging::switch_directory(directory);

    // SAFETY: interrupts are off, the TSS and CR3 were just published, and
    // the process's address space maps its code and stack.
    unsafe { usermode::enter_ring3(user_stack) }
}
