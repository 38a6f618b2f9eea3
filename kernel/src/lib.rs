//! cinder kernel library.
//!
//! A 32-bit x86 kernel: Multiboot2-booted, preemptively multitasking, with
//! a bitmap physical allocator, recursively mapped two-level paging, a
//! first-fit kernel heap and an `int 0x48` system call gate. The library
//! also builds on the host target, where the hardware-facing modules are
//! compiled out and the pure logic runs under the standard test harness.

#![no_std]

extern crate alloc;

// Host target: link std and use the system allocator so unit tests can
// allocate normally. Bare metal uses the kernel heap (see mm::heap).
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
#[cfg(target_arch = "x86")]
pub mod bootstrap;
pub mod error;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod syscall;
pub mod utils;

// Re-export the pieces external tooling and tests reach for most.
pub use error::{KernelError, KernelResult};
pub use mm::{MemoryRegion, PAGE_SIZE};
