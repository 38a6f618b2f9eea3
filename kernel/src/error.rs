//! Kernel error types.
//!
//! Recoverable conditions are reported through [`KernelResult`] and logged at
//! the point of detection; invariant violations panic and the panic handler
//! halts the machine. CPU exceptions never reach this type, they are handled
//! in the interrupt dispatcher.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// The physical frame bitmap has no run of the requested length.
    OutOfMemory {
        requested_pages: u32,
    },
    /// The kernel heap region is exhausted.
    HeapExhausted {
        requested: u32,
    },
    /// An operation required a page-aligned address.
    UnalignedAddress {
        addr: u32,
    },
    /// A virtual page was already backed by a physical frame.
    AlreadyMapped {
        virt: u32,
        phys: u32,
    },
    /// A virtual page had no backing mapping.
    NotMapped {
        virt: u32,
    },
    /// A single-slot callback registration was refused.
    CallbackTaken {
        subsystem: &'static str,
    },
    /// No process is available to run.
    NoProcess,
    /// The bootloader handed over an unusable information structure.
    InvalidBootInfo {
        reason: &'static str,
    },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested_pages } => {
                write!(f, "out of physical memory ({} pages requested)", requested_pages)
            }
            KernelError::HeapExhausted { requested } => {
                write!(f, "kernel heap exhausted ({} bytes requested)", requested)
            }
            KernelError::UnalignedAddress { addr } => {
                write!(f, "unaligned address {:#010x}", addr)
            }
            KernelError::AlreadyMapped { virt, phys } => {
                write!(f, "virtual address {:#010x} already mapped to {:#010x}", virt, phys)
            }
            KernelError::NotMapped { virt } => {
                write!(f, "virtual address {:#010x} is not mapped", virt)
            }
            KernelError::CallbackTaken { subsystem } => {
                write!(f, "{}: callback slot already registered", subsystem)
            }
            KernelError::NoProcess => write!(f, "no process to run"),
            KernelError::InvalidBootInfo { reason } => {
                write!(f, "invalid boot information: {}", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats_address() {
        extern crate std;
        use std::string::ToString;

        let err = KernelError::UnalignedAddress { addr: 0xB000_0123 };
        assert_eq!(err.to_string(), "unaligned address 0xb0000123");
    }

    #[test]
    fn test_errors_compare() {
        assert_eq!(KernelError::NoProcess, KernelError::NoProcess);
        assert_ne!(
            KernelError::NotMapped { virt: 0x1000 },
            KernelError::NotMapped { virt: 0x2000 }
        );
    }
}
