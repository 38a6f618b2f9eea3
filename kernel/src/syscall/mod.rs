//! The system call gate.
//!
//! User programs trap through `int 0x48` with the call number in EAX and the
//! first argument in EBX. Dispatch indexes a 256-entry handler table; an
//! unknown number is logged and otherwise a no-op, so a misbehaving program
//! only wastes its own time slice.

#![allow(dead_code)]

use spin::Mutex;

use crate::arch::x86::trap::TrapFrame;

/// Terminate the calling process.
pub const SYS_EXIT: u32 = 1;
/// Write the low byte of EBX to the console.
pub const SYS_PUTCHAR: u32 = 2;

const TABLE_ENTRIES: usize = 256;

/// A system call handler; results, if any, go back through the frame.
pub type SyscallHandler = fn(&mut TrapFrame);

/// Fixed-size dispatch table indexed by call number.
pub struct SyscallTable {
    handlers: [Option<SyscallHandler>; TABLE_ENTRIES],
}

impl SyscallTable {
    pub const fn new() -> Self {
        Self { handlers: [None; TABLE_ENTRIES] }
    }

    pub fn register(&mut self, number: u32, handler: SyscallHandler) {
        self.handlers[number as usize] = Some(handler);
    }

    /// Handler for `number`; out-of-range numbers are unknown, not errors.
    pub fn get(&self, number: u32) -> Option<SyscallHandler> {
        if (number as usize) < TABLE_ENTRIES {
            self.handlers[number as usize]
        } else {
            None
        }
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

static TABLE: Mutex<SyscallTable> = Mutex::new(SyscallTable::new());

/// Register the defined calls and open the gate to ring 3.
#[cfg(target_arch = "x86")]
pub fn init() {
    use crate::arch::x86::{idt, trap::VECTOR_SYSCALL};

    {
        let mut table = TABLE.lock();
        table.register(SYS_EXIT, sys_exit);
        table.register(SYS_PUTCHAR, sys_putchar);
    }

    idt::register_handler(VECTOR_SYSCALL, syscall_interrupt);
}

/// Vector 0x48 handler.
#[cfg(target_arch = "x86")]
fn syscall_interrupt(frame: &mut TrapFrame) {
    // Copy the handler out before the call: sys_exit never returns and must
    // not hold the table lock.
    let handler = TABLE.lock().get(frame.eax);
    match handler {
        Some(handler) => handler(frame),
        None => log::warn!("Unknown syscall {}", frame.eax),
    }
}

#[cfg(target_arch = "x86")]
fn sys_exit(_frame: &mut TrapFrame) {
    crate::process::exit::exit();
}

#[cfg(target_arch = "x86")]
fn sys_putchar(frame: &mut TrapFrame) {
    crate::serial::write_byte(frame.ebx as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_ecx(frame: &mut TrapFrame) {
        frame.ecx = 0xFEED;
    }

    fn zeroed_frame() -> TrapFrame {
        // SAFETY: TrapFrame is plain old data; all-zero is a valid value.
        unsafe { core::mem::zeroed() }
    }

    #[test]
    fn test_registered_handler_is_dispatched() {
        let mut table = SyscallTable::new();
        table.register(42, touch_ecx);

        let mut frame = zeroed_frame();
        frame.eax = 42;
        if let Some(handler) = table.get(frame.eax) {
            handler(&mut frame);
        }
        assert_eq!(frame.ecx, 0xFEED);
    }

    #[test]
    fn test_unknown_number_has_no_handler() {
        let table = SyscallTable::new();
        assert!(table.get(200).is_none());
    }

    #[test]
    fn test_out_of_range_number_is_unknown() {
        let mut table = SyscallTable::new();
        table.register(0, touch_ecx);
        assert!(table.get(0x1_0000).is_none());
        assert!(table.get(u32::MAX).is_none());
    }

    #[test]
    fn test_defined_call_numbers() {
        assert_eq!(SYS_EXIT, 1);
        assert_eq!(SYS_PUTCHAR, 2);
    }
}
