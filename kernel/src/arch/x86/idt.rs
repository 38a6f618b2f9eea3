//! Interrupt Descriptor Table and the common interrupt path.
//!
//! Every one of the 256 vectors gets a tiny assembly stub that normalizes
//! the stack to one shape (error code and vector always present), then falls
//! into a common stub that builds a [`TrapFrame`], loads the kernel data
//! segments, parks the interrupted FPU context and calls [`isr_dispatch`].
//! The return half of the common stub, `irq_handler_end`, is also the launch
//! pad for freshly created processes: their first kernel stack is synthesized
//! to look like a frame this path is about to pop.

#![allow(dead_code)]

use spin::Mutex;

use crate::arch::x86::trap::{TrapFrame, EXCEPTION_COUNT, EXCEPTION_MESSAGES, IRQ_BASE, IRQ_END};

/// Present, 32-bit interrupt gate.
const GATE_FLAGS: u8 = 0x8E;
/// Same, but reachable from ring 3 (the syscall gate).
const GATE_FLAGS_USER: u8 = 0x8E | 0x60;

const IDT_ENTRIES: usize = 256;

/// One interrupt gate.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdtEntry {
    base_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    base_high: u16,
}

impl IdtEntry {
    pub const fn new(base: u32, selector: u16, flags: u8) -> Self {
        Self {
            base_low: (base & 0xFFFF) as u16,
            selector,
            zero: 0,
            flags,
            base_high: ((base >> 16) & 0xFFFF) as u16,
        }
    }

    pub const fn missing() -> Self {
        Self::new(0, 0, 0)
    }
}

/// In-kernel interrupt handlers, indexed by vector.
pub type InterruptHandler = fn(&mut TrapFrame);

static HANDLERS: Mutex<[Option<InterruptHandler>; IDT_ENTRIES]> =
    Mutex::new([None; IDT_ENTRIES]);

/// Install `handler` for `vector`, replacing any previous registration.
pub fn register_handler(vector: u8, handler: InterruptHandler) {
    HANDLERS.lock()[vector as usize] = Some(handler);
}

fn handler_for(vector: u32) -> Option<InterruptHandler> {
    if vector < IDT_ENTRIES as u32 {
        HANDLERS.lock()[vector as usize]
    } else {
        None
    }
}

#[cfg(target_arch = "x86")]
mod install {
    use lazy_static::lazy_static;
    use x86::dtables::{lidt, DescriptorTablePointer};

    use super::*;
    use crate::arch::x86::{gdt, pic, trap::VECTOR_SYSCALL};

    // Per-vector stubs. The CPU pushes an error code for vectors 8, 10-14
    // and 17; every other stub pushes a zero placeholder so the frame shape
    // is uniform. The common stub completes the TrapFrame, switches to the
    // kernel data segments, saves the interrupted FPU context and calls
    // into Rust. `irq_handler_end` must exactly undo the entry sequence:
    // a synthesized process frame relies on it.
    core::arch::global_asm!(
        r#"
        .altmacro

        .macro isr_stub vector
        isr_stub_\vector:
        .if (\vector == 8) || ((\vector >= 10) && (\vector <= 14)) || (\vector == 17)
            push \vector
        .else
            push 0
            push \vector
        .endif
            jmp isr_common
        .endm

        .macro isr_stub_ref vector
            .long isr_stub_\vector
        .endm

        .section .text
        .set vector, 0
        .rept 256
            isr_stub %vector
            .set vector, vector + 1
        .endr

        isr_common:
            pushad
            push ds
            push es
            push fs
            push gs
            mov ax, 0x10
            mov ds, ax
            mov es, ax
            mov fs, ax
            mov gs, ax
            call fpu_kernel_enter
            push esp
            call isr_dispatch
            add esp, 4
        .global irq_handler_end
        irq_handler_end:
            call fpu_kernel_exit
            pop gs
            pop fs
            pop es
            pop ds
            popad
            add esp, 8
            iretd

        .section .rodata
        .global isr_stub_table
        .align 4
        isr_stub_table:
        .set vector, 0
        .rept 256
            isr_stub_ref %vector
            .set vector, vector + 1
        .endr

        .section .text
        "#
    );

    extern "C" {
        static isr_stub_table: [u32; IDT_ENTRIES];
        static irq_handler_end: u8;
    }

    lazy_static! {
        static ref IDT: [IdtEntry; IDT_ENTRIES] = {
            let mut table = [IdtEntry::missing(); IDT_ENTRIES];
            for (vector, entry) in table.iter_mut().enumerate() {
                let flags = if vector == VECTOR_SYSCALL as usize {
                    GATE_FLAGS_USER
                } else {
                    GATE_FLAGS
                };
                // SAFETY: the stub table is emitted by the global_asm block
                // above with exactly IDT_ENTRIES entries.
                let stub = unsafe { isr_stub_table[vector] };
                *entry = IdtEntry::new(stub, gdt::KERNEL_CODE, flags);
            }
            table
        };
    }

    /// Load the IDT.
    pub fn init() {
        let pointer = DescriptorTablePointer {
            limit: (core::mem::size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
            base: IDT.as_ptr(),
        };
        // SAFETY: the table is 'static and every present gate points at a
        // stub from the table emitted above.
        unsafe { lidt(&pointer) };
    }

    /// Return address used to launch new processes through the interrupt
    /// return path.
    pub fn irq_return_address() -> u32 {
        // SAFETY: only the label's address is taken, never its contents.
        unsafe { core::ptr::addr_of!(irq_handler_end) as u32 }
    }

    /// Common handler behind every stub.
    ///
    /// Exceptions without a registered handler are terminal: there is no
    /// userland signal delivery, so dump state and park the CPU.
    #[no_mangle]
    extern "C" fn isr_dispatch(frame: *mut TrapFrame) {
        // SAFETY: the common stub passes a pointer to the frame it just
        // pushed on the current kernel stack.
        let frame = unsafe { &mut *frame };
        let vector = frame.int_no;

        // Copy the handler out before invoking it: the timer handler may
        // switch away and not return for a while, and the page fault and
        // syscall-exit paths never return at all.
        let handler = handler_for(vector);

        if vector < EXCEPTION_COUNT {
            match handler {
                Some(handler) => handler(frame),
                None => {
                    crate::println!("EXCEPTION: {}", EXCEPTION_MESSAGES[vector as usize]);
                    frame.dump();
                    crate::arch::halt_loop();
                }
            }
            return;
        }

        if let Some(handler) = handler {
            handler(frame);
        }

        if (IRQ_BASE..IRQ_END).contains(&vector) {
            pic::end_of_interrupt(vector as u8);
        }
    }
}

#[cfg(target_arch = "x86")]
pub use install::{init, irq_return_address};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_encoding() {
        let entry = IdtEntry::new(0xCAFE_BABE, 0x08, GATE_FLAGS);
        // Copies, not references: the struct is packed.
        assert_eq!({ entry.base_low }, 0xBABE);
        assert_eq!({ entry.base_high }, 0xCAFE);
        assert_eq!({ entry.selector }, 0x08);
        assert_eq!({ entry.zero }, 0);
        assert_eq!({ entry.flags }, 0x8E);
    }

    #[test]
    fn test_syscall_gate_is_user_reachable() {
        assert_eq!(GATE_FLAGS_USER & 0x60, 0x60);
        assert_eq!(GATE_FLAGS_USER & 0x80, 0x80);
    }

    #[test]
    fn test_handler_registry_round_trip() {
        fn dummy(_frame: &mut TrapFrame) {}

        register_handler(0x7E, dummy);
        assert!(handler_for(0x7E).is_some());
        assert!(handler_for(0x7D).is_none());
        assert!(handler_for(0x1_0000).is_none());
        HANDLERS.lock()[0x7E] = None;
    }
}
