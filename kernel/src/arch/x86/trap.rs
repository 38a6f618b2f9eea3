//! Trap frame layout and interrupt vector assignments.
//!
//! [`TrapFrame`] mirrors, field for field, what the common interrupt stub
//! pushes onto the kernel stack: the CPU's `iret` image, the vector and
//! error code, the `pushad` register image, then the four data segment
//! registers. The initial frame synthesized for a new process must match
//! this layout bit for bit.

/// Saved register state at kernel entry, lowest address first.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    // Data segment registers, pushed last by the stub.
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    // pushad image.
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    // Pushed by the per-vector stub (the error code by the CPU itself on
    // the vectors that have one).
    pub int_no: u32,
    pub err_code: u32,
    // Pushed by the CPU on the ring transition.
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// Dump the frame to the console, exception-report style.
    pub fn dump(&self) {
        crate::println!("REGISTERS:");
        crate::println!("err_code={}", self.err_code);
        crate::println!(
            "eax={:#010x}, ebx={:#010x}, ecx={:#010x}, edx={:#010x}",
            self.eax,
            self.ebx,
            self.ecx,
            self.edx
        );
        crate::println!(
            "edi={:#010x}, esi={:#010x}, ebp={:#010x}, esp={:#010x}",
            self.edi,
            self.esi,
            self.ebp,
            self.esp
        );
        crate::println!(
            "eip={:#010x}, cs={:#06x}, ss={:#06x}, eflags={:#010x}, useresp={:#010x}",
            self.eip,
            self.cs,
            self.ss,
            self.eflags,
            self.useresp
        );
    }
}

/// CPU exceptions occupy vectors 0..32.
pub const EXCEPTION_COUNT: u32 = 32;

/// Remapped IRQ window.
pub const IRQ_BASE: u32 = 0x20;
pub const IRQ_END: u32 = 0x30;

pub const VECTOR_PAGE_FAULT: u8 = 14;
pub const VECTOR_FPU_ERROR: u8 = 19;
pub const VECTOR_TIMER: u8 = 0x20;
pub const VECTOR_SYSCALL: u8 = 0x48;
/// Held back for a userspace event dispatcher; never assigned a handler.
pub const VECTOR_DISPATCHER: u8 = 0x7F;

/// Exception names, Intel manual order.
pub const EXCEPTION_MESSAGES: [&str; EXCEPTION_COUNT as usize] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available (No Math Coprocessor)",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection",
    "Page Fault",
    "Unknown Interrupt (intel reserved)",
    "x87 FPU Floating-Point Error (Math Fault)",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
    "Virtualization Exception",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_nineteen_words() {
        assert_eq!(core::mem::size_of::<TrapFrame>(), 19 * 4);
    }

    #[test]
    fn test_field_offsets_match_stub_push_order() {
        assert_eq!(core::mem::offset_of!(TrapFrame, gs), 0);
        assert_eq!(core::mem::offset_of!(TrapFrame, edi), 16);
        assert_eq!(core::mem::offset_of!(TrapFrame, eax), 44);
        assert_eq!(core::mem::offset_of!(TrapFrame, int_no), 48);
        assert_eq!(core::mem::offset_of!(TrapFrame, eip), 56);
        assert_eq!(core::mem::offset_of!(TrapFrame, ss), 72);
    }

    #[test]
    fn test_exception_messages() {
        assert_eq!(EXCEPTION_MESSAGES[0], "Division By Zero");
        assert_eq!(EXCEPTION_MESSAGES[VECTOR_PAGE_FAULT as usize], "Page Fault");
        assert_eq!(EXCEPTION_MESSAGES[13], "General Protection");
    }
}
