//! Architecture support. Only 32-bit x86 is populated; the portable pieces
//! (trap-frame layout, timer bookkeeping) compile everywhere so the logic
//! can be unit tested on the host.

pub mod x86;

/// Halt the CPU forever. Pending interrupts still wake the core; it goes
/// right back to sleep.
pub fn halt_loop() -> ! {
    loop {
        #[cfg(target_arch = "x86")]
        // SAFETY: hlt in ring 0 only parks the CPU until the next interrupt.
        unsafe {
            x86::halt()
        };
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}
