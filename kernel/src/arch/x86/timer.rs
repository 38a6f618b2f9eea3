//! Programmable interval timer and the kernel tick.
//!
//! Channel 0 of the 8253/8254 is programmed as a rate generator at
//! [`TIMER_HZ`]; every IRQ 0 bumps the tick counter and forwards to a single
//! registered callback. The scheduler owns that slot once user mode starts.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    arch::x86::trap::TrapFrame,
    error::{KernelError, KernelResult},
};

/// Tick rate. One tick per millisecond keeps uptime math trivial.
pub const TIMER_HZ: u32 = 1000;

/// Base frequency of the PIT oscillator.
const PIT_QUOTIENT: u32 = 1_193_182;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
/// Channel 0, lobyte/hibyte access, mode 3.
const PIT_RATE_GENERATOR: u8 = 0x36;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Callback invoked on every tick.
pub type TimerCallback = fn(&mut TrapFrame);

/// A single-owner callback slot with a typed refusal.
pub struct CallbackSlot {
    callback: Option<TimerCallback>,
}

impl CallbackSlot {
    pub const fn new() -> Self {
        Self { callback: None }
    }

    /// Claim the slot. Fails without replacing an existing registration.
    pub fn register(&mut self, callback: TimerCallback) -> KernelResult<()> {
        if self.callback.is_some() {
            return Err(KernelError::CallbackTaken { subsystem: "timer" });
        }
        self.callback = Some(callback);
        Ok(())
    }

    pub fn get(&self) -> Option<TimerCallback> {
        self.callback
    }
}

impl Default for CallbackSlot {
    fn default() -> Self {
        Self::new()
    }
}

static CALLBACK: Mutex<CallbackSlot> = Mutex::new(CallbackSlot::new());

/// Register the per-tick callback. At most one consumer may hold the slot;
/// later registrations are refused with a typed error.
pub fn register_callback(callback: TimerCallback) -> KernelResult<()> {
    CALLBACK.lock().register(callback)
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds since boot, derived from the tick counter.
pub fn uptime_ms() -> u64 {
    ticks() * 1000 / TIMER_HZ as u64
}

/// Program the PIT and hook IRQ 0.
#[cfg(target_arch = "x86")]
pub fn init() {
    use crate::arch::x86::{idt, trap::VECTOR_TIMER};

    let divisor = PIT_QUOTIENT / TIMER_HZ;

    // SAFETY: the command/data sequence is the documented way to program
    // PIT channel 0; only the PIT ports are touched.
    unsafe {
        x86::io::outb(PIT_COMMAND, PIT_RATE_GENERATOR);
        x86::io::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        x86::io::outb(PIT_CHANNEL0, ((divisor >> 8) & 0xFF) as u8);
    }

    idt::register_handler(VECTOR_TIMER, timer_interrupt);
}

/// IRQ 0 handler: count the tick, then hand the frame to the registered
/// callback, if any.
fn timer_interrupt(frame: &mut TrapFrame) {
    TICKS.fetch_add(1, Ordering::Relaxed);

    // Copy the callback out before calling it: the scheduler's callback may
    // switch stacks and only return here much later.
    let callback = CALLBACK.lock().get();
    if let Some(callback) = callback {
        callback(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_frame: &mut TrapFrame) {}
    fn other(_frame: &mut TrapFrame) {}

    #[test]
    fn test_slot_accepts_first_registration() {
        let mut slot = CallbackSlot::new();
        assert!(slot.get().is_none());
        slot.register(noop).unwrap();
        assert!(slot.get().is_some());
    }

    #[test]
    fn test_slot_refuses_second_registration() {
        let mut slot = CallbackSlot::new();
        slot.register(noop).unwrap();

        let err = slot.register(other).unwrap_err();
        assert_eq!(err, KernelError::CallbackTaken { subsystem: "timer" });
        // The original registration survives.
        assert_eq!(slot.get(), Some(noop as TimerCallback));
    }

    #[test]
    fn test_divisor_fits_pit_register() {
        let divisor = PIT_QUOTIENT / TIMER_HZ;
        assert!(divisor > 0);
        assert!(divisor <= u16::MAX as u32);
    }
}
