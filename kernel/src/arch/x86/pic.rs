//! Legacy 8259 programmable interrupt controller pair.
//!
//! The power-on mapping of IRQs 0-7 collides with the CPU exception vectors,
//! so both controllers are remapped: master to 0x20, slave to 0x28, cascaded
//! on IRQ 2. The interrupt masks in force before remapping are preserved.

use x86::io::{inb, outb};

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

/// Edge-triggered, cascade mode, ICW4 needed.
const ICW1_INIT: u8 = 0x11;
/// 8086/88 mode.
const ICW4_8086: u8 = 0x01;

const MASTER_OFFSET: u8 = 0x20;
const SLAVE_OFFSET: u8 = 0x28;

const EOI: u8 = 0x20;

/// Remap both controllers, restoring the saved interrupt masks afterwards.
pub fn init() {
    // SAFETY: the ICW sequence below is the documented 8259 initialization
    // protocol; only the PIC registers are touched.
    unsafe {
        let master_mask = inb(MASTER_DATA);
        let slave_mask = inb(SLAVE_DATA);

        outb(MASTER_COMMAND, ICW1_INIT);
        outb(SLAVE_COMMAND, ICW1_INIT);

        outb(MASTER_DATA, MASTER_OFFSET);
        outb(SLAVE_DATA, SLAVE_OFFSET);

        // Master: a slave sits on IRQ 2. Slave: its cascade identity.
        outb(MASTER_DATA, 4);
        outb(SLAVE_DATA, 2);

        outb(MASTER_DATA, ICW4_8086);
        outb(SLAVE_DATA, ICW4_8086);

        outb(MASTER_DATA, master_mask);
        outb(SLAVE_DATA, slave_mask);
    }
}

/// Acknowledge the interrupt for `vector`: the slave first when it was
/// involved, then always the master.
pub fn end_of_interrupt(vector: u8) {
    // SAFETY: writing EOI to the command ports only clears the in-service
    // bit of the acknowledged interrupt.
    unsafe {
        if vector >= SLAVE_OFFSET {
            outb(SLAVE_COMMAND, EOI);
        }
        outb(MASTER_COMMAND, EOI);
    }
}
