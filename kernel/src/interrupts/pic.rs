//! Legacy 8259 PIC. Every IRQ line is masked: the timer is not wired up for
//! preemption and no device interrupt has a handler.

use core::arch::asm;

use crate::constants::ports::{PIC1_DATA, PIC2_DATA};

const MASK_ALL: u8 = 0xFF;

pub fn mask_all() {
    unsafe {
        outb(PIC1_DATA, MASK_ALL);
        outb(PIC2_DATA, MASK_ALL);
    }
}

unsafe fn outb(port: u16, value: u8) {
    asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}
