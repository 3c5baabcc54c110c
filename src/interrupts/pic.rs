//! 8259 PIC remapping.
//!
//! IRQ 0-15 conflict with CPU exception vectors by default, so the two
//! chained PICs are remapped: primary to vectors 32-39, secondary to 40-47.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = 40;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

// Vector numbers the CPU sees after remapping.
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,        // IRQ0
    Keyboard = PIC_1_OFFSET + 1, // IRQ1
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
