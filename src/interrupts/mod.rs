use crate::interrupts::{interrupts::init_idt, pic::PICS};

pub mod gdt;
pub mod interrupts;
pub mod pic;

pub fn init() {
    gdt::init();
    init_idt();
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        // Timer and keyboard only; everything else stays masked.
        pics.write_masks(0b1111_1100, 0b1111_1111);
    }
    x86_64::instructions::interrupts::enable();
}
