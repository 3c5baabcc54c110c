#![no_std]
#![no_main]
#![feature(alloc_error_handler)]

extern crate alloc;
extern crate rlibc;

use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;

use kmon::{backtrace, console, kernel, kprintln, memory, serial_println};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    kernel::record_boot_anchors(
        kernel_main as usize as u64,
        backtrace::current_frame_base(),
    );

    if let Err(e) = unsafe { memory::init(boot_info) } {
        serial_println!("memory init failed: {}", e);
        halt_loop();
    }

    let Some(fb) = boot_info.framebuffer.as_mut() else {
        serial_println!("no framebuffer available");
        halt_loop();
    };
    console::init(fb);
    kmon::logger::init();
    log::info!("kmon {} booting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = kernel::init() {
        log::error!("kernel init failed: {}", e);
        halt_loop();
    }

    kprintln!("\x1b[1;32mkmon\x1b[0m kernel debug monitor");

    // Exercise the trap path once: int3 lands in the breakpoint handler,
    // which drops into the monitor until the operator types `exit`.
    x86_64::instructions::interrupts::int3();
    kprintln!("Passing breakpoint...");

    loop {
        kernel::enter_monitor();
    }
}

fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("PANIC: {}", info);
    halt_loop()
}

#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("allocation failure: {:?}", layout)
}
