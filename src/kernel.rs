//! Kernel bring-up and the glue between boot state and the monitor.
//!
//! Owns the boot anchors (entry address, boot frame base), stages the
//! address-space image the monitor inspects, and assembles a [`Monitor`]
//! over the kernel's concrete collaborator implementations. `enter_monitor`
//! is called both from `kernel_main` and from the breakpoint trap handler.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::backtrace::{self, symbols, BoundedReader};
use crate::memory::paging::{
    AddressSpace, EntryFlags, FrameAlloc, PhysicalAddress, VirtualAddress, LARGE_PAGE_SIZE,
    PAGE_SIZE,
};
use crate::memory::{self, TableFrames, OFFSET_MAPPER};
use crate::monitor::{readline, KernelInfo, Monitor};

static STAGED_ROOT: AtomicU32 = AtomicU32::new(0);
static KERNEL_ENTRY: AtomicU64 = AtomicU64::new(0);
static BOOT_FRAME_BASE: AtomicU64 = AtomicU64::new(0);

// How far below the entry frame the stack reader will follow a chain.
const STACK_WINDOW: u64 = 512 * 1024;

/// Record the anchors backtraces and `kerninfo` report against. Called first
/// thing in `kernel_main`.
pub fn record_boot_anchors(entry: u64, frame_base: u64) {
    KERNEL_ENTRY.store(entry, Ordering::Release);
    BOOT_FRAME_BASE.store(frame_base, Ordering::Release);
}

pub fn init() -> Result<(), &'static str> {
    crate::interrupts::init();
    log::info!("interrupts online");

    stage_address_space()?;
    log::info!(
        "staged address space at {:#x}",
        STAGED_ROOT.load(Ordering::Relaxed)
    );

    register_symbols();
    Ok(())
}

/// Build the two-level address-space image the monitor operates on: the low
/// 16 MiB identity-mapped as large pages, plus a small-page window right
/// above it so both granularities are inspectable out of the box.
fn stage_address_space() -> Result<(), &'static str> {
    let mut frames = TableFrames;
    let root = frames
        .alloc_table()
        .ok_or("out of memory staging the address space")?;
    let space = AddressSpace::from_root(&OFFSET_MAPPER, root);

    for i in 0..4u32 {
        let base = i * LARGE_PAGE_SIZE;
        space.map_large(
            VirtualAddress::new(base),
            PhysicalAddress::new(base),
            EntryFlags::WRITABLE,
        );
    }

    let window = 4 * LARGE_PAGE_SIZE;
    for i in 0..16u32 {
        let addr = window + i * PAGE_SIZE;
        space
            .map(
                &mut frames,
                VirtualAddress::new(addr),
                PhysicalAddress::new(addr),
                EntryFlags::WRITABLE,
            )
            .map_err(|_| "out of memory staging the small-page window")?;
    }

    STAGED_ROOT.store(root.as_u32(), Ordering::Release);
    Ok(())
}

fn register_symbols() {
    symbols::register(
        KERNEL_ENTRY.load(Ordering::Relaxed),
        "kernel_main",
        "src/main.rs",
        22,
    );
    symbols::register(
        enter_monitor as usize as u64,
        "kernel::enter_monitor",
        "src/kernel.rs",
        106,
    );
    symbols::register(
        readline::readline as usize as u64,
        "monitor::readline",
        "src/monitor/readline.rs",
        20,
    );
}

/// Drop into the interactive monitor over the kernel's live state. Builds a
/// fresh [`Monitor`] per entry, so the trap path and the boot path share
/// nothing but the staged root and the anchors.
pub fn enter_monitor() {
    let root = STAGED_ROOT.load(Ordering::Acquire);
    if root == 0 {
        crate::serial_println!("monitor entered before kernel init; ignoring");
        return;
    }

    let space = AddressSpace::from_root(&OFFSET_MAPPER, PhysicalAddress::new(root));
    let mut frames = TableFrames;
    let here = backtrace::current_frame_base();
    let reader = BoundedReader::new(
        here.saturating_sub(STACK_WINDOW),
        BOOT_FRAME_BASE.load(Ordering::Relaxed) + 64,
    );
    let info = KernelInfo {
        entry: KERNEL_ENTRY.load(Ordering::Relaxed),
        heap: memory::heap_bounds(),
        frame_window: memory::frame_window(),
    };

    Monitor::new(
        space,
        &mut frames,
        &reader,
        &symbols::KernelSymbols,
        backtrace::current_frame_base,
        info,
    )
    .run();
}
