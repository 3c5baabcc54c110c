#[cfg(not(test))]
use bootloader_api::info::MemoryRegionKind;
#[cfg(not(test))]
use bootloader_api::BootInfo;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::memory::paging::{FrameAlloc, PhysMapper, PhysicalAddress, Table};

pub mod paging;

#[cfg(not(test))]
const KERNEL_HEAP_SIZE: usize = 8 * 1024 * 1024;

#[cfg(not(test))]
#[repr(align(4096))]
struct HeapBuffer([u8; KERNEL_HEAP_SIZE]);
#[cfg(not(test))]
static mut KERNEL_HEAP_BUFFER: HeapBuffer = HeapBuffer([0; KERNEL_HEAP_SIZE]);

#[cfg(not(test))]
#[global_allocator]
static KERNEL_ALLOCATOR: linked_list_allocator::LockedHeap =
    linked_list_allocator::LockedHeap::empty();

static PHYSICAL_MEMORY_OFFSET: AtomicU64 = AtomicU64::new(0);
static PHYSICAL_MEMORY_START: AtomicU64 = AtomicU64::new(0);
static PHYSICAL_MEMORY_END: AtomicU64 = AtomicU64::new(0);
static NEXT_PHYSICAL_FRAME: AtomicU64 = AtomicU64::new(0);

// Table frames must stay addressable by the 32-bit entry format.
const FRAME_WINDOW_CAP: u64 = 1 << 32;

/// Initialize the kernel heap and the physical frame window from the boot
/// memory map.
///
/// # Safety
///
/// Must be called exactly once, before any allocation.
#[cfg(not(test))]
pub unsafe fn init(boot_info: &BootInfo) -> Result<(), &'static str> {
    let phys_offset = boot_info
        .physical_memory_offset
        .into_option()
        .ok_or("bootloader did not map physical memory")?;
    PHYSICAL_MEMORY_OFFSET.store(phys_offset, Ordering::Release);

    let mut largest_region_start = 0u64;
    let mut largest_region_size = 0u64;

    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable {
            let size = region.end - region.start;
            if size > largest_region_size {
                largest_region_start = region.start;
                largest_region_size = size;
            }
        }
    }

    if largest_region_size == 0 {
        return Err("no usable memory found");
    }

    // Skip low memory so the frame window never hands out firmware areas.
    let frame_start = largest_region_start.max(16 * 1024 * 1024);
    let frame_end = largest_region_start + largest_region_size;
    if frame_start >= frame_end {
        return Err("usable memory is below the frame window floor");
    }

    PHYSICAL_MEMORY_START.store(frame_start, Ordering::Release);
    PHYSICAL_MEMORY_END.store(frame_end, Ordering::Release);
    NEXT_PHYSICAL_FRAME.store(frame_start, Ordering::Release);

    let heap = core::ptr::addr_of_mut!(KERNEL_HEAP_BUFFER);
    KERNEL_ALLOCATOR
        .lock()
        .init(heap.cast::<u8>(), KERNEL_HEAP_SIZE);

    Ok(())
}

pub fn physical_memory_offset() -> u64 {
    PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed)
}

pub fn frame_window() -> (u64, u64) {
    (
        PHYSICAL_MEMORY_START.load(Ordering::Relaxed),
        PHYSICAL_MEMORY_END.load(Ordering::Relaxed),
    )
}

pub fn next_free_frame() -> u64 {
    NEXT_PHYSICAL_FRAME.load(Ordering::Relaxed)
}

#[cfg(not(test))]
pub fn heap_bounds() -> (u64, u64) {
    let start = core::ptr::addr_of!(KERNEL_HEAP_BUFFER) as u64;
    (start, start + KERNEL_HEAP_SIZE as u64)
}

/// Hands out zeroed table frames from the boot frame window, capped so every
/// frame stays addressable by the 32-bit entry format.
pub struct TableFrames;

impl FrameAlloc for TableFrames {
    fn alloc_table(&mut self) -> Option<PhysicalAddress> {
        let end = PHYSICAL_MEMORY_END
            .load(Ordering::Relaxed)
            .min(FRAME_WINDOW_CAP);
        loop {
            let current = NEXT_PHYSICAL_FRAME.load(Ordering::Relaxed);
            let frame_addr = (current + 4095) & !4095;
            let next_frame = frame_addr + 4096;

            if next_frame > end {
                return None;
            }

            match NEXT_PHYSICAL_FRAME.compare_exchange_weak(
                current,
                next_frame,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let offset = PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed);
                    unsafe {
                        core::ptr::write_bytes((offset + frame_addr) as *mut u8, 0, 4096);
                    }
                    return Some(PhysicalAddress::new(frame_addr as u32));
                }
                Err(_) => continue,
            }
        }
    }
}

/// Reaches table frames through the bootloader's physical memory direct map.
pub struct OffsetMapper;

pub static OFFSET_MAPPER: OffsetMapper = OffsetMapper;

impl PhysMapper for OffsetMapper {
    unsafe fn table_mut<'a>(&self, frame: PhysicalAddress) -> &'a mut Table {
        let offset = PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed);
        let virt = offset + u64::from(frame.as_u32());
        &mut *(virt as *mut Table)
    }
}
