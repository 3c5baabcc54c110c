//! # Two-Level Page-Table Model
//!
//! Typed model of a legacy two-level address-space image: a 1024-entry page
//! directory whose entries either map a 4 MiB large page directly or point
//! to a 1024-entry second-level table of 4 KiB page entries. The monitor's
//! `showmappings` walker and `setm` mutator operate on this model.
//!
//! Table frames live in physical memory and are reached through two seams:
//!
//! - [`PhysMapper`] turns a physical frame address into a usable table
//!   reference (direct map in the kernel, an arena in tests);
//! - [`FrameAlloc`] hands out zeroed 4 KiB frames for new second-level
//!   tables.
//!
//! Inspection uses the non-allocating [`AddressSpace::lookup`]; only
//! mutation paths may materialize intermediate structure through
//! [`AddressSpace::locate_mut`].

use core::fmt;

use bitflags::bitflags;

pub const PAGE_SIZE: u32 = 4096;
pub const LARGE_PAGE_SIZE: u32 = 4 * 1024 * 1024;
pub const TABLE_ENTRIES: usize = 1024;

const ADDR_MASK: u32 = 0xFFFF_F000;

/// Virtual address in the 32-bit staged address space.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index of the covering directory entry (address bits 31..22).
    pub const fn dir_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Index into the second-level table (address bits 21..12).
    pub const fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3ff) as usize
    }
}

/// Physical address of a frame or mapping target.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Permission and type bits of a page-table entry.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct EntryFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        /// Directory entries only: the entry maps 4 MiB directly instead of
        /// pointing to a second-level table.
        const LARGE    = 1 << 7;
    }
}

/// One table entry: physical base in the upper bits, flags in the lower.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Entry(u32);

impl Entry {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn new(base: PhysicalAddress, flags: EntryFlags) -> Self {
        debug_assert_eq!(base.as_u32() & !ADDR_MASK, 0, "unaligned entry base");
        Self(base.as_u32() | flags.bits())
    }

    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0 & ADDR_MASK)
    }

    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    pub const fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    pub const fn is_large(self) -> bool {
        self.0 & EntryFlags::LARGE.bits() != 0
    }

    pub fn set_flag(&mut self, flag: EntryFlags, enable: bool) {
        if enable {
            self.0 |= flag.bits();
        } else {
            self.0 &= !flag.bits();
        }
    }
}

/// A 4 KiB table frame; the same layout serves both levels.
#[repr(C, align(4096))]
pub struct Table {
    entries: [Entry; TABLE_ENTRIES],
}

impl Table {
    pub const fn zeroed() -> Self {
        Self {
            entries: [Entry::zero(); TABLE_ENTRIES],
        }
    }

    pub fn get(&self, index: usize) -> Entry {
        self.entries[index]
    }

    pub fn set(&mut self, index: usize, entry: Entry) {
        self.entries[index] = entry;
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut Entry {
        &mut self.entries[index]
    }
}

/// Allocator for table frames. Returned frames must be 4 KiB aligned and
/// zeroed. `None` signals out-of-memory.
pub trait FrameAlloc {
    fn alloc_table(&mut self) -> Option<PhysicalAddress>;
}

/// Turns a physical frame address into a usable table reference in the
/// current virtual address space.
///
/// # Safety
///
/// Implementations must only be handed addresses of live table frames; the
/// returned reference aliases the frame for the caller-chosen lifetime.
pub trait PhysMapper {
    unsafe fn table_mut<'a>(&self, frame: PhysicalAddress) -> &'a mut Table;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MapError {
    /// The frame allocator could not provide a second-level table.
    OutOfMemory,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::OutOfMemory => f.write_str("out of memory for page tables"),
        }
    }
}

/// Half-open range of virtual addresses, `begin <= end` assumed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AddressRange {
    pub begin: u32,
    pub end: u32,
}

/// Read-only projection of one mapping, derived on demand and never cached.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MappingView {
    pub covers: AddressRange,
    pub phys_base: PhysicalAddress,
    pub flags: EntryFlags,
}

/// Handle to one staged address space rooted at a page directory frame.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalAddress,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    pub const fn from_root(mapper: &'m M, root: PhysicalAddress) -> Self {
        Self { root, mapper }
    }

    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    fn directory(&self) -> &'m mut Table {
        unsafe { self.mapper.table_mut(self.root) }
    }

    /// Directory entry covering `va`.
    pub fn dir_entry(&self, va: VirtualAddress) -> Entry {
        self.directory().get(va.dir_index())
    }

    /// Second-level entry covering `va`, without allocating. `None` when no
    /// second-level table exists (absent or large directory entry).
    pub fn lookup(&self, va: VirtualAddress) -> Option<Entry> {
        let pde = self.dir_entry(va);
        if !pde.is_present() || pde.is_large() {
            return None;
        }
        let table = unsafe { self.mapper.table_mut(pde.base()) };
        Some(table.get(va.table_index()))
    }

    /// Leaf entry covering `va` for mutation, materializing the second-level
    /// table if absent. A large directory entry is itself the covering leaf.
    pub fn locate_mut<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<&'m mut Entry, MapError> {
        let dir = self.directory();
        let pde = dir.get(va.dir_index());

        if pde.is_present() && pde.is_large() {
            return Ok(dir.entry_mut(va.dir_index()));
        }

        let table_frame = if pde.is_present() {
            pde.base()
        } else {
            let frame = alloc.alloc_table().ok_or(MapError::OutOfMemory)?;
            dir.set(
                va.dir_index(),
                Entry::new(
                    frame,
                    EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER,
                ),
            );
            frame
        };

        let table = unsafe { self.mapper.table_mut(table_frame) };
        Ok(table.entry_mut(va.table_index()))
    }

    /// Install a 4 KiB mapping (forces PRESENT).
    pub fn map<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: EntryFlags,
    ) -> Result<(), MapError> {
        let entry = self.locate_mut(alloc, va)?;
        *entry = Entry::new(pa, flags | EntryFlags::PRESENT);
        Ok(())
    }

    /// Install a 4 MiB mapping directly in the directory (forces
    /// PRESENT | LARGE).
    pub fn map_large(&self, va: VirtualAddress, pa: PhysicalAddress, flags: EntryFlags) {
        self.directory().set(
            va.dir_index(),
            Entry::new(pa, flags | EntryFlags::PRESENT | EntryFlags::LARGE),
        );
    }

    /// Lazily enumerate the mappings covering `range`. Each step reports the
    /// span it covers and, when a mapping is present, its view. Steps are
    /// 4 MiB wide under a large directory entry and 4 KiB otherwise; a
    /// misaligned `range.begin` is not re-aligned.
    pub fn mappings(&self, range: AddressRange) -> Mappings<'_, 'm, M> {
        Mappings {
            space: self,
            cursor: u64::from(range.begin),
            end: u64::from(range.end),
        }
    }
}

/// Iterator produced by [`AddressSpace::mappings`]. The cursor is widened to
/// u64 so a range ending at the top of the 32-bit space terminates instead
/// of wrapping.
pub struct Mappings<'s, 'm, M: PhysMapper> {
    space: &'s AddressSpace<'m, M>,
    cursor: u64,
    end: u64,
}

impl<M: PhysMapper> Iterator for Mappings<'_, '_, M> {
    type Item = (AddressRange, Option<MappingView>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }

        let va = VirtualAddress::new(self.cursor as u32);
        let pde = self.space.dir_entry(va);

        let (step, entry) = if pde.is_large() {
            (LARGE_PAGE_SIZE, pde.is_present().then_some(pde))
        } else {
            let pte = self.space.lookup(va).filter(|e| e.is_present());
            (PAGE_SIZE, pte)
        };

        let covers = AddressRange {
            begin: self.cursor as u32,
            end: (self.cursor as u32).wrapping_add(step),
        };
        let view = entry.map(|e| MappingView {
            covers,
            phys_base: e.base(),
            flags: e.flags(),
        });

        self.cursor += u64::from(step);
        Some((covers, view))
    }
}

/// Human-readable breakdown of the permission bits of an entry.
pub struct PermSummary(pub EntryFlags);

impl fmt::Display for PermSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for (flag, name) in [
            (EntryFlags::PRESENT, "present"),
            (EntryFlags::WRITABLE, "writable"),
            (EntryFlags::USER, "user"),
        ] {
            if self.0.contains(flag) {
                if any {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                any = true;
            }
        }
        if !any {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec::Vec;

    /// A 4 KiB-aligned raw frame backing the fake physical memory.
    #[repr(align(4096))]
    struct Frame4K([u8; 4096]);

    /// Fake physical memory: frame index N lives at physical N << 12.
    struct Arena {
        frames: Vec<Frame4K>,
    }

    impl Arena {
        fn new(frames: usize) -> Self {
            let mut v = Vec::with_capacity(frames);
            for _ in 0..frames {
                v.push(Frame4K([0; 4096]));
            }
            Self { frames: v }
        }
    }

    impl PhysMapper for Arena {
        #[allow(invalid_reference_casting)]
        unsafe fn table_mut<'a>(&self, frame: PhysicalAddress) -> &'a mut Table {
            let idx = (frame.as_u32() >> 12) as usize;
            &mut *(&self.frames[idx] as *const Frame4K as *mut Table)
        }
    }

    /// Bump allocator over a slice of the arena's frames.
    struct ArenaAlloc {
        next: u32,
        limit: u32,
    }

    impl ArenaAlloc {
        fn new(first: u32, limit: u32) -> Self {
            Self { next: first, limit }
        }
    }

    impl FrameAlloc for ArenaAlloc {
        fn alloc_table(&mut self) -> Option<PhysicalAddress> {
            if self.next >= self.limit {
                return None;
            }
            let frame = PhysicalAddress::new(self.next << 12);
            self.next += 1;
            Some(frame)
        }
    }

    fn space(arena: &Arena) -> AddressSpace<'_, Arena> {
        AddressSpace::from_root(arena, PhysicalAddress::new(0))
    }

    #[test]
    fn address_indices() {
        let va = VirtualAddress::new(0x0040_3123);
        assert_eq!(va.dir_index(), 1);
        assert_eq!(va.table_index(), 3);
    }

    #[test]
    fn entry_base_and_flags_round_trip() {
        let e = Entry::new(
            PhysicalAddress::new(0x0123_4000),
            EntryFlags::PRESENT | EntryFlags::WRITABLE,
        );
        assert_eq!(e.base().as_u32(), 0x0123_4000);
        assert!(e.is_present());
        assert!(!e.is_large());
        assert_eq!(e.flags(), EntryFlags::PRESENT | EntryFlags::WRITABLE);
    }

    #[test]
    fn large_page_range_emits_single_view() {
        let arena = Arena::new(4);
        let s = space(&arena);
        s.map_large(
            VirtualAddress::new(0x0040_0000),
            PhysicalAddress::new(0x0100_0000),
            EntryFlags::WRITABLE,
        );

        let items: Vec<_> = s
            .mappings(AddressRange {
                begin: 0x0040_0000,
                end: 0x0080_0000,
            })
            .collect();

        assert_eq!(items.len(), 1);
        let (covers, view) = items[0];
        assert_eq!(covers.begin, 0x0040_0000);
        assert_eq!(covers.end, 0x0080_0000);
        let view = view.unwrap();
        assert_eq!(view.phys_base.as_u32(), 0x0100_0000);
        assert!(view.flags.contains(EntryFlags::PRESENT | EntryFlags::LARGE));
    }

    #[test]
    fn small_pages_emit_one_view_each_in_increasing_order() {
        let arena = Arena::new(8);
        let mut alloc = ArenaAlloc::new(1, 8);
        let s = space(&arena);
        for i in 1..=3u32 {
            s.map(
                &mut alloc,
                VirtualAddress::new(i * 0x1000),
                PhysicalAddress::new(0x0050_0000 + i * 0x1000),
                EntryFlags::empty(),
            )
            .unwrap();
        }

        let items: Vec<_> = s
            .mappings(AddressRange {
                begin: 0x1000,
                end: 0x4000,
            })
            .collect();

        assert_eq!(items.len(), 3);
        let mut last = 0;
        for (i, (covers, view)) in items.iter().enumerate() {
            assert_eq!(covers.end - covers.begin, PAGE_SIZE);
            assert!(covers.begin >= last);
            last = covers.begin;
            let view = view.unwrap();
            assert_eq!(view.phys_base.as_u32(), 0x0050_0000 + (i as u32 + 1) * 0x1000);
        }
    }

    #[test]
    fn inspection_of_an_absent_range_allocates_nothing() {
        let arena = Arena::new(2);
        let s = space(&arena);

        let items: Vec<_> = s
            .mappings(AddressRange {
                begin: 0,
                end: 0x3000,
            })
            .collect();

        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|(_, view)| view.is_none()));
        // The directory entry stayed untouched: no second-level table was
        // materialized to answer the query.
        assert!(!s.dir_entry(VirtualAddress::new(0)).is_present());
    }

    #[test]
    fn misaligned_begin_advances_by_full_steps() {
        let arena = Arena::new(8);
        let mut alloc = ArenaAlloc::new(1, 8);
        let s = space(&arena);
        for i in 1..=3u32 {
            s.map(
                &mut alloc,
                VirtualAddress::new(i * 0x1000),
                PhysicalAddress::new(i * 0x1000),
                EntryFlags::empty(),
            )
            .unwrap();
        }

        let begins: Vec<u32> = s
            .mappings(AddressRange {
                begin: 0x1800,
                end: 0x3800,
            })
            .map(|(covers, _)| covers.begin)
            .collect();

        assert_eq!(begins, [0x1800, 0x2800]);
    }

    #[test]
    fn large_but_absent_entry_still_advances_a_full_large_step() {
        let arena = Arena::new(2);
        let s = space(&arena);
        unsafe {
            arena
                .table_mut(PhysicalAddress::new(0))
                .set(0, Entry::new(PhysicalAddress::new(0), EntryFlags::LARGE));
        }

        let items: Vec<_> = s
            .mappings(AddressRange {
                begin: 0,
                end: 0x0040_1000,
            })
            .collect();

        assert_eq!(items.len(), 2);
        assert!(items[0].1.is_none());
        assert_eq!(items[0].0.end, 0x0040_0000);
        assert_eq!(items[1].0.begin, 0x0040_0000);
    }

    #[test]
    fn range_at_the_top_of_the_address_space_terminates() {
        let arena = Arena::new(2);
        let s = space(&arena);
        s.map_large(
            VirtualAddress::new(0xFFC0_0000),
            PhysicalAddress::new(0x0200_0000),
            EntryFlags::empty(),
        );

        let count = s
            .mappings(AddressRange {
                begin: 0xFFC0_0000,
                end: 0xFFFF_FFFF,
            })
            .count();

        assert_eq!(count, 1);
    }

    #[test]
    fn set_then_clear_restores_the_permission_snapshot() {
        let arena = Arena::new(4);
        let mut alloc = ArenaAlloc::new(1, 4);
        let s = space(&arena);
        let va = VirtualAddress::new(0x1000);

        s.map(&mut alloc, va, PhysicalAddress::new(0x5000), EntryFlags::empty())
            .unwrap();
        let before = s.lookup(va).unwrap().flags();
        assert!(!before.contains(EntryFlags::WRITABLE));

        s.locate_mut(&mut alloc, va)
            .unwrap()
            .set_flag(EntryFlags::WRITABLE, true);
        assert!(s.lookup(va).unwrap().flags().contains(EntryFlags::WRITABLE));

        s.locate_mut(&mut alloc, va)
            .unwrap()
            .set_flag(EntryFlags::WRITABLE, false);
        assert_eq!(s.lookup(va).unwrap().flags(), before);
    }

    #[test]
    fn locate_mut_on_a_large_mapping_edits_the_directory_entry() {
        let arena = Arena::new(2);
        let mut alloc = ArenaAlloc::new(1, 2);
        let s = space(&arena);
        let va = VirtualAddress::new(0x0040_2000);
        s.map_large(
            VirtualAddress::new(0x0040_0000),
            PhysicalAddress::new(0x0100_0000),
            EntryFlags::empty(),
        );

        s.locate_mut(&mut alloc, va)
            .unwrap()
            .set_flag(EntryFlags::USER, true);

        assert!(s.dir_entry(va).flags().contains(EntryFlags::USER));
    }

    #[test]
    fn locate_mut_surfaces_out_of_memory() {
        let arena = Arena::new(1);
        let mut alloc = ArenaAlloc::new(1, 1); // nothing left to hand out
        let s = space(&arena);

        let err = s
            .locate_mut(&mut alloc, VirtualAddress::new(0x1000))
            .unwrap_err();
        assert_eq!(err, MapError::OutOfMemory);
    }

    #[test]
    fn permission_summary_formats_set_bits() {
        let all = EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER;
        assert_eq!(format!("{}", PermSummary(all)), "present|writable|user");
        assert_eq!(format!("{}", PermSummary(EntryFlags::empty())), "(none)");
    }
}
