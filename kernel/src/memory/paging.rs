// =============================================================================
// Cinder — x86_64 Page-Table Structures
// =============================================================================
//
// Four levels, 512 entries each, every table exactly one 4 KiB frame:
//   PML4 → PDPT → PD → PT → frame
//
// Effective permissions are the intersection of every level on the path, so
// intermediate entries are permissive and the leaf carries the restriction.
// =============================================================================

use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use super::address::PhysAddr;

bitflags! {
    /// Bits of a page-table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTableFlags: u64 {
        /// Translation valid. With this clear every other bit is ignored.
        const PRESENT       = 1 << 0;
        /// Writes allowed.
        const WRITABLE      = 1 << 1;
        /// Reachable from ring 3.
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        /// Set by the CPU on any access.
        const ACCESSED      = 1 << 5;
        /// Set by the CPU on a write.
        const DIRTY         = 1 << 6;
        /// 2 MiB / 1 GiB leaf in a PD / PDPT entry. Never produced here.
        const HUGE_PAGE     = 1 << 7;
        /// Survives CR3 reloads; used for the shared kernel half.
        const GLOBAL        = 1 << 8;
        const NO_EXECUTE    = 1 << 63;
    }
}

impl PageTableFlags {
    /// Read-only kernel data.
    pub const KERNEL_RODATA: Self = Self::PRESENT.union(Self::GLOBAL).union(Self::NO_EXECUTE);

    /// Read-write kernel data.
    pub const KERNEL_DATA: Self = Self::KERNEL_RODATA.union(Self::WRITABLE);

    /// Kernel text.
    pub const KERNEL_CODE: Self = Self::PRESENT.union(Self::GLOBAL);

    /// User read-write page (heap, stack, image).
    pub const USER_RW: Self = Self::PRESENT.union(Self::WRITABLE).union(Self::USER);

    /// User read-only page.
    pub const USER_RO: Self = Self::PRESENT.union(Self::USER);

    /// Non-leaf entry in the kernel half.
    pub const INTERMEDIATE: Self = Self::PRESENT.union(Self::WRITABLE);

    /// Non-leaf entry on the way to a user page.
    pub const INTERMEDIATE_USER: Self = Self::INTERMEDIATE.union(Self::USER);
}

/// Bits 12..52: the physical frame number.
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// One 8-byte entry.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0)
    }

    /// Frame the entry points at. Meaningless unless present.
    #[inline]
    pub fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & ADDR_MASK)
    }

    #[inline]
    pub fn is_present(self) -> bool {
        self.0 & PageTableFlags::PRESENT.bits() != 0
    }

    #[inline]
    pub fn is_huge(self) -> bool {
        self.0 & PageTableFlags::HUGE_PAGE.bits() != 0
    }

    #[inline]
    pub fn set(&mut self, addr: PhysAddr, flags: PageTableFlags) {
        debug_assert!(addr.is_page_aligned(), "unaligned frame in page-table entry");
        self.0 = (addr.as_u64() & ADDR_MASK) | flags.bits();
    }

    /// Adds `flags` without touching the address.
    #[inline]
    pub fn insert_flags(&mut self, flags: PageTableFlags) {
        self.0 |= flags.bits();
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PTE({} {:?})", self.addr(), self.flags())
        } else {
            write!(f, "PTE(empty)")
        }
    }
}

/// One level of the hierarchy; exactly one frame.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; 512],
}

impl PageTable {
    /// True when no entry is present: the table can be freed.
    pub fn is_unused(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_present())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.entries.iter()
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    fn index(&self, index: usize) -> &PageTableEntry {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keeps_address_and_flags_apart() {
        let mut entry = PageTableEntry::EMPTY;
        entry.set(PhysAddr::new(0x0012_3000), PageTableFlags::USER_RW);
        assert!(entry.is_present());
        assert_eq!(entry.addr(), PhysAddr::new(0x0012_3000));
        assert_eq!(entry.flags(), PageTableFlags::USER_RW);
        entry.clear();
        assert_eq!(entry, PageTableEntry::EMPTY);
    }

    #[test]
    fn table_is_one_page() {
        assert_eq!(core::mem::size_of::<PageTable>(), 4096);
        assert_eq!(core::mem::align_of::<PageTable>(), 4096);
    }
}
