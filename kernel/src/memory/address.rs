// =============================================================================
// Cinder — Physical and Virtual Address Types
// =============================================================================
//
// Two newtypes so that a physical address can never be dereferenced by
// accident and a virtual one can never be written into a page-table entry.
// Conversion between them goes through the frame pool, which owns the
// direct-map offset.
// =============================================================================

use core::fmt;

/// Size of a standard page (4 KiB).
pub const PAGE_SIZE: u64 = 4096;

/// Bit shift for standard pages (4K = 2^12).
pub const PAGE_SHIFT: u64 = 12;

/// Rounds `value` up to a page boundary.
#[inline]
pub const fn page_round_up(value: u64) -> u64 {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Rounds `value` down to a page boundary.
#[inline]
pub const fn page_round_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// A physical memory address.
///
/// Only meaningful to the MMU and to the frame pool. Page-table entries hold
/// these; kernel code reaches the bytes behind one through
/// [`FramePool::page`](super::pmm::FramePool::page).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    #[inline]
    pub const fn page_align_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P:{:#010X}", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P:{:#010X}", self.0)
    }
}

impl core::ops::Add<u64> for PhysAddr {
    type Output = Self;
    #[inline]
    fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

/// A virtual memory address.
///
/// On x86_64, virtual addresses are 48 bits wide with sign extension:
///   - Lower half (bit 47 = 0): 0x0000_0000_0000_0000: 0x0000_7FFF_FFFF_FFFF
///   - Upper half (bit 47 = 1): 0xFFFF_8000_0000_0000: 0xFFFF_FFFF_FFFF_FFFF
///
/// The lower half belongs to the process; the upper half is the shared
/// kernel mapping.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Creates a new virtual address.
    ///
    /// # Panics
    /// Debug-asserts that the address is canonical (bits 48-63 copy bit 47).
    #[inline]
    pub const fn new(addr: u64) -> Self {
        let canonical = ((addr << 16) as i64 >> 16) as u64;
        debug_assert!(addr == canonical, "Non-canonical virtual address");
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Upper half: shared kernel mapping.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= 0xFFFF_8000_0000_0000
    }

    /// Lower half: owned by the address space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < 0x0000_8000_0000_0000
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    #[inline]
    pub const fn page_align_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Page table indices for this address.
    ///
    /// ```text
    /// 63       48 47    39 38    30 29    21 20    12 11       0
    /// ┌──────────┬────────┬────────┬────────┬────────┬─────────┐
    /// │ sign ext │ PML4   │  PDPT  │   PD   │   PT   │ Offset  │
    /// └──────────┴────────┴────────┴────────┴────────┴─────────┘
    ///              idx[3]   idx[2]   idx[1]   idx[0]
    /// ```
    ///
    /// Returns `[PT, PD, PDPT, PML4]`: index 0 is the leaf level.
    #[inline]
    pub const fn page_table_indices(self) -> [usize; 4] {
        [
            ((self.0 >> 12) & 0x1FF) as usize,
            ((self.0 >> 21) & 0x1FF) as usize,
            ((self.0 >> 30) & 0x1FF) as usize,
            ((self.0 >> 39) & 0x1FF) as usize,
        ]
    }

    /// Offset within the 4 KiB page.
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V:{:#018X}", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V:{:#018X}", self.0)
    }
}

impl core::ops::Add<u64> for VirtAddr {
    type Output = Self;
    #[inline]
    fn add(self, offset: u64) -> Self {
        Self::new(self.0 + offset)
    }
}

impl core::ops::Sub<VirtAddr> for VirtAddr {
    type Output = u64;
    #[inline]
    fn sub(self, other: VirtAddr) -> u64 {
        self.0 - other.0
    }
}
