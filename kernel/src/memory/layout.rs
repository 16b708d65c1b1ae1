//! Fixed virtual layout of every process.
//!
//! ```text
//!  0x0000_0000_0000_0000  image (text + data), grows up
//!  0x0000_0000_1000_0000  heap, grows up (sbrk)
//!           ...
//!  0x0000_0000_6000_0000  ← stack top; stack grows down from here
//!  0x0000_0000_6000_0000  dynamic-library region, grows up
//!  0x0000_0000_8000_0000  mmap region
//!  0x0000_0000_C000_0000  kernel-module region
//!  0x0000_8000_0000_0000  end of user space
//!  0xFFFF_8000_0000_0000  shared kernel mapping (supervisor only)
//! ```

use super::address::page_round_up;

pub const IMAGE_BASE: u64 = 0;
pub const HEAP_BASE: u64 = 0x1000_0000;
pub const DYLIB_BASE: u64 = 0x6000_0000;
pub const STACK_TOP: u64 = DYLIB_BASE;
pub const MMAP_BASE: u64 = 0x8000_0000;
pub const KMOD_BASE: u64 = 0xC000_0000;
pub const USER_END: u64 = 0x0000_8000_0000_0000;
pub const KERNEL_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Largest image: it must not run into the heap.
pub const MAX_IMAGE: u64 = HEAP_BASE - IMAGE_BASE;
/// Largest stack.
pub const MAX_STACK: u64 = 16 * 1024 * 1024;
/// Largest heap: it must stay clear of the deepest possible stack.
pub const MAX_HEAP: u64 = STACK_TOP - MAX_STACK - HEAP_BASE;
/// Largest dynamic-library region.
pub const MAX_DYLIB: u64 = MMAP_BASE - DYLIB_BASE;

/// One independently sized part of a process's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Image,
    Heap,
    Stack,
    Dylib,
}

impl RegionKind {
    pub const ALL: [RegionKind; 4] = [
        RegionKind::Image,
        RegionKind::Dylib,
        RegionKind::Stack,
        RegionKind::Heap,
    ];

    /// Upper bound on the region's size in bytes.
    pub const fn limit(self) -> u64 {
        match self {
            RegionKind::Image => MAX_IMAGE,
            RegionKind::Heap => MAX_HEAP,
            RegionKind::Stack => MAX_STACK,
            RegionKind::Dylib => MAX_DYLIB,
        }
    }

    /// Virtual range `[start, end)` covered by a region of `size` bytes.
    pub const fn span(self, size: u64) -> (u64, u64) {
        let size = page_round_up(size);
        match self {
            RegionKind::Image => (IMAGE_BASE, IMAGE_BASE + size),
            RegionKind::Heap => (HEAP_BASE, HEAP_BASE + size),
            RegionKind::Stack => (STACK_TOP - size, STACK_TOP),
            RegionKind::Dylib => (DYLIB_BASE, DYLIB_BASE + size),
        }
    }

    /// Range that appears (or disappears) when the region goes between
    /// `smaller` and `larger` bytes.
    pub const fn growth_span(self, smaller: u64, larger: u64) -> (u64, u64) {
        let (small_start, small_end) = self.span(smaller);
        let (large_start, large_end) = self.span(larger);
        match self {
            RegionKind::Stack => (large_start, small_start),
            _ => (small_end, large_end),
        }
    }
}

/// Current size of each region, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Regions {
    pub image: u64,
    pub heap: u64,
    pub stack: u64,
    pub dylib: u64,
}

impl Regions {
    pub fn get(&self, kind: RegionKind) -> u64 {
        match kind {
            RegionKind::Image => self.image,
            RegionKind::Heap => self.heap,
            RegionKind::Stack => self.stack,
            RegionKind::Dylib => self.dylib,
        }
    }

    pub fn set(&mut self, kind: RegionKind, size: u64) {
        match kind {
            RegionKind::Image => self.image = size,
            RegionKind::Heap => self.heap = size,
            RegionKind::Stack => self.stack = size,
            RegionKind::Dylib => self.dylib = size,
        }
    }

    /// Bytes of user memory backed by frames.
    pub fn total(&self) -> u64 {
        RegionKind::ALL
            .iter()
            .map(|&kind| page_round_up(self.get(kind)))
            .sum()
    }
}
