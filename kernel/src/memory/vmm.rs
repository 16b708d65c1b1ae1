// =============================================================================
// Cinder — Virtual Memory Manager
// =============================================================================
//
// Two kinds of address space:
//
//   KernelSpace  : built once at boot. Its upper-half root entries point at
//                   the kernel's own tables.
//   AddressSpace : one per process. Owns every table and frame reachable
//                   from its lower half; its upper-half root entries are
//                   copies of the kernel's, shared and never freed here.
//
// Because the kernel half is present in every process's tables, a trap from
// user mode can touch kernel data without a CR3 reload.
//
// RULES:
//   - Mapping an already-present page is a kernel bug (no implicit remap).
//   - New intermediate tables are zeroed before they are linked in.
//   - Every operation that allocates undoes its partial work on failure.
//   - Tables emptied by an unmap are freed, so growing and then shrinking a
//     region hands back exactly the frames it took.
// =============================================================================

use alloc::vec::Vec;
use core::fmt;

use super::address::{PAGE_SIZE, PhysAddr, VirtAddr, page_round_down, page_round_up};
use super::layout::{RegionKind, USER_END};
use super::paging::{PageTableEntry, PageTableFlags};
use super::pmm::FramePool;

/// First root index of the kernel half.
const KERNEL_ROOT_START: usize = 256;

/// Bits carried over when a page is copied into another space.
const COPIED_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER)
    .union(PageTableFlags::NO_EXECUTE);

/// A mapping operation ran out of frames. Partial work has been undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    OutOfMemory,
}

/// A user address is unmapped or not user-accessible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub addr: u64,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad user address {:#x}", self.addr)
    }
}

/// Walks from `root` to the leaf entry for `va`.
///
/// With `alloc` set, missing intermediate tables are allocated (zeroed)
/// and linked; without it a missing level yields `Ok(None)`.
///
/// # Panics
/// On a huge-page entry: this kernel never creates one.
fn walk(
    pool: &FramePool,
    root: PhysAddr,
    va: u64,
    alloc: bool,
) -> Result<Option<*mut PageTableEntry>, MapError> {
    let addr = VirtAddr::new(va);
    let indices = addr.page_table_indices();
    let link = if addr.is_user() {
        PageTableFlags::INTERMEDIATE_USER
    } else {
        PageTableFlags::INTERMEDIATE
    };

    let mut table = root;
    for level in (1..4).rev() {
        let entry = unsafe { &mut pool.table(table)[indices[level]] };
        if entry.is_present() {
            if entry.is_huge() {
                panic!("walk: huge page on the path to {addr}");
            }
            if alloc && addr.is_user() {
                entry.insert_flags(PageTableFlags::USER);
            }
        } else {
            if !alloc {
                return Ok(None);
            }
            let next = pool.allocate_zeroed().map_err(|_| MapError::OutOfMemory)?;
            entry.set(next, link);
        }
        table = entry.addr();
    }
    Ok(Some(unsafe { &mut pool.table(table)[indices[0]] } as *mut PageTableEntry))
}

/// Points the leaf for `va` at `frame`.
fn map_page(
    pool: &FramePool,
    root: PhysAddr,
    va: u64,
    frame: PhysAddr,
    flags: PageTableFlags,
) -> Result<(), MapError> {
    let Some(entry) = walk(pool, root, va, true)? else {
        unreachable!("allocating walk returned no entry");
    };
    let entry = unsafe { &mut *entry };
    if entry.is_present() {
        panic!("remap of {:#x} (already {:?})", va, entry);
    }
    entry.set(frame, flags | PageTableFlags::PRESENT);
    Ok(())
}

/// Frees every table under `table` that no longer maps anything.
/// Returns whether `table` itself is now empty. Leaves are untouched.
fn prune(pool: &FramePool, table: PhysAddr, level: usize) -> bool {
    let entries = unsafe { pool.table(table) };
    if level > 1 {
        for index in 0..512 {
            let entry = entries[index];
            if entry.is_present() && prune(pool, entry.addr(), level - 1) {
                pool.free_page(entry.addr());
                entries[index].clear();
            }
        }
    }
    entries.is_unused()
}

/// Frees `table`'s subtree: leaf frames at level 1, then the tables.
fn free_tree(pool: &FramePool, table: PhysAddr, level: usize) {
    let entries = unsafe { pool.table(table) };
    for index in 0..512 {
        let entry = entries[index];
        if !entry.is_present() {
            continue;
        }
        if level > 1 {
            free_tree(pool, entry.addr(), level - 1);
        } else {
            pool.free_page(entry.addr());
        }
    }
    pool.free_page(table);
}

// =============================================================================
// Kernel space
// =============================================================================

/// One contiguous piece of the kernel's own mapping.
#[derive(Debug, Clone, Copy)]
pub struct KernelRegion {
    pub virt: u64,
    pub phys: u64,
    pub len: u64,
    pub flags: PageTableFlags,
}

/// The kernel-only page table, installed while no process runs.
pub struct KernelSpace {
    root: PhysAddr,
}

impl KernelSpace {
    /// Builds the kernel table from `regions`.
    ///
    /// Kernel regions are fixed after boot: processes copy the upper-half
    /// root entries once, so later kernel mappings would not reach them.
    ///
    /// # Panics
    /// If the pool cannot supply a table. The kernel cannot run without its
    /// own mapping.
    pub fn new(pool: &FramePool, regions: &[KernelRegion]) -> Self {
        let root = match pool.allocate_zeroed() {
            Ok(root) => root,
            Err(_) => panic!("out of memory building the kernel page table"),
        };
        for region in regions {
            let pages = page_round_up(region.len) / PAGE_SIZE;
            for page in 0..pages {
                let offset = page * PAGE_SIZE;
                let va = region.virt + offset;
                let pa = PhysAddr::new(region.phys + offset);
                if map_page(pool, root, va, pa, region.flags).is_err() {
                    panic!("out of memory mapping kernel page {va:#x}");
                }
            }
            log::debug!(
                "kernel region {:#x}..{:#x} -> {:#x} {:?}",
                region.virt,
                region.virt + region.len,
                region.phys,
                region.flags
            );
        }
        Self { root }
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// Flags of the kernel mapping at `va`, if any.
    pub fn flags_at(&self, pool: &FramePool, va: u64) -> Option<PageTableFlags> {
        let entry = walk(pool, self.root, va, false).ok().flatten()?;
        let entry = unsafe { *entry };
        entry.is_present().then(|| entry.flags())
    }
}

// =============================================================================
// Per-process address space
// =============================================================================

/// A process's page table. Owns its lower half.
///
/// Must be released with [`AddressSpace::free`]; dropping it leaks.
pub struct AddressSpace {
    root: PhysAddr,
}

impl AddressSpace {
    /// An empty user half over the shared kernel half.
    pub fn new(pool: &FramePool, kernel: &KernelSpace) -> Result<Self, MapError> {
        let root = pool.allocate_zeroed().map_err(|_| MapError::OutOfMemory)?;
        let (ours, theirs) = unsafe { (pool.table(root), pool.table(kernel.root)) };
        for index in KERNEL_ROOT_START..512 {
            ours[index] = theirs[index];
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// Root entry `index`; diagnostic.
    pub fn root_entry(&self, pool: &FramePool, index: usize) -> PageTableEntry {
        unsafe { pool.table(self.root)[index] }
    }

    /// Maps one page onto `frame`, which the space now owns.
    ///
    /// # Panics
    /// If `va` is already mapped.
    pub fn map(
        &mut self,
        pool: &FramePool,
        va: u64,
        frame: PhysAddr,
        flags: PageTableFlags,
    ) -> Result<(), MapError> {
        map_page(pool, self.root, va, frame, flags)
    }

    /// Maps `[va, va + len)` onto the contiguous frames at `phys`.
    ///
    /// On failure the pages mapped so far are unmapped and freed.
    pub fn map_range(
        &mut self,
        pool: &FramePool,
        va: u64,
        phys: PhysAddr,
        len: u64,
        flags: PageTableFlags,
    ) -> Result<(), MapError> {
        let start = page_round_down(va);
        let end = page_round_up(va + len);
        let mut page = start;
        while page < end {
            let frame = PhysAddr::new(phys.as_u64() + (page - start));
            if let Err(err) = self.map(pool, page, frame, flags) {
                self.unmap_range(pool, start, page - start);
                return Err(err);
            }
            page += PAGE_SIZE;
        }
        Ok(())
    }

    /// Unmaps and frees every mapped page in `[va, va + len)`; holes are
    /// skipped. Tables left empty are freed too.
    pub fn unmap_range(&mut self, pool: &FramePool, va: u64, len: u64) {
        let start = page_round_down(va);
        let end = page_round_up(va + len);
        let mut page = start;
        while page < end {
            if let Ok(Some(entry)) = walk(pool, self.root, page, false) {
                let entry = unsafe { &mut *entry };
                if entry.is_present() {
                    pool.free_page(entry.addr());
                    entry.clear();
                }
            }
            page += PAGE_SIZE;
        }
        self.prune(pool);
    }

    fn prune(&mut self, pool: &FramePool) {
        let root = unsafe { pool.table(self.root) };
        for index in 0..KERNEL_ROOT_START {
            let entry = root[index];
            if entry.is_present() && prune(pool, entry.addr(), 3) {
                pool.free_page(entry.addr());
                root[index].clear();
            }
        }
    }

    /// Backs `[start, end)` with fresh zeroed frames.
    ///
    /// All or nothing: on failure everything this call mapped is released.
    pub fn alloc_range(
        &mut self,
        pool: &FramePool,
        start: u64,
        end: u64,
        flags: PageTableFlags,
    ) -> Result<(), MapError> {
        let start = page_round_down(start);
        let end = page_round_up(end);
        let mut page = start;
        while page < end {
            let result = pool
                .allocate_zeroed()
                .map_err(|_| MapError::OutOfMemory)
                .and_then(|frame| {
                    self.map(pool, page, frame, flags).inspect_err(|_| pool.free_page(frame))
                });
            if let Err(err) = result {
                log::warn!(
                    "out of frames at {:#x}; rolling back {} pages",
                    page,
                    (page - start) / PAGE_SIZE
                );
                self.unmap_range(pool, start, page - start);
                return Err(err);
            }
            page += PAGE_SIZE;
        }
        Ok(())
    }

    /// Grows region `kind` from `old` to `new` bytes (`new >= old`).
    pub fn grow(
        &mut self,
        pool: &FramePool,
        kind: RegionKind,
        old: u64,
        new: u64,
    ) -> Result<(), MapError> {
        debug_assert!(new >= old);
        let (start, end) = kind.growth_span(old, new);
        self.alloc_range(pool, start, end, PageTableFlags::USER_RW)
    }

    /// Shrinks region `kind` from `old` to `new` bytes (`new <= old`).
    pub fn shrink(&mut self, pool: &FramePool, kind: RegionKind, old: u64, new: u64) {
        debug_assert!(new <= old);
        let (start, end) = kind.growth_span(new, old);
        if end > start {
            self.unmap_range(pool, start, end - start);
        }
    }

    /// Deep-copies `[start, end)` into `dst`: one fresh frame per page,
    /// same permission bits.
    ///
    /// On failure `dst` may hold part of the range; the caller discards it.
    ///
    /// # Panics
    /// If a page in the range is not mapped in `self`.
    pub fn copy_range(
        &self,
        pool: &FramePool,
        dst: &mut AddressSpace,
        start: u64,
        end: u64,
    ) -> Result<(), MapError> {
        let mut page = page_round_down(start);
        let end = page_round_up(end);
        while page < end {
            let source = match walk(pool, self.root, page, false) {
                Ok(Some(entry)) => unsafe { *entry },
                _ => PageTableEntry::EMPTY,
            };
            if !source.is_present() {
                panic!("copy_range: {page:#x} not mapped");
            }
            let frame = pool.allocate_page().map_err(|_| MapError::OutOfMemory)?;
            unsafe {
                pool.page(frame).copy_from_slice(pool.page(source.addr()));
            }
            if let Err(err) = dst.map(pool, page, frame, source.flags() & COPIED_FLAGS) {
                pool.free_page(frame);
                return Err(err);
            }
            page += PAGE_SIZE;
        }
        Ok(())
    }

    /// Frame behind user address `va` if its leaf carries every bit of
    /// `need`.
    fn user_frame(&self, pool: &FramePool, va: u64, need: PageTableFlags) -> Option<PhysAddr> {
        if va >= USER_END {
            return None;
        }
        let entry = unsafe { *walk(pool, self.root, page_round_down(va), false).ok()?? };
        entry.flags().contains(need).then(|| entry.addr())
    }

    /// Physical address behind user address `va`, if it is mapped and
    /// user-accessible.
    pub fn translate_user(&self, pool: &FramePool, va: u64) -> Option<PhysAddr> {
        self.user_frame(pool, va, PageTableFlags::USER_RO)
            .map(|frame| frame + VirtAddr::new(va).page_offset())
    }

    /// Leaf flags at `va`, if mapped.
    pub fn flags_at(&self, pool: &FramePool, va: u64) -> Option<PageTableFlags> {
        let entry = unsafe { *walk(pool, self.root, page_round_down(va), false).ok()?? };
        entry.is_present().then(|| entry.flags())
    }

    /// Copies `src` to user address `dst`, page by page. Every page must be
    /// user-writable.
    pub fn copy_out(&self, pool: &FramePool, dst: u64, src: &[u8]) -> Result<(), Fault> {
        self.write_user(pool, dst, src, PageTableFlags::USER_RW)
    }

    /// Like [`Self::copy_out`] but also fills read-only user pages. For the
    /// loader, before the program runs.
    pub fn load_bytes(&self, pool: &FramePool, dst: u64, src: &[u8]) -> Result<(), Fault> {
        self.write_user(pool, dst, src, PageTableFlags::USER_RO)
    }

    fn write_user(
        &self,
        pool: &FramePool,
        dst: u64,
        src: &[u8],
        need: PageTableFlags,
    ) -> Result<(), Fault> {
        let mut done = 0;
        while done < src.len() {
            let va = dst.checked_add(done as u64).ok_or(Fault { addr: dst })?;
            let frame = self.user_frame(pool, va, need).ok_or(Fault { addr: va })?;
            let offset = (va % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - offset).min(src.len() - done);
            pool.write_frame(frame, offset, &src[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Fills `dst` from user address `src`, page by page.
    pub fn copy_in(&self, pool: &FramePool, dst: &mut [u8], src: u64) -> Result<(), Fault> {
        let mut done = 0;
        while done < dst.len() {
            let va = src.checked_add(done as u64).ok_or(Fault { addr: src })?;
            let frame = self
                .user_frame(pool, va, PageTableFlags::USER_RO)
                .ok_or(Fault { addr: va })?;
            let offset = (va % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - offset).min(dst.len() - done);
            pool.read_frame(frame, offset, &mut dst[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string from user memory, without the NUL.
    ///
    /// A string not terminated within `max` bytes is treated like an
    /// unmapped one.
    pub fn read_cstr(&self, pool: &FramePool, va: u64, max: usize) -> Result<Vec<u8>, Fault> {
        let mut out = Vec::new();
        let mut cursor = va;
        while out.len() < max {
            let frame = self
                .user_frame(pool, cursor, PageTableFlags::USER_RO)
                .ok_or(Fault { addr: cursor })?;
            let offset = (cursor % PAGE_SIZE) as usize;
            let page = unsafe { pool.page(frame) };
            for &byte in &page[offset..] {
                if byte == 0 {
                    return Ok(out);
                }
                out.push(byte);
                if out.len() == max {
                    break;
                }
            }
            cursor = page_round_down(cursor) + PAGE_SIZE;
        }
        Err(Fault { addr: va + max as u64 })
    }

    /// Releases every user frame and table, then the root. The shared kernel
    /// half is left alone.
    pub fn free(self, pool: &FramePool) {
        let root = unsafe { pool.table(self.root) };
        for index in 0..KERNEL_ROOT_START {
            let entry = root[index];
            if entry.is_present() {
                free_tree(pool, entry.addr(), 3);
            }
        }
        pool.free_page(self.root);
    }
}
