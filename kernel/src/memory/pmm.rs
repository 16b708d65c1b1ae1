//! Physical page allocator.
//!
//! A free list of 4 KiB frames threaded through the free frames themselves:
//! the first word of every free frame holds the physical address of the next
//! one (0 ends the list). Allocation and release are O(1) under one spin
//! lock.
//!
//! The pool owns the direct-map offset, so it is also the only way kernel
//! code turns a physical frame into bytes it can touch.

use alloc::vec::Vec;

use super::address::{PAGE_SIZE, PhysAddr};
use super::paging::PageTable;
use crate::sync::SpinLock;

/// Byte written over freed frames in debug builds, so use-after-free reads
/// garbage instead of stale data.
const JUNK: u8 = 0x01;

/// Physical base the hosted pool pretends its memory starts at.
#[cfg(not(target_os = "none"))]
const HOST_PHYS_BASE: u64 = 0x10_0000;

/// The pool has no free frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

struct FreeList {
	head: u64,
	free: usize,
	total: usize,
}

pub struct FramePool {
	/// `virtual = physical + offset` (wrapping).
	offset: u64,
	start: u64,
	end: u64,
	list: SpinLock<FreeList>,
	#[cfg(not(target_os = "none"))]
	backing: Option<(usize, core::alloc::Layout)>,
}

impl FramePool {
	/// Builds a pool over the physical range `[start, end)`.
	///
	/// # Safety
	/// Every frame in the range must be unused RAM, reachable at
	/// `phys + offset`, and handed to no one else.
	pub unsafe fn new(offset: u64, start: u64, end: u64) -> Self {
		let pool = Self {
			offset,
			start: start.next_multiple_of(PAGE_SIZE),
			end: end & !(PAGE_SIZE - 1),
			list: SpinLock::new("frames", FreeList { head: 0, free: 0, total: 0 }),
			#[cfg(not(target_os = "none"))]
			backing: None,
		};
		pool.seed();
		pool
	}

	/// Heap-backed pool of `frames` frames for hosted builds.
	#[cfg(not(target_os = "none"))]
	pub fn hosted(frames: usize) -> Self {
		use alloc::alloc::{Layout, alloc_zeroed, handle_alloc_error};

		let size = frames * PAGE_SIZE as usize;
		let layout = match Layout::from_size_align(size, PAGE_SIZE as usize) {
			Ok(layout) => layout,
			Err(_) => panic!("frame pool of {frames} frames is too large"),
		};
		let base = unsafe { alloc_zeroed(layout) };
		if base.is_null() {
			handle_alloc_error(layout);
		}
		let pool = Self {
			offset: (base as u64).wrapping_sub(HOST_PHYS_BASE),
			start: HOST_PHYS_BASE,
			end: HOST_PHYS_BASE + size as u64,
			list: SpinLock::new("frames", FreeList { head: 0, free: 0, total: 0 }),
			backing: Some((base as usize, layout)),
		};
		pool.seed();
		pool
	}

	fn seed(&self) {
		let mut list = self.list.lock();
		let mut frame = self.start;
		while frame + PAGE_SIZE <= self.end {
			// Physical 0 doubles as the end-of-list marker.
			if frame != 0 {
				self.push(&mut list, frame);
				list.total += 1;
			}
			frame += PAGE_SIZE;
		}
		log::info!(
			"frame pool: {} frames ({} KiB) at {:#x}..{:#x}",
			list.total,
			list.total * PAGE_SIZE as usize / 1024,
			self.start,
			self.end
		);
	}

	fn push(&self, list: &mut FreeList, frame: u64) {
		unsafe {
			(self.ptr(PhysAddr::new(frame)) as *mut u64).write(list.head);
		}
		list.head = frame;
		list.free += 1;
	}

	// ── Allocation ──────────────────────────────────────────────

	/// Takes one frame. Its contents are unspecified.
	pub fn allocate_page(&self) -> Result<PhysAddr, OutOfMemory> {
		let mut list = self.list.lock();
		if list.head == 0 {
			return Err(OutOfMemory);
		}
		let frame = list.head;
		list.head = unsafe { (self.ptr(PhysAddr::new(frame)) as *const u64).read() };
		list.free -= 1;
		Ok(PhysAddr::new(frame))
	}

	/// Takes one frame and fills it with zeroes.
	pub fn allocate_zeroed(&self) -> Result<PhysAddr, OutOfMemory> {
		let frame = self.allocate_page()?;
		unsafe {
			core::ptr::write_bytes(self.ptr(frame), 0, PAGE_SIZE as usize);
		}
		Ok(frame)
	}

	/// Returns a frame to the pool.
	///
	/// # Panics
	/// If `frame` is misaligned or not one of this pool's frames.
	pub fn free_page(&self, frame: PhysAddr) {
		let addr = frame.as_u64();
		if !frame.is_page_aligned() || addr < self.start || addr >= self.end || addr == 0 {
			panic!("free_page: {frame} is not a pool frame");
		}
		if cfg!(debug_assertions) {
			unsafe {
				core::ptr::write_bytes(self.ptr(frame), JUNK, PAGE_SIZE as usize);
			}
		}
		let mut list = self.list.lock();
		self.push(&mut list, addr);
	}

	// ── Accounting ──────────────────────────────────────────────

	pub fn free_count(&self) -> usize {
		self.list.lock().free
	}

	pub fn total(&self) -> usize {
		self.list.lock().total
	}

	/// Every free frame, sorted. Diagnostic: walks the whole list.
	pub fn snapshot(&self) -> Vec<u64> {
		let list = self.list.lock();
		let mut frames = Vec::with_capacity(list.free);
		let mut cursor = list.head;
		while cursor != 0 {
			frames.push(cursor);
			cursor = unsafe { (self.ptr(PhysAddr::new(cursor)) as *const u64).read() };
		}
		drop(list);
		frames.sort_unstable();
		frames
	}

	// ── Access ──────────────────────────────────────────────────

	fn ptr(&self, frame: PhysAddr) -> *mut u8 {
		frame.as_u64().wrapping_add(self.offset) as *mut u8
	}

	/// The bytes of an allocated frame.
	///
	/// # Safety
	/// The caller owns `frame` and holds no other reference into it.
	#[allow(clippy::mut_from_ref)]
	pub unsafe fn page(&self, frame: PhysAddr) -> &mut [u8; PAGE_SIZE as usize] {
		unsafe { &mut *(self.ptr(frame.page_align_down()) as *mut [u8; PAGE_SIZE as usize]) }
	}

	/// An allocated frame viewed as a page table.
	///
	/// # Safety
	/// `frame` must hold a page table, and no other reference to that table
	/// may be live.
	#[allow(clippy::mut_from_ref)]
	pub(crate) unsafe fn table(&self, frame: PhysAddr) -> &mut PageTable {
		unsafe { &mut *(self.ptr(frame) as *mut PageTable) }
	}

	/// Copies `data` into `frame` at `offset`.
	pub fn write_frame(&self, frame: PhysAddr, offset: usize, data: &[u8]) {
		assert!(offset + data.len() <= PAGE_SIZE as usize, "write past end of frame");
		unsafe { self.page(frame)[offset..offset + data.len()].copy_from_slice(data) };
	}

	/// Copies bytes out of `frame` starting at `offset`.
	pub fn read_frame(&self, frame: PhysAddr, offset: usize, out: &mut [u8]) {
		assert!(offset + out.len() <= PAGE_SIZE as usize, "read past end of frame");
		unsafe { out.copy_from_slice(&self.page(frame)[offset..offset + out.len()]) };
	}
}

#[cfg(not(target_os = "none"))]
impl Drop for FramePool {
	fn drop(&mut self) {
		if let Some((base, layout)) = self.backing.take() {
			unsafe { alloc::alloc::dealloc(base as *mut u8, layout) };
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allocates_every_frame_then_reports_oom() {
		let pool = FramePool::hosted(8);
		assert_eq!(pool.total(), 8);
		let frames: Vec<_> = (0..8).map(|_| pool.allocate_page().unwrap()).collect();
		assert_eq!(pool.free_count(), 0);
		assert_eq!(pool.allocate_page(), Err(OutOfMemory));
		for frame in frames {
			pool.free_page(frame);
		}
		assert_eq!(pool.free_count(), 8);
	}

	#[test]
	fn zeroed_frames_are_zero_even_after_reuse() {
		let pool = FramePool::hosted(1);
		let frame = pool.allocate_page().unwrap();
		pool.write_frame(frame, 0, &[0xAA; 64]);
		pool.free_page(frame);
		let again = pool.allocate_zeroed().unwrap();
		assert_eq!(again, frame);
		let mut buf = [0xFFu8; 64];
		pool.read_frame(again, 0, &mut buf);
		assert!(buf.iter().all(|&b| b == 0));
	}

	#[test]
	fn snapshot_is_stable_across_alloc_and_free() {
		let pool = FramePool::hosted(4);
		let before = pool.snapshot();
		assert_eq!(before.len(), 4);
		let a = pool.allocate_page().unwrap();
		let b = pool.allocate_page().unwrap();
		pool.free_page(a);
		pool.free_page(b);
		assert_eq!(pool.snapshot(), before);
	}

	#[test]
	#[should_panic(expected = "is not a pool frame")]
	fn freeing_a_foreign_frame_is_fatal() {
		let pool = FramePool::hosted(2);
		pool.free_page(PhysAddr::new(0x10));
	}
}
