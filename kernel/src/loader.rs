// =============================================================================
// Cinder — Program Loader Seam
// =============================================================================
//
// Executable formats and dynamic linking are a collaborator's business. The
// loader reads the program through the file system and hands each segment to
// an `ImageBuilder`, which owns the only access it gets to the fresh address
// space. The builder enforces the layout:
//
//   - segments land in the image region [0, MAX_IMAGE) or in the
//     dynamic-library region [DYLIB_BASE, DYLIB_BASE + MAX_DYLIB)
//   - both regions are left contiguous, so `fork` can copy them by range
// =============================================================================

use crate::fs::FileSystem;
use crate::memory::address::{PAGE_SIZE, page_round_down, page_round_up};
use crate::memory::layout::{DYLIB_BASE, IMAGE_BASE, MAX_DYLIB, MAX_IMAGE};
use crate::memory::{AddressSpace, FramePool, PageTableFlags, Regions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    NotFound,
    /// Not a program this loader understands.
    BadFormat,
    /// A segment falls outside the image and library regions.
    OutOfRange,
    OutOfMemory,
    Io,
}

/// What a successful load reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry: u64,
}

/// The loader collaborator.
pub trait ProgramLoader: Send + Sync {
    /// Loads the program at absolute `path` into `image`.
    fn load(
        &self,
        fs: &dyn FileSystem,
        path: &str,
        image: &mut ImageBuilder<'_>,
    ) -> Result<LoadedImage, LoadError>;
}

/// Write access to a fresh address space, limited to the program regions.
pub struct ImageBuilder<'a> {
    pool: &'a FramePool,
    space: &'a mut AddressSpace,
    regions: Regions,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(pool: &'a FramePool, space: &'a mut AddressSpace) -> Self {
        Self {
            pool,
            space,
            regions: Regions::default(),
        }
    }

    /// Maps `mem_size` bytes at `va` and fills them with `data` followed by
    /// zeroes. Pages already mapped by an earlier segment are reused.
    pub fn load_segment(
        &mut self,
        va: u64,
        data: &[u8],
        mem_size: u64,
        writable: bool,
    ) -> Result<(), LoadError> {
        if data.len() as u64 > mem_size {
            return Err(LoadError::BadFormat);
        }
        let end = va.checked_add(mem_size).ok_or(LoadError::OutOfRange)?;
        let in_image = end <= IMAGE_BASE + MAX_IMAGE;
        let in_dylib = va >= DYLIB_BASE && end <= DYLIB_BASE + MAX_DYLIB;
        if !in_image && !in_dylib {
            return Err(LoadError::OutOfRange);
        }
        let flags = if writable {
            PageTableFlags::USER_RW
        } else {
            PageTableFlags::USER_RO
        };
        let mut page = page_round_down(va);
        while page < end {
            if self.space.flags_at(self.pool, page).is_none() {
                self.space
                    .alloc_range(self.pool, page, page + PAGE_SIZE, flags)
                    .map_err(|_| LoadError::OutOfMemory)?;
            }
            page += PAGE_SIZE;
        }
        self.space
            .load_bytes(self.pool, va, data)
            .map_err(|_| LoadError::BadFormat)?;
        if in_image {
            self.regions.image = self.regions.image.max(end - IMAGE_BASE);
        } else {
            self.regions.dylib = self.regions.dylib.max(end - DYLIB_BASE);
        }
        Ok(())
    }

    /// Backs every hole below each region's end with zeroed pages and
    /// returns the region sizes.
    pub fn finish(self) -> Result<Regions, LoadError> {
        let spans = [
            (IMAGE_BASE, self.regions.image),
            (DYLIB_BASE, self.regions.dylib),
        ];
        for (base, size) in spans {
            let mut page = base;
            while page < base + page_round_up(size) {
                if self.space.flags_at(self.pool, page).is_none() {
                    self.space
                        .alloc_range(self.pool, page, page + PAGE_SIZE, PageTableFlags::USER_RW)
                        .map_err(|_| LoadError::OutOfMemory)?;
                }
                page += PAGE_SIZE;
            }
        }
        Ok(self.regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::KernelSpace;

    fn space(pool: &FramePool) -> (KernelSpace, AddressSpace) {
        let kernel = KernelSpace::new(pool, &[]);
        let space = AddressSpace::new(pool, &kernel).unwrap();
        (kernel, space)
    }

    #[test]
    fn segments_are_copied_and_zero_filled() {
        let pool = FramePool::hosted(32);
        let (_kernel, mut space) = space(&pool);
        let regions = {
            let mut builder = ImageBuilder::new(&pool, &mut space);
            builder.load_segment(0x10, b"code", 0x20, false).unwrap();
            builder.finish().unwrap()
        };
        assert_eq!(regions.image, 0x30);
        let mut buf = [0xFFu8; 8];
        space.copy_in(&pool, &mut buf, 0x10).unwrap();
        assert_eq!(&buf, b"code\0\0\0\0");
        assert_eq!(space.flags_at(&pool, 0), Some(PageTableFlags::USER_RO));
        space.free(&pool);
    }

    #[test]
    fn holes_in_the_image_are_filled() {
        let pool = FramePool::hosted(32);
        let (_kernel, mut space) = space(&pool);
        let regions = {
            let mut builder = ImageBuilder::new(&pool, &mut space);
            builder.load_segment(3 * PAGE_SIZE, b"data", 4, true).unwrap();
            builder.finish().unwrap()
        };
        assert_eq!(regions.image, 3 * PAGE_SIZE + 4);
        for page in 0..4 {
            assert!(space.flags_at(&pool, page * PAGE_SIZE).is_some());
        }
        space.free(&pool);
    }

    #[test]
    fn segments_outside_the_program_regions_are_refused() {
        let pool = FramePool::hosted(32);
        let (_kernel, mut space) = space(&pool);
        let mut builder = ImageBuilder::new(&pool, &mut space);
        assert_eq!(
            builder.load_segment(MAX_IMAGE - 4, b"", 8, false),
            Err(LoadError::OutOfRange)
        );
        assert_eq!(builder.load_segment(0, b"too long", 2, false), Err(LoadError::BadFormat));
        drop(builder);
        space.free(&pool);
    }
}
