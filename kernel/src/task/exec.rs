//! Replacing the image of the calling process.
//!
//! The new image is built in a fresh address space. The old one stays in
//! place, untouched, until everything has succeeded, so a failed `exec`
//! returns to the caller as if nothing happened.

use alloc::vec::Vec;

use crate::Kernel;
use crate::arch::{self, TrapFrame};
use crate::error::{SysError, SysResult};
use crate::fs::path::{file_name, resolve};
use crate::loader::ImageBuilder;
use crate::memory::layout::{RegionKind, STACK_TOP};
use crate::memory::{AddressSpace, PAGE_SIZE, Regions};
use crate::task::process::ProcName;

/// Everything the commit step needs.
struct NewImage {
    regions: Regions,
    entry: u64,
    sp: u64,
}

impl Kernel {
    /// Runs the program at `path` with arguments `argv`.
    ///
    /// On success the trap frame resumes at the program's entry point with
    /// `rdi = argc` and `rsi = argv`, and the return value is `argc`.
    pub fn exec(&self, path: &str, argv: &[Vec<u8>]) -> SysResult<u64> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        if argv.len() > self.config.max_args {
            return Err(SysError::InvalidArgument);
        }
        let data = unsafe { self.procs.data(slot) };
        let path = resolve(&data.cwd, path)?;
        if self.fs.is_dir(&path) {
            return Err(SysError::IsDirectory);
        }

        let mut space = AddressSpace::new(&self.frames, &self.kernel_space)?;
        let image = match self.build_image(&mut space, &path, argv) {
            Ok(image) => image,
            Err(err) => {
                log::debug!("exec {path}: {err}");
                space.free(&self.frames);
                return Err(err);
            }
        };

        // Commit.
        let root = space.root();
        let old = data.space.replace(space);
        data.regions = image.regions;
        let argc = argv.len() as u64;
        unsafe {
            let mut frame = TrapFrame::user(image.entry, image.sp);
            frame.rdi = argc;
            frame.rsi = image.sp;
            data.trap_frame.write(frame);
        }
        self.procs.lock().procs[slot].name = ProcName::new(file_name(&path));
        unsafe { arch::load_page_table(root.as_u64()) };
        if let Some(old) = old {
            old.free(&self.frames);
        }
        log::debug!("exec {path}: entry {:#x}, {argc} args", image.entry);
        Ok(argc)
    }

    fn build_image(
        &self,
        space: &mut AddressSpace,
        path: &str,
        argv: &[Vec<u8>],
    ) -> SysResult<NewImage> {
        let mut builder = ImageBuilder::new(&self.frames, space);
        let loaded = self.loader.load(self.fs.as_ref(), path, &mut builder)?;
        let mut regions = builder.finish()?;

        regions.stack = self.config.user_stack_pages as u64 * PAGE_SIZE;
        space.grow(&self.frames, RegionKind::Stack, 0, regions.stack)?;
        let bottom = RegionKind::Stack.span(regions.stack).0;
        let sp = push_args(self, space, bottom, argv).ok_or(SysError::InvalidArgument)?;
        Ok(NewImage {
            regions,
            entry: loaded.entry,
            sp,
        })
    }
}

/// Lays out `argv` at the top of the user stack:
///
/// ```text
///   STACK_TOP ─► ┌──────────────────────┐
///                │ strings, NUL-ended   │  each 8-byte aligned
///                ├──────────────────────┤
///                │ argv[0..argc], NULL  │  16-byte aligned
///       sp ────► └──────────────────────┘
/// ```
///
/// `None` if the arguments do not fit in the stack.
fn push_args(kernel: &Kernel, space: &AddressSpace, bottom: u64, argv: &[Vec<u8>]) -> Option<u64> {
    let mut sp = STACK_TOP;
    let mut pointers = Vec::with_capacity(argv.len() + 1);
    for arg in argv {
        sp = sp.checked_sub(arg.len() as u64 + 1)? & !7;
        if sp < bottom {
            return None;
        }
        space.copy_out(&kernel.frames, sp, arg).ok()?;
        space.copy_out(&kernel.frames, sp + arg.len() as u64, &[0]).ok()?;
        pointers.push(sp);
    }
    pointers.push(0);

    let table: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
    sp = sp.checked_sub(table.len() as u64)? & !15;
    if sp < bottom {
        return None;
    }
    space.copy_out(&kernel.frames, sp, &table).ok()?;
    Some(sp)
}
