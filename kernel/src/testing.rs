//! Hosted test rig.
//!
//! `boot` builds a kernel over a heap-backed frame pool and in-memory
//! collaborators. The collaborators of the most recent boot on the calling
//! thread stay reachable through the free functions below, so a test can
//! seed files, feed console input and inspect what the kernel did.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::devices::InterruptController;
use crate::fs::{DirEntry, DirHandle, FileHandle, FileSystem, FsError, OpenFlags, Whence};
use crate::loader::{ImageBuilder, LoadError, LoadedImage, ProgramLoader};
use crate::memory::FramePool;
use crate::memory::layout::STACK_TOP;
use crate::sync::Channel;
use crate::task::{Pid, ProcState, Slot};
use crate::traps::T_SYSCALL;
use crate::tty::Console;
use crate::{Collaborators, Kernel, KernelConfig};

/// Frames a default test kernel gets.
pub const FRAMES: usize = 1024;

/// `hlt; jmp .-1`
pub const INITCODE: &[u8] = &[0xf4, 0xeb, 0xfd];

// ── Collaborators ───────────────────────────────────────────────

#[derive(Default)]
struct FsState {
    files: BTreeMap<String, Arc<Mutex<Vec<u8>>>>,
    dirs: BTreeSet<String>,
}

/// Flat in-memory file system. Paths are the absolute strings the kernel
/// passes in.
struct MemFs {
    state: Mutex<FsState>,
    closed: Arc<AtomicUsize>,
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn leaf_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, leaf)| leaf)
}

impl MemFs {
    fn new() -> Self {
        let mut state = FsState::default();
        state.dirs.insert(String::from("/"));
        Self {
            state: Mutex::new(state),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn FileHandle>, FsError> {
        let mut state = self.state.lock().unwrap();
        if state.dirs.contains(path) {
            return Err(FsError::IsDirectory);
        }
        let data = match state.files.get(path) {
            Some(data) => data.clone(),
            None if flags.contains(OpenFlags::CREATE) => {
                if !state.dirs.contains(parent_of(path)) {
                    return Err(FsError::NotFound);
                }
                let data = Arc::new(Mutex::new(Vec::new()));
                state.files.insert(path.into(), data.clone());
                data
            }
            None => return Err(FsError::NotFound),
        };
        if flags.contains(OpenFlags::TRUNC) {
            data.lock().unwrap().clear();
        }
        Ok(Box::new(MemFile {
            data,
            pos: 0,
            closed: self.closed.clone(),
        }))
    }

    fn open_dir(&self, path: &str) -> Result<Box<dyn DirHandle>, FsError> {
        let state = self.state.lock().unwrap();
        if !state.dirs.contains(path) {
            return Err(if state.files.contains_key(path) {
                FsError::NotDirectory
            } else {
                FsError::NotFound
            });
        }
        let dirs = state
            .dirs
            .iter()
            .filter(|dir| dir.as_str() != "/" && parent_of(dir) == path)
            .map(|dir| DirEntry {
                name: leaf_of(dir).into(),
                size: 0,
                is_dir: true,
            });
        let files = state
            .files
            .iter()
            .filter(|(file, _)| parent_of(file) == path)
            .map(|(file, data)| DirEntry {
                name: leaf_of(file).into(),
                size: data.lock().unwrap().len() as u64,
                is_dir: false,
            });
        Ok(Box::new(MemDir {
            entries: dirs.chain(files).collect(),
        }))
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return Err(FsError::Exists);
        }
        if !state.dirs.contains(parent_of(path)) {
            return Err(FsError::NotFound);
        }
        state.dirs.insert(path.into());
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if state.dirs.contains(path) {
            return Err(FsError::IsDirectory);
        }
        state.files.remove(path).map(drop).ok_or(FsError::NotFound)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }
}

struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    closed: Arc<AtomicUsize>,
}

impl FileHandle for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let data = self.data.lock().unwrap();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, FsError> {
        let mut data = self.data.lock().unwrap();
        let start = self.pos as usize;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, FsError> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos,
            Whence::End => self.data.lock().unwrap().len() as u64,
        };
        self.pos = base.checked_add_signed(offset).ok_or(FsError::InvalidPath)?;
        Ok(self.pos)
    }

    fn size(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

struct MemDir {
    entries: VecDeque<DirEntry>,
}

impl DirHandle for MemDir {
    fn next_entry(&mut self) -> Result<Option<DirEntry>, FsError> {
        Ok(self.entries.pop_front())
    }
}

/// Records output; input comes from a queue the test fills.
#[derive(Default)]
struct CaptureConsole {
    output: Mutex<Vec<u8>>,
}

impl Console for CaptureConsole {
    fn write(&self, data: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(data);
    }
}

/// Loads the whole file as one writable segment at 0 and enters at 0.
struct FlatLoader;

impl ProgramLoader for FlatLoader {
    fn load(
        &self,
        fs: &dyn FileSystem,
        path: &str,
        image: &mut ImageBuilder<'_>,
    ) -> Result<LoadedImage, LoadError> {
        let mut file = fs.open(path, OpenFlags::READ).map_err(|err| match err {
            FsError::NotFound => LoadError::NotFound,
            _ => LoadError::Io,
        })?;
        let mut data = vec![0u8; file.size() as usize];
        let n = file.read(&mut data).map_err(|_| LoadError::Io)?;
        file.close();
        image.load_segment(0, &data[..n], n as u64, true)?;
        Ok(LoadedImage { entry: 0 })
    }
}

#[derive(Default)]
struct RecordingController {
    acked: Mutex<Vec<u8>>,
}

impl InterruptController for RecordingController {
    fn end_of_interrupt(&self, irq: u8) {
        self.acked.lock().unwrap().push(irq);
    }
}

struct Rig {
    fs: Arc<MemFs>,
    console: Arc<CaptureConsole>,
    controller: Arc<RecordingController>,
}

std::thread_local! {
    static RIG: RefCell<Option<Rig>> = const { RefCell::new(None) };
}

fn with_rig<R>(f: impl FnOnce(&Rig) -> R) -> R {
    RIG.with(|rig| {
        let rig = rig.borrow();
        f(rig.as_ref().expect("testing: no kernel booted on this thread"))
    })
}

// ── Booting ─────────────────────────────────────────────────────

pub fn boot() -> Kernel {
    boot_with(|_| {})
}

pub fn boot_with(configure: impl FnOnce(&mut KernelConfig)) -> Kernel {
    boot_with_frames(configure, FRAMES)
}

pub fn boot_with_frames(configure: impl FnOnce(&mut KernelConfig), frames: usize) -> Kernel {
    let mut config = KernelConfig::new();
    configure(&mut config);
    let rig = Rig {
        fs: Arc::new(MemFs::new()),
        console: Arc::new(CaptureConsole::default()),
        controller: Arc::new(RecordingController::default()),
    };
    let collaborators = Collaborators {
        console: rig.console.clone(),
        fs: rig.fs.clone(),
        loader: Arc::new(FlatLoader),
        interrupts: rig.controller.clone(),
    };
    RIG.with(|slot| *slot.borrow_mut() = Some(rig));
    Kernel::new(config, FramePool::hosted(frames), &[], collaborators)
}

/// Creates init from [`INITCODE`] and makes it the running process.
pub fn run_init(kernel: &Kernel) -> Pid {
    let pid = kernel.user_init(INITCODE).expect("user_init");
    kernel.enter(0);
    pid
}

// ── Processes ───────────────────────────────────────────────────

pub fn fork_child(kernel: &Kernel) -> Pid {
    kernel.fork().expect("fork")
}

/// Turns `pid` into a zombie as if it had called `exit(status)`.
pub fn exit_child(kernel: &Kernel, pid: Pid, status: i32) {
    let mut table = kernel.procs.lock();
    let slot = table.slot_of(pid).expect("exit_child: no such pid");
    table.procs[slot].state = ProcState::Zombie;
    table.procs[slot].exit_status = status;
    let parent = table.procs[slot].parent;
    if let Some(parent) = parent {
        table.wakeup(Channel::Proc(parent));
    }
}

/// Makes `slot` the running process in place of the current one.
pub fn switch_to(kernel: &Kernel, slot: Slot) {
    kernel.leave();
    kernel.enter(slot);
}

pub fn poke(kernel: &Kernel, slot: Slot, va: u64, bytes: &[u8]) {
    let data = unsafe { kernel.procs.data(slot) };
    let space = data.space.as_ref().expect("poke: no address space");
    space.copy_out(&kernel.frames, va, bytes).expect("poke: unmapped");
}

pub fn peek_user(kernel: &Kernel, slot: Slot, va: u64, len: usize) -> Vec<u8> {
    let data = unsafe { kernel.procs.data(slot) };
    let space = data.space.as_ref().expect("peek: no address space");
    let mut out = vec![0u8; len];
    space.copy_in(&kernel.frames, &mut out, va).expect("peek: unmapped");
    out
}

/// Issues system call `nr` from the current process, with `args` on its
/// user stack, through the trap path. Returns `rax`.
pub fn syscall(kernel: &Kernel, nr: u64, args: &[u64]) -> i64 {
    let slot = kernel.current_slot().expect("syscall: no current process");
    let sp = STACK_TOP - 128;
    let words: Vec<u8> = args.iter().flat_map(|arg| arg.to_le_bytes()).collect();
    poke(kernel, slot, sp + 8, &words);

    let frame = unsafe { kernel.procs.data(slot).trap_frame };
    let frame = unsafe { &mut *frame };
    frame.rsp = sp;
    frame.rax = nr;
    frame.trapno = T_SYSCALL;
    kernel.trap(frame);
    frame.rax as i64
}

// ── Collaborator state ──────────────────────────────────────────

pub fn add_file(path: &str, bytes: &[u8]) {
    with_rig(|rig| {
        let mut state = rig.fs.state.lock().unwrap();
        state.files.insert(path.into(), Arc::new(Mutex::new(bytes.to_vec())));
    });
}

pub fn add_dir(path: &str) {
    with_rig(|rig| {
        rig.fs.state.lock().unwrap().dirs.insert(path.into());
    });
}

pub fn file_contents(path: &str) -> Vec<u8> {
    with_rig(|rig| {
        let state = rig.fs.state.lock().unwrap();
        let data = state.files.get(path).expect("file_contents: no such file");
        data.lock().unwrap().clone()
    })
}

/// Files whose last descriptor has gone away.
pub fn closed_files() -> usize {
    with_rig(|rig| rig.fs.closed.load(Ordering::Relaxed))
}

pub fn console_output() -> Vec<u8> {
    with_rig(|rig| rig.console.output.lock().unwrap().clone())
}

/// IRQs acknowledged so far, in order.
pub fn acknowledged() -> Vec<u8> {
    with_rig(|rig| rig.controller.acked.lock().unwrap().clone())
}
