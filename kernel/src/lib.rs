// =============================================================================
// Cinder — Kernel Core
// =============================================================================
//
// One `Kernel` value owns every piece of global state: the frame pool, the
// kernel page table, the process table, the per-core scheduler records, the
// tick counter, the pty table and the driver registries. Bare-metal boot
// code builds it once and installs it; hosted tests build as many as they
// like.
//
// What the kernel does not implement it reaches through `Collaborators`:
//
//   console    : line input and raw output (tty.rs)
//   fs         : path and file operations (fs/)
//   loader     : executable formats (loader.rs)
//   interrupts : end-of-interrupt on the controller (devices.rs)
//
// Module map:
//   arch/    : the hardware seam (x86_64 and a hosted simulation)
//   sync/    : spin locks, sleep locks, interrupt nesting
//   memory/  : frames, page tables, address spaces, the user layout
//   task/    : process table, lifecycle, scheduler, mailboxes, exec
//   traps/   : trap dispatch and the system call table
//   fs/      : descriptors and the file-system seam
//   tty.rs, kcall.rs, devices.rs, loader.rs: the remaining seams
// =============================================================================

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod devices;
pub mod error;
pub mod fs;
pub mod kcall;
pub mod loader;
pub mod memory;
pub mod sync;
pub mod task;
pub mod traps;
pub mod tty;
pub mod util;

#[cfg(test)]
mod testing;

use alloc::boxed::Box;
use alloc::sync::Arc;

pub use config::KernelConfig;
pub use error::{SysError, SysResult};

use devices::{InterruptController, IrqTable};
use fs::FileSystem;
use kcall::KcallRegistry;
use loader::ProgramLoader;
use memory::{FramePool, KernelRegion, KernelSpace};
use sync::SpinLock;
use task::Cpu;
use task::process::ProcTable;
use tty::{Console, PtyTable};

/// The services the kernel consumes but does not implement.
#[derive(Clone)]
pub struct Collaborators {
    pub console: Arc<dyn Console>,
    pub fs: Arc<dyn FileSystem>,
    pub loader: Arc<dyn ProgramLoader>,
    pub interrupts: Arc<dyn InterruptController>,
}

/// The kernel.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) frames: FramePool,
    pub(crate) kernel_space: KernelSpace,
    pub(crate) procs: ProcTable,
    pub(crate) cpus: Box<[Cpu]>,
    pub(crate) ticks: SpinLock<u64>,
    pub(crate) ptys: PtyTable,
    pub(crate) kcalls: KcallRegistry,
    pub(crate) irqs: IrqTable,
    pub(crate) console: Arc<dyn Console>,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) loader: Arc<dyn ProgramLoader>,
    pub(crate) interrupts: Arc<dyn InterruptController>,
}

impl Kernel {
    /// Builds the kernel page table from `regions` and sizes every table
    /// from `config`. No process exists yet; see [`Kernel::user_init`].
    pub fn new(
        config: KernelConfig,
        frames: FramePool,
        regions: &[KernelRegion],
        collaborators: Collaborators,
    ) -> Self {
        let kernel_space = KernelSpace::new(&frames, regions);
        let cpus = (0..config.max_cpus).map(Cpu::new).collect();
        log::info!(
            "kernel: {} frames free, {} process slots, {} cpus",
            frames.free_count(),
            config.max_procs,
            config.max_cpus
        );
        Self {
            procs: ProcTable::new(config.max_procs, config.mailbox_slots),
            ptys: PtyTable::new(config.max_ptys, config.pty_buffer),
            kcalls: KcallRegistry::new(),
            irqs: IrqTable::new(),
            ticks: SpinLock::new("ticks", 0),
            cpus,
            kernel_space,
            frames,
            config,
            console: collaborators.console,
            fs: collaborators.fs,
            loader: collaborators.loader,
            interrupts: collaborators.interrupts,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    /// Registry drivers add named kernel calls to.
    pub fn kcalls(&self) -> &KcallRegistry {
        &self.kcalls
    }

    /// Registry drivers add interrupt handlers to.
    pub fn irqs(&self) -> &IrqTable {
        &self.irqs
    }

    pub fn ptys(&self) -> &PtyTable {
        &self.ptys
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    /// Routes the `log` macros to the console.
    pub fn init_logging(&'static self, level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
        klog::init(self, level)
    }
}

impl klog::LogSink for Kernel {
    fn write_str(&self, s: &str) {
        self.console.write(s.as_bytes());
    }
}

// ── The installed instance ──────────────────────────────────────
//
// Trap stubs and the first-run trampoline have no way to carry a reference,
// so bare-metal builds keep one kernel in a static.

#[cfg(target_os = "none")]
static KERNEL: spin::Once<Kernel> = spin::Once::new();

/// Installs `kernel` as the instance trap entry uses. Only the first call
/// has any effect.
#[cfg(target_os = "none")]
pub fn install(kernel: Kernel) -> &'static Kernel {
    KERNEL.call_once(|| kernel)
}

/// The installed kernel.
///
/// # Panics
/// Before [`install`].
#[cfg(target_os = "none")]
pub fn global() -> &'static Kernel {
    match KERNEL.get() {
        Some(kernel) => kernel,
        None => panic!("kernel used before install"),
    }
}

/// Brings core `id` up and enters its scheduler.
///
/// # Safety
/// Once per core, with interrupts disabled, after [`install`]; see
/// [`arch::x86_64::init_core`].
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub unsafe fn start_core(id: usize) -> ! {
    unsafe { arch::x86_64::init_core(id) };
    let kernel = global();
    unsafe { arch::load_page_table(kernel.kernel_space.root().as_u64()) };
    kernel.scheduler()
}
