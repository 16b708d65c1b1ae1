//! Capacity constants.
//!
//! Every fixed-size table in the kernel takes its bound from here rather than
//! from a hidden array length, so a test can shrink a table and hit its
//! "full" boundary deterministically.

/// Sizes of the kernel's fixed tables and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Process-table slots.
    pub max_procs: usize,
    /// Per-core records (highest core id + 1).
    pub max_cpus: usize,
    /// Open-file slots per process.
    pub max_open_files: usize,
    /// Inbound message slots per process.
    pub mailbox_slots: usize,
    /// Largest message payload in bytes (one page backs each message).
    pub max_message_size: usize,
    /// Bytes of kernel stack per process.
    pub kernel_stack_size: usize,
    /// Pages of user stack a new image starts with.
    pub user_stack_pages: usize,
    /// Pseudo-terminal slots.
    pub max_ptys: usize,
    /// Bytes buffered per pseudo-terminal.
    pub pty_buffer: usize,
    /// The core whose timer interrupt advances the global tick counter.
    pub timekeeper_cpu: usize,
    /// Longest path accepted from user space.
    pub max_path: usize,
    /// Longest argument vector accepted by `exec`.
    pub max_args: usize,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            max_procs: 64,
            max_cpus: 8,
            max_open_files: 8,
            mailbox_slots: 64,
            max_message_size: 4096,
            kernel_stack_size: 4096 * 8,
            user_stack_pages: 1,
            max_ptys: 8,
            pty_buffer: 4096,
            timekeeper_cpu: 0,
            max_path: 256,
            max_args: 32,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
