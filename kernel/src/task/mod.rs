//! Processes: the table, their lifecycle, the per-core scheduler and the
//! mailboxes they talk through.

pub mod exec;
pub mod lifecycle;
pub mod mailbox;
pub mod process;
pub mod sched;

pub use lifecycle::ProcInfo;
pub use process::{Pid, ProcState, Slot};
pub use sched::Cpu;
