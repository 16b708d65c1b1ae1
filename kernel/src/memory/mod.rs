//! Physical frames, page tables and per-process address spaces.

pub mod address;
pub mod layout;
pub mod paging;
pub mod pmm;
pub mod vmm;

pub use address::{PAGE_SIZE, PhysAddr, VirtAddr};
pub use layout::{RegionKind, Regions};
pub use paging::PageTableFlags;
pub use pmm::{FramePool, OutOfMemory};
pub use vmm::{AddressSpace, Fault, KernelRegion, KernelSpace, MapError};
