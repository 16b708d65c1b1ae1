//! Descriptor tables.
//!
//! Every core gets its own GDT and TSS (the TSS holds that core's RSP0, which
//! changes on every dispatch). The IDT is identical everywhere and built once.
//!
//! GDT layout:
//! - 0x00: null
//! - 0x08: kernel code (64-bit)
//! - 0x10: kernel data
//! - 0x18: user data (DPL 3)
//! - 0x20: user code (DPL 3, 64-bit)
//! - 0x28: TSS (16 bytes, two slots)

use core::arch::asm;
use core::cell::UnsafeCell;
use core::mem::size_of;

use spin::Once;
use x86_64::VirtAddr;
use x86_64::instructions::tables::{lgdt, lidt};
use x86_64::structures::DescriptorTablePointer;

use super::MAX_CORES;
use super::entry;
use crate::arch::KERNEL_CS;

const KERNEL_DS: u16 = 0x10;
const TSS_SELECTOR: u16 = 0x28;
const GDT_ENTRIES: usize = 7;

// Access bytes: P=1, S=1, code/data type, DPL in bits 5-6.
// Flags nibble: L=1 for 64-bit code segments.
const KERNEL_CODE: u64 = 0x00_2F_9A_00_0000_FFFF;
const KERNEL_DATA: u64 = 0x00_0F_92_00_0000_FFFF;
const USER_DATA: u64 = 0x00_0F_F2_00_0000_FFFF;
const USER_CODE: u64 = 0x00_2F_FA_00_0000_FFFF;

/// Vector the system call gate lives on.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// The 64-bit Task State Segment.
///
/// In long mode it holds no register state, only the stack pointers used on
/// privilege transitions.
#[repr(C, packed)]
#[allow(dead_code)]
struct Tss {
    reserved0: u32,
    /// RSP0 is loaded when a trap crosses from ring 3 to ring 0.
    rsp: [u64; 3],
    reserved1: u64,
    ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            reserved0: 0,
            rsp: [0; 3],
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: size_of::<Self>() as u16,
        }
    }

    /// Encodes the 16-byte system descriptor that points at this TSS.
    fn descriptor(&self) -> (u64, u64) {
        let base = self as *const _ as u64;
        let limit = (size_of::<Self>() - 1) as u64;

        let mut low = limit & 0xFFFF;
        low |= (base & 0xFFFF) << 16;
        low |= ((base >> 16) & 0xFF) << 32;
        // Present, DPL 0, type 0x9 (available 64-bit TSS).
        low |= 0x89u64 << 40;
        low |= ((limit >> 16) & 0xF) << 48;
        low |= ((base >> 24) & 0xFF) << 56;

        (low, base >> 32)
    }
}

#[repr(C, align(16))]
struct CoreTables {
    gdt: [u64; GDT_ENTRIES],
    tss: Tss,
}

/// One slot per core. A core only ever touches its own slot.
struct PerCore([UnsafeCell<CoreTables>; MAX_CORES]);

unsafe impl Sync for PerCore {}

static TABLES: PerCore = {
    const EMPTY: UnsafeCell<CoreTables> = UnsafeCell::new(CoreTables {
        gdt: [0; GDT_ENTRIES],
        tss: Tss::new(),
    });
    PerCore([EMPTY; MAX_CORES])
};

/// Gate descriptor (16 bytes).
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct Gate {
    offset_low: u16,
    selector: u16,
    options: u16,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl Gate {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            options: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    /// Present interrupt gate (IF cleared on entry) callable from `dpl`.
    fn interrupt(handler: u64, dpl: u16) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CS as u16,
            options: 0x8E00 | (dpl << 13),
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }
}

#[repr(C, align(16))]
struct Idt([Gate; 256]);

static IDT: Once<Idt> = Once::new();

fn build_idt() -> Idt {
    let mut idt = Idt([Gate::missing(); 256]);
    for (vector, gate) in idt.0.iter_mut().enumerate() {
        let dpl = if vector == SYSCALL_VECTOR as usize { 3 } else { 0 };
        *gate = Gate::interrupt(entry::stub_address(vector), dpl);
    }
    idt
}

/// Loads this core's GDT, TSS and the shared IDT.
///
/// # Safety
/// Called once per core from [`super::init_core`].
pub(super) unsafe fn load_for_core(id: usize) {
    let tables = unsafe { &mut *TABLES.0[id].get() };
    let (tss_low, tss_high) = tables.tss.descriptor();
    tables.gdt = [0, KERNEL_CODE, KERNEL_DATA, USER_DATA, USER_CODE, tss_low, tss_high];

    let gdt_ptr = DescriptorTablePointer {
        limit: (size_of::<[u64; GDT_ENTRIES]>() - 1) as u16,
        base: VirtAddr::new(tables.gdt.as_ptr() as u64),
    };
    let idt = IDT.call_once(build_idt);
    let idt_ptr = DescriptorTablePointer {
        limit: (size_of::<Idt>() - 1) as u16,
        base: VirtAddr::new(idt as *const Idt as u64),
    };

    unsafe {
        lgdt(&gdt_ptr);

        // Reload CS with a far return.
        asm!(
            "push {sel}",
            "lea {tmp}, [rip + 2f]",
            "push {tmp}",
            "retfq",
            "2:",
            sel = in(reg) KERNEL_CS,
            tmp = lateout(reg) _,
            options(preserves_flags)
        );
        asm!(
            "mov ds, {sel:x}",
            "mov es, {sel:x}",
            "mov ss, {sel:x}",
            sel = in(reg) KERNEL_DS,
            options(nostack, preserves_flags)
        );
        asm!("ltr {sel:x}", sel = in(reg) TSS_SELECTOR, options(nostack, preserves_flags));

        lidt(&idt_ptr);
    }
}

/// Sets RSP0 for the calling core: the stack the next ring-3 trap lands on.
pub fn set_kernel_stack(top: u64) {
    let id = super::cpu_id();
    // Only this core reads or writes its own TSS.
    let tables = unsafe { &mut *TABLES.0[id].get() };
    let mut rsp = tables.tss.rsp;
    rsp[0] = top;
    tables.tss.rsp = rsp;
}
