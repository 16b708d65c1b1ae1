// =============================================================================
// Cinder — Kernel Panic
// =============================================================================
//
// A kernel panic is fatal. The handler raises a global flag (every scheduler
// loop checks it and halts its core), prints one report through the log sink
// and halts the panicking core.
//
// The report goes through `klog::print`, which drops output rather than
// spin on a sink lock a dying core may hold.
// =============================================================================

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

static PANICKED: AtomicBool = AtomicBool::new(false);

/// Return addresses printed with a panic.
pub const BACKTRACE_DEPTH: usize = 16;

/// Whether some core has panicked.
pub fn panicked() -> bool {
    PANICKED.load(Ordering::Acquire)
}

/// Formats the panic report.
pub fn write_report<W: Write>(
    out: &mut W,
    core: usize,
    location: Option<(&str, u32)>,
    message: &dyn fmt::Display,
    frames: &[u64],
) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "==========================================================")?;
    writeln!(out, "  KERNEL PANIC on cpu {core}")?;
    writeln!(out, "==========================================================")?;
    match location {
        Some((file, line)) => writeln!(out, "  Location: {file}:{line}")?,
        None => writeln!(out, "  Location: <unknown>")?,
    }
    writeln!(out, "  Message: {message}")?;
    if !frames.is_empty() {
        writeln!(out, "  Backtrace:")?;
        for (depth, addr) in frames.iter().enumerate() {
            writeln!(out, "    #{depth:<2} {addr:#018x}")?;
        }
    }
    writeln!(out, "  System halted.")
}

#[cfg(target_os = "none")]
struct Sink;

#[cfg(target_os = "none")]
impl Write for Sink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        klog::print!("{s}");
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    use crate::arch;

    arch::disable_interrupts();
    PANICKED.store(true, Ordering::Release);

    let mut frames = [0u64; BACKTRACE_DEPTH];
    let depth = arch::backtrace(&mut frames);
    let location = info.location().map(|l| (l.file(), l.line()));
    let _ = write_report(
        &mut Sink,
        arch::cpu_id(),
        location,
        &info.message(),
        &frames[..depth],
    );
    arch::halt_forever()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_names_the_core_location_and_frames() {
        let mut out = String::new();
        write_report(
            &mut out,
            2,
            Some(("kernel/src/task/sched.rs", 170)),
            &format_args!("sched: {} locks held", 2),
            &[0xffff_8000_0010_2030, 0xffff_8000_0010_4000],
        )
        .unwrap();
        assert!(out.contains("KERNEL PANIC on cpu 2"));
        assert!(out.contains("Location: kernel/src/task/sched.rs:170"));
        assert!(out.contains("Message: sched: 2 locks held"));
        assert!(out.contains("#0  0xffff800000102030"));
        assert!(out.contains("#1  0xffff800000104000"));
        assert!(out.ends_with("System halted.\n"));
    }

    #[test]
    fn no_frames_no_backtrace_section() {
        let mut out = String::new();
        write_report(&mut out, 0, None, &"boom", &[]).unwrap();
        assert!(out.contains("Location: <unknown>"));
        assert!(!out.contains("Backtrace"));
    }
}
