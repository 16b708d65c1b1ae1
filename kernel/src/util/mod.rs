// =============================================================================
// Cinder — Kernel Utilities
// =============================================================================
//
//   panic.rs: the fatal path: stop the other cores, print a report, halt
// =============================================================================

pub mod panic;
