//! Nested interrupt disabling.
//!
//! `push_off`/`pop_off` are like `cli`/`sti` except they nest: two
//! `push_off`s need two `pop_off`s, and interrupts come back on only if they
//! were on before the outermost `push_off`.

use crate::arch;

/// Disables interrupts on this core, one nesting level deeper.
pub fn push_off() {
    let was_enabled = arch::interrupts_enabled();
    arch::disable_interrupts();
    let core = arch::core_local();
    if core.nesting() == 0 {
        core.set_saved_intena(was_enabled);
    }
    core.set_nesting(core.nesting() + 1);
}

/// Undoes one `push_off`.
///
/// # Panics
/// If interrupts are on (something re-enabled them behind our back) or
/// there is no matching `push_off`.
pub fn pop_off() {
    if arch::interrupts_enabled() {
        panic!("pop_off: interruptible");
    }
    let core = arch::core_local();
    let depth = core.nesting();
    if depth == 0 {
        panic!("pop_off: not nested");
    }
    core.set_nesting(depth - 1);
    if depth == 1 && core.saved_intena() {
        arch::enable_interrupts();
    }
}

/// RAII `push_off`. Dropping it pops.
pub struct InterruptGuard {
    _private: (),
}

impl InterruptGuard {
    pub fn new() -> Self {
        push_off();
        Self { _private: () }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        pop_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupts_return_only_after_outermost_pop() {
        arch::enable_interrupts();
        push_off();
        push_off();
        assert!(!arch::interrupts_enabled());
        pop_off();
        assert!(!arch::interrupts_enabled());
        pop_off();
        assert!(arch::interrupts_enabled());
        assert_eq!(arch::core_local().nesting(), 0);
    }

    #[test]
    fn disabled_before_stays_disabled() {
        arch::disable_interrupts();
        {
            let _guard = InterruptGuard::new();
            assert_eq!(arch::core_local().nesting(), 1);
        }
        assert!(!arch::interrupts_enabled());
    }

    #[test]
    #[should_panic(expected = "pop_off: not nested")]
    fn unmatched_pop_is_fatal() {
        arch::disable_interrupts();
        pop_off();
    }
}
