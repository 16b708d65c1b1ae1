//! Named kernel calls.
//!
//! Drivers expose ad-hoc operations to user space by registering a handler
//! under a short name. The `kcall` system call looks the name up and passes
//! one integer (or user pointer) argument through.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::sync::SpinLock;

/// Longest registrable name, in bytes.
pub const MAX_NAME: usize = 16;

pub type KcallHandler = Arc<dyn Fn(&Kernel, u64) -> SysResult<u64> + Send + Sync>;

pub struct KcallRegistry {
    entries: SpinLock<Vec<(&'static str, KcallHandler)>>,
}

impl KcallRegistry {
    pub const fn new() -> Self {
        Self {
            entries: SpinLock::new("kcall", Vec::new()),
        }
    }

    pub fn register(&self, name: &'static str, handler: KcallHandler) -> SysResult<()> {
        if name.is_empty() || name.len() > MAX_NAME {
            return Err(SysError::InvalidArgument);
        }
        let mut entries = self.entries.lock();
        if entries.iter().any(|(existing, _)| *existing == name) {
            return Err(SysError::Exists);
        }
        entries.push((name, handler));
        log::debug!("kcall {name:?} registered");
        Ok(())
    }

    fn find(&self, name: &str) -> Option<KcallHandler> {
        self.entries
            .lock()
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, handler)| handler.clone())
    }
}

impl Default for KcallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Runs the handler registered as `name`. The registry lock is not held
    /// while it runs, so handlers may block.
    pub fn kcall(&self, name: &str, arg: u64) -> SysResult<u64> {
        let handler = self.kcalls.find(name).ok_or(SysError::NoEntry)?;
        handler(self, arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn registered_handler_receives_the_argument() {
        let kernel = testing::boot();
        kernel
            .kcalls()
            .register("double", Arc::new(|_: &Kernel, arg: u64| -> SysResult<u64> { Ok(arg * 2) }))
            .unwrap();
        assert_eq!(kernel.kcall("double", 21), Ok(42));
        assert_eq!(kernel.kcall("triple", 1), Err(SysError::NoEntry));
    }

    #[test]
    fn names_are_short_and_unique() {
        let registry = KcallRegistry::new();
        let handler: KcallHandler = Arc::new(|_: &Kernel, _: u64| -> SysResult<u64> { Ok(0) });
        assert_eq!(
            registry.register("a-name-longer-than-16", handler.clone()),
            Err(SysError::InvalidArgument)
        );
        registry.register("beep", handler.clone()).unwrap();
        assert_eq!(registry.register("beep", handler), Err(SysError::Exists));
    }
}
