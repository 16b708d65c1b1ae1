//! Device interrupt routing.
//!
//! Drivers live outside the core. They register a handler per IRQ line; the
//! trap path forwards the vector to it and then acknowledges the interrupt
//! through the controller collaborator.

use alloc::sync::Arc;

use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::sync::SpinLock;

/// Legacy IRQ lines routed through the controller.
pub const IRQ_LINES: usize = 16;

/// The interrupt controller collaborator (local APIC, PIC, ...).
pub trait InterruptController: Send + Sync {
    fn end_of_interrupt(&self, irq: u8);
}

/// A driver's interrupt entry point. Runs with interrupts off.
pub trait IrqHandler: Send + Sync {
    fn handle(&self, kernel: &Kernel, irq: u8);
}

pub struct IrqTable {
    handlers: SpinLock<[Option<Arc<dyn IrqHandler>>; IRQ_LINES]>,
}

impl IrqTable {
    pub fn new() -> Self {
        Self {
            handlers: SpinLock::new("irq", core::array::from_fn(|_| None)),
        }
    }

    /// Installs the handler for `irq`. Each line takes one handler.
    pub fn register(&self, irq: u8, handler: Arc<dyn IrqHandler>) -> SysResult<()> {
        let mut handlers = self.handlers.lock();
        let slot = handlers
            .get_mut(irq as usize)
            .ok_or(SysError::InvalidArgument)?;
        if slot.is_some() {
            return Err(SysError::Exists);
        }
        *slot = Some(handler);
        log::debug!("irq {irq} handler registered");
        Ok(())
    }

    fn handler(&self, irq: u8) -> Option<Arc<dyn IrqHandler>> {
        self.handlers.lock().get(irq as usize)?.clone()
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Forwards `irq` to its driver, then acknowledges it.
    pub(crate) fn device_interrupt(&self, irq: u8) {
        match self.irqs.handler(irq) {
            Some(handler) => handler.handle(self, irq),
            None => log::trace!("irq {irq} with no handler"),
        }
        self.interrupts.end_of_interrupt(irq);
    }
}
