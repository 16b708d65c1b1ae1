// =============================================================================
// Cinder — Console and Pseudo-Terminals
// =============================================================================
//
// The console device is a collaborator that accepts buffered output. Its
// driver hands keyboard input to `Kernel::console_input`, and the kernel
// keeps that input in a line buffer that console readers sleep on.
//
// Next to it sits a small table of pseudo-terminals, byte rings that one
// process writes and another reads. One pty at a time may be "switched in";
// console input is then routed into it instead of the line buffer.
// =============================================================================

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::sync::{Channel, SpinLock};

/// The console collaborator. Input does not come through here; the
/// driver pushes it with [`Kernel::console_input`].
pub trait Console: Send + Sync {
    fn write(&self, data: &[u8]);
}

struct Pty {
    buf: VecDeque<u8>,
}

struct PtyState {
    slots: Vec<Option<Pty>>,
    active: Option<usize>,
    /// Console input nobody has read yet.
    console: VecDeque<u8>,
}

/// Moves the first buffered line (newline included) into `buf`. A buffer
/// that filled up without a newline counts as one line.
fn take_line(input: &mut VecDeque<u8>, buf: &mut [u8], capacity: usize) -> Option<usize> {
    let end = match input.iter().position(|&byte| byte == b'\n') {
        Some(newline) => newline + 1,
        None if input.len() >= capacity => input.len(),
        None => return None,
    };
    let n = end.min(buf.len());
    for (dst, src) in buf.iter_mut().zip(input.drain(..n)) {
        *dst = src;
    }
    Some(n)
}

/// Fixed table of pseudo-terminals.
pub struct PtyTable {
    state: SpinLock<PtyState>,
    buffer: usize,
}

impl PtyTable {
    pub fn new(capacity: usize, buffer: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            state: SpinLock::new(
                "pty",
                PtyState {
                    slots,
                    active: None,
                    console: VecDeque::with_capacity(buffer),
                },
            ),
            buffer,
        }
    }

    /// The pty console input is routed to, if any.
    pub fn active(&self) -> Option<usize> {
        self.state.lock().active
    }

    pub fn is_open(&self, id: usize) -> bool {
        matches!(self.state.lock().slots.get(id), Some(Some(_)))
    }
}

impl Kernel {
    /// Opens a fresh pty and returns its id.
    pub fn pty_create(&self) -> SysResult<usize> {
        let mut state = self.ptys.state.lock();
        let id = state
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SysError::TableFull)?;
        state.slots[id] = Some(Pty {
            buf: VecDeque::with_capacity(self.ptys.buffer),
        });
        log::debug!("pty {id} created");
        Ok(id)
    }

    /// Appends as much of `data` as fits and wakes readers. Returns the
    /// number of bytes taken.
    pub fn pty_write(&self, id: usize, data: &[u8]) -> SysResult<usize> {
        let mut state = self.ptys.state.lock();
        let pty = state
            .slots
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(SysError::BadDescriptor)?;
        let room = self.ptys.buffer.saturating_sub(pty.buf.len());
        let taken = room.min(data.len());
        pty.buf.extend(&data[..taken]);
        if taken > 0 {
            self.wakeup(Channel::Pty(id));
        }
        Ok(taken)
    }

    /// Reads up to `buf.len()` bytes, sleeping while the pty is open and
    /// empty. A closed pty reads as end of file.
    pub fn pty_read(&self, id: usize, buf: &mut [u8]) -> SysResult<usize> {
        let mut state = self.ptys.state.lock();
        if id >= state.slots.len() {
            return Err(SysError::BadDescriptor);
        }
        loop {
            match state.slots[id].as_mut() {
                None => return Ok(0),
                Some(pty) if !pty.buf.is_empty() => {
                    let n = buf.len().min(pty.buf.len());
                    for (dst, src) in buf.iter_mut().zip(pty.buf.drain(..n)) {
                        *dst = src;
                    }
                    return Ok(n);
                }
                Some(_) => {}
            }
            if self.killed() {
                return Err(SysError::Killed);
            }
            state = self.sleep(Channel::Pty(id), state);
        }
    }

    /// Closes a pty. Sleeping readers wake up and see end of file.
    pub fn pty_close(&self, id: usize) -> SysResult<()> {
        let mut state = self.ptys.state.lock();
        let slot = state.slots.get_mut(id).ok_or(SysError::BadDescriptor)?;
        if slot.take().is_none() {
            return Err(SysError::BadDescriptor);
        }
        if state.active == Some(id) {
            state.active = None;
        }
        self.wakeup(Channel::Pty(id));
        log::debug!("pty {id} closed");
        Ok(())
    }

    /// Routes console input to pty `id`, or back to the console with `None`.
    pub fn pty_switch(&self, id: Option<usize>) -> SysResult<()> {
        let mut state = self.ptys.state.lock();
        if let Some(id) = id {
            if !matches!(state.slots.get(id), Some(Some(_))) {
                return Err(SysError::BadDescriptor);
            }
        }
        state.active = id;
        Ok(())
    }

    /// Called by the console driver with fresh input. It goes to the
    /// switched-in pty if there is one, else into the console line buffer.
    /// Returns `false` when some of it did not fit.
    pub fn console_input(&self, data: &[u8]) -> bool {
        let mut state = self.ptys.state.lock();
        if let Some(id) = state.active {
            drop(state);
            return matches!(self.pty_write(id, data), Ok(n) if n == data.len());
        }
        let room = self.ptys.buffer.saturating_sub(state.console.len());
        let taken = room.min(data.len());
        state.console.extend(&data[..taken]);
        if taken > 0 {
            self.wakeup(Channel::Console);
        }
        taken == data.len()
    }

    /// Reads one line of console input into `buf`, sleeping until a whole
    /// line has been typed.
    pub fn console_read(&self, buf: &mut [u8]) -> SysResult<usize> {
        let mut state = self.ptys.state.lock();
        loop {
            if let Some(n) = take_line(&mut state.console, buf, self.ptys.buffer) {
                return Ok(n);
            }
            if self.killed() {
                return Err(SysError::Killed);
            }
            state = self.sleep(Channel::Console, state);
        }
    }
}
