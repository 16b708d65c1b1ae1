//! Per-process message queues.
//!
//! Each process owns a fixed ring of message slots. A message is copied into
//! a freshly allocated frame on send and copied out (and the frame freed) on
//! receive, so sender and receiver never share memory.
//!
//! The ring never blocks the sender. Once full, the next send lands on the
//! slot `end` points at, which is the oldest queued message, and that message
//! is lost. Receive order then follows the ring, not arrival: after an
//! overwrite the newest message comes out first.

use alloc::vec::Vec;

use super::process::{Pid, ProcState, Slot};
use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::memory::PhysAddr;
use crate::sync::Channel;

/// One queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub sender: Pid,
    pub size: usize,
    /// Frame holding the payload, owned by the queue.
    pub page: PhysAddr,
}

/// Fixed-capacity ring of messages.
#[derive(Debug)]
pub struct Mailbox {
    slots: Vec<Option<Message>>,
    begin: usize,
    end: usize,
    count: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: alloc::vec![None; capacity],
            begin: 0,
            end: 0,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Queues `msg`. Returns the message it overwrote, if the ring was full.
    pub fn push(&mut self, msg: Message) -> Option<Message> {
        let capacity = self.slots.len();
        if capacity == 0 {
            return Some(msg);
        }
        let overwritten = self.slots[self.end].replace(msg);
        self.end = (self.end + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
        overwritten
    }

    /// Takes the message at `begin`.
    pub fn pop(&mut self) -> Option<Message> {
        if self.count == 0 {
            return None;
        }
        let msg = self.slots[self.begin].take();
        self.begin = (self.begin + 1) % self.slots.len();
        self.count -= 1;
        msg
    }

    /// Puts `msg` back at `begin`, ahead of everything queued. Returns it
    /// unchanged if the ring filled up in the meantime.
    pub fn unpop(&mut self, msg: Message) -> Option<Message> {
        let capacity = self.slots.len();
        if self.count == capacity {
            return Some(msg);
        }
        self.begin = (self.begin + capacity - 1) % capacity;
        self.slots[self.begin] = Some(msg);
        self.count += 1;
        None
    }

    /// Empties the ring and hands back every queued message.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.count);
        while let Some(msg) = self.pop() {
            out.push(msg);
        }
        self.begin = 0;
        self.end = 0;
        out
    }
}

impl Kernel {
    /// Copies `data` into a new frame and queues it for process `to`.
    ///
    /// Never blocks. If `to`'s ring is full the oldest slot is overwritten
    /// and its frame freed.
    pub fn send_message(&self, to: Pid, data: &[u8]) -> SysResult<()> {
        if data.len() > self.config.max_message_size {
            return Err(SysError::InvalidArgument);
        }
        let sender = self.current_pid().unwrap_or(0);
        let page = self.frames.allocate_page()?;
        self.frames.write_frame(page, 0, data);

        let mut table = self.procs.lock();
        let Some(slot) = table
            .slot_of(to)
            .filter(|&slot| table.procs[slot].state.is_live())
        else {
            drop(table);
            self.frames.free_page(page);
            return Err(SysError::NoProcess);
        };
        let overwritten = table.procs[slot].mailbox.push(Message {
            sender,
            size: data.len(),
            page,
        });
        table.wakeup(Channel::Mailbox(slot));
        drop(table);

        if let Some(lost) = overwritten {
            log::warn!(
                "mailbox of pid {to} full: message from pid {} ({} bytes) overwritten",
                lost.sender,
                lost.size
            );
            self.frames.free_page(lost.page);
        }
        Ok(())
    }

    /// Takes the next message for the calling process without blocking.
    ///
    /// Copies at most `buf.len()` bytes; returns the sender and the full
    /// payload size.
    pub fn receive_message(&self, buf: &mut [u8]) -> SysResult<(Pid, usize)> {
        self.take_message(|sender, payload| {
            let n = buf.len().min(payload.len());
            buf[..n].copy_from_slice(&payload[..n]);
            Ok((sender, payload.len()))
        })
    }

    /// Takes the next message and hands its sender and payload to
    /// `deliver`. If `deliver` fails the message goes back to the front of
    /// the ring and the error is returned.
    pub fn take_message<R>(
        &self,
        deliver: impl FnOnce(Pid, &[u8]) -> SysResult<R>,
    ) -> SysResult<R> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        let msg = self.procs.lock().procs[slot]
            .mailbox
            .pop()
            .ok_or(SysError::WouldBlock)?;
        let mut payload = alloc::vec![0u8; msg.size];
        self.frames.read_frame(msg.page, 0, &mut payload);
        match deliver(msg.sender, &payload) {
            Ok(out) => {
                self.frames.free_page(msg.page);
                Ok(out)
            }
            Err(err) => {
                let lost = self.procs.lock().procs[slot].mailbox.unpop(msg);
                if let Some(lost) = lost {
                    log::warn!(
                        "mailbox refilled during receive: message from pid {} dropped",
                        lost.sender
                    );
                    self.frames.free_page(lost.page);
                }
                Err(err)
            }
        }
    }

    /// Sleeps until the calling process has at least one message.
    pub fn wait_message(&self) -> SysResult<()> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        let mut table = self.procs.lock();
        loop {
            if !table.procs[slot].mailbox.is_empty() {
                return Ok(());
            }
            if table.procs[slot].killed {
                return Err(SysError::Killed);
            }
            table = self.sleep_locked(Channel::Mailbox(slot), table);
        }
    }

    /// Messages queued for `slot`. Diagnostic.
    pub fn pending_messages(&self, slot: Slot) -> usize {
        let table = self.procs.lock();
        match table.procs.get(slot) {
            Some(p) if p.state != ProcState::Unused => p.mailbox.len(),
            _ => 0,
        }
    }
}
