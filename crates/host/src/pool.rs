//! Fixed-capacity resource pools
//!
//! All pipe and transfer records are checked out of pools sized at startup.
//! Nothing here grows after construction; exhaustion and double release are
//! reported to the caller and leave the free lists untouched.

use crate::error::{Failure, HostError, Result};
use crate::handle::{PipeHandle, PoolHandle, SlotKey, TransferHandle};
use crate::pipe::Pipe;
use crate::transfer::Transfer;
use std::marker::PhantomData;
use tracing::trace;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Free-list pool addressed by generation-tagged handles
pub struct SlotPool<H, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    _handle: PhantomData<H>,
}

impl<H: PoolHandle, T> SlotPool<H, T> {
    /// Create a pool with `capacity` slots (clamped to `u16::MAX`)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(usize::from(u16::MAX));
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        // Popped from the back, so the lowest index goes out first
        let free = (0..capacity as u16).rev().collect();

        Self {
            slots,
            free,
            _handle: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Move `value` into a free slot, or hand it back if the pool is exhausted
    pub fn checkout(&mut self, value: T) -> std::result::Result<H, T> {
        let Some(index) = self.free.pop() else {
            return Err(value);
        };
        let slot = &mut self.slots[usize::from(index)];
        slot.value = Some(value);

        Ok(H::from_key(SlotKey {
            index,
            generation: slot.generation,
        }))
    }

    /// Return a slot to the free list; `None` for stale or unknown handles
    pub fn checkin(&mut self, handle: H) -> Option<T> {
        let key = handle.key();
        let slot = self.slots.get_mut(usize::from(key.index))?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Some(value)
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        let key = handle.key();
        let slot = self.slots.get(usize::from(key.index))?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let key = handle.key();
        let slot = self.slots.get_mut(usize::from(key.index))?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    H::from_key(SlotKey {
                        index: index as u16,
                        generation: slot.generation,
                    }),
                    value,
                )
            })
        })
    }

    pub fn handles(&self) -> Vec<H> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

/// Pipe and transfer pools
pub struct ResourcePools {
    pub(crate) pipes: SlotPool<PipeHandle, Pipe>,
    pub(crate) transfers: SlotPool<TransferHandle, Transfer>,
}

impl ResourcePools {
    pub fn new(pipe_capacity: usize, transfer_capacity: usize) -> Self {
        Self {
            pipes: SlotPool::with_capacity(pipe_capacity),
            transfers: SlotPool::with_capacity(transfer_capacity),
        }
    }

    /// Check out an idle transfer
    pub fn allocate_transfer(&mut self) -> Result<TransferHandle> {
        let handle = self
            .transfers
            .checkout(Transfer::idle())
            .map_err(|_| HostError::AllocFail)?;
        trace!("Allocated {}", handle);
        Ok(handle)
    }

    /// Return a transfer to the pool
    pub(crate) fn release_transfer(&mut self, handle: TransferHandle) -> Result<Transfer> {
        let transfer = self
            .transfers
            .checkin(handle)
            .ok_or(HostError::InvalidHandle)?;
        trace!("Released {}", handle);
        Ok(transfer)
    }

    /// Check out a pipe slot for an opening pipe
    pub(crate) fn allocate_pipe_slot(&mut self, pipe: Pipe) -> Result<PipeHandle> {
        self.pipes
            .checkout(pipe)
            .map_err(|_| HostError::Error(Failure::NoIdlePipe))
    }

    /// Return a closed pipe's slot
    pub(crate) fn release_pipe_slot(&mut self, handle: PipeHandle) -> Result<Pipe> {
        self.pipes.checkin(handle).ok_or(HostError::InvalidHandle)
    }

    pub fn transfers_available(&self) -> usize {
        self.transfers.available()
    }

    pub fn pipes_available(&self) -> usize {
        self.pipes.available()
    }
}
