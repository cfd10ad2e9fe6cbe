// SPDX-License-Identifier: GPL-3.0-only

//! Buffer arena for one streaming session
//!
//! Buffers live in fixed slots addressed by index. Each slot carries its
//! ownership state behind a lock:
//!
//! - `Free`: held by the process, not queued
//! - `PendingKernel`: queued to the driver; the memory must not be touched
//! - `HandedToCallback`: lent to the frame callback as a [`Frame`]
//!
//! Releasing a frame moves its slot back to `PendingKernel` by resubmitting
//! it. Each acquisition cycle issues exactly one resubmission.

use super::{BackingMode, BufferInfo, VideoDevice};
use crate::constants::META_DATA_SIZE;
use crate::errors::BackendResult;
use std::io;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    Mapped,
    Heap,
}

/// Memory backing one capture buffer
#[derive(Debug)]
pub struct BufferMemory {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// The region is only accessed under the owning slot's state lock.
unsafe impl Send for BufferMemory {}
unsafe impl Sync for BufferMemory {}

impl BufferMemory {
    /// Allocate zeroed process memory
    pub fn allocate(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut u8;
        Self {
            // SAFETY: Box::into_raw never returns null
            ptr: unsafe { NonNull::new_unchecked(raw) },
            len,
            backing: Backing::Heap,
        }
    }

    /// Map `len` bytes of a driver buffer at `offset`
    pub fn map(fd: RawFd, offset: u32, len: usize) -> io::Result<Self> {
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        Ok(Self {
            ptr,
            len,
            backing: Backing::Mapped,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the region, for handing to the driver
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// View `range` of the region
    ///
    /// # Safety
    /// The driver must not own the buffer while the slice is alive.
    unsafe fn slice(&self, start: usize, end: usize) -> &[u8] {
        let end = end.min(self.len);
        let start = start.min(end);
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(start), end - start) }
    }

    /// Zero `range` of the region
    ///
    /// # Safety
    /// The driver must not own the buffer and no slice may be alive.
    unsafe fn zero(&self, start: usize, end: usize) {
        let end = end.min(self.len);
        let start = start.min(end);
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr().add(start), 0, end - start) };
    }
}

impl Drop for BufferMemory {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mapped => {
                let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
                if result < 0 {
                    warn!(error = %io::Error::last_os_error(), "munmap failed");
                }
            }
            Backing::Heap => {
                let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
                // SAFETY: produced by Box::into_raw in allocate with the same length
                drop(unsafe { Box::from_raw(slice) });
            }
        }
    }
}

/// Ownership state of one buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    PendingKernel,
    HandedToCallback,
}

struct Slot {
    memory: BufferMemory,
    frame_size: usize,
    /// Driver-reported buffer length; the metadata block starts here
    capacity: usize,
    state: Mutex<SlotState>,
}

/// View of one slot for inspection
pub struct SlotView<'a> {
    slot: &'a Slot,
}

impl SlotView<'_> {
    pub fn state(&self) -> SlotState {
        *lock_state(&self.slot.state)
    }

    /// Whether the driver currently owns the buffer
    pub fn owned_by_kernel(&self) -> bool {
        self.state() == SlotState::PendingKernel
    }

    /// Allocated length including any metadata block
    pub fn allocated_length(&self) -> usize {
        self.slot.memory.len()
    }
}

fn lock_state(state: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    // A poisoned slot lock only means a callback panicked mid-release; the
    // state value itself is always valid.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fixed set of capture buffers for one committed profile
pub struct BufferPool {
    device: Arc<dyn VideoDevice>,
    mode: BackingMode,
    slots: Vec<Slot>,
    active: AtomicBool,
}

impl BufferPool {
    /// Query and back every granted buffer
    ///
    /// `image_size` is the negotiated frame size; a buffer the driver sized
    /// larger still counts a frame of `image_size` bytes as complete.
    pub fn allocate(
        device: Arc<dyn VideoDevice>,
        mode: BackingMode,
        granted: u32,
        image_size: usize,
    ) -> BackendResult<Self> {
        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let info: BufferInfo = device.query_buffer(index, mode)?;
            let memory = match mode {
                BackingMode::Mapped => device.map_buffer(&info)?,
                BackingMode::UserAllocated => BufferMemory::allocate(info.length + META_DATA_SIZE),
            };
            let frame_size = match image_size {
                0 => info.length,
                size => size.min(info.length),
            };
            debug!(index, length = info.length, frame_size, mode = ?mode, "Buffer allocated");
            slots.push(Slot {
                memory,
                frame_size,
                capacity: info.length,
                state: Mutex::new(SlotState::Free),
            });
        }

        Ok(Self {
            device,
            mode,
            slots,
            active: AtomicBool::new(true),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn mode(&self) -> BackingMode {
        self.mode
    }

    pub fn slot(&self, index: usize) -> Option<SlotView<'_>> {
        self.slots.get(index).map(|slot| SlotView { slot })
    }

    /// Full frame size of a slot, excluding the metadata block
    pub fn frame_size(&self, index: usize) -> usize {
        self.slots.get(index).map(|s| s.frame_size).unwrap_or(0)
    }

    /// Number of buffers currently lent to the frame callback
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| *lock_state(&s.state) == SlotState::HandedToCallback)
            .count()
    }

    /// Whether buffers may still be resubmitted
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Submit every free buffer to the driver
    pub fn submit_all(&self) -> BackendResult<()> {
        for index in 0..self.slots.len() {
            let mut state = lock_state(&self.slots[index].state);
            if *state == SlotState::Free {
                self.submit(index, &mut state)?;
            }
        }
        Ok(())
    }

    fn submit(&self, index: usize, state: &mut SlotState) -> BackendResult<()> {
        let slot = &self.slots[index];
        if self.mode.has_metadata() {
            // SAFETY: the slot lock is held and the driver does not own it
            unsafe {
                slot.memory
                    .zero(slot.capacity, slot.capacity + META_DATA_SIZE)
            };
        }
        self.device
            .queue_buffer(index as u32, &slot.memory, self.mode)?;
        *state = SlotState::PendingKernel;
        Ok(())
    }

    /// Record that the driver returned a buffer
    pub fn mark_dequeued(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            *lock_state(&slot.state) = SlotState::Free;
        }
    }

    /// Resubmit a dequeued buffer without delivering it
    pub fn requeue(&self, index: usize) -> BackendResult<()> {
        let Some(slot) = self.slots.get(index) else {
            return Ok(());
        };
        let mut state = lock_state(&slot.state);
        if !self.is_active() || *state != SlotState::Free {
            return Ok(());
        }
        self.submit(index, &mut state)
    }

    /// Lend a dequeued buffer to the frame callback
    pub fn hand_out(
        self: &Arc<Self>,
        index: usize,
        bytes_used: usize,
        sequence: u32,
        timestamp: Duration,
    ) -> Option<Frame> {
        let slot = self.slots.get(index)?;
        *lock_state(&slot.state) = SlotState::HandedToCallback;
        Some(Frame {
            pool: Arc::clone(self),
            index,
            bytes_used,
            sequence,
            timestamp,
        })
    }

    fn release(&self, index: usize) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        let mut state = lock_state(&slot.state);
        if *state != SlotState::HandedToCallback {
            return;
        }
        if !self.is_active() {
            *state = SlotState::Free;
            debug!(index, "Frame released after streaming stopped");
            return;
        }
        *state = SlotState::Free;
        if let Err(e) = self.submit(index, &mut state) {
            warn!(index, error = %e, "Failed to resubmit released buffer");
        }
    }

    /// Stop accepting resubmissions
    ///
    /// Returns once no release is mid-way through a resubmission.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        for slot in &self.slots {
            drop(lock_state(&slot.state));
        }
    }

    /// Mark driver-owned buffers free after stream-off returned them
    pub fn reclaim_from_kernel(&self) {
        for slot in &self.slots {
            let mut state = lock_state(&slot.state);
            if *state == SlotState::PendingKernel {
                *state = SlotState::Free;
            }
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        debug!(buffers = self.slots.len(), "Buffer pool released");
    }
}

/// A filled buffer lent to the frame callback
///
/// The buffer returns to the driver when the frame is released or dropped,
/// exactly once.
pub struct Frame {
    pool: Arc<BufferPool>,
    index: usize,
    bytes_used: usize,
    sequence: u32,
    timestamp: Duration,
}

impl Frame {
    /// Frame payload, without the metadata block
    pub fn data(&self) -> &[u8] {
        let slot = &self.pool.slots[self.index];
        let end = self.bytes_used.min(slot.frame_size);
        // SAFETY: the slot is HandedToCallback for the lifetime of self
        unsafe { slot.memory.slice(0, end) }
    }

    /// Trailing metadata block of user-allocated buffers
    pub fn metadata(&self) -> Option<&[u8]> {
        if !self.pool.mode.has_metadata() {
            return None;
        }
        let slot = &self.pool.slots[self.index];
        // SAFETY: as in data()
        Some(unsafe {
            slot.memory
                .slice(slot.capacity, slot.capacity + META_DATA_SIZE)
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes the driver reported for this frame
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Driver frame sequence number
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Driver capture timestamp
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Return the buffer to the driver
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("bytes_used", &self.bytes_used)
            .field("sequence", &self.sequence)
            .finish()
    }
}
