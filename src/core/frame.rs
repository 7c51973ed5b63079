//! Per-frame presentation records.
//!
//! Every submitted buffer gets a [`FrameState`]. Two compositor events
//! race to retire it: the surface frame callback ("done") and the buffer
//! release. Whichever wins the compare-and-clear on the window's
//! [`FrameSlot`] decrements the pending count; the buffer release always
//! frees the record.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::core::display::{BufferId, CallbackId, DisplayConnection};
use crate::core::hardware::PoolLease;
use crate::util::logging;

const NO_FRAME: u64 = 0;

// ============================================================================
// Frame Slot
// ============================================================================

/// Outstanding-frame accounting for one window.
///
/// `last_frame` holds the serial of the single frame in flight, or zero.
#[derive(Debug)]
pub struct FrameSlot {
    pending: AtomicU32,
    last_frame: AtomicU64,
    next_serial: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            last_frame: AtomicU64::new(NO_FRAME),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Frames submitted and not yet retired.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Serial of the outstanding frame, if any.
    pub fn last_frame(&self) -> Option<u64> {
        match self.last_frame.load(Ordering::Acquire) {
            NO_FRAME => None,
            serial => Some(serial),
        }
    }

    fn allocate_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    fn install(&self, serial: u64) {
        self.last_frame.store(serial, Ordering::Release);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Clear the slot if it still holds `serial`. Only the caller that
    /// clears it decrements the pending count.
    fn retire(&self, serial: u64) -> bool {
        if self
            .last_frame
            .compare_exchange(serial, NO_FRAME, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Frame State
// ============================================================================

/// One in-flight presentation request.
#[derive(Debug)]
pub struct FrameState {
    serial: u64,
    /// Accounting of the window that submitted the frame.
    owner: Weak<FrameSlot>,
    /// Converted surface to hand back once the compositor is done with it.
    source: Mutex<Option<PoolLease>>,
    completion: Mutex<Option<CallbackId>>,
    done: AtomicBool,
    released: AtomicBool,
}

impl FrameState {
    /// Allocate a record for `owner`. It is not outstanding until
    /// [`FrameState::install`] is called.
    pub fn new(owner: &Arc<FrameSlot>) -> Arc<Self> {
        Arc::new(Self {
            serial: owner.allocate_serial(),
            owner: Arc::downgrade(owner),
            source: Mutex::new(None),
            completion: Mutex::new(None),
            done: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Make this the window's single outstanding frame.
    pub fn install(&self) {
        if let Some(slot) = self.owner.upgrade() {
            slot.install(self.serial);
        }
    }

    pub fn attach_source(&self, lease: PoolLease) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(lease);
    }

    pub fn set_completion(&self, callback: CallbackId) {
        *self.completion.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Mark the frame done and retire it if it is still outstanding.
    fn mark_done(&self) -> bool {
        self.done.store(true, Ordering::Release);
        match self.owner.upgrade() {
            Some(slot) => slot.retire(self.serial),
            None => false,
        }
    }

    /// Frame callback handler.
    pub fn handle_done(&self) {
        if !self.mark_done() {
            tracing::info!(
                target: logging::FRAME,
                "Cannot retire frame {}: it is not the outstanding frame",
                self.serial
            );
        }
    }

    /// Buffer release handler: retire if the frame callback has not, then
    /// destroy the buffer and free the record.
    pub fn handle_release(&self, display: &dyn DisplayConnection, buffer: BufferId) {
        if !self.is_done() && !self.mark_done() {
            tracing::info!(
                target: logging::FRAME,
                "Cannot retire frame {}: it is not the outstanding frame",
                self.serial
            );
        }
        display.destroy_buffer(buffer);
        self.release(display);
    }

    /// Free the frame's resources: the converted surface goes back to its
    /// pool first, then the completion token is destroyed.
    pub fn release(&self, display: &dyn DisplayConnection) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.source.lock().unwrap_or_else(|e| e.into_inner()).take());
        if let Some(callback) = self.completion.lock().unwrap_or_else(|e| e.into_inner()).take() {
            display.destroy_callback(callback);
        }
        crate::wlog!(logging::FRAME, "Frame {} released", self.serial);
    }
}
