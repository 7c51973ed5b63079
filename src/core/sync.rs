//! Waiting for the compositor to finish the previous frame.
//!
//! The [`SyncGate`] pumps a window's private event channel until its
//! pending-frame count drops to zero. The wait blocks on the display
//! descriptor with no timeout; [`SyncGate::set_flushing`] releases it from
//! another thread.
//!
//! State machine of one wait:
//!
//! ```text
//!   Idle --(pending > 0)--> Waiting --(read prepared, flushed)--> Reading
//!    ^                        ^                                     |
//!    |                        +------(events read, dispatched)------+
//!    +------------(pending == 0)
//!   any --(protocol error)--> Failed   (sticky)
//! ```

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::core::display::{ChannelId, DisplayHandle, PreparedRead};
use crate::core::errors::{DisplayError, SyncError};
use crate::core::frame::FrameSlot;
use crate::util::logging;

// ============================================================================
// Flushable Poll
// ============================================================================

/// A poll set whose blocking wait can be released from another thread.
///
/// While flushing, [`FlushablePoll::wait`] fails immediately with `EBUSY`.
#[derive(Debug)]
pub struct FlushablePoll {
    fds: Mutex<Vec<RawFd>>,
    flushing: AtomicBool,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl FlushablePoll {
    pub fn new() -> io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        Ok(Self {
            fds: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
            wake_rx,
            wake_tx,
        })
    }

    /// Watch `fd` for readability.
    pub fn add_fd(&self, fd: RawFd) {
        let mut fds = self.fds.lock().unwrap_or_else(|e| e.into_inner());
        if !fds.contains(&fd) {
            fds.push(fd);
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::Release);
        if flushing {
            // A full wake pipe already guarantees a wakeup.
            let _ = (&self.wake_tx).write(&[1]);
        } else {
            self.drain_wakeups();
        }
    }

    fn drain_wakeups(&self) {
        let mut scratch = [0u8; 64];
        while let Ok(n) = (&self.wake_rx).read(&mut scratch) {
            if n == 0 {
                break;
            }
        }
    }

    fn busy() -> io::Error {
        io::Error::from_raw_os_error(libc::EBUSY)
    }

    /// Block until a watched descriptor is readable.
    ///
    /// Returns the number of ready descriptors. A wakeup that raced with
    /// clearing the flushing flag is reported as `Interrupted`.
    pub fn wait(&self) -> io::Result<usize> {
        if self.is_flushing() {
            return Err(Self::busy());
        }

        let mut pollfds: Vec<libc::pollfd> = self
            .fds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 })
            .collect();
        pollfds.push(libc::pollfd {
            fd: self.wake_rx.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });

        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        if self.is_flushing() {
            return Err(Self::busy());
        }

        let Some((wake, watched)) = pollfds.split_last() else {
            return Ok(0);
        };
        let ready = watched.iter().filter(|p| p.revents != 0).count();
        if wake.revents != 0 {
            self.drain_wakeups();
            if ready == 0 {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
        }
        Ok(ready)
    }
}

// ============================================================================
// Sync Gate
// ============================================================================

/// Observable phase of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    Idle = 0,
    Waiting = 1,
    Reading = 2,
    Failed = 3,
}

impl GateState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Waiting,
            2 => Self::Reading,
            3 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

enum Cycle {
    /// Events were read and dispatched; re-check the pending count.
    Continue,
    /// The pending count reached zero before blocking.
    Idle,
}

/// Blocks a render until the previous frame is retired.
///
/// The failure flag is read without a lock; a reader may see a stale
/// "not failed" for one more iteration, which then fails on its own.
#[derive(Debug)]
pub struct SyncGate {
    poll: FlushablePoll,
    fd_registered: AtomicBool,
    failed: AtomicBool,
    state: AtomicU8,
}

impl SyncGate {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: FlushablePoll::new()?,
            fd_registered: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            state: AtomicU8::new(GateState::Idle as u8),
        })
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn enter(&self, state: GateState) {
        if !self.has_failed() {
            self.state.store(state as u8, Ordering::Release);
        }
    }

    pub fn set_flushing(&self, flushing: bool) {
        crate::wlog!(logging::SYNC, "Sync gate flushing={}", flushing);
        self.poll.set_flushing(flushing);
    }

    pub fn is_flushing(&self) -> bool {
        self.poll.is_flushing()
    }

    /// Wait until `frames` has nothing pending, dispatching `channel`.
    pub fn wait(
        &self,
        display: &DisplayHandle,
        channel: ChannelId,
        frames: &FrameSlot,
    ) -> Result<(), SyncError> {
        if self.has_failed() {
            return Err(SyncError::Failed);
        }

        if !self.fd_registered.swap(true, Ordering::AcqRel) {
            self.poll.add_fd(display.poll_fd());
        }

        while frames.pending() > 0 {
            self.enter(GateState::Waiting);
            match self.cycle(display, channel, frames) {
                Ok(Cycle::Continue) => {}
                Ok(Cycle::Idle) => break,
                Err(err) => {
                    self.enter(GateState::Idle);
                    return Err(err);
                }
            }
        }

        self.enter(GateState::Idle);
        Ok(())
    }

    fn cycle(
        &self,
        display: &DisplayHandle,
        channel: ChannelId,
        frames: &FrameSlot,
    ) -> Result<Cycle, SyncError> {
        let read = {
            let _lock = display.lock();
            let read = self.prepare_read(display, channel)?;

            match display.flush() {
                Ok(()) => {}
                Err(DisplayError::WouldBlock) => {
                    drop(read);
                    tracing::debug!(target: logging::SYNC, "Flush would block, dropping wait");
                    return Err(SyncError::Backpressure);
                }
                Err(err) => {
                    drop(read);
                    return Err(self.fail("flush", err));
                }
            }

            if frames.pending() == 0 {
                drop(read);
                return Ok(Cycle::Idle);
            }
            read
        };

        self.enter(GateState::Reading);
        loop {
            match self.poll.wait() {
                Ok(_) => break,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(err) if err.raw_os_error() == Some(libc::EBUSY) => {
                    drop(read);
                    tracing::debug!(target: logging::SYNC, "Wait released by flush");
                    return Err(SyncError::Flushing);
                }
                Err(err) => {
                    drop(read);
                    return Err(self.fail("poll", DisplayError::io(err)));
                }
            }
        }

        let _lock = display.lock();
        match read.read() {
            Ok(_) | Err(DisplayError::WouldBlock) => {}
            Err(err) => return Err(self.fail("read", err)),
        }
        display
            .dispatch_pending(channel)
            .map_err(|err| self.fail("dispatch", err))?;
        Ok(Cycle::Continue)
    }

    /// Register a read, dispatching whatever is already queued first.
    fn prepare_read<'a>(
        &self,
        display: &'a DisplayHandle,
        channel: ChannelId,
    ) -> Result<Box<dyn PreparedRead + 'a>, SyncError> {
        loop {
            match display.prepare_read(channel) {
                Ok(Some(read)) => return Ok(read),
                Ok(None) => {
                    display
                        .dispatch_pending(channel)
                        .map_err(|err| self.fail("dispatch", err))?;
                }
                Err(err) => return Err(self.fail("prepare read", err)),
            }
        }
    }

    fn fail(&self, step: &str, err: DisplayError) -> SyncError {
        self.failed.store(true, Ordering::Release);
        self.state.store(GateState::Failed as u8, Ordering::Release);
        tracing::error!(target: logging::SYNC, "Error on dispatching events ({}): {}", step, err);
        SyncError::Failed
    }
}
