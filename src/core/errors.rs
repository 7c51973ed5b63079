//! Core error types

use thiserror::Error;

/// Failures reported by the display connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("connection would block")]
    WouldBlock,

    #[error("Wayland protocol error: {0}")]
    Protocol(String),

    #[error("I/O error on display connection: {0}")]
    Io(String),

    #[error("compositor does not advertise {0}")]
    MissingGlobal(&'static str),

    #[error("unknown protocol object {0}")]
    UnknownObject(u32),

    #[error("display connection lost")]
    Disconnected,
}

impl DisplayError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}

/// Status of exporting a video surface as a displayable buffer.
///
/// The first three variants are "soft": the surface cannot be exported as
/// is, but a conversion pass may produce one that can.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("render flags not supported for export")]
    FlagNotSupported,

    #[error("buffer export not implemented by driver")]
    Unimplemented,

    #[error("invalid image format for export")]
    InvalidImageFormat,

    #[error("buffer export failed: {0}")]
    Failed(String),
}

impl ExportError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Whether a conversion pass should be attempted instead of failing.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::FlagNotSupported | Self::Unimplemented | Self::InvalidImageFormat
        )
    }
}

/// Outcome of a failed wait for the previous frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The wait was released by `unblock()`.
    #[error("synchronization interrupted by flush")]
    Flushing,

    /// The connection could not take more writes right now.
    #[error("display connection is backed up")]
    Backpressure,

    /// A protocol-level failure; every later wait fails immediately.
    #[error("event dispatch failed, window synchronization disabled")]
    Failed,
}

impl SyncError {
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Errors surfaced by a presentation window
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentError {
    #[error("window setup failed: {0}")]
    Setup(String),

    #[error("compositor does not advertise {0}")]
    MissingGlobal(&'static str),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl PresentError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, PresentError>;
