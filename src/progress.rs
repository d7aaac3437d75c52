//! Progress reporting for piping sessions.
//!
//! This module provides [`ProgressCallback`] for observing a running
//! [`pipe`](crate::StreamingEngine::pipe) call and [`ProgressInfo`] for the
//! snapshot handed to it after every processed element.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use kinesis_pipe::{ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         eprintln!("{} frames after {:?}", info.frames, info.elapsed);
//!     }
//! }
//!
//! let callback: Arc<dyn ProgressCallback> = Arc::new(PrintProgress);
//! ```

use std::time::Duration;

/// A snapshot of session progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Container elements processed so far.
    pub elements: u64,
    /// Frames written to the sink so far.
    pub frames: u64,
    /// Bytes written to the sink so far, length prefixes included.
    pub bytes_written: u64,
    /// Time since the session's loop started.
    pub elapsed: Duration,
    /// The session's duration bound.
    pub duration: Duration,
}

impl ProgressInfo {
    /// Time left before the duration bound is reached.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed)
    }
}

/// Trait for receiving progress updates while a session runs.
///
/// Callbacks are **infallible**: they observe but cannot halt the session.
/// The only stop conditions are stream exhaustion and the duration bound.
pub trait ProgressCallback: Send + Sync {
    /// Called after every processed element.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}
