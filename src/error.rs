//! Error types for the `kinesis-pipe` crate.
//!
//! This module defines [`PipeError`], the unified error type returned by all
//! fallible operations in the crate. Variants carry the stream identity or
//! upstream message needed to diagnose a failed session.

use std::io::Error as IoError;

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `kinesis-pipe` operations.
///
/// Every public method that can fail returns `Result<T, PipeError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipeError {
    /// The remote media session could not be opened or closed.
    #[error("Connection error for stream {stream}: {reason}")]
    Connection {
        /// Display form of the stream identity the session was opened for.
        stream: String,
        /// Underlying reason the session failed.
        reason: String,
    },

    /// The decode pipeline or the container demuxer rejected an element.
    #[error("Failed to decode container element: {0}")]
    Decode(String),

    /// No further element is available, or the iterator is already closed.
    ///
    /// This is the normal end-of-stream signal, not a failure of the session.
    #[error("Iteration exhausted")]
    IterationExhausted,

    /// Writing to the output sink (or reading a framed stream) failed.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// No stream in the remote catalog matched the requested name or ARN.
    #[error("No stream found matching {0}")]
    StreamNotFound(String),

    /// A stream identity carried neither a name nor an ARN.
    #[error("Stream identity has neither a name nor an ARN")]
    UnresolvedStream,

    /// A caller-supplied value (duration, start position, pixel format) could
    /// not be parsed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<FfmpegError> for PipeError {
    fn from(error: FfmpegError) -> Self {
        PipeError::Ffmpeg(error.to_string())
    }
}
