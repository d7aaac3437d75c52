//! Error handling integration tests.
//!
//! These tests verify that errors carry enough context to diagnose a failed
//! session.

use std::io::{Error as IoError, ErrorKind};

use kinesis_pipe::{FfmpegLogLevel, PipeError, StreamIdentity};

#[test]
fn connection_error_names_the_stream() {
    let error = PipeError::Connection {
        stream: StreamIdentity::new("front-door", "arn:x").to_string(),
        reason: "ResourceNotFoundException".to_string(),
    };
    let message = error.to_string();
    assert!(message.contains("front-door (arn:x)"), "{message}");
    assert!(message.contains("ResourceNotFoundException"), "{message}");
}

#[test]
fn io_errors_convert() {
    let error: PipeError = IoError::new(ErrorKind::BrokenPipe, "reader went away").into();
    assert!(matches!(error, PipeError::Io(ref inner) if inner.kind() == ErrorKind::BrokenPipe));
    assert!(error.to_string().contains("reader went away"));
}

#[test]
fn ffmpeg_errors_convert() {
    let error: PipeError = ffmpeg_next::Error::InvalidData.into();
    assert!(matches!(error, PipeError::Ffmpeg(_)));
}

#[test]
fn exhaustion_is_distinguishable() {
    assert!(matches!(PipeError::IterationExhausted, PipeError::IterationExhausted));
    assert_eq!(PipeError::IterationExhausted.to_string(), "Iteration exhausted");
}

#[test]
fn invalid_ffmpeg_log_level() {
    let error = "chatty".parse::<FfmpegLogLevel>().expect_err("unknown level");
    assert!(error.to_string().contains("chatty"));
}
