//! Stream lookup and the time-bounded consumption loop.
//!
//! [`StreamingEngine`] resolves a stream identity against a
//! [`StreamRepository`] and then relays a media session through a
//! [`DecodePipeline`] into a sink using the length-prefixed
//! [framing](crate::framing).
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "kinesis")]
//! # fn main() -> Result<(), kinesis_pipe::PipeError> {
//! use std::time::{Duration, SystemTime};
//!
//! use kinesis_pipe::{
//!     FrameRenderer, KinesisRepository, PipeError, RenderOptions, StartSelector,
//!     StreamingEngine,
//! };
//!
//! let engine = StreamingEngine::new(KinesisRepository::connect(None)?);
//! let stream = engine
//!     .find_stream_info(Some("front-door"), None)?
//!     .ok_or_else(|| PipeError::StreamNotFound("front-door".to_string()))?;
//!
//! let mut renderer = FrameRenderer::new(RenderOptions::new());
//! let mut stdout = std::io::stdout().lock();
//! engine.pipe(
//!     Duration::from_secs(60),
//!     &stream,
//!     &StartSelector::parse("now", SystemTime::now())?,
//!     &mut renderer,
//!     &mut stdout,
//! )?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "kinesis"))]
//! # fn main() {}
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    io::Write,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    closing_iterator::ClosingIterator,
    error::PipeError,
    framing::FrameWriter,
    identity::{StartSelector, StreamIdentity},
    pipeline::DecodePipeline,
    progress::{NoOpProgress, ProgressCallback, ProgressInfo},
    repository::StreamRepository,
    timing::timed,
};

/// Why a [`pipe`](StreamingEngine::pipe) call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The remote stream reported end of data.
    Exhausted,
    /// The duration bound was reached at an element boundary.
    DurationReached,
}

/// Summary of a completed [`pipe`](StreamingEngine::pipe) call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct PipeReport {
    /// Container elements processed.
    pub elements: u64,
    /// Frames written to the sink.
    pub frames: u64,
    /// Bytes written to the sink, length prefixes included.
    pub bytes_written: u64,
    /// Time from loop start to loop exit.
    pub elapsed: Duration,
    /// What ended the loop.
    pub stop_reason: StopReason,
}

/// Relays frames from a remote stream to a local sink.
///
/// The engine is single-threaded and blocking: one `pipe` call drives one
/// sequential loop on the calling thread.
pub struct StreamingEngine<R> {
    repository: R,
    clock: Box<dyn Fn() -> Instant>,
    progress: Arc<dyn ProgressCallback>,
}

impl<R> Debug for StreamingEngine<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StreamingEngine").finish_non_exhaustive()
    }
}

impl<R: StreamRepository> StreamingEngine<R> {
    /// Create an engine over a repository, timed by the system clock.
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            clock: Box::new(Instant::now),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Replace the time source used for the duration bound.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Attach a progress callback, invoked after every processed element.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Look a stream up by name or ARN.
    ///
    /// Returns `Ok(None)` without listing anything when both keys are
    /// absent. Otherwise returns the first listed stream whose name equals
    /// `name` or whose ARN equals `arn`, ignoring ASCII case.
    pub fn find_stream_info(
        &self,
        name: Option<&str>,
        arn: Option<&str>,
    ) -> Result<Option<StreamIdentity>, PipeError> {
        if name.is_none() && arn.is_none() {
            return Ok(None);
        }

        log::info!("Searching stream list for name {name:?} or ARN {arn:?}");
        let streams = self.repository.list_streams()?;
        log::info!("Found {} streams", streams.len());

        let found = streams.into_iter().find(|stream| {
            log::debug!("Found stream summary for {stream}");
            stream.matches(name, arn)
        });

        match &found {
            Some(stream) => log::info!("Resolved stream {stream}"),
            None => log::warn!("No stream found for name {name:?} or ARN {arn:?}"),
        }
        Ok(found)
    }

    /// Relay frames from `identity` into `sink` for up to `duration`.
    ///
    /// Elements are pulled one at a time, decoded by `pipeline`, and every
    /// resulting frame is written with the length-prefixed framing. The sink
    /// is flushed after each element. The duration bound is checked only
    /// after an element has been fully processed, so at least one available
    /// element is always processed, even for a zero duration.
    ///
    /// The media session is closed before this method returns, on every
    /// path.
    ///
    /// # Errors
    ///
    /// Connection failures, decode failures, and sink write failures abort
    /// the session and are returned after the session has been closed.
    /// End of stream is not an error.
    pub fn pipe<P, W>(
        &self,
        duration: Duration,
        identity: &StreamIdentity,
        selector: &StartSelector,
        pipeline: &mut P,
        sink: W,
    ) -> Result<PipeReport, PipeError>
    where
        P: DecodePipeline<Element = R::Element>,
        W: Write,
    {
        if !identity.is_resolved() {
            return Err(PipeError::UnresolvedStream);
        }

        let start = (self.clock)();
        log::info!("Reading media for stream {identity} from {selector:?} for {duration:?}");

        let mut elements = self
            .repository
            .open_media(selector, identity)
            .inspect_err(|error| log::error!("Cannot open media for stream {identity}: {error}"))?;

        let outcome = self.consume(&mut elements, start, duration, pipeline, sink);
        let closed = elements.close();

        match (outcome, closed) {
            (Ok(report), Ok(())) => {
                log::info!(
                    "Finished stream {identity}: {} elements, {} frames, {} bytes in {:?} ({:?})",
                    report.elements,
                    report.frames,
                    report.bytes_written,
                    report.elapsed,
                    report.stop_reason,
                );
                Ok(report)
            }
            (Ok(_), Err(error)) => {
                log::error!("Cannot close media for stream {identity}: {error}");
                Err(error)
            }
            (Err(error), closed) => {
                if let Err(close_error) = closed {
                    log::warn!("Also failed to close media for stream {identity}: {close_error}");
                }
                log::error!("Cannot read media for stream {identity}: {error}");
                Err(error)
            }
        }
    }

    fn consume<P, W>(
        &self,
        elements: &mut ClosingIterator<R::Element>,
        start: Instant,
        duration: Duration,
        pipeline: &mut P,
        sink: W,
    ) -> Result<PipeReport, PipeError>
    where
        P: DecodePipeline<Element = R::Element>,
        W: Write,
    {
        let mut writer = FrameWriter::new(sink);
        let mut processed = 0_u64;
        let mut stop_reason = StopReason::Exhausted;

        while elements.has_next() {
            let element = match timed("retrieve element", || elements.next_element()) {
                Ok(element) => element,
                Err(PipeError::IterationExhausted) => break,
                Err(error) => return Err(error),
            };

            let decoded = timed("process element", || pipeline.process(element))?;
            for tag in &decoded.tags {
                log::debug!("Fragment tag {}={}", tag.name, tag.value);
            }
            for frame in &decoded.frames {
                log::trace!(
                    "Writing {}x{} {} frame of {} bytes",
                    frame.width,
                    frame.height,
                    frame.pixel_format,
                    frame.len()
                );
                writer.write_frame(&frame.data)?;
            }
            writer.flush()?;
            processed += 1;

            let elapsed = (self.clock)().saturating_duration_since(start);
            self.progress.on_progress(&ProgressInfo {
                elements: processed,
                frames: writer.frames_written(),
                bytes_written: writer.bytes_written(),
                elapsed,
                duration,
            });

            if elapsed >= duration {
                stop_reason = StopReason::DurationReached;
                break;
            }
        }

        Ok(PipeReport {
            elements: processed,
            frames: writer.frames_written(),
            bytes_written: writer.bytes_written(),
            elapsed: (self.clock)().saturating_duration_since(start),
            stop_reason,
        })
    }
}
