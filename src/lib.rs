//! # kinesis-pipe
//!
//! Relay decoded video frames from a Kinesis Video Stream to a local sink for
//! a bounded amount of time.
//!
//! `kinesis-pipe` resolves a stream by name or ARN, opens a `GetMedia`
//! session at a chosen start position, decodes the matroska fragments it
//! receives with FFmpeg (via
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)), and writes every
//! decoded picture to a byte sink as an 8-byte big-endian length followed by
//! the raw pixels.
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "kinesis")]
//! # fn main() -> Result<(), kinesis_pipe::PipeError> {
//! use std::time::{Duration, SystemTime};
//!
//! use kinesis_pipe::{
//!     FrameRenderer, KinesisRepository, PipeError, PixelFormat, RenderOptions, StartSelector,
//!     StreamingEngine,
//! };
//!
//! let engine = StreamingEngine::new(KinesisRepository::connect(None)?);
//! let stream = engine
//!     .find_stream_info(Some("front-door"), None)?
//!     .ok_or_else(|| PipeError::StreamNotFound("front-door".to_string()))?;
//!
//! let mut renderer = FrameRenderer::new(
//!     RenderOptions::new()
//!         .with_pixel_format(PixelFormat::Gray8)
//!         .with_frames_per_second(1.0),
//! );
//! let report = engine.pipe(
//!     Duration::from_secs(30),
//!     &stream,
//!     &StartSelector::parse("5m", SystemTime::now())?,
//!     &mut renderer,
//!     std::io::stdout().lock(),
//! )?;
//! eprintln!("wrote {} frames", report.frames);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "kinesis"))]
//! # fn main() {}
//! ```
//!
//! ## Reading the output
//!
//! ```no_run
//! use kinesis_pipe::FrameReader;
//!
//! for payload in FrameReader::new(std::io::stdin().lock()) {
//!     println!("{} bytes", payload?.len());
//! }
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Building blocks
//!
//! - [`ClosingIterator`]: a pull iterator over a remote resource that is
//!   released exactly once, on exhaustion, explicit close, or drop
//! - [`StreamRepository`]: the catalog and media port; [`KinesisRepository`]
//!   implements it against AWS
//! - [`DecodePipeline`]: turns container elements into frames;
//!   [`FrameRenderer`] is the FFmpeg implementation
//! - [`StreamingEngine`]: lookup plus the time-bounded relay loop
//! - [`FrameWriter`] / [`FrameReader`]: the length-prefixed framing
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `kinesis` | [`KinesisRepository`] and the `kinesis-pipe` binary, via the AWS SDK and Tokio |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod closing_iterator;
pub mod config;
pub mod container;
mod conversion;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod framing;
pub mod identity;
#[cfg(feature = "kinesis")]
#[cfg_attr(docsrs, doc(cfg(feature = "kinesis")))]
pub mod kinesis;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod repository;
pub mod timing;

pub use closing_iterator::{ClosingIterator, ElementSource};
pub use config::{PixelFormat, RenderOptions};
pub use container::{ContainerElement, MediaBlock, MkvDemuxer, TrackInfo};
pub use engine::{PipeReport, StopReason, StreamingEngine};
pub use error::PipeError;
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use framing::{FrameReader, FrameWriter, LENGTH_PREFIX_SIZE};
pub use identity::{StartSelector, StreamIdentity, parse_duration};
#[cfg(feature = "kinesis")]
pub use kinesis::KinesisRepository;
pub use pipeline::{DecodePipeline, Decoded, DecodedFrame, FnPipeline, FragmentTag, pipeline_fn};
pub use progress::{ProgressCallback, ProgressInfo};
pub use render::FrameRenderer;
pub use repository::StreamRepository;
pub use timing::timed;
