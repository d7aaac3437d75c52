//! FFmpeg-backed decoding of container elements into raw frames.
//!
//! [`FrameRenderer`] is the [`DecodePipeline`] used for Kinesis media. It
//! opens a decoder for the first video track announced by a
//! [`Tracks`](ContainerElement::Tracks) element, decodes every video
//! [`Block`](ContainerElement::Block), and converts each picture to the
//! configured [`PixelFormat`](crate::PixelFormat) and resolution. Blocks of
//! other tracks produce nothing.

use std::time::Duration;

use ffmpeg_next::{
    Error as FfmpegError, Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::Pixel,
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::error::EAGAIN,
};

use crate::{
    config::RenderOptions,
    container::{ContainerElement, MediaBlock, TrackInfo},
    conversion::{frame_to_buffer, pts_to_duration},
    error::PipeError,
    pipeline::{DecodePipeline, Decoded, DecodedFrame},
};

/// Decodes video blocks into [`DecodedFrame`]s.
pub struct FrameRenderer {
    options: RenderOptions,
    video: Option<VideoTrack>,
    scaler: Option<Scaler>,
    sampler: FrameSampler,
}

struct VideoTrack {
    index: usize,
    time_base: Rational,
    decoder: VideoDecoder,
}

/// Source and target geometry a scaler was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    source_format: Pixel,
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
}

struct Scaler {
    key: ScalerKey,
    context: ScalingContext,
    output: VideoFrame,
}

impl FrameRenderer {
    /// Create a renderer. No decoder exists until a track element arrives.
    pub fn new(options: RenderOptions) -> Self {
        let sampler = FrameSampler::new(options.frames_per_second);
        Self {
            options,
            video: None,
            scaler: None,
            sampler,
        }
    }

    /// Index of the video track being decoded, once known.
    pub fn video_track(&self) -> Option<usize> {
        self.video.as_ref().map(|track| track.index)
    }

    /// Drain frames still buffered in the decoder.
    ///
    /// Only useful for finite inputs; a live session simply stops.
    pub fn finish(&mut self) -> Result<Vec<DecodedFrame>, PipeError> {
        let Some(track) = self.video.as_mut() else {
            return Ok(Vec::new());
        };
        track
            .decoder
            .send_eof()
            .map_err(|error| PipeError::Decode(format!("cannot flush decoder: {error}")))?;
        self.drain(None)
    }

    fn open_tracks(&mut self, tracks: Vec<TrackInfo>) -> Result<Decoded, PipeError> {
        let Some(track) = tracks.into_iter().find(|track| track.medium == Type::Video) else {
            log::warn!("Media carries no video track; frames will not be produced");
            self.video = None;
            return Ok(Decoded::none());
        };

        let decoder = CodecContext::from_parameters(track.parameters)?
            .decoder()
            .video()
            .map_err(|error| {
                PipeError::Decode(format!("cannot open {} decoder: {error}", track.codec))
            })?;
        log::info!(
            "Decoding {} video track {} ({}x{})",
            track.codec,
            track.index,
            decoder.width(),
            decoder.height()
        );

        self.video = Some(VideoTrack {
            index: track.index,
            time_base: track.time_base,
            decoder,
        });
        self.scaler = None;
        Ok(Decoded::none())
    }

    fn decode_block(&mut self, block: MediaBlock) -> Result<Decoded, PipeError> {
        let Some(track) = self.video.as_mut() else {
            log::trace!("Skipping block for stream {} before any video track", block.stream_index());
            return Ok(Decoded::none());
        };
        if block.stream_index() != track.index {
            return Ok(Decoded::none());
        }

        track.decoder.send_packet(block.packet()).map_err(|error| {
            PipeError::Decode(format!(
                "cannot decode block at pts {:?}: {error}",
                block.pts()
            ))
        })?;
        self.drain(block.pts()).map(Decoded::frames)
    }

    fn drain(&mut self, block_pts: Option<i64>) -> Result<Vec<DecodedFrame>, PipeError> {
        let Some(track) = self.video.as_mut() else {
            return Ok(Vec::new());
        };

        let mut frames = Vec::new();
        let mut decoded_frame = VideoFrame::empty();
        loop {
            match track.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => {}
                Err(FfmpegError::Eof) => break,
                Err(FfmpegError::Other { errno }) if errno == EAGAIN => break,
                Err(error) => {
                    return Err(PipeError::Decode(format!("cannot receive frame: {error}")));
                }
            }
            let timestamp = decoded_frame
                .timestamp()
                .or(block_pts)
                .and_then(|pts| pts_to_duration(pts, track.time_base));
            if !self.sampler.accept(timestamp) {
                continue;
            }

            let (target_width, target_height) = self
                .options
                .resolve_dimensions(decoded_frame.width(), decoded_frame.height());
            let key = ScalerKey {
                source_format: decoded_frame.format(),
                source_width: decoded_frame.width(),
                source_height: decoded_frame.height(),
                target_width,
                target_height,
            };

            let mut scaler = match self.scaler.take() {
                Some(scaler) if scaler.key == key => scaler,
                _ => {
                    log::debug!("Building scaler for {key:?}");
                    Scaler {
                        key,
                        context: ScalingContext::get(
                            key.source_format,
                            key.source_width,
                            key.source_height,
                            self.options.pixel_format.to_ffmpeg_pixel(),
                            key.target_width,
                            key.target_height,
                            ScalingFlags::BILINEAR,
                        )
                        .map_err(|error| {
                            PipeError::Decode(format!("cannot build scaler for {key:?}: {error}"))
                        })?,
                        output: VideoFrame::empty(),
                    }
                }
            };
            scaler
                .context
                .run(&decoded_frame, &mut scaler.output)
                .map_err(|error| PipeError::Decode(format!("cannot scale frame: {error}")))?;

            let scaler = self.scaler.insert(scaler);
            frames.push(DecodedFrame {
                width: target_width,
                height: target_height,
                pixel_format: self.options.pixel_format,
                timestamp,
                data: frame_to_buffer(
                    &scaler.output,
                    target_width,
                    target_height,
                    self.options.pixel_format.bytes_per_pixel(),
                ),
            });
        }
        Ok(frames)
    }
}

impl DecodePipeline for FrameRenderer {
    type Element = ContainerElement;

    fn process(&mut self, element: ContainerElement) -> Result<Decoded, PipeError> {
        match element {
            ContainerElement::Tracks(tracks) => self.open_tracks(tracks),
            ContainerElement::Tags(tags) => Ok(Decoded::tags(tags)),
            ContainerElement::Block(block) => self.decode_block(block),
        }
    }
}

/// Thins frames down to a target rate of producer time.
#[derive(Debug, Clone)]
struct FrameSampler {
    interval: Option<Duration>,
    last: Option<Duration>,
}

impl FrameSampler {
    /// A rate that is not positive, or whose interval does not fit a
    /// [`Duration`], disables sampling.
    fn new(frames_per_second: Option<f64>) -> Self {
        let interval = frames_per_second
            .filter(|fps| *fps > 0.0)
            .and_then(|fps| Duration::try_from_secs_f64(1.0 / fps).ok());
        Self { interval, last: None }
    }

    /// Whether a frame at `timestamp` should be emitted.
    ///
    /// Frames without a timestamp are always emitted. A timestamp earlier
    /// than the last emitted one restarts sampling.
    fn accept(&mut self, timestamp: Option<Duration>) -> bool {
        let (Some(interval), Some(timestamp)) = (self.interval, timestamp) else {
            return true;
        };
        let emit = match self.last {
            None => true,
            Some(last) if timestamp < last => true,
            Some(last) => last
                .checked_add(interval)
                .is_some_and(|next| timestamp >= next),
        };
        if emit {
            self.last = Some(timestamp);
        }
        emit
    }
}
