//! Frame rendering configuration.
//!
//! [`RenderOptions`] is a builder controlling how the
//! [`FrameRenderer`](crate::FrameRenderer) turns decoded pictures into frame
//! payloads: output pixel layout, output resolution, and an optional
//! sampling rate.
//!
//! # Example
//!
//! ```
//! use kinesis_pipe::{PixelFormat, RenderOptions};
//!
//! let options = RenderOptions::new()
//!     .with_pixel_format(PixelFormat::Gray8)
//!     .with_resolution(Some(640), None)
//!     .with_frames_per_second(2.0);
//! ```

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use ffmpeg_next::format::Pixel;

use crate::error::PipeError;

/// Pixel layout of emitted frame payloads.
///
/// Payloads are always tightly packed, row-major, single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit RGB (24 bpp). This is the default.
    #[default]
    Rgb8,
    /// 8-bit BGR (24 bpp).
    Bgr8,
    /// 8-bit RGBA with alpha pre-set to 255 (32 bpp).
    Rgba8,
    /// 8-bit grayscale (8 bpp).
    Gray8,
}

impl PixelFormat {
    /// Map to the corresponding FFmpeg pixel format constant.
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Bgr8 => Pixel::BGR24,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Gray8 => Pixel::GRAY8,
        }
    }

    /// Bytes used by one pixel in a payload.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

impl FromStr for PixelFormat {
    type Err = PipeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "rgb8" | "rgb" | "rgb24" => Ok(PixelFormat::Rgb8),
            "bgr8" | "bgr" | "bgr24" => Ok(PixelFormat::Bgr8),
            "rgba8" | "rgba" => Ok(PixelFormat::Rgba8),
            "gray8" | "gray" | "grey" | "grayscale" => Ok(PixelFormat::Gray8),
            _ => Err(PipeError::InvalidArgument(format!(
                "unsupported pixel format: {value}"
            ))),
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Gray8 => "gray8",
        };
        f.write_str(name)
    }
}

/// Settings for turning decoded pictures into frame payloads.
///
/// When no dimensions are set the source resolution is used. Setting one
/// dimension together with
/// [`maintain_aspect_ratio`](RenderOptions::maintain_aspect_ratio) computes
/// the other automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Output pixel format.
    pub pixel_format: PixelFormat,
    /// Target width. `None` keeps the source width.
    pub width: Option<u32>,
    /// Target height. `None` keeps the source height.
    pub height: Option<u32>,
    /// When `true` and only one dimension is specified, the other is
    /// computed to preserve the source aspect ratio.
    pub maintain_aspect_ratio: bool,
    /// Emit at most this many frames per second of producer time.
    /// `None` emits every decoded frame.
    pub frames_per_second: Option<f64>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderOptions {
    /// Source resolution, RGB output, no sampling.
    pub fn new() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb8,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            frames_per_second: None,
        }
    }

    /// Set the output pixel format.
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set a custom output resolution.
    ///
    /// Pass `None` for either dimension to keep the source value.
    #[must_use]
    pub fn with_resolution(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Control whether aspect ratio is preserved when only one output
    /// dimension is specified. Defaults to `true`.
    #[must_use]
    pub fn with_maintain_aspect_ratio(mut self, maintain: bool) -> Self {
        self.maintain_aspect_ratio = maintain;
        self
    }

    /// Limit the emitted frame rate.
    ///
    /// Non-positive or non-finite rates disable sampling.
    #[must_use]
    pub fn with_frames_per_second(mut self, frames_per_second: f64) -> Self {
        self.frames_per_second =
            (frames_per_second.is_finite() && frames_per_second > 0.0).then_some(frames_per_second);
        self
    }

    /// Resolve the final output dimensions given the source size.
    ///
    /// Returns `(width, height)`.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if self.maintain_aspect_ratio && source_width > 0 => {
                let ratio = w as f64 / source_width as f64;
                let h = (source_height as f64 * ratio).round() as u32;
                (w, h.max(1))
            }
            (Some(w), None) => (w, source_height),
            (None, Some(h)) if self.maintain_aspect_ratio && source_height > 0 => {
                let ratio = h as f64 / source_height as f64;
                let w = (source_width as f64 * ratio).round() as u32;
                (w.max(1), h)
            }
            (None, Some(h)) => (source_width, h),
            (None, None) => (source_width, source_height),
        }
    }
}
