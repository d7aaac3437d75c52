//! Internal pixel and timestamp conversion helpers.

use std::time::Duration;

use ffmpeg_next::{Rational, frame::Video as VideoFrame};

/// Copy the first plane of a packed video frame into a tightly-packed buffer.
///
/// FFmpeg frames frequently carry per-row padding (stride > width ×
/// `bytes_per_pixel`). This strips that padding so the payload is exactly
/// `width * height * bytes_per_pixel` bytes.
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let expected_stride = (width as usize) * bytes_per_pixel;
    let rows = height as usize;
    let data = video_frame.data(0);

    if stride == expected_stride {
        data[..expected_stride * rows].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(expected_stride * rows);
        for row in 0..rows {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + expected_stride]);
        }
        buffer
    }
}

/// Rescale a PTS value from stream time base to a [`Duration`].
///
/// Negative timestamps, degenerate time bases, and values too large for a
/// [`Duration`] map to `None`.
pub(crate) fn pts_to_duration(pts: i64, time_base: Rational) -> Option<Duration> {
    if pts < 0 || time_base.denominator() == 0 {
        return None;
    }
    let seconds = pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64;
    Duration::try_from_secs_f64(seconds).ok()
}
