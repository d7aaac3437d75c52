//! The decode pipeline contract.
//!
//! A [`DecodePipeline`] accepts one container element at a time and returns
//! whatever it produced for that element: zero or more [`DecodedFrame`]s and
//! zero or more [`FragmentTag`]s. It may fail, in which case the session that
//! drives it is aborted.
//!
//! [`FrameRenderer`](crate::FrameRenderer) is the FFmpeg-backed
//! implementation; [`pipeline_fn`] adapts a closure for anything else.

use std::{marker::PhantomData, time::Duration};

use crate::{config::PixelFormat, error::PipeError};

/// A decoded raster ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of `data`.
    pub pixel_format: PixelFormat,
    /// Presentation time of the picture, if the container carried one.
    pub timestamp: Option<Duration>,
    /// Tightly packed, row-major pixel bytes.
    pub data: Vec<u8>,
}

impl DecodedFrame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A name/value metadata pair carried alongside the media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentTag {
    /// Tag name, e.g. `AWS_KINESISVIDEO_FRAGMENT_NUMBER`.
    pub name: String,
    /// Tag value.
    pub value: String,
}

impl FragmentTag {
    /// Create a tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Everything a pipeline produced for one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Frames to be written, in order.
    pub frames: Vec<DecodedFrame>,
    /// Metadata seen in the element.
    pub tags: Vec<FragmentTag>,
}

impl Decoded {
    /// Nothing produced.
    pub fn none() -> Self {
        Self::default()
    }

    /// Only frames produced.
    pub fn frames(frames: Vec<DecodedFrame>) -> Self {
        Self {
            frames,
            tags: Vec::new(),
        }
    }

    /// Only metadata produced.
    pub fn tags(tags: Vec<FragmentTag>) -> Self {
        Self {
            frames: Vec::new(),
            tags,
        }
    }
}

/// Turns container elements into decoded frames.
pub trait DecodePipeline {
    /// The container element type this pipeline accepts.
    type Element;

    /// Process one element.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the session driving the pipeline; it is
    /// neither retried nor skipped.
    fn process(&mut self, element: Self::Element) -> Result<Decoded, PipeError>;
}

/// A [`DecodePipeline`] backed by a closure. Created by [`pipeline_fn`].
pub struct FnPipeline<E, F> {
    process: F,
    element: PhantomData<fn(E)>,
}

/// Adapt a closure into a [`DecodePipeline`].
///
/// # Example
///
/// ```
/// use kinesis_pipe::{Decoded, DecodePipeline, pipeline_fn};
///
/// let mut pipeline = pipeline_fn(|_element: u32| Ok(Decoded::none()));
/// assert!(pipeline.process(1)?.frames.is_empty());
/// # Ok::<(), kinesis_pipe::PipeError>(())
/// ```
pub fn pipeline_fn<E, F>(process: F) -> FnPipeline<E, F>
where
    F: FnMut(E) -> Result<Decoded, PipeError>,
{
    FnPipeline {
        process,
        element: PhantomData,
    }
}

impl<E, F> DecodePipeline for FnPipeline<E, F>
where
    F: FnMut(E) -> Result<Decoded, PipeError>,
{
    type Element = E;

    fn process(&mut self, element: E) -> Result<Decoded, PipeError> {
        (self.process)(element)
    }
}
