//! Matroska container elements read from a byte stream.
//!
//! [`MkvDemuxer`] runs FFmpeg's matroska demuxer over any blocking [`Read`]
//! (a network body, a captured file) through a custom AVIO context, and
//! yields the stream as a sequence of [`ContainerElement`]s: one
//! [`Tracks`](ContainerElement::Tracks) element describing the codecs, one
//! [`Tags`](ContainerElement::Tags) element if the container carries
//! metadata, then one [`Block`](ContainerElement::Block) per demuxed packet.
//!
//! The demuxer implements [`ElementSource`], so it can back a
//! [`ClosingIterator`](crate::ClosingIterator) directly.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//!
//! use kinesis_pipe::{ClosingIterator, ContainerElement, MkvDemuxer};
//!
//! let demuxer = MkvDemuxer::open(File::open("capture.mkv")?)?;
//! for element in ClosingIterator::new(demuxer, || Ok(())) {
//!     if let ContainerElement::Block(block) = element? {
//!         println!("stream {} pts {:?}", block.stream_index(), block.pts());
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{
    collections::VecDeque,
    ffi::{CString, c_int, c_void},
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{Error as IoError, ErrorKind, Read},
    mem::ManuallyDrop,
    ptr,
    time::Duration,
};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational, codec::Parameters, format::context::Input,
    media::Type,
};
use ffmpeg_sys_next::{AVFMT_FLAG_CUSTOM_IO, AVIOContext};

use crate::{
    closing_iterator::ElementSource, conversion::pts_to_duration, error::PipeError,
    pipeline::FragmentTag,
};

/// Size of the AVIO read buffer handed to FFmpeg.
const IO_BUFFER_SIZE: usize = 32 * 1024;

/// FFmpeg demuxer used for media bodies.
const CONTAINER_FORMAT: &str = "matroska";

/// Matroska's default track time base (1 ms).
const DEFAULT_TIME_BASE: Rational = Rational(1, 1000);

/// One structural unit of the media stream.
pub enum ContainerElement {
    /// Track descriptions, emitted once before any block.
    Tracks(Vec<TrackInfo>),
    /// Container and track metadata, emitted once if present.
    Tags(Vec<FragmentTag>),
    /// One demuxed packet.
    Block(MediaBlock),
}

impl Debug for ContainerElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ContainerElement::Tracks(tracks) => f.debug_tuple("Tracks").field(tracks).finish(),
            ContainerElement::Tags(tags) => f.debug_tuple("Tags").field(tags).finish(),
            ContainerElement::Block(block) => f.debug_tuple("Block").field(block).finish(),
        }
    }
}

/// Description of one track in the container.
pub struct TrackInfo {
    /// Stream index referenced by [`MediaBlock::stream_index`].
    pub index: usize,
    /// Media type of the track.
    pub medium: Type,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
    /// Time base of the track's packet timestamps.
    pub time_base: Rational,
    /// Codec parameters needed to open a decoder.
    pub parameters: Parameters,
}

impl Debug for TrackInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("TrackInfo")
            .field("index", &self.index)
            .field("medium", &self.medium)
            .field("codec", &self.codec)
            .field("time_base", &self.time_base)
            .finish_non_exhaustive()
    }
}

/// One demuxed packet together with its track's time base.
pub struct MediaBlock {
    packet: Packet,
    time_base: Rational,
}

impl MediaBlock {
    /// Index of the track this block belongs to.
    pub fn stream_index(&self) -> usize {
        self.packet.stream()
    }

    /// Presentation timestamp in track time base units.
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    /// Presentation timestamp as a duration from the stream origin.
    pub fn presentation_time(&self) -> Option<Duration> {
        self.packet
            .pts()
            .and_then(|pts| pts_to_duration(pts, self.time_base))
    }

    /// Whether the block starts a keyframe.
    pub fn is_keyframe(&self) -> bool {
        self.packet.is_key()
    }

    /// Compressed payload size in bytes.
    pub fn size(&self) -> usize {
        self.packet.size()
    }

    /// Time base of [`pts`](MediaBlock::pts).
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// The underlying FFmpeg packet.
    pub fn packet(&self) -> &Packet {
        &self.packet
    }
}

impl Debug for MediaBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MediaBlock")
            .field("stream_index", &self.stream_index())
            .field("pts", &self.pts())
            .field("keyframe", &self.is_keyframe())
            .field("size", &self.size())
            .finish()
    }
}

/// A demuxer over a blocking byte stream.
pub struct MkvDemuxer {
    input: ReaderInput,
    pending: VecDeque<ContainerElement>,
    time_bases: Vec<Rational>,
    finished: bool,
}

impl Debug for MkvDemuxer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MkvDemuxer")
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl MkvDemuxer {
    /// Open the demuxer, reading the container header from `reader`.
    ///
    /// Blocks until the header and enough data to describe every track have
    /// arrived.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::Decode`] if the bytes are not a readable
    /// matroska stream, or [`PipeError::Io`] if `reader` itself failed.
    pub fn open<R: Read + 'static>(reader: R) -> Result<Self, PipeError> {
        let input = ReaderInput::open(Box::new(reader))?;

        let mut tracks = Vec::new();
        let mut time_bases = Vec::new();
        let mut tags: Vec<FragmentTag> = input
            .input()
            .metadata()
            .iter()
            .map(|(name, value)| FragmentTag::new(name, value))
            .collect();

        for stream in input.input().streams() {
            let parameters = stream.parameters();
            let track = TrackInfo {
                index: stream.index(),
                medium: parameters.medium(),
                codec: parameters.id().name().to_string(),
                time_base: stream.time_base(),
                parameters,
            };
            log::debug!("Container track: {track:?}");
            tags.extend(
                stream
                    .metadata()
                    .iter()
                    .map(|(name, value)| FragmentTag::new(name, value)),
            );
            time_bases.push(track.time_base);
            tracks.push(track);
        }

        log::info!(
            "Opened {} media stream with {} tracks",
            CONTAINER_FORMAT,
            tracks.len()
        );

        let mut pending = VecDeque::from([ContainerElement::Tracks(tracks)]);
        if !tags.is_empty() {
            pending.push_back(ContainerElement::Tags(tags));
        }

        Ok(Self {
            input,
            pending,
            time_bases,
            finished: false,
        })
    }
}

impl ElementSource for MkvDemuxer {
    type Item = ContainerElement;

    fn might_have_next(&mut self) -> bool {
        !self.pending.is_empty() || !self.finished
    }

    fn poll_next(&mut self) -> Result<Option<ContainerElement>, PipeError> {
        if let Some(element) = self.pending.pop_front() {
            return Ok(Some(element));
        }
        if self.finished {
            return Ok(None);
        }

        let mut packet = Packet::empty();
        match packet.read(self.input.input_mut()) {
            Ok(()) => {
                let time_base = self
                    .time_bases
                    .get(packet.stream())
                    .copied()
                    .unwrap_or(DEFAULT_TIME_BASE);
                Ok(Some(ContainerElement::Block(MediaBlock { packet, time_base })))
            }
            Err(FfmpegError::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Err(error) => {
                self.finished = true;
                match self.input.take_io_error() {
                    Some(io_error) => Err(PipeError::Io(io_error)),
                    None => Err(PipeError::Decode(format!(
                        "failed to read container block: {error}"
                    ))),
                }
            }
        }
    }
}

/// State shared with the AVIO read callback.
struct ReaderState {
    reader: Box<dyn Read>,
    error: Option<IoError>,
}

/// An FFmpeg input context whose bytes come from a Rust reader.
struct ReaderInput {
    input: ManuallyDrop<Input>,
    io_context: *mut AVIOContext,
    state: *mut ReaderState,
}

impl ReaderInput {
    fn open(reader: Box<dyn Read>) -> Result<Self, PipeError> {
        ffmpeg_next::init()?;
        let format_name = CString::new(CONTAINER_FORMAT)
            .map_err(|error| PipeError::Ffmpeg(format!("invalid format name: {error}")))?;

        let state = Box::into_raw(Box::new(ReaderState {
            reader,
            error: None,
        }));

        // SAFETY: every pointer allocated here is either handed to the
        // returned `ReaderInput` (which frees it in `Drop`) or released on
        // the error path before returning. `AVFMT_FLAG_CUSTOM_IO` keeps
        // `avformat_close_input` from freeing our AVIO context.
        unsafe {
            let buffer = ffmpeg_sys_next::av_malloc(IO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(state));
                return Err(PipeError::Ffmpeg("failed to allocate AVIO buffer".to_string()));
            }

            let io_context = ffmpeg_sys_next::avio_alloc_context(
                buffer,
                IO_BUFFER_SIZE as c_int,
                0,
                state as *mut c_void,
                Some(read_callback),
                None,
                None,
            );
            if io_context.is_null() {
                ffmpeg_sys_next::av_free(buffer as *mut c_void);
                drop(Box::from_raw(state));
                return Err(PipeError::Ffmpeg("failed to allocate AVIO context".to_string()));
            }

            let mut format_context = ffmpeg_sys_next::avformat_alloc_context();
            if format_context.is_null() {
                release_io(io_context, state);
                return Err(PipeError::Ffmpeg(
                    "failed to allocate format context".to_string(),
                ));
            }
            (*format_context).pb = io_context;
            (*format_context).flags |= AVFMT_FLAG_CUSTOM_IO as c_int;

            let input_format = ffmpeg_sys_next::av_find_input_format(format_name.as_ptr());
            let status = ffmpeg_sys_next::avformat_open_input(
                &mut format_context,
                ptr::null(),
                input_format,
                ptr::null_mut(),
            );
            if status < 0 {
                // avformat_open_input frees the format context on failure.
                let io_error = (*state).error.take();
                release_io(io_context, state);
                return Err(open_error(status, io_error));
            }

            let status = ffmpeg_sys_next::avformat_find_stream_info(format_context, ptr::null_mut());
            if status < 0 {
                ffmpeg_sys_next::avformat_close_input(&mut format_context);
                let io_error = (*state).error.take();
                release_io(io_context, state);
                return Err(open_error(status, io_error));
            }

            Ok(Self {
                input: ManuallyDrop::new(Input::wrap(format_context)),
                io_context,
                state,
            })
        }
    }

    fn input(&self) -> &Input {
        &self.input
    }

    fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }

    fn take_io_error(&mut self) -> Option<IoError> {
        // SAFETY: `state` is valid until drop and FFmpeg only touches it
        // from inside calls made through `self.input`, which are not active.
        unsafe { (*self.state).error.take() }
    }
}

impl Drop for ReaderInput {
    fn drop(&mut self) {
        // SAFETY: the input context is closed before the AVIO context and
        // reader it reads through are released, and neither is used again.
        unsafe {
            ManuallyDrop::drop(&mut self.input);
            release_io(self.io_context, self.state);
        }
    }
}

fn open_error(status: c_int, io_error: Option<IoError>) -> PipeError {
    match io_error {
        Some(error) => PipeError::Io(error),
        None => PipeError::Decode(format!(
            "cannot open {CONTAINER_FORMAT} stream: {}",
            FfmpegError::from(status)
        )),
    }
}

/// Free an AVIO context (and its possibly reallocated buffer) and the reader
/// behind it.
///
/// # Safety
///
/// Both pointers must come from [`ReaderInput::open`] and must not be used
/// afterwards.
unsafe fn release_io(mut io_context: *mut AVIOContext, state: *mut ReaderState) {
    unsafe {
        if !io_context.is_null() {
            ffmpeg_sys_next::av_freep(&mut (*io_context).buffer as *mut *mut u8 as *mut c_void);
            ffmpeg_sys_next::avio_context_free(&mut io_context);
        }
        drop(Box::from_raw(state));
    }
}

/// AVIO read callback pulling bytes from the boxed reader.
unsafe extern "C" fn read_callback(opaque: *mut c_void, buffer: *mut u8, buffer_size: c_int) -> c_int {
    // SAFETY: `opaque` is the `ReaderState` installed by `ReaderInput::open`,
    // alive until `release_io`; FFmpeg passes a writable buffer of
    // `buffer_size` bytes.
    let state = unsafe { &mut *(opaque as *mut ReaderState) };
    let Ok(length) = usize::try_from(buffer_size) else {
        return c_int::from(FfmpegError::InvalidData);
    };
    let target = unsafe { std::slice::from_raw_parts_mut(buffer, length) };

    loop {
        match state.reader.read(target) {
            Ok(0) => return c_int::from(FfmpegError::Eof),
            Ok(read) => return read as c_int,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                log::warn!("Media body read failed: {error}");
                state.error = Some(error);
                return c_int::from(FfmpegError::External);
            }
        }
    }
}
