//! Length-prefixed frame serialization.
//!
//! Every decoded frame is written to the sink as an 8-byte big-endian
//! payload length followed by the payload bytes. There is no stream header
//! and no frame count; a framed stream is a flat concatenation of records:
//!
//! ```text
//! [u64 BE: N][N bytes payload][u64 BE: M][M bytes payload]...
//! ```
//!
//! [`FrameWriter`] produces this encoding and [`FrameReader`] consumes it.
//!
//! # Example
//!
//! ```
//! use kinesis_pipe::{FrameReader, FrameWriter};
//!
//! let mut buffer = Vec::new();
//! let mut writer = FrameWriter::new(&mut buffer);
//! writer.write_frame(b"abc")?;
//! writer.write_frame(b"")?;
//!
//! let payloads: Vec<Vec<u8>> = FrameReader::new(buffer.as_slice())
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(payloads, vec![b"abc".to_vec(), Vec::new()]);
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

/// Size in bytes of the length prefix preceding every payload.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Writes payloads using the length-prefixed framing.
///
/// No recovery is attempted on a failed write: if the payload write fails
/// after the prefix was written, the sink holds a truncated record and must
/// be discarded.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
    frames_written: u64,
    bytes_written: u64,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            frames_written: 0,
            bytes_written: 0,
        }
    }

    /// Write one record: the payload length, then the payload.
    pub fn write_frame(&mut self, payload: &[u8]) -> IoResult<()> {
        let length = payload.len() as u64;
        self.inner.write_all(&length.to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.frames_written += 1;
        self.bytes_written += (LENGTH_PREFIX_SIZE + payload.len()) as u64;
        Ok(())
    }

    /// Flush the underlying sink.
    pub fn flush(&mut self) -> IoResult<()> {
        self.inner.flush()
    }

    /// Number of complete records written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Number of bytes written so far, prefixes included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads payloads back out of a framed stream.
///
/// Iteration ends cleanly when the stream ends exactly on a record boundary.
/// A stream that ends inside a prefix or payload yields an
/// [`ErrorKind::UnexpectedEof`] error.
#[derive(Debug)]
pub struct FrameReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a framed source.
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    /// Read the next payload, or `None` at a clean end of stream.
    pub fn read_frame(&mut self) -> IoResult<Option<Vec<u8>>> {
        let mut prefix = [0_u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_SIZE {
            match self.inner.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(IoError::new(
                        ErrorKind::UnexpectedEof,
                        format!("stream ended inside a length prefix ({filled} of 8 bytes)"),
                    ));
                }
                Ok(read) => filled += read,
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }

        let length = u64::from_be_bytes(prefix);
        let expected = usize::try_from(length).map_err(|_| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("frame length {length} exceeds addressable memory"),
            )
        })?;

        let mut payload = Vec::new();
        (&mut self.inner).take(length).read_to_end(&mut payload)?;
        if payload.len() != expected {
            return Err(IoError::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "stream ended inside a payload ({} of {expected} bytes)",
                    payload.len()
                ),
            ));
        }

        Ok(Some(payload))
    }

    /// Unwrap the source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = IoResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_frame() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
