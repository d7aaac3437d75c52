//! Closable, pull-based iteration over a polled source.
//!
//! [`ClosingIterator`] bridges a polling-style source (something that can be
//! asked "might there be more?" and "give me the next item, if any") to a
//! synchronous consumer, and owns the release action for whatever resource
//! backs the source. The release action runs exactly once: on exhaustion,
//! on an explicit [`close`](ClosingIterator::close), or when the iterator is
//! dropped, whichever comes first.
//!
//! # Example
//!
//! ```
//! use kinesis_pipe::{ClosingIterator, PipeError};
//!
//! let mut remaining = vec![3, 2, 1];
//! let mut iter = ClosingIterator::from_fn(
//!     move || Ok(remaining.pop()),
//!     || {
//!         println!("connection released");
//!         Ok(())
//!     },
//! );
//!
//! while iter.has_next() {
//!     match iter.next_element() {
//!         Ok(value) => println!("got {value}"),
//!         Err(PipeError::IterationExhausted) => break,
//!         Err(error) => return Err(error),
//!     }
//! }
//! assert!(iter.is_closed());
//! # Ok::<(), PipeError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::mem;

use crate::error::PipeError;

/// A polling source of items.
///
/// `might_have_next` is a cheap, non-blocking hint; `poll_next` blocks until
/// an item is available and returns `Ok(None)` once the source is drained.
pub trait ElementSource {
    /// The item type produced by this source.
    type Item;

    /// Whether a subsequent [`poll_next`](ElementSource::poll_next) may
    /// produce an item.
    fn might_have_next(&mut self) -> bool;

    /// Block until the next item is available.
    ///
    /// Returns `Ok(None)` when the source is exhausted.
    fn poll_next(&mut self) -> Result<Option<Self::Item>, PipeError>;
}

/// Adapts a poll closure into an [`ElementSource`].
///
/// The hint reports `true` until the closure first returns `Ok(None)`.
struct FnSource<F> {
    poll: F,
    drained: bool,
}

impl<T, F> ElementSource for FnSource<F>
where
    F: FnMut() -> Result<Option<T>, PipeError>,
{
    type Item = T;

    fn might_have_next(&mut self) -> bool {
        !self.drained
    }

    fn poll_next(&mut self) -> Result<Option<T>, PipeError> {
        let item = (self.poll)()?;
        if item.is_none() {
            self.drained = true;
        }
        Ok(item)
    }
}

type Closer = Box<dyn FnOnce() -> Result<(), PipeError>>;

enum State<T> {
    Open {
        source: Box<dyn ElementSource<Item = T>>,
        closer: Closer,
        exhausted: bool,
    },
    Closed,
}

/// A pull iterator that owns and releases the resource behind its source.
///
/// The iterator moves from `Open` to `Closed` exactly once. The transition
/// drops the source (releasing e.g. the network body it reads from) and then
/// runs the closer. Further calls to [`close`](ClosingIterator::close) are
/// no-ops, and [`next_element`](ClosingIterator::next_element) after close
/// fails with [`PipeError::IterationExhausted`].
///
/// Dropping an open iterator closes it; a close failure during drop is
/// logged since it cannot be returned.
pub struct ClosingIterator<T> {
    state: State<T>,
}

impl<T: 'static> ClosingIterator<T> {
    /// Wrap a source together with the action that releases it.
    pub fn new<S, C>(source: S, closer: C) -> Self
    where
        S: ElementSource<Item = T> + 'static,
        C: FnOnce() -> Result<(), PipeError> + 'static,
    {
        Self {
            state: State::Open {
                source: Box::new(source),
                closer: Box::new(closer),
                exhausted: false,
            },
        }
    }

    /// Wrap a poll closure that returns `Ok(None)` once drained.
    pub fn from_fn<F, C>(poll: F, closer: C) -> Self
    where
        F: FnMut() -> Result<Option<T>, PipeError> + 'static,
        C: FnOnce() -> Result<(), PipeError> + 'static,
    {
        Self::new(
            FnSource {
                poll,
                drained: false,
            },
            closer,
        )
    }
}

impl<T> ClosingIterator<T> {
    /// Non-blocking check of whether further polling may succeed.
    ///
    /// Always `false` once the iterator is exhausted or closed.
    pub fn has_next(&mut self) -> bool {
        match &mut self.state {
            State::Open {
                source, exhausted, ..
            } => !*exhausted && source.might_have_next(),
            State::Closed => false,
        }
    }

    /// Block until the next item is available.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::IterationExhausted`] when the source is drained
    /// (closing the iterator on the way) or when the iterator was already
    /// closed. Errors raised by the source itself are passed through
    /// unchanged and leave the iterator open for its owner to close.
    pub fn next_element(&mut self) -> Result<T, PipeError> {
        let State::Open {
            source, exhausted, ..
        } = &mut self.state
        else {
            return Err(PipeError::IterationExhausted);
        };

        if *exhausted {
            return Err(PipeError::IterationExhausted);
        }

        match source.poll_next()? {
            Some(item) => Ok(item),
            None => {
                *exhausted = true;
                log::debug!("Element source exhausted");
                self.close()?;
                Err(PipeError::IterationExhausted)
            }
        }
    }

    /// Release the underlying resource.
    ///
    /// The closer runs at most once over the lifetime of the iterator;
    /// later calls return `Ok(())` without doing anything.
    pub fn close(&mut self) -> Result<(), PipeError> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Open { source, closer, .. } => {
                drop(source);
                log::debug!("Closing element iterator");
                closer()
            }
            State::Closed => Ok(()),
        }
    }

    /// Whether the closer has already run.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }
}

impl<T> Iterator for ClosingIterator<T> {
    type Item = Result<T, PipeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return self.close().err().map(Err);
        }

        match self.next_element() {
            Ok(item) => Some(Ok(item)),
            Err(PipeError::IterationExhausted) => None,
            Err(error) => Some(Err(error)),
        }
    }
}

impl<T> Drop for ClosingIterator<T> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::warn!("Failed to close element iterator: {error}");
        }
    }
}

impl<T> Debug for ClosingIterator<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let state = match &self.state {
            State::Open { exhausted, .. } if *exhausted => "exhausted",
            State::Open { .. } => "open",
            State::Closed => "closed",
        };
        f.debug_struct("ClosingIterator")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
