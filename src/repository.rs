//! The remote stream catalog and media retrieval port.
//!
//! [`StreamingEngine`](crate::StreamingEngine) talks to the remote service
//! only through [`StreamRepository`]. The Kinesis Video Streams
//! implementation lives in [`kinesis`](crate::kinesis) (feature `kinesis`);
//! tests substitute in-memory implementations.

use crate::{
    closing_iterator::ClosingIterator,
    error::PipeError,
    identity::{StartSelector, StreamIdentity},
};

/// Catalog listing and media retrieval against a remote video service.
pub trait StreamRepository {
    /// The container element type yielded by opened media sessions.
    type Element;

    /// Snapshot of the known streams, in source order.
    ///
    /// Entries returned by a remote service carry both name and ARN.
    fn list_streams(&self) -> Result<Vec<StreamIdentity>, PipeError>;

    /// Open a retrieval session for `identity`, positioned per `selector`.
    ///
    /// The returned iterator owns the underlying network resource
    /// exclusively and releases it when closed or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::Connection`] if the endpoint cannot be resolved
    /// or the session cannot be established, and
    /// [`PipeError::UnresolvedStream`] if `identity` has no key.
    fn open_media(
        &self,
        selector: &StartSelector,
        identity: &StreamIdentity,
    ) -> Result<ClosingIterator<Self::Element>, PipeError>;
}
