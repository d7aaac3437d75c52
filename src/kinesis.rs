//! Kinesis Video Streams implementation of [`StreamRepository`].
//!
//! Requires the `kinesis` feature. Calls go through the AWS SDK on a private
//! current-thread tokio runtime, so the repository presents the same
//! blocking interface as the rest of the crate. The `GetMedia` response body
//! is read chunk by chunk as the demuxer asks for bytes.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{Error as IoError, Read},
    sync::Arc,
};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_kinesisvideo::{error::DisplayErrorContext, types::ApiName};
use aws_sdk_kinesisvideomedia::{
    primitives::{ByteStream, DateTime},
    types::{StartSelector as MediaStartSelector, StartSelectorType},
};
use bytes::{Buf, Bytes};
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

use crate::{
    closing_iterator::ClosingIterator,
    container::{ContainerElement, MkvDemuxer},
    error::PipeError,
    identity::{StartSelector, StreamIdentity},
    repository::StreamRepository,
};

/// Stream catalog and media access backed by the AWS SDK.
pub struct KinesisRepository {
    runtime: Arc<Runtime>,
    config: SdkConfig,
    client: aws_sdk_kinesisvideo::Client,
}

impl Debug for KinesisRepository {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("KinesisRepository")
            .field("region", &self.config.region())
            .finish_non_exhaustive()
    }
}

impl KinesisRepository {
    /// Load AWS configuration from the environment and create a repository.
    ///
    /// Credentials and region follow the standard AWS provider chain;
    /// `region` overrides the chain's region when given.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::Io`] if the async runtime cannot be created.
    pub fn connect(region: Option<String>) -> Result<Self, PipeError> {
        let runtime = RuntimeBuilder::new_current_thread().enable_all().build()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = runtime.block_on(loader.load());
        log::debug!("Loaded AWS configuration for region {:?}", config.region());

        Ok(Self::from_config(Arc::new(runtime), config))
    }

    /// Create a repository from an already loaded SDK configuration.
    pub fn from_config(runtime: Arc<Runtime>, config: SdkConfig) -> Self {
        let client = aws_sdk_kinesisvideo::Client::new(&config);
        Self {
            runtime,
            config,
            client,
        }
    }

    fn data_endpoint(&self, identity: &StreamIdentity) -> Result<String, PipeError> {
        let request = self
            .client
            .get_data_endpoint()
            .api_name(ApiName::GetMedia)
            .set_stream_arn(identity.arn.clone());
        let request = match &identity.arn {
            Some(_) => request,
            None => request.set_stream_name(identity.name.clone()),
        };

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|error| connection_error(identity, DisplayErrorContext(error)))?;
        output
            .data_endpoint()
            .map(str::to_string)
            .ok_or_else(|| connection_error(identity, "service returned no data endpoint"))
    }
}

impl StreamRepository for KinesisRepository {
    type Element = ContainerElement;

    fn list_streams(&self) -> Result<Vec<StreamIdentity>, PipeError> {
        let mut streams = Vec::new();
        let mut next_token = None;

        loop {
            let output = self
                .runtime
                .block_on(
                    self.client
                        .list_streams()
                        .set_next_token(next_token.take())
                        .send(),
                )
                .map_err(|error| PipeError::Connection {
                    stream: "<catalog>".to_string(),
                    reason: DisplayErrorContext(error).to_string(),
                })?;

            streams.extend(output.stream_info_list().iter().map(|info| StreamIdentity {
                name: info.stream_name().map(str::to_string),
                arn: info.stream_arn().map(str::to_string),
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(streams)
    }

    fn open_media(
        &self,
        selector: &StartSelector,
        identity: &StreamIdentity,
    ) -> Result<ClosingIterator<ContainerElement>, PipeError> {
        if !identity.is_resolved() {
            return Err(PipeError::UnresolvedStream);
        }

        let endpoint = self.data_endpoint(identity)?;
        log::debug!("Using GetMedia endpoint {endpoint} for stream {identity}");

        let media_config = aws_sdk_kinesisvideomedia::config::Builder::from(&self.config)
            .endpoint_url(&endpoint)
            .build();
        let media_client = aws_sdk_kinesisvideomedia::Client::from_conf(media_config);

        let request = media_client
            .get_media()
            .start_selector(media_start_selector(selector)?)
            .set_stream_arn(identity.arn.clone());
        let request = match &identity.arn {
            Some(_) => request,
            None => request.set_stream_name(identity.name.clone()),
        };

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|error| connection_error(identity, DisplayErrorContext(error)))?;
        log::info!(
            "Opened media session for stream {identity} ({})",
            output.content_type().unwrap_or("unknown content type")
        );

        let body = BlockingBody {
            runtime: Arc::clone(&self.runtime),
            payload: output.payload,
            chunk: Bytes::new(),
        };
        let demuxer =
            MkvDemuxer::open(body).map_err(|error| connection_error(identity, error))?;

        let stream = identity.to_string();
        Ok(ClosingIterator::new(demuxer, move || {
            drop(media_client);
            log::debug!("Released media session for stream {stream}");
            Ok(())
        }))
    }
}

fn media_start_selector(selector: &StartSelector) -> Result<MediaStartSelector, PipeError> {
    let builder = match selector {
        StartSelector::Now => MediaStartSelector::builder().start_selector_type(StartSelectorType::Now),
        StartSelector::Earliest => {
            MediaStartSelector::builder().start_selector_type(StartSelectorType::Earliest)
        }
        StartSelector::AtTimestamp(timestamp) => MediaStartSelector::builder()
            .start_selector_type(StartSelectorType::ProducerTimestamp)
            .start_timestamp(DateTime::from(*timestamp)),
    };
    builder
        .build()
        .map_err(|error| PipeError::InvalidArgument(format!("invalid start selector: {error}")))
}

fn connection_error(identity: &StreamIdentity, reason: impl ToString) -> PipeError {
    PipeError::Connection {
        stream: identity.to_string(),
        reason: reason.to_string(),
    }
}

/// Blocking [`Read`] over a streamed response body.
struct BlockingBody {
    runtime: Arc<Runtime>,
    payload: ByteStream,
    chunk: Bytes,
}

impl Read for BlockingBody {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        while !self.chunk.has_remaining() {
            match self.runtime.block_on(self.payload.next()) {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(error)) => return Err(IoError::other(error)),
                None => return Ok(0),
            }
        }

        let read = buffer.len().min(self.chunk.remaining());
        self.chunk.copy_to_slice(&mut buffer[..read]);
        Ok(read)
    }
}
