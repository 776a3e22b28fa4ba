//! Resumable HTTP content fetchers.
//!
//! A fetcher owns one remote target and a byte cache that persists across
//! connections. `connect` negotiates a suffix range covering only the bytes
//! not yet cached, `close` cancels the in-flight body without touching the
//! cache, and the logical stream always replays from offset zero: cached
//! bytes first, then live bytes, appended to the cache as they arrive.
//!
//! Two variants with an identical contract: [`CachedStreamFetcher`] keeps
//! the cache as the original chunk sequence and replays it by index;
//! [`ResumableFetcher`] keeps one contiguous buffer and chains it in front
//! of the live stream.

mod cached;
mod resumable;
mod transport;

pub use cached::CachedStreamFetcher;
pub use resumable::ResumableFetcher;
pub use transport::{
    BodyStream, ContentRange, FetchRequest, FetchResponse, HttpTransport, Transport,
};

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

/// Construction options shared by both fetcher variants.
#[derive(Default, Clone)]
pub struct FetchOptions {
    /// Bytes already held before the first connect, e.g. carried over from
    /// an earlier session.
    pub prefix: Option<Bytes>,
    /// Total content length when known out of band.
    pub content_length: Option<u64>,
    /// Extra request headers sent on every connect.
    pub headers: Vec<(String, String)>,
}

/// Position in the logical cached-then-live stream. The unit is
/// fetcher-defined (chunk index or byte offset); a fresh cursor always
/// starts the stream from the beginning of the content.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCursor(pub(crate) u64);

/// A resumable download of one remote target.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Ensures a live connection covering the uncached suffix. No-op when
    /// already connected or when the cache is complete.
    async fn connect(&self) -> Result<()>;

    /// Pulls the next chunk of the logical stream at `cursor`. `Ok(None)`
    /// means end of content (or end of the cache when disconnected).
    async fn next_chunk(&self, cursor: &mut StreamCursor) -> Result<Option<Bytes>>;

    /// Connects and drains to completion, returning the full content.
    async fn blob(&self) -> Result<Bytes>;

    /// Cancels the in-flight body. The cache persists; a later `connect`
    /// resumes from where the cache ends.
    fn close(&self);

    fn is_connected(&self) -> bool;
    fn content_type(&self) -> Option<String>;
    /// Bytes cached so far.
    fn cached_size(&self) -> u64;
    /// The cache as one contiguous buffer.
    fn cached_bytes(&self) -> Bytes;
    /// Total content length, once known.
    fn content_length(&self) -> Option<u64>;
}

/// Adapts a fetcher to a `Stream` starting at offset zero.
pub fn stream(fetcher: Arc<dyn Fetcher>) -> BodyStream {
    futures::stream::unfold(
        (fetcher, StreamCursor::default(), false),
        |(fetcher, mut cursor, done)| async move {
            if done {
                return None;
            }
            match fetcher.next_chunk(&mut cursor).await {
                Ok(Some(bytes)) => Some((Ok(bytes), (fetcher, cursor, false))),
                Ok(None) => None,
                Err(err) => Some((Err(err), (fetcher, cursor, true))),
            }
        },
    )
    .boxed()
}

/// Cancellation scope of one live connection. `close` cancels the current
/// session only; a reconnect gets a fresh one.
pub(crate) struct Session {
    tx: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    pub(crate) fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// One live-body pull, racing the session cancel signal.
pub(crate) async fn pull_live(
    live: &mut BodyStream,
    session: &Session,
) -> Result<Option<Bytes>> {
    tokio::select! {
        biased;
        _ = session.wait() => Err(Error::Cancelled),
        item = live.next() => match item {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        },
    }
}

/// What a successful negotiation told us to do.
pub(crate) struct ConnectPlan {
    /// `None` means the server confirmed there is no more content.
    pub body: Option<BodyStream>,
    pub content_type: Option<String>,
    pub total: Option<u64>,
    pub cache_action: CacheAction,
}

pub(crate) enum CacheAction {
    Keep,
    /// The response resumes earlier than the cache end.
    TruncateTo(u64),
    /// The server ignored the range request; nothing cached can be trusted.
    Discard,
}

/// Issues the (possibly ranged) request and classifies the response per the
/// resume policy.
pub(crate) async fn negotiate(
    transport: &dyn Transport,
    url: &Url,
    headers: &[(String, String)],
    cached: u64,
    known_total: Option<u64>,
) -> Result<ConnectPlan> {
    let range_start = (cached > 0).then_some(cached);
    let response = transport
        .fetch(FetchRequest {
            url: url.clone(),
            range_start,
            headers: headers.to_vec(),
        })
        .await?;

    debug!(
        url = %url,
        status = response.status,
        range_start,
        content_length = response.content_length,
        "connect response"
    );

    // Zero remaining length means the cache already holds everything; this
    // holds whatever the status says, 416 included.
    if response.content_length == Some(0) {
        return Ok(ConnectPlan {
            body: None,
            content_type: response.content_type,
            total: Some(cached),
            cache_action: CacheAction::Keep,
        });
    }

    match response.status {
        206 => {
            let start = response
                .content_range
                .map(|range| range.start)
                .or_else(|| match (known_total, response.content_length) {
                    (Some(total), Some(remaining)) => Some(total.saturating_sub(remaining)),
                    _ => None,
                })
                .unwrap_or(cached);
            let total = response
                .content_range
                .and_then(|range| range.total)
                .or(known_total)
                .or(response.content_length.map(|remaining| start + remaining));
            Ok(ConnectPlan {
                body: Some(response.body),
                content_type: response.content_type,
                total,
                cache_action: CacheAction::TruncateTo(start),
            })
        }
        200 => {
            let cache_action = if range_start.is_some() {
                // The range was not honored; the body restarts from zero
                // and the cache cannot be assumed to match it.
                CacheAction::Discard
            } else {
                CacheAction::Keep
            };
            Ok(ConnectPlan {
                body: Some(response.body),
                content_type: response.content_type,
                total: response.content_length.or(known_total),
                cache_action,
            })
        }
        416 => Err(Error::RangeNotSatisfiable {
            url: url.to_string(),
        }),
        status => Err(Error::Status {
            url: url.to_string(),
            status,
        }),
    }
}
