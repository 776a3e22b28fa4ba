//! Fetcher caching the received chunk sequence.
//!
//! Replay is index-addressed: a cursor walks the cached chunks exactly as
//! they arrived, then continues on the live body.

use super::{
    negotiate, pull_live, BodyStream, CacheAction, FetchOptions, Fetcher, Session, StreamCursor,
    Transport,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex};
use url::Url;

pub struct CachedStreamFetcher {
    transport: Arc<dyn Transport>,
    url: Url,
    headers: Vec<(String, String)>,
    inner: Mutex<Inner>,
}

struct Inner {
    chunks: Vec<Bytes>,
    cached: u64,
    total: Option<u64>,
    content_type: Option<String>,
    live: Option<BodyStream>,
    session: Option<Arc<Session>>,
    connected: bool,
}

impl CachedStreamFetcher {
    pub fn new(url: Url, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(url, FetchOptions::default(), transport)
    }

    pub fn with_options(
        url: Url,
        options: FetchOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut chunks = Vec::new();
        let mut cached = 0u64;
        if let Some(prefix) = options.prefix {
            if !prefix.is_empty() {
                cached = prefix.len() as u64;
                chunks.push(prefix);
            }
        }
        Self {
            transport,
            url,
            headers: options.headers,
            inner: Mutex::new(Inner {
                chunks,
                cached,
                total: options.content_length,
                content_type: None,
                live: None,
                session: None,
                connected: false,
            }),
        }
    }

    fn truncate_cache(inner: &mut Inner, keep: u64) {
        if keep >= inner.cached {
            return;
        }
        let mut kept = 0u64;
        let mut retained = Vec::new();
        for mut chunk in inner.chunks.drain(..) {
            if kept >= keep {
                continue;
            }
            let room = keep - kept;
            if chunk.len() as u64 <= room {
                kept += chunk.len() as u64;
                retained.push(chunk);
            } else {
                let head = chunk.split_to(room as usize);
                kept += room;
                retained.push(head);
            }
        }
        inner.chunks = retained;
        inner.cached = kept;
    }
}

#[async_trait]
impl Fetcher for CachedStreamFetcher {
    async fn connect(&self) -> Result<()> {
        let (cached, total) = {
            let inner = self.inner.lock().unwrap();
            if inner.connected {
                return Ok(());
            }
            if inner.total == Some(inner.cached) {
                // Cache already complete; no network needed.
                return Ok(());
            }
            (inner.cached, inner.total)
        };

        let plan = negotiate(self.transport.as_ref(), &self.url, &self.headers, cached, total)
            .await?;

        let mut inner = self.inner.lock().unwrap();
        if inner.connected {
            return Ok(());
        }
        match plan.cache_action {
            CacheAction::Keep => {}
            CacheAction::Discard => {
                inner.chunks.clear();
                inner.cached = 0;
            }
            CacheAction::TruncateTo(keep) => Self::truncate_cache(&mut inner, keep),
        }
        if plan.content_type.is_some() {
            inner.content_type = plan.content_type;
        }
        if plan.total.is_some() {
            inner.total = plan.total;
        }
        match plan.body {
            Some(body) => {
                inner.live = Some(body);
                inner.session = Some(Session::new());
                inner.connected = true;
            }
            None => {
                inner.total = Some(inner.cached);
            }
        }
        Ok(())
    }

    async fn next_chunk(&self, cursor: &mut StreamCursor) -> Result<Option<Bytes>> {
        loop {
            // The guard must not live across an await point.
            let checkout = {
                let mut inner = self.inner.lock().unwrap();
                let index = cursor.0 as usize;
                if index < inner.chunks.len() {
                    cursor.0 += 1;
                    return Ok(Some(inner.chunks[index].clone()));
                }
                if !inner.connected {
                    return Ok(None);
                }
                match (inner.live.take(), inner.session.clone()) {
                    (Some(live), Some(session)) => Some((live, session)),
                    _ => None,
                }
            };
            let (mut live, session) = match checkout {
                Some(pair) => pair,
                // The body is checked out by another pull; let it deposit
                // its chunk into the cache first.
                None => {
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            let pulled = pull_live(&mut live, &session).await;
            let mut inner = self.inner.lock().unwrap();
            return match pulled {
                Ok(Some(bytes)) => {
                    if session.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    inner.chunks.push(bytes.clone());
                    inner.cached += bytes.len() as u64;
                    inner.live = Some(live);
                    cursor.0 = inner.chunks.len() as u64;
                    Ok(Some(bytes))
                }
                Ok(None) => {
                    inner.connected = false;
                    inner.session = None;
                    // A clean end with no declared total fixes the total.
                    if inner.total.is_none() {
                        inner.total = Some(inner.cached);
                    }
                    Ok(None)
                }
                Err(err) => {
                    inner.connected = false;
                    inner.session = None;
                    Err(err)
                }
            };
        }
    }

    async fn blob(&self) -> Result<Bytes> {
        self.connect().await?;
        let mut cursor = StreamCursor::default();
        while self.next_chunk(&mut cursor).await?.is_some() {}
        Ok(self.cached_bytes())
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.live = None;
        if let Some(session) = inner.session.take() {
            session.cancel();
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn content_type(&self) -> Option<String> {
        self.inner.lock().unwrap().content_type.clone()
    }

    fn cached_size(&self) -> u64 {
        self.inner.lock().unwrap().cached
    }

    fn cached_bytes(&self) -> Bytes {
        let inner = self.inner.lock().unwrap();
        match inner.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => {
                let mut out = BytesMut::with_capacity(inner.cached as usize);
                for chunk in chunks {
                    out.extend_from_slice(chunk);
                }
                out.freeze()
            }
        }
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.lock().unwrap().total
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{test_url, RangeTransport};
    use super::*;

    const PAYLOAD: &[u8] = b"0123456789abcdefghijklmnopqrstuv";

    #[tokio::test]
    async fn test_blob_returns_full_content() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD).chunk_size(5));
        let fetcher = CachedStreamFetcher::new(test_url(), transport.clone());

        let blob = fetcher.blob().await.unwrap();
        assert_eq!(blob.as_ref(), PAYLOAD);
        assert_eq!(fetcher.cached_size(), PAYLOAD.len() as u64);
        assert_eq!(fetcher.content_length(), Some(PAYLOAD.len() as u64));
        assert!(!fetcher.is_connected());
        assert_eq!(transport.request_log(), vec![None]);
    }

    #[tokio::test]
    async fn test_stream_replays_cache_without_reconnecting() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD));
        let fetcher = CachedStreamFetcher::new(test_url(), transport.clone());
        fetcher.blob().await.unwrap();

        // The cache is complete; a second drain does not hit the network.
        let blob = fetcher.blob().await.unwrap();
        assert_eq!(blob.as_ref(), PAYLOAD);
        assert_eq!(transport.request_log(), vec![None]);
    }

    #[tokio::test]
    async fn test_close_then_reconnect_sends_suffix_range() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD).chunk_size(8));
        let fetcher = CachedStreamFetcher::new(test_url(), transport.clone());

        fetcher.connect().await.unwrap();
        let mut cursor = StreamCursor::default();
        let first = fetcher.next_chunk(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first.len(), 8);
        fetcher.close();
        assert!(!fetcher.is_connected());

        // Resume: only the uncached suffix is requested.
        let blob = fetcher.blob().await.unwrap();
        assert_eq!(blob.as_ref(), PAYLOAD);
        assert_eq!(transport.request_log(), vec![None, Some(8)]);
    }

    #[tokio::test]
    async fn test_range_ignored_discards_cache() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD).ignoring_ranges());
        let fetcher = CachedStreamFetcher::with_options(
            test_url(),
            FetchOptions {
                prefix: Some(Bytes::from_static(b"stale-prefix")),
                ..FetchOptions::default()
            },
            transport,
        );

        assert_eq!(fetcher.cached_size(), 12);
        let blob = fetcher.blob().await.unwrap();
        // The 200 response replaced the cache wholesale.
        assert_eq!(blob.as_ref(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_complete_prefix_skips_network() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD));
        let fetcher = CachedStreamFetcher::with_options(
            test_url(),
            FetchOptions {
                prefix: Some(Bytes::from_static(PAYLOAD)),
                content_length: Some(PAYLOAD.len() as u64),
                ..FetchOptions::default()
            },
            transport.clone(),
        );

        let blob = fetcher.blob().await.unwrap();
        assert_eq!(blob.as_ref(), PAYLOAD);
        assert!(transport.request_log().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_status_is_an_error() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD).always_status(503));
        let fetcher = CachedStreamFetcher::new(test_url(), transport);
        let err = fetcher.connect().await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_blobs_on_spawned_tasks() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD).chunk_size(5));
        let fetcher = Arc::new(CachedStreamFetcher::new(test_url(), transport));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let fetcher = fetcher.clone();
                tokio::spawn(async move { fetcher.blob().await })
            })
            .collect();
        for task in tasks {
            let blob = task.await.unwrap().unwrap();
            assert_eq!(blob.as_ref(), PAYLOAD);
        }
    }

    #[tokio::test]
    async fn test_range_not_satisfiable() {
        let transport = Arc::new(RangeTransport::new(PAYLOAD).always_status(416));
        let fetcher = CachedStreamFetcher::with_options(
            test_url(),
            FetchOptions {
                prefix: Some(Bytes::from_static(b"abc")),
                ..FetchOptions::default()
            },
            transport,
        );
        let err = fetcher.connect().await.unwrap_err();
        assert!(matches!(err, Error::RangeNotSatisfiable { .. }));
    }
}
