//! Fetcher caching one contiguous buffer.
//!
//! The logical stream is the cached prefix, emitted as a single chunk,
//! chained with the live body. Same external contract as
//! [`super::CachedStreamFetcher`].

use super::{
    negotiate, pull_live, BodyStream, CacheAction, FetchOptions, Fetcher, Session, StreamCursor,
    Transport,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex};
use url::Url;

pub struct ResumableFetcher {
    transport: Arc<dyn Transport>,
    url: Url,
    headers: Vec<(String, String)>,
    inner: Mutex<Inner>,
}

struct Inner {
    cache: BytesMut,
    total: Option<u64>,
    content_type: Option<String>,
    live: Option<BodyStream>,
    session: Option<Arc<Session>>,
    connected: bool,
}

impl ResumableFetcher {
    pub fn new(url: Url, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(url, FetchOptions::default(), transport)
    }

    pub fn with_options(
        url: Url,
        options: FetchOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut cache = BytesMut::new();
        if let Some(prefix) = options.prefix {
            cache.extend_from_slice(&prefix);
        }
        Self {
            transport,
            url,
            headers: options.headers,
            inner: Mutex::new(Inner {
                cache,
                total: options.content_length,
                content_type: None,
                live: None,
                session: None,
                connected: false,
            }),
        }
    }
}

#[async_trait]
impl Fetcher for ResumableFetcher {
    async fn connect(&self) -> Result<()> {
        let (cached, total) = {
            let inner = self.inner.lock().unwrap();
            if inner.connected {
                return Ok(());
            }
            if inner.total == Some(inner.cache.len() as u64) {
                return Ok(());
            }
            (inner.cache.len() as u64, inner.total)
        };

        let plan = negotiate(self.transport.as_ref(), &self.url, &self.headers, cached, total)
            .await?;

        let mut inner = self.inner.lock().unwrap();
        if inner.connected {
            return Ok(());
        }
        match plan.cache_action {
            CacheAction::Keep => {}
            CacheAction::Discard => inner.cache.clear(),
            CacheAction::TruncateTo(keep) => inner.cache.truncate(keep as usize),
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
                inner.total = Some(inner.cache.len() as u64);
            }
        }
        Ok(())
    }

    async fn next_chunk(&self, cursor: &mut StreamCursor) -> Result<Option<Bytes>> {
        loop {
            // The guard must not live across an await point.
            let checkout = {
                let mut inner = self.inner.lock().unwrap();
                let offset = cursor.0 as usize;
                if offset < inner.cache.len() {
                    // The whole known prefix in one chunk.
                    let chunk = Bytes::copy_from_slice(&inner.cache[offset..]);
                    cursor.0 = inner.cache.len() as u64;
                    return Ok(Some(chunk));
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
                    inner.cache.extend_from_slice(&bytes);
                    inner.live = Some(live);
                    cursor.0 = inner.cache.len() as u64;
                    Ok(Some(bytes))
                }
                Ok(None) => {
                    inner.connected = false;
                    inner.session = None;
                    if inner.total.is_none() {
                        inner.total = Some(inner.cache.len() as u64);
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
        self.inner.lock().unwrap().cache.len() as u64
    }

    fn cached_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock().unwrap().cache)
    }

    fn content_length(&self) -> Option<u64> {
        self.inner.lock().unwrap().total
    }
}
