//! Bounded admission over a transport.
//!
//! `RequestPool` decorates an inner [`Transport`] with a fixed concurrency
//! cap. Admission is FIFO among waiting requests; a slot is held until the
//! inner transport settles with response headers, so body streaming does
//! not occupy the pool. Pools are plain values shared by `Arc`; construct
//! one and pass it where it is needed.

use crate::error::{Error, Result};
use crate::fetch::{FetchRequest, FetchResponse, HttpTransport, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::debug;

pub const DEFAULT_POOL_SIZE: usize = 4;

/// Cooperative cancellation for a queued request. Cloned freely; any clone
/// can cancel.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

pub struct RequestPool {
    inner: Arc<dyn Transport>,
    semaphore: Semaphore,
    capacity: usize,
    active: AtomicUsize,
}

impl RequestPool {
    /// Default-capacity pool over the production HTTP transport.
    pub fn new() -> Self {
        Self::with_transport(DEFAULT_POOL_SIZE, Arc::new(HttpTransport::new()))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_transport(capacity, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(capacity: usize, inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            // Fair semaphore: waiters are admitted in arrival order.
            semaphore: Semaphore::new(capacity),
            capacity,
            active: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests currently dispatched to the inner transport.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Awaits admission, then dispatches. A token cancelled before
    /// admission settles the request as `Error::Cancelled` without ever
    /// reaching the inner transport; its slot is freed immediately.
    pub async fn fetch_with_cancel(
        &self,
        request: FetchRequest,
        token: &CancelToken,
    ) -> Result<FetchResponse> {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            permit = self.semaphore.acquire() => permit,
        };
        let _permit = permit.map_err(|_| Error::Cancelled)?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(url = %request.url, active = self.active(), "request dispatched");
        let outcome = self.inner.fetch(request).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RequestPool {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.fetch_with_cancel(request, &CancelToken::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BodyStream;
    use futures::StreamExt;
    use url::Url;

    /// Transport whose requests block until the test grants a permit,
    /// recording the concurrency high-water mark.
    struct GatedTransport {
        gate: Semaphore,
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl GatedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }

        fn empty_body() -> BodyStream {
            futures::stream::empty().boxed()
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let permit = self.gate.acquire().await.map_err(|_| Error::Cancelled)?;
            permit.forget();

            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(FetchResponse {
                status: 200,
                content_length: Some(0),
                content_range: None,
                content_type: None,
                body: Self::empty_body(),
            })
        }
    }

    fn url() -> Url {
        Url::parse("http://localhost/x").unwrap()
    }

    fn request() -> FetchRequest {
        FetchRequest {
            url: url(),
            range_start: None,
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let transport = GatedTransport::new();
        let pool = Arc::new(RequestPool::with_transport(2, transport.clone()));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.fetch(request()).await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert_eq!(pool.active(), 2);

        transport.release(5);
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_settlement_admits_next_request() {
        let transport = GatedTransport::new();
        let pool = Arc::new(RequestPool::with_transport(1, transport.clone()));

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.fetch(request()).await }
        });
        let second = tokio::spawn({
            let pool = pool.clone();
            async move { pool.fetch(request()).await }
        });

        tokio::task::yield_now().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        transport.release(1);
        first.await.unwrap().unwrap();

        // The freed slot admits the queued request.
        transport.release(1);
        second.await.unwrap().unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_admission_never_dispatches() {
        let transport = GatedTransport::new();
        let pool = Arc::new(RequestPool::with_transport(1, transport.clone()));

        // Occupy the single slot.
        let blocker = tokio::spawn({
            let pool = pool.clone();
            async move { pool.fetch(request()).await }
        });
        tokio::task::yield_now().await;

        let token = CancelToken::new();
        let queued = tokio::spawn({
            let pool = pool.clone();
            let token = token.clone();
            async move { pool.fetch_with_cancel(request(), &token).await }
        });
        tokio::task::yield_now().await;

        token.cancel();
        let outcome = queued.await.unwrap();
        assert!(matches!(outcome, Err(ref err) if err.is_cancelled()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        transport.release(1);
        blocker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_immediate_admission_under_capacity() {
        let transport = GatedTransport::new();
        transport.release(1);
        let pool = RequestPool::with_transport(3, transport.clone());

        pool.fetch(request()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
