//! Chunk: one independently loadable unit of a larger dataset.
//!
//! A chunk pairs a metadata loader with a data loader and tracks its
//! lifecycle through [`ChunkStateMachine`]. Loads are idempotent and
//! coalesced: concurrent `load_meta` calls run the loader once and settle
//! every caller with the same outcome. Cancellation and loader failure
//! both land in the terminal `Errored` state; a failed chunk is replaced,
//! not retried.

pub mod state;

pub use state::{ChunkState, ChunkStateMachine, Transition, TransitionEvent};

use crate::error::{Error, Result};
use crate::events::{ListenerHandle, Listeners};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

/// Loads chunk metadata. `stop` must interrupt an in-flight `load`;
/// accessors use interior mutability so results are visible through `&self`.
#[async_trait]
pub trait MetaLoader: Send + Sync {
    async fn load(&self) -> Result<()>;
    fn stop(&self);
    /// Name/value pairs extracted by the load, empty until loaded.
    fn meta(&self) -> Vec<(String, String)>;
    /// Raw bytes the metadata was parsed from, if retained.
    fn meta_bytes(&self) -> Option<Bytes>;
}

/// Loads the chunk payload.
#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(&self) -> Result<()>;
    fn stop(&self);
    fn data(&self) -> Option<Bytes>;
}

struct Inner {
    machine: ChunkStateMachine,
    /// First failure or cancellation; settles late callers.
    error: Option<Error>,
}

/// One unit of progressively loadable content.
pub struct Chunk {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ChunkState>,
    meta_loader: Arc<dyn MetaLoader>,
    data_loader: Arc<dyn DataLoader>,
    done_meta: Listeners<()>,
    done_data: Listeners<()>,
    errored: Listeners<Error>,
}

impl Chunk {
    pub fn new(meta_loader: Arc<dyn MetaLoader>, data_loader: Arc<dyn DataLoader>) -> Self {
        let (state_tx, _) = watch::channel(ChunkState::Init);
        Self {
            inner: Mutex::new(Inner {
                machine: ChunkStateMachine::new(),
                error: None,
            }),
            state_tx,
            meta_loader,
            data_loader,
            done_meta: Listeners::new(),
            done_data: Listeners::new(),
            errored: Listeners::new(),
        }
    }

    pub fn state(&self) -> ChunkState {
        self.inner.lock().unwrap().machine.state()
    }

    /// The error that moved this chunk to `Errored`, if any.
    pub fn error(&self) -> Option<Error> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn meta(&self) -> Vec<(String, String)> {
        self.meta_loader.meta()
    }

    pub fn meta_bytes(&self) -> Option<Bytes> {
        self.meta_loader.meta_bytes()
    }

    pub fn data(&self) -> Option<Bytes> {
        self.data_loader.data()
    }

    pub fn on_done_meta(
        &self,
        listener: impl Fn(&()) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.done_meta.on(listener)
    }

    pub fn on_done_data(
        &self,
        listener: impl Fn(&()) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.done_data.on(listener)
    }

    pub fn on_error(
        &self,
        listener: impl Fn(&Error) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.errored.on(listener)
    }

    pub fn off_done_meta(&self, handle: ListenerHandle) {
        self.done_meta.off(handle);
    }

    pub fn off_done_data(&self, handle: ListenerHandle) {
        self.done_data.off(handle);
    }

    pub fn off_error(&self, handle: ListenerHandle) {
        self.errored.off(handle);
    }

    /// Loads metadata. The first caller drives the loader; callers that
    /// arrive while the load is in flight await the same outcome. A no-op
    /// once metadata is available.
    pub async fn load_meta(&self) -> Result<()> {
        match self.begin(TransitionEvent::LoadMeta, ChunkState::MetaLoading)? {
            Entry::Run => {
                let outcome = self.meta_loader.load().await;
                self.finish(
                    ChunkState::MetaLoading,
                    TransitionEvent::MetaLoaded,
                    outcome,
                )
            }
            Entry::Wait => self.await_settled(ChunkState::MetaLoading).await,
            Entry::Done => Ok(()),
        }
    }

    /// Loads the payload. Before metadata is loaded this is a no-op; the
    /// caller is expected to retry once `load_meta` settles.
    pub async fn load_data(&self) -> Result<()> {
        match self.begin(TransitionEvent::LoadData, ChunkState::DataLoading)? {
            Entry::Run => {
                let outcome = self.data_loader.load().await;
                self.finish(
                    ChunkState::DataLoading,
                    TransitionEvent::DataLoaded,
                    outcome,
                )
            }
            Entry::Wait => self.await_settled(ChunkState::DataLoading).await,
            Entry::Done => Ok(()),
        }
    }

    /// Cancels an in-flight load. The chunk lands in the terminal
    /// `Errored` state; outside a load this is a no-op.
    pub fn stop_load(&self) {
        let cancelled = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.machine.state().is_loading() {
                return;
            }
            inner
                .machine
                .send(TransitionEvent::Cancel)
                .map(|transition| {
                    inner.error.get_or_insert(Error::Cancelled);
                    let _ = self.state_tx.send(ChunkState::Errored);
                    transition
                })
                .ok()
        };
        if let Some(transition) = cancelled {
            debug!(from = %transition.from, "chunk load cancelled");
            // Only the loader that was in flight gets interrupted.
            match transition.from {
                ChunkState::MetaLoading => self.meta_loader.stop(),
                _ => self.data_loader.stop(),
            }
            self.errored.emit(&Error::Cancelled);
        }
    }

    /// Decides whether this caller drives the load, waits for an in-flight
    /// one, or returns immediately. State publications happen under the
    /// lock so they cannot land out of order.
    fn begin(&self, event: TransitionEvent, loading: ChunkState) -> Result<Entry> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.machine.state();
        if state == loading {
            return Ok(Entry::Wait);
        }
        if state == ChunkState::Errored {
            return Err(inner.error.clone().unwrap_or(Error::Cancelled));
        }
        if !inner.machine.can(event) {
            // Past the requested stage, or its prerequisite stage has not
            // been reached; either way there is nothing to drive.
            return Ok(Entry::Done);
        }
        let transition = inner.machine.send(event)?;
        let _ = self.state_tx.send(transition.to);
        Ok(Entry::Run)
    }

    /// Settles a finished load. `stop` fires on every departure from a
    /// loading state, success included, so loaders always release their
    /// connections.
    fn finish(
        &self,
        loading: ChunkState,
        done_event: TransitionEvent,
        outcome: Result<()>,
    ) -> Result<()> {
        let loader_stop = |this: &Self| {
            if loading == ChunkState::MetaLoading {
                this.meta_loader.stop();
            } else {
                this.data_loader.stop();
            }
        };

        match outcome {
            Ok(()) => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.machine.state() != loading {
                        // Raced with stop_load; the cancellation won.
                        return Err(inner.error.clone().unwrap_or(Error::Cancelled));
                    }
                    let transition = inner.machine.send(done_event)?;
                    let _ = self.state_tx.send(transition.to);
                }
                loader_stop(self);
                if done_event == TransitionEvent::MetaLoaded {
                    self.done_meta.emit(&());
                } else {
                    self.done_data.emit(&());
                }
                Ok(())
            }
            Err(err) => {
                let first = {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.machine.state() == loading {
                        let _ = inner.machine.send(TransitionEvent::Cancel);
                        inner.error.get_or_insert(err.clone());
                        let _ = self.state_tx.send(ChunkState::Errored);
                        true
                    } else {
                        false
                    }
                };
                if first {
                    loader_stop(self);
                    self.errored.emit(&err);
                }
                Err(err)
            }
        }
    }

    /// Waits for an in-flight load owned by another caller to settle.
    async fn await_settled(&self, loading: ChunkState) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        loop {
            // Mark the channel seen first, then read the authoritative
            // state under the lock; a publication in between wakes
            // `changed` below.
            rx.borrow_and_update();
            let current = self.state();
            if current != loading && current != ChunkState::Init {
                return match current {
                    ChunkState::Errored => {
                        Err(self.error().unwrap_or(Error::Cancelled))
                    }
                    _ => Ok(()),
                };
            }
            if rx.changed().await.is_err() {
                return Err(Error::Cancelled);
            }
        }
    }
}

enum Entry {
    /// This caller owns the load.
    Run,
    /// Another caller owns it; await the shared outcome.
    Wait,
    /// Already satisfied.
    Done,
}
