//! Chunk lifecycle state machine.
//!
//! Pure transition table, no I/O. The async orchestration lives in
//! [`super::Chunk`]; this type only answers "is this event legal here, and
//! where does it lead".

use crate::error::{Error, Result};
use std::fmt;

/// Lifecycle states of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    /// Nothing loaded yet.
    #[default]
    Init,
    /// Metadata load in flight.
    MetaLoading,
    /// Metadata available, data not yet requested.
    MetaOnly,
    /// Data load in flight.
    DataLoading,
    /// Metadata and data both available.
    Loaded,
    /// A load failed or was cancelled. Terminal.
    Errored,
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkState::Init => "init",
            ChunkState::MetaLoading => "meta-loading",
            ChunkState::MetaOnly => "meta-only",
            ChunkState::DataLoading => "data-loading",
            ChunkState::Loaded => "loaded",
            ChunkState::Errored => "errored",
        };
        f.write_str(name)
    }
}

impl ChunkState {
    /// A load is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, ChunkState::MetaLoading | ChunkState::DataLoading)
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Loaded | ChunkState::Errored)
    }
}

/// Events that drive the chunk lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEvent {
    LoadMeta,
    MetaLoaded,
    LoadData,
    DataLoaded,
    Cancel,
}

/// A transition that was accepted by [`ChunkStateMachine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ChunkState,
    pub to: ChunkState,
    pub event: TransitionEvent,
}

/// The transition table. Any (state, event) pair not listed here is an
/// [`Error::InvalidTransition`]; nothing is silently ignored.
#[derive(Debug, Default)]
pub struct ChunkStateMachine {
    state: ChunkState,
}

impl ChunkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    fn target(&self, event: TransitionEvent) -> Option<ChunkState> {
        use ChunkState::*;
        use TransitionEvent::*;
        match (self.state, event) {
            (Init, LoadMeta) => Some(MetaLoading),
            (MetaLoading, MetaLoaded) => Some(MetaOnly),
            (MetaOnly, LoadData) => Some(DataLoading),
            (DataLoading, DataLoaded) => Some(Loaded),
            // Cancellation is only meaningful mid-load and is terminal.
            (MetaLoading, Cancel) | (DataLoading, Cancel) => Some(Errored),
            _ => None,
        }
    }

    /// Whether `event` is legal in the current state.
    pub fn can(&self, event: TransitionEvent) -> bool {
        self.target(event).is_some()
    }

    /// Applies `event`, returning the accepted transition.
    pub fn send(&mut self, event: TransitionEvent) -> Result<Transition> {
        match self.target(event) {
            Some(to) => {
                let transition = Transition {
                    from: self.state,
                    to,
                    event,
                };
                self.state = to;
                Ok(transition)
            }
            None => Err(Error::InvalidTransition {
                state: self.state,
                event,
            }),
        }
    }
}
