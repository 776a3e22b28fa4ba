//! Progressive network ingestion and incremental parsing for volstream.
//!
//! Large multi-part datasets are downloaded just far enough to be useful:
//! each unit ("chunk") first loads only its metadata prefix, and the full
//! payload only on demand, resuming the same HTTP download where the
//! metadata scan stopped.
//!
//! # Architecture
//!
//! ```text
//! Metadata pass:
//! +--------------+     +----------------+     +---------------+
//! | RequestPool  | --> |    Fetcher     | --> |  DicomScanner |
//! | (admission)  |     | (range resume) |     | (find offset) |
//! +--------------+     +----------------+     +---------------+
//!                             |  cache persists across close()
//! Data pass:                  v
//!                      +----------------+
//!                      |    Fetcher     | --> full payload
//!                      | (bytes=<K>-)   |
//!                      +----------------+
//! ```
//!
//! [`chunk::Chunk`] orchestrates both passes through its lifecycle state
//! machine. [`codec`] is an independent frame-chunking layer for
//! size-capped message transports.

pub mod buffer;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod events;
pub mod fetch;
pub mod loaders;
pub mod pool;
pub mod reader;
pub mod scanner;

pub use buffer::ByteDeque;
pub use chunk::{Chunk, ChunkState, ChunkStateMachine, DataLoader, MetaLoader, TransitionEvent};
pub use codec::{ChunkedDecoder, ChunkedEncoder, Frame, Packet, CHUNK_SIZE};
pub use error::{Error, Result};
pub use events::{ListenerHandle, Listeners};
pub use fetch::{
    CachedStreamFetcher, FetchOptions, Fetcher, HttpTransport, ResumableFetcher, Transport,
};
pub use loaders::{DicomDataLoader, DicomMetaLoader};
pub use pool::{CancelToken, RequestPool, DEFAULT_POOL_SIZE};
pub use reader::{Endian, Step, StreamReader};
pub use scanner::{DicomScanner, ScanOptions, ScanResult, ScanStatus, Tag, TagDirectory};
