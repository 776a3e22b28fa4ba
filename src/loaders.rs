//! Chunk loaders over DICOM content.
//!
//! [`DicomMetaLoader`] streams from a fetcher into a [`DicomScanner`] and
//! stops the download at the pixel-data boundary, keeping only the metadata
//! prefix. [`DicomDataLoader`] resumes the same target and drains it to the
//! full payload. Both route `stop` to [`Fetcher::close`], which leaves the
//! fetcher resumable.

use crate::chunk::{DataLoader, MetaLoader};
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, StreamCursor};
use crate::scanner::{ascii_trimmed, DicomScanner, ScanStatus, Tag, MODALITY, PIXEL_DATA};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct MetaState {
    tags: Vec<(String, String)>,
    bytes: Option<Bytes>,
}

/// Loads the metadata prefix of a DICOM object.
pub struct DicomMetaLoader {
    fetcher: Arc<dyn Fetcher>,
    stop_tag: Tag,
    harvest: Vec<(String, Tag)>,
    state: Mutex<MetaState>,
}

impl DicomMetaLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            stop_tag: PIXEL_DATA,
            harvest: vec![("Modality".into(), MODALITY)],
            state: Mutex::new(MetaState::default()),
        }
    }

    /// Names the tags whose values become metadata pairs.
    pub fn with_harvest(mut self, harvest: Vec<(String, Tag)>) -> Self {
        self.harvest = harvest;
        self
    }

    pub fn with_stop_tag(mut self, stop_tag: Tag) -> Self {
        self.stop_tag = stop_tag;
        self
    }
}

#[async_trait]
impl MetaLoader for DicomMetaLoader {
    async fn load(&self) -> Result<()> {
        if self.state.lock().unwrap().bytes.is_some() {
            return Ok(());
        }

        self.fetcher.connect().await?;

        let collected: Arc<Mutex<Vec<(Tag, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_collected = collected.clone();
        let stop_tag = self.stop_tag;
        let mut scanner = DicomScanner::new(move |tag| tag == stop_tag).on_element(
            move |element| {
                if let Some(value) = &element.value {
                    sink_collected
                        .lock()
                        .unwrap()
                        .push((element.tag, value.clone()));
                }
            },
        );

        let mut cursor = StreamCursor::default();
        let position = loop {
            let chunk = match self.fetcher.next_chunk(&mut cursor).await? {
                Some(chunk) => chunk,
                None => {
                    return Err(Error::format(
                        "content ended before the metadata boundary",
                    ))
                }
            };
            if let ScanStatus::Done(result) = scanner.feed(chunk)? {
                break result.position;
            }
        };

        // Stop the download at the boundary; the cache keeps the prefix for
        // the data load to resume from.
        self.fetcher.close();

        let mut bytes = self.fetcher.cached_bytes();
        bytes.truncate(position as usize);
        debug!(meta_len = bytes.len(), "metadata prefix captured");

        let elements = collected.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        state.tags = self
            .harvest
            .iter()
            .filter_map(|(name, tag)| {
                elements
                    .iter()
                    .find(|(seen, _)| seen == tag)
                    .map(|(_, value)| (name.clone(), ascii_trimmed(value)))
            })
            .collect();
        state.bytes = Some(bytes);
        Ok(())
    }

    fn stop(&self) {
        self.fetcher.close();
    }

    fn meta(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tags.clone()
    }

    fn meta_bytes(&self) -> Option<Bytes> {
        self.state.lock().unwrap().bytes.clone()
    }
}

/// Loads the full DICOM object payload.
pub struct DicomDataLoader {
    fetcher: Arc<dyn Fetcher>,
    data: Mutex<Option<Bytes>>,
}

impl DicomDataLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            data: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DataLoader for DicomDataLoader {
    async fn load(&self) -> Result<()> {
        if self.data.lock().unwrap().is_some() {
            return Ok(());
        }
        let blob = self.fetcher.blob().await?;
        *self.data.lock().unwrap() = Some(blob);
        Ok(())
    }

    fn stop(&self) {
        self.fetcher.close();
    }

    fn data(&self) -> Option<Bytes> {
        self.data.lock().unwrap().clone()
    }
}
