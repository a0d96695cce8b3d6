//! Recognition feedback log
//!
//! Keeps the most recent drawings together with the expected answer and the
//! produced result for offline analysis. Recording is fire-and-forget: entries
//! go over a bounded channel to a writer thread. A full queue drops the entry,
//! and failures in the writer are only logged.

use anyhow::Result;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::vision::RecognitionResult;

/// Default number of entries kept
pub const DEFAULT_CAPACITY: usize = 100;

/// One recorded recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Entry identifier (UUID v4)
    pub id: String,
    /// The submitted drawing as PNG
    pub image_png: Vec<u8>,
    /// What the child was asked to draw
    pub expected_answer: String,
    /// What the pipeline produced
    pub result: RecognitionResult,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl FeedbackEntry {
    pub fn new(image_png: Vec<u8>, expected_answer: impl Into<String>, result: RecognitionResult) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            image_png,
            expected_answer: expected_answer.into(),
            result,
            timestamp_ms,
        }
    }
}

/// Bounded feedback storage with overwrite-oldest eviction
pub trait FeedbackStore: Send {
    /// Append an entry, evicting the oldest ones beyond capacity
    fn append(&mut self, entry: FeedbackEntry) -> Result<()>;

    /// All kept entries, oldest first
    fn entries(&self) -> Result<Vec<FeedbackEntry>>;

    /// Maximum number of entries kept
    fn capacity(&self) -> usize;

    fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }
}

/// In-process ring buffer
#[derive(Debug)]
pub struct MemoryFeedbackStore {
    entries: VecDeque<FeedbackEntry>,
    capacity: usize,
}

impl MemoryFeedbackStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }
}

impl Default for MemoryFeedbackStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FeedbackStore for MemoryFeedbackStore {
    fn append(&mut self, entry: FeedbackEntry) -> Result<()> {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<FeedbackEntry>> {
        Ok(self.entries.iter().cloned().collect())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

/// Background writer feeding a [`FeedbackStore`]
pub struct FeedbackRecorder {
    sender: Option<Sender<FeedbackEntry>>,
    handle: Option<JoinHandle<()>>,
}

impl FeedbackRecorder {
    /// Start the writer thread for `store`.
    ///
    /// At most `store.capacity()` entries wait in the queue.
    pub fn spawn<S: FeedbackStore + 'static>(store: Arc<Mutex<S>>) -> Result<Self> {
        let queue_len = store.lock().capacity().max(1);
        let (sender, receiver) = bounded::<FeedbackEntry>(queue_len);

        let handle = std::thread::Builder::new()
            .name("feedback-writer".to_string())
            .spawn(move || {
                debug!("Feedback writer started");
                for entry in receiver {
                    let id = entry.id.clone();
                    if let Err(e) = store.lock().append(entry) {
                        warn!("Failed to store feedback entry {}: {:#}", id, e);
                    }
                }
                debug!("Feedback writer exiting");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue an entry; never blocks and never fails the caller
    pub fn record(&self, entry: FeedbackEntry) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!("Feedback queue is full, dropping entry {}", entry.id)
            }
            Err(TrySendError::Disconnected(entry)) => {
                warn!("Feedback writer is gone, dropping entry {}", entry.id)
            }
        }
    }

    /// Flush queued entries and stop the writer
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel ends the writer loop
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Feedback writer panicked");
            }
        }
    }
}

impl Drop for FeedbackRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(answer: &str) -> FeedbackEntry {
        FeedbackEntry::new(vec![1, 2, 3], answer, RecognitionResult::empty())
    }

    #[test]
    fn test_memory_store_evicts_oldest() {
        let mut store = MemoryFeedbackStore::new(3);
        for answer in ["a", "b", "c", "d", "e"] {
            store.append(entry(answer)).unwrap();
        }
        let kept: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.expected_answer)
            .collect();
        assert_eq!(kept, vec!["c", "d", "e"]);
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_default_capacity_is_bounded() {
        let mut store = MemoryFeedbackStore::default();
        for i in 0..150 {
            store.append(entry(&i.to_string())).unwrap();
        }
        assert_eq!(store.capacity(), 100);
        assert_eq!(store.len().unwrap(), 100);
        assert_eq!(store.entries().unwrap()[0].expected_answer, "50");
    }

    #[test]
    fn test_entry_ids_are_unique() {
        assert_ne!(entry("a").id, entry("a").id);
    }

    #[test]
    fn test_recorder_writes_in_background() {
        let store = Arc::new(Mutex::new(MemoryFeedbackStore::new(10)));
        let recorder = FeedbackRecorder::spawn(store.clone()).unwrap();
        recorder.record(entry("あ"));
        recorder.record(entry("い"));
        recorder.shutdown();

        let kept = store.lock().entries().unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].expected_answer, "い");
    }

    struct FailingStore;

    impl FeedbackStore for FailingStore {
        fn append(&mut self, _entry: FeedbackEntry) -> Result<()> {
            anyhow::bail!("disk full")
        }

        fn entries(&self) -> Result<Vec<FeedbackEntry>> {
            Ok(vec![])
        }

        fn capacity(&self) -> usize {
            1
        }
    }

    /// Store whose writes wait until the gate closes
    struct GatedStore {
        gate: crossbeam_channel::Receiver<()>,
        inner: MemoryFeedbackStore,
        capacity: usize,
    }

    impl FeedbackStore for GatedStore {
        fn append(&mut self, entry: FeedbackEntry) -> Result<()> {
            let _ = self.gate.recv();
            self.inner.append(entry)
        }

        fn entries(&self) -> Result<Vec<FeedbackEntry>> {
            self.inner.entries()
        }

        fn capacity(&self) -> usize {
            self.capacity
        }
    }

    #[test]
    fn test_stalled_writer_drops_excess_entries() {
        let (open, gate) = crossbeam_channel::bounded::<()>(0);
        let store = Arc::new(Mutex::new(GatedStore {
            gate,
            inner: MemoryFeedbackStore::default(),
            capacity: 2,
        }));
        let recorder = FeedbackRecorder::spawn(store.clone()).unwrap();

        // The writer stalls on its first entry; none of these may block
        for i in 0..20 {
            recorder.record(entry(&i.to_string()));
        }

        drop(open);
        recorder.shutdown();

        // Two queued entries plus at most one taken by the writer
        let stored = store.lock().inner.len().unwrap();
        assert!((2..=3).contains(&stored), "stored {}", stored);
    }

    #[test]
    fn test_store_errors_are_swallowed() {
        let recorder = FeedbackRecorder::spawn(Arc::new(Mutex::new(FailingStore))).unwrap();
        recorder.record(entry("あ"));
        drop(recorder);
    }
}
