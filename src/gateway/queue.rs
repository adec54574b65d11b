//! In-memory ingest queue between line handling and batch flushes.

use std::collections::VecDeque;

use crate::error::{Result, TelemetryError};
use crate::store::models::{NewReading, SensorUpsert};

/// One parsed record, ready to write
#[derive(Debug, Clone, PartialEq)]
pub struct IngestItem {
    pub sensor: SensorUpsert,
    pub reading: NewReading,
}

/// FIFO of pending items with an upper bound
#[derive(Debug)]
pub struct IngestQueue {
    items: VecDeque<IngestItem>,
    max_pending: usize,
}

impl IngestQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_pending,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Queue` when the queue is full; the item is
    /// not queued.
    pub fn push(&mut self, item: IngestItem) -> Result<()> {
        if self.items.len() >= self.max_pending {
            return Err(TelemetryError::Queue(format!(
                "{} readings pending, dropping reading for sensor {}",
                self.items.len(),
                item.reading.sensor_id
            )));
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove up to `max_items` from the front
    pub fn take_batch(&mut self, max_items: usize) -> Vec<IngestItem> {
        let n = max_items.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Put a failed batch back at the front, preserving its order.
    ///
    /// Requeued items may push the queue past its bound; nothing already
    /// accepted is dropped.
    pub fn requeue_front(&mut self, batch: Vec<IngestItem>) {
        for item in batch.into_iter().rev() {
            self.items.push_front(item);
        }
    }
}
