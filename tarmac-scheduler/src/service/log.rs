//! Log service
//!
//! Append/complete/read on the offset-addressed log streams, plus the live
//! tail subscription. A tail joins the broker before snapshotting the
//! stream, then bridges the two with one synthetic catch-up event, so a
//! viewer sees every byte exactly once between polled and streamed state.

use std::sync::Arc;

use tarmac_core::domain::event::LogEvent;
use tarmac_core::domain::log::{LogRecord, LogStreamKey};
use tarmac_core::{Error, Result};

use crate::broker::{EventBroker, Subscription};
use crate::config::SchedulerConfig;
use crate::repository::LogStore;

#[derive(Clone)]
pub struct LogService {
    store: Arc<dyn LogStore>,
    events: EventBroker<LogEvent>,
    max_append_size: usize,
}

impl LogService {
    pub fn new(store: Arc<dyn LogStore>, config: &SchedulerConfig) -> Self {
        Self {
            store,
            events: EventBroker::new("logs", config.event_buffer),
            max_append_size: config.max_append_size,
        }
    }

    /// Append a chunk at `start_offset`, which must equal the current size.
    ///
    /// Returns the new stream size and publishes the chunk to tail
    /// subscribers of this stream.
    pub async fn append(
        &self,
        key: &LogStreamKey,
        start_offset: u64,
        data: Vec<u8>,
    ) -> Result<u64> {
        if data.is_empty() {
            return Err(Error::InvalidState("empty log append".to_string()));
        }
        if data.len() > self.max_append_size {
            return Err(Error::InvalidState(format!(
                "log append of {} bytes exceeds limit of {}",
                data.len(),
                self.max_append_size
            )));
        }

        let new_size = self.store.append(key, start_offset, &data).await?;

        tracing::debug!(
            "Appended {} bytes to {} at offset {}",
            data.len(),
            key,
            start_offset
        );
        self.events.publish(&LogEvent {
            stream: key.clone(),
            offset: start_offset,
            data,
            completed: false,
        });

        Ok(new_size)
    }

    /// Mark the stream completed; idempotent.
    ///
    /// The first call publishes a terminal event; later calls publish
    /// nothing and do not error.
    pub async fn complete(&self, key: &LogStreamKey) -> Result<()> {
        let (record, transitioned) = self.store.complete(key).await?;

        if transitioned {
            tracing::info!("Log stream {} completed at {} bytes", key, record.size);
            self.events.publish(&LogEvent {
                stream: key.clone(),
                offset: record.size,
                data: Vec::new(),
                completed: true,
            });
        }

        Ok(())
    }

    /// Read up to `limit` bytes at `offset`; out-of-range reads are empty
    pub async fn read(&self, key: &LogStreamKey, offset: u64, limit: u64) -> Result<Vec<u8>> {
        self.store.read(key, offset, limit).await
    }

    /// Current metadata of a stream
    pub async fn record(&self, key: &LogStreamKey) -> Result<Option<LogRecord>> {
        self.store.get(key).await
    }

    /// Follow a stream live from `last_seen_size` onward.
    ///
    /// Subscribes before snapshotting, so nothing published in between can
    /// fall in the gap: bytes below the snapshot arrive as one catch-up
    /// event, bytes above it as live events, and live events wholly covered
    /// by the catch-up are suppressed.
    pub async fn subscribe_tail(&self, key: &LogStreamKey, last_seen_size: u64) -> Result<LogTail> {
        let subscription = {
            let key = key.clone();
            self.events
                .subscribe_filtered(move |event: &LogEvent| event.stream == key)
        };

        let record = self.store.get(key).await?;
        let (size, completed) = record.map(|r| (r.size, r.completed)).unwrap_or((0, false));

        let catch_up = if last_seen_size < size {
            let data = self.store.read(key, last_seen_size, size - last_seen_size).await?;
            Some(LogEvent {
                stream: key.clone(),
                offset: last_seen_size,
                data,
                completed,
            })
        } else if completed {
            // Nothing to catch up on, but the subscriber still needs to
            // learn the stream is over.
            Some(LogEvent {
                stream: key.clone(),
                offset: size,
                data: Vec::new(),
                completed: true,
            })
        } else {
            None
        };

        Ok(LogTail {
            catch_up,
            live_from: size,
            subscription,
        })
    }
}

/// A live tail over one log stream
pub struct LogTail {
    catch_up: Option<LogEvent>,
    live_from: u64,
    subscription: Subscription<LogEvent>,
}

impl LogTail {
    /// Next event: the catch-up first, then live events in publish order.
    ///
    /// Returns `None` when the broker side is gone.
    pub async fn next(&mut self) -> Option<LogEvent> {
        if let Some(event) = self.catch_up.take() {
            return Some(event);
        }

        loop {
            let event = self.subscription.recv().await?;
            // Data already delivered by the catch-up event; terminal
            // markers always pass through.
            if !event.completed && event.offset < self.live_from {
                continue;
            }
            return Some(event);
        }
    }
}
