//! Per-item read-through range cache (SPEC_FULL.md §4.7).
//!
//! One [`RangeCache`] lives for as long as a caller holds an item open for
//! reading. It deduplicates overlapping fetches, serves contained reads out
//! of a bounded ring of recently-fetched chunks, and opportunistically
//! schedules a read-ahead fetch so sequential streaming rarely blocks on the
//! network.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cloudhub_core::domain::{CoreError, Range};
use tokio::sync::{oneshot, Mutex};

use crate::byte_range::ByteRange;

pub const DEFAULT_CACHED_CHUNK_COUNT: usize = 4;
pub const DEFAULT_READ_AHEAD_BYTES: u64 = 2 * 1024 * 1024;

/// Fetches one concrete byte range of an item's content.
///
/// Implemented by a thin adapter over [`cloudhub_core::ports::CloudProvider::download_file`]
/// that buffers the streamed bytes into a single [`Bytes`] value.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch(&self, range: ByteRange) -> Result<Bytes, CoreError>;
}

struct CachedChunk {
    range: ByteRange,
    bytes: Bytes,
}

struct Waiter {
    range: ByteRange,
    sender: oneshot::Sender<Result<Bytes, CoreError>>,
}

struct State {
    chunks: VecDeque<CachedChunk>,
    pending: Vec<ByteRange>,
    waiters: Vec<Waiter>,
}

pub struct RangeCache {
    item_size: u64,
    cached_chunk_count: usize,
    read_ahead_bytes: u64,
    state: Mutex<State>,
}

impl RangeCache {
    pub fn new(item_size: u64) -> Arc<Self> {
        Self::with_limits(item_size, DEFAULT_CACHED_CHUNK_COUNT, DEFAULT_READ_AHEAD_BYTES)
    }

    pub fn with_limits(item_size: u64, cached_chunk_count: usize, read_ahead_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            item_size,
            cached_chunk_count: cached_chunk_count.max(1),
            read_ahead_bytes: read_ahead_bytes.max(1),
            state: Mutex::new(State {
                chunks: VecDeque::new(),
                pending: Vec::new(),
                waiters: Vec::new(),
            }),
        })
    }

    /// Reads `size` bytes starting at `offset`, clamped to the item's size.
    pub async fn read(
        self: &Arc<Self>,
        offset: u64,
        size: u64,
        source: Arc<dyn RangeSource>,
    ) -> Result<Bytes, CoreError> {
        // Step 1: clamp to item size.
        let clamped = match Range::bounded(offset, size).clamp(self.item_size) {
            Some((start, size)) => ByteRange::new(start, size),
            None => return Ok(Bytes::new()),
        };

        // Step 2: serve synchronously from a cached chunk.
        {
            let state = self.state.lock().await;
            if let Some(bytes) = Self::served_from_chunks(&state.chunks, &clamped) {
                return Ok(bytes);
            }
        }

        // Step 3: opportunistic read-ahead.
        let read_ahead_probe = ByteRange::new(
            clamped.start + self.read_ahead_bytes / 2,
            self.read_ahead_bytes / 2,
        );
        let read_ahead_range = ByteRange::new(
            clamped.start + self.read_ahead_bytes / 2,
            self.read_ahead_bytes.max(clamped.size),
        );
        {
            let mut state = self.state.lock().await;
            let covered = state
                .chunks
                .iter()
                .any(|c| c.range.contains(&read_ahead_probe))
                || state.pending.iter().any(|p| p.contains(&read_ahead_probe));
            if !covered && read_ahead_range.start < self.item_size {
                state.pending.push(read_ahead_range);
                let this = self.clone();
                let source = source.clone();
                tokio::spawn(async move {
                    this.run_fetch(read_ahead_range, source).await;
                });
            }
        }

        // Step 4/5: schedule the exact request if not already pending, then
        // register a waiter for it.
        let receiver = {
            let mut state = self.state.lock().await;
            let already_pending = state.pending.iter().any(|p| p.contains(&clamped));
            if !already_pending {
                state.pending.push(clamped);
                let this = self.clone();
                let source = source.clone();
                tokio::spawn(async move {
                    this.run_fetch(clamped, source).await;
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(Waiter {
                range: clamped,
                sender: tx,
            });
            rx
        };

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(CoreError::aborted()),
        }
    }

    fn served_from_chunks(chunks: &VecDeque<CachedChunk>, request: &ByteRange) -> Option<Bytes> {
        chunks.iter().find(|c| c.range.contains(request)).map(|c| {
            let start = (request.start - c.range.start) as usize;
            let end = start + request.size as usize;
            c.bytes.slice(start..end)
        })
    }

    async fn run_fetch(self: Arc<Self>, range: ByteRange, source: Arc<dyn RangeSource>) {
        let result = source.fetch(range).await;
        let mut state = self.state.lock().await;
        state.pending.retain(|p| *p != range);

        match result {
            Ok(bytes) => {
                let mut remaining = Vec::new();
                let waiters = std::mem::take(&mut state.waiters);
                for waiter in waiters {
                    if range.contains(&waiter.range) {
                        let start = (waiter.range.start - range.start) as usize;
                        let end = start + waiter.range.size as usize;
                        let _ = waiter.sender.send(Ok(bytes.slice(start..end)));
                    } else {
                        remaining.push(waiter);
                    }
                }
                state.waiters = remaining;

                state.chunks.push_back(CachedChunk { range, bytes });
                while state.chunks.len() > self.cached_chunk_count {
                    state.chunks.pop_front();
                }
            }
            Err(err) => {
                let mut remaining = Vec::new();
                let waiters = std::mem::take(&mut state.waiters);
                for waiter in waiters {
                    if range.contains(&waiter.range) {
                        let _ = waiter.sender.send(Err(err.clone()));
                    } else {
                        remaining.push(waiter);
                    }
                }
                state.waiters = remaining;
            }
        }
    }
}
