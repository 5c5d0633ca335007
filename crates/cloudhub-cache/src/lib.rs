//! Read-through range cache for streamed media downloads (SPEC_FULL.md §4.7).

mod byte_range;
mod cache;

pub use byte_range::ByteRange;
pub use cache::{RangeCache, RangeSource, DEFAULT_CACHED_CHUNK_COUNT, DEFAULT_READ_AHEAD_BYTES};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use cloudhub_core::domain::CoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
        fail_once: std::sync::atomic::AtomicBool,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_once: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_once: std::sync::atomic::AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl RangeSource for CountingSource {
        async fn fetch(&self, range: ByteRange) -> Result<Bytes, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(CoreError::transport("synthetic failure"));
            }
            Ok(Bytes::from(vec![0xAB; range.size as usize]))
        }
    }

    #[tokio::test]
    async fn reads_within_item_size_return_requested_length() {
        let cache = RangeCache::with_limits(1000, 4, 256);
        let source = CountingSource::new();
        let bytes = cache.read(0, 64, source).await.unwrap();
        assert_eq!(bytes.len(), 64);
    }

    #[tokio::test]
    async fn read_past_eof_clamps_to_empty() {
        let cache = RangeCache::with_limits(100, 4, 256);
        let source = CountingSource::new();
        let bytes = cache.read(200, 10, source).await.unwrap();
        assert_eq!(bytes.len(), 0);
    }

    #[tokio::test]
    async fn repeated_read_of_same_range_is_served_from_cache() {
        let cache = RangeCache::with_limits(10_000, 4, 256);
        let source = CountingSource::new();

        let first = cache.read(0, 64, source.clone()).await.unwrap();
        assert_eq!(first.len(), 64);

        let calls_after_first = source.calls.load(Ordering::SeqCst);
        assert!(calls_after_first >= 1);

        // Give the read-ahead task a moment to land in `chunks`.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = cache.read(0, 64, source.clone()).await.unwrap();
        assert_eq!(second.len(), 64);
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn fetch_failure_propagates_to_waiter() {
        let cache = RangeCache::with_limits(10_000, 4, 0);
        let source = CountingSource::failing();
        let result = cache.read(0, 64, source).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn eviction_bounds_cached_chunk_count() {
        let cache = RangeCache::with_limits(1_000_000, 2, 0);
        let source = CountingSource::new();

        for i in 0..5u64 {
            let offset = i * 100_000;
            cache.read(offset, 10, source.clone()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let calls = source.calls.load(Ordering::SeqCst);
        assert!(calls >= 5);
    }
}
