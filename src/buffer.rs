// ============================================================================
// SAMPLE BUFFER
// ============================================================================
// Bounded history of the most recent samples, shared between the sampling
// loop (writer) and any number of alerting / analysis callers (readers).
// - Evicts the oldest sample on overflow
// - Each sample is published whole behind an `Arc`; readers never observe
//   a partially written sample
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::MetricSample;

/// A bounded, concurrency-safe ring of samples in arrival order.
#[derive(Debug)]
pub struct SampleBuffer {
    inner: RwLock<BufferInner>,
    capacity: usize,
}

#[derive(Debug)]
struct BufferInner {
    samples: VecDeque<Arc<MetricSample>>,
    total_pushed: u64,
    evicted: u64,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(BufferInner {
                samples: VecDeque::with_capacity(capacity),
                total_pushed: 0,
                evicted: 0,
            }),
            capacity,
        }
    }

    /// Append a batch of samples, evicting the oldest ones on overflow.
    /// Returns the number of samples evicted by this call.
    pub fn push<I>(&self, samples: I) -> usize
    where
        I: IntoIterator<Item = MetricSample>,
    {
        let mut inner = self.inner.write();
        let mut evicted = 0;

        for sample in samples {
            if inner.samples.len() == self.capacity {
                inner.samples.pop_front();
                evicted += 1;
            }
            inner.samples.push_back(Arc::new(sample));
            inner.total_pushed += 1;
        }

        inner.evicted += evicted as u64;
        evicted
    }

    /// Up to `limit` of the most recent samples, optionally filtered by metric
    /// name, oldest first.
    pub fn recent(&self, name: Option<&str>, limit: usize) -> Vec<MetricSample> {
        if limit == 0 {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut out: Vec<MetricSample> = inner
            .samples
            .iter()
            .rev()
            .filter(|s| name.map_or(true, |n| s.name() == n))
            .take(limit)
            .map(|s| MetricSample::clone(s))
            .collect();
        drop(inner);

        out.reverse();
        out
    }

    /// The newest sample for `name`, if any.
    pub fn latest(&self, name: &str) -> Option<MetricSample> {
        self.inner
            .read()
            .samples
            .iter()
            .rev()
            .find(|s| s.name() == name)
            .map(|s| MetricSample::clone(s))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.read().samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.read().samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.inner.write().samples.clear();
    }

    pub fn stats(&self) -> SampleBufferStats {
        let inner = self.inner.read();
        SampleBufferStats {
            capacity: self.capacity,
            len: inner.samples.len(),
            total_pushed: inner.total_pushed,
            evicted: inner.evicted,
            utilization: inner.samples.len() as f64 / self.capacity as f64,
        }
    }
}

/// Point-in-time statistics for a sample buffer.
#[derive(Debug, Clone, Serialize)]
pub struct SampleBufferStats {
    pub capacity: usize,
    pub len: usize,
    pub total_pushed: u64,
    pub evicted: u64,
    pub utilization: f64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use proptest::prelude::*;

    fn sample(name: &str, seq: i64) -> MetricSample {
        MetricSample::new(name, seq as f64, "count").at(Timestamp::from_secs(seq))
    }

    fn values(samples: &[MetricSample]) -> Vec<f64> {
        samples.iter().map(|s| s.value()).collect()
    }

    #[test]
    fn test_recent_is_chronological_and_limited() {
        let buffer = SampleBuffer::new(10);
        buffer.push((0..6).map(|i| sample("cpu_usage", i)));

        assert_eq!(values(&buffer.recent(None, 3)), vec![3.0, 4.0, 5.0]);
        assert_eq!(values(&buffer.recent(None, 100)).len(), 6);
        assert!(buffer.recent(None, 0).is_empty());
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let buffer = SampleBuffer::new(4);
        let evicted = buffer.push((0..10).map(|i| sample("cpu_usage", i)));

        assert_eq!(evicted, 6);
        assert_eq!(buffer.len(), 4);
        assert_eq!(values(&buffer.recent(None, 10)), vec![6.0, 7.0, 8.0, 9.0]);

        let stats = buffer.stats();
        assert_eq!(stats.total_pushed, 10);
        assert_eq!(stats.evicted, 6);
        assert!((stats.utilization - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recent_filters_by_name() {
        let buffer = SampleBuffer::new(10);
        buffer.push(vec![
            sample("cpu_usage", 1),
            sample("memory_usage", 2),
            sample("cpu_usage", 3),
            sample("memory_usage", 4),
            sample("cpu_usage", 5),
        ]);

        assert_eq!(values(&buffer.recent(Some("cpu_usage"), 2)), vec![3.0, 5.0]);
        assert_eq!(values(&buffer.recent(Some("memory_usage"), 10)), vec![2.0, 4.0]);
        assert!(buffer.recent(Some("disk_usage"), 10).is_empty());
        assert_eq!(buffer.latest("memory_usage").map(|s| s.value()), Some(4.0));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = SampleBuffer::new(0);
        buffer.push(vec![sample("a", 1), sample("a", 2)]);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(values(&buffer.recent(None, 5)), vec![2.0]);
    }

    #[test]
    fn test_concurrent_push_and_read() {
        let buffer = Arc::new(SampleBuffer::new(256));
        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for batch in 0..200 {
                    buffer.push((0..8).map(|i| sample("cpu_usage", batch * 8 + i)));
                }
            })
        };

        for _ in 0..200 {
            let window = buffer.recent(None, 64);
            assert!(window.len() <= 64);
            // Sequence numbers are pushed in order, so any window is strictly increasing.
            assert!(window.windows(2).all(|w| w[0].value() < w[1].value()));
        }

        writer.join().unwrap();
        assert_eq!(buffer.len(), 256);
    }

    proptest! {
        #[test]
        fn prop_recent_returns_k_most_recent(
            capacity in 1usize..64,
            batches in proptest::collection::vec(0usize..20, 0..20),
            k in 0usize..80,
        ) {
            let buffer = SampleBuffer::new(capacity);
            let mut pushed = Vec::new();
            let mut seq = 0i64;
            for size in batches {
                let batch: Vec<_> = (0..size).map(|_| { seq += 1; sample("m", seq) }).collect();
                pushed.extend(batch.iter().map(|s| s.value()));
                buffer.push(batch);
                prop_assert!(buffer.len() <= capacity);
            }

            let expected_len = k.min(capacity).min(pushed.len());
            let expected = pushed[pushed.len() - expected_len..].to_vec();
            prop_assert_eq!(values(&buffer.recent(None, k)), expected);
        }
    }
}
