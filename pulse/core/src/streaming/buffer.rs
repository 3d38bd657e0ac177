//! Bounded Streaming Buffer
//!
//! Fixed-capacity, insertion-ordered sliding window over [`Sample`]s.
//! Overflow is an expected condition: the oldest samples are evicted and
//! counted, writers are never blocked and never see an error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::sample::Sample;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`StreamBuffer`]
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Maximum number of samples held
    pub capacity: usize,
    /// Estimated footprint above which the memory-pressure hook fires
    pub memory_threshold_bytes: usize,
    /// Minimum time between two effective [`StreamBuffer::optimize`] passes
    pub optimize_interval: Duration,
    /// Samples closer than this in time to their predecessor may be merged
    pub dedup_window: Duration,
    /// Samples closer than this in value to their predecessor may be merged
    pub dedup_epsilon: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            memory_threshold_bytes: 64 * 1024 * 1024,
            optimize_interval: Duration::from_secs(5),
            dedup_window: Duration::from_secs(1),
            dedup_epsilon: 1e-3,
        }
    }
}

impl BufferConfig {
    /// Config with the given capacity and default everything else
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Point-in-time buffer statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BufferMetrics {
    /// Samples currently held
    pub size: usize,
    /// Fixed capacity
    pub capacity: usize,
    /// `size / capacity * 100`
    pub utilization_percent: f64,
    /// Samples offered since creation or the last clear
    pub total_received: u64,
    /// Overflow evictions, optimize removals and rejected invalid samples
    pub total_dropped: u64,
    /// Derived footprint estimate (not authoritative)
    pub memory_estimate_bytes: usize,
    /// `total_received / elapsed seconds`
    pub throughput_per_sec: f64,
    /// When the window last changed through `add_batch`
    pub last_update: Option<DateTime<Utc>>,
    /// Lifetime count of memory-pressure (GC) triggers; survives `clear`
    pub gc_triggers: u64,
}

/// Payload handed to the memory-pressure hook
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryPressure {
    /// Current footprint estimate
    pub estimate_bytes: usize,
    /// Configured threshold that was exceeded
    pub threshold_bytes: usize,
    /// Samples held when the threshold was crossed
    pub size: usize,
}

type PressureHook = Arc<dyn Fn(&MemoryPressure) + Send + Sync>;

// ============================================================================
// Stream Buffer
// ============================================================================

struct Window {
    samples: VecDeque<Sample>,
    total_received: u64,
    total_dropped: u64,
    memory_bytes: usize,
    started_at: Instant,
    last_update: Option<DateTime<Utc>>,
    last_optimize: Option<Instant>,
    /// Pressure already signalled for the current excursion over the threshold
    pressure_signalled: bool,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            // Don't reserve the full capacity up front; 100k samples is a lot of idle memory
            samples: VecDeque::with_capacity(capacity.min(1024)),
            total_received: 0,
            total_dropped: 0,
            memory_bytes: 0,
            started_at: Instant::now(),
            last_update: None,
            last_optimize: None,
            pressure_signalled: false,
        }
    }

    fn push(&mut self, sample: Sample) {
        self.memory_bytes += sample.estimated_size();
        self.samples.push_back(sample);
    }

    fn evict_oldest(&mut self, count: usize) {
        for _ in 0..count {
            match self.samples.pop_front() {
                Some(s) => self.memory_bytes = self.memory_bytes.saturating_sub(s.estimated_size()),
                None => break,
            }
        }
    }
}

/// Fixed-capacity FIFO sliding window of samples
///
/// All mutations take a single exclusive lock around the window and its
/// counters; readers get snapshot copies.
pub struct StreamBuffer {
    config: BufferConfig,
    window: Mutex<Window>,
    gc_triggers: AtomicU64,
    pressure_hook: RwLock<Option<PressureHook>>,
}

impl StreamBuffer {
    /// Create a buffer
    ///
    /// A zero capacity is bumped to 1 so the window invariant stays meaningful.
    #[must_use]
    pub fn new(mut config: BufferConfig) -> Self {
        config.capacity = config.capacity.max(1);
        Self {
            window: Mutex::new(Window::new(config.capacity)),
            config,
            gc_triggers: AtomicU64::new(0),
            pressure_hook: RwLock::new(None),
        }
    }

    /// Create a buffer with default settings and the given capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(BufferConfig::with_capacity(capacity))
    }

    /// Fixed capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Samples currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.lock().samples.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.lock().samples.is_empty()
    }

    /// Install the memory-pressure hook
    ///
    /// The hook fires once when the estimate first exceeds
    /// `memory_threshold_bytes`. It is re-armed only after the estimate has
    /// fallen to the low-water mark (90% of the threshold).
    ///
    /// Called outside the buffer lock, so the hook may call back into the
    /// buffer (typically [`StreamBuffer::optimize`]).
    pub fn set_pressure_hook<F>(&self, hook: F)
    where
        F: Fn(&MemoryPressure) + Send + Sync + 'static,
    {
        *self.pressure_hook.write() = Some(Arc::new(hook));
    }

    /// Append a batch, evicting the oldest samples on overflow
    ///
    /// A batch at least as large as the capacity replaces the window with
    /// its last `capacity` samples. Empty batches are a no-op.
    pub fn add_batch(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }

        let capacity = self.config.capacity;
        let incoming = samples.len();

        let pressure = {
            let mut window = self.window.lock();
            let current = window.samples.len();
            window.total_received += incoming as u64;

            let dropped = (current + incoming).saturating_sub(capacity);
            if incoming >= capacity {
                window.samples.clear();
                window.memory_bytes = 0;
                for sample in samples.iter().skip(incoming - capacity) {
                    window.push(sample.clone());
                }
            } else {
                window.evict_oldest(dropped);
                for sample in samples {
                    window.push(sample.clone());
                }
            }

            window.total_dropped += dropped as u64;
            window.last_update = Some(Utc::now());

            if dropped > 0 {
                tracing::debug!(dropped, capacity, "Buffer overflow, evicted oldest samples");
            }

            self.crossed_threshold(&mut window).then(|| MemoryPressure {
                estimate_bytes: window.memory_bytes,
                threshold_bytes: self.config.memory_threshold_bytes,
                size: window.samples.len(),
            })
        };

        if let Some(pressure) = pressure {
            self.signal_pressure(&pressure);
        }
    }

    /// Count samples that were rejected before reaching the window
    ///
    /// They count as both received and dropped so that
    /// `total_received - total_dropped == len()` keeps holding.
    pub fn record_rejected(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut window = self.window.lock();
        window.total_received += count as u64;
        window.total_dropped += count as u64;
    }

    /// Empty the window and reset counters (GC trigger count is kept)
    pub fn clear(&self) {
        let mut window = self.window.lock();
        *window = Window::new(self.config.capacity);
        tracing::debug!("Buffer cleared");
    }

    /// Copy of the current window, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.window.lock().samples.iter().cloned().collect()
    }

    /// Copy of the newest `count` samples, oldest first
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<Sample> {
        let window = self.window.lock();
        let skip = window.samples.len().saturating_sub(count);
        window.samples.iter().skip(skip).cloned().collect()
    }

    /// Current statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> BufferMetrics {
        let window = self.window.lock();
        let size = window.samples.len();
        let elapsed = window.started_at.elapsed().as_secs_f64();

        BufferMetrics {
            size,
            capacity: self.config.capacity,
            utilization_percent: size as f64 / self.config.capacity as f64 * 100.0,
            total_received: window.total_received,
            total_dropped: window.total_dropped,
            memory_estimate_bytes: window.memory_bytes,
            throughput_per_sec: if elapsed > 0.0 {
                window.total_received as f64 / elapsed
            } else {
                0.0
            },
            last_update: window.last_update,
            gc_triggers: self.gc_triggers.load(Ordering::Relaxed),
        }
    }

    /// Best-effort de-duplication pass
    ///
    /// Removes a sample when it is within `dedup_window` in time and
    /// `dedup_epsilon` in value of the previous retained sample of the same
    /// category. Runs at most once per `optimize_interval`; throttled calls
    /// return 0. Removed samples are added to `total_dropped`.
    pub fn optimize(&self) -> usize {
        let mut window = self.window.lock();

        if let Some(last) = window.last_optimize {
            if last.elapsed() < self.config.optimize_interval {
                return 0;
            }
        }
        window.last_optimize = Some(Instant::now());

        let dedup_window = chrono::Duration::from_std(self.config.dedup_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        let epsilon = self.config.dedup_epsilon;

        let before = window.samples.len();
        let mut previous: HashMap<String, (DateTime<Utc>, f64)> = HashMap::new();
        window.samples.retain(|sample| {
            let duplicate = previous.get(&sample.category).is_some_and(|(ts, value)| {
                (sample.timestamp - *ts).abs() <= dedup_window
                    && (sample.value - value).abs() <= epsilon
            });
            if !duplicate {
                previous.insert(sample.category.clone(), (sample.timestamp, sample.value));
            }
            !duplicate
        });

        let removed = before - window.samples.len();
        if removed > 0 {
            window.total_dropped += removed as u64;
            window.memory_bytes = window.samples.iter().map(Sample::estimated_size).sum();
            self.crossed_threshold(&mut window);
            tracing::debug!(removed, remaining = window.samples.len(), "Buffer optimized");
        }
        removed
    }

    /// Update the pressure latch; true only on a fresh crossing
    fn crossed_threshold(&self, window: &mut Window) -> bool {
        let threshold = self.config.memory_threshold_bytes;
        if window.memory_bytes > threshold {
            return !std::mem::replace(&mut window.pressure_signalled, true);
        }
        if window.memory_bytes <= threshold - threshold / 10 {
            window.pressure_signalled = false;
        }
        false
    }

    fn signal_pressure(&self, pressure: &MemoryPressure) {
        self.gc_triggers.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            estimate_bytes = pressure.estimate_bytes,
            threshold_bytes = pressure.threshold_bytes,
            "Buffer memory threshold exceeded"
        );
        let hook = self.pressure_hook.read().clone();
        if let Some(hook) = hook {
            hook(pressure);
        }
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("capacity", &self.config.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample(i: usize) -> Sample {
        Sample::new(
            format!("s{i}"),
            Utc::now() + chrono::Duration::seconds(i as i64 * 10),
            i as f64,
            "cpu",
            "test",
        )
    }

    fn samples(range: std::ops::Range<usize>) -> Vec<Sample> {
        range.map(sample).collect()
    }

    fn ids(buffer: &StreamBuffer) -> Vec<String> {
        buffer.snapshot().into_iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_oversized_batch_keeps_last_capacity() {
        let buffer = StreamBuffer::with_capacity(5);
        buffer.add_batch(&samples(0..10));

        assert_eq!(ids(&buffer), vec!["s5", "s6", "s7", "s8", "s9"]);
        let metrics = buffer.metrics();
        assert_eq!(metrics.total_dropped, 5);
        assert_eq!(metrics.total_received, 10);
    }

    #[test]
    fn test_incremental_overflow_evicts_oldest() {
        let buffer = StreamBuffer::with_capacity(4);
        buffer.add_batch(&samples(0..3));
        buffer.add_batch(&samples(3..6));

        assert_eq!(ids(&buffer), vec!["s2", "s3", "s4", "s5"]);
        assert_eq!(buffer.metrics().total_dropped, 2);
    }

    #[test]
    fn test_oversized_batch_into_partial_window() {
        let buffer = StreamBuffer::with_capacity(3);
        buffer.add_batch(&samples(0..2));
        buffer.add_batch(&samples(2..6));

        assert_eq!(ids(&buffer), vec!["s3", "s4", "s5"]);
        // 2 existing + 4 incoming - 3 capacity
        assert_eq!(buffer.metrics().total_dropped, 3);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let buffer = StreamBuffer::with_capacity(3);
        buffer.add_batch(&[]);
        let metrics = buffer.metrics();
        assert_eq!(metrics.total_received, 0);
        assert!(metrics.last_update.is_none());
    }

    #[test]
    fn test_received_minus_dropped_equals_len() {
        let buffer = StreamBuffer::with_capacity(7);
        for chunk in [3, 9, 1, 4, 12] {
            buffer.add_batch(&samples(0..chunk));
            buffer.record_rejected(2);
            let m = buffer.metrics();
            assert!(m.size <= m.capacity);
            assert_eq!(m.total_received - m.total_dropped, m.size as u64);
        }
    }

    #[test]
    fn test_clear_resets_counters_but_keeps_gc_triggers() {
        let buffer = StreamBuffer::new(BufferConfig {
            capacity: 10,
            memory_threshold_bytes: 1,
            ..Default::default()
        });
        buffer.add_batch(&samples(0..3));
        assert_eq!(buffer.metrics().gc_triggers, 1);

        buffer.clear();
        let metrics = buffer.metrics();
        assert_eq!(metrics.size, 0);
        assert_eq!(metrics.total_received, 0);
        assert_eq!(metrics.total_dropped, 0);
        assert_eq!(metrics.memory_estimate_bytes, 0);
        assert_eq!(metrics.gc_triggers, 1);
    }

    #[test]
    fn test_utilization() {
        let buffer = StreamBuffer::with_capacity(8);
        buffer.add_batch(&samples(0..2));
        assert!((buffer.metrics().utilization_percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_memory_estimate_tracks_evictions() {
        let buffer = StreamBuffer::with_capacity(2);
        buffer.add_batch(&samples(0..2));
        let full = buffer.metrics().memory_estimate_bytes;
        buffer.add_batch(&samples(2..4));
        assert_eq!(buffer.metrics().memory_estimate_bytes, full);
    }

    #[test]
    fn test_pressure_hook_called_outside_lock() {
        let buffer = Arc::new(StreamBuffer::new(BufferConfig {
            capacity: 10,
            memory_threshold_bytes: 1,
            optimize_interval: Duration::ZERO,
            ..Default::default()
        }));
        let calls = Arc::new(AtomicUsize::new(0));

        let hook_buffer = Arc::downgrade(&buffer);
        let hook_calls = Arc::clone(&calls);
        buffer.set_pressure_hook(move |pressure| {
            assert!(pressure.estimate_bytes > pressure.threshold_bytes);
            hook_calls.fetch_add(1, Ordering::SeqCst);
            // Re-entrant call must not deadlock
            if let Some(b) = hook_buffer.upgrade() {
                b.optimize();
            }
        });

        buffer.add_batch(&samples(0..2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.metrics().gc_triggers, 1);
    }

    #[test]
    fn test_pressure_signalled_once_per_excursion() {
        let one = sample(0).estimated_size();
        let buffer = StreamBuffer::new(BufferConfig {
            capacity: 40,
            memory_threshold_bytes: one * 10,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        buffer.set_pressure_hook(move |_| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..8 {
            buffer.add_batch(&samples(i * 5..i * 5 + 5));
        }
        assert!(buffer.metrics().memory_estimate_bytes > one * 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.metrics().gc_triggers, 1);

        // Dropping below the low-water mark re-arms the signal
        buffer.clear();
        buffer.add_batch(&samples(100..120));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(buffer.metrics().gc_triggers, 2);
    }

    #[test]
    fn test_pressure_not_rearmed_just_under_threshold() {
        let one = sample(0).estimated_size();
        let buffer = StreamBuffer::new(BufferConfig {
            capacity: 11,
            memory_threshold_bytes: one * 10,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        buffer.set_pressure_hook(move |_| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        // A full window sits one sample over the threshold; evictions keep it there
        for i in 0..30 {
            buffer.add_batch(&samples(i..i + 1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.metrics().total_dropped, 19);
    }

    #[test]
    fn test_optimize_removes_near_duplicates() {
        let buffer = StreamBuffer::new(BufferConfig {
            capacity: 10,
            optimize_interval: Duration::ZERO,
            ..Default::default()
        });
        let t = Utc::now();
        buffer.add_batch(&[
            Sample::new("a", t, 1.0, "cpu", "x"),
            Sample::new("b", t + chrono::Duration::milliseconds(100), 1.0005, "cpu", "x"),
            // different category, same values: kept
            Sample::new("c", t + chrono::Duration::milliseconds(150), 1.0, "mem", "x"),
            // value moved: kept
            Sample::new("d", t + chrono::Duration::milliseconds(200), 2.0, "cpu", "x"),
            // too far in time: kept
            Sample::new("e", t + chrono::Duration::seconds(5), 2.0, "cpu", "x"),
        ]);

        assert_eq!(buffer.optimize(), 1);
        assert_eq!(ids(&buffer), vec!["a", "c", "d", "e"]);
        let m = buffer.metrics();
        assert_eq!(m.total_dropped, 1);
        assert_eq!(m.total_received - m.total_dropped, m.size as u64);
    }

    #[test]
    fn test_optimize_is_throttled() {
        let buffer = StreamBuffer::with_capacity(10);
        let t = Utc::now();
        let dupes = vec![
            Sample::new("a", t, 1.0, "cpu", "x"),
            Sample::new("b", t, 1.0, "cpu", "x"),
        ];

        buffer.add_batch(&dupes);
        assert_eq!(buffer.optimize(), 1);

        buffer.add_batch(&dupes);
        // Within the default 5s interval: skipped
        assert_eq!(buffer.optimize(), 0);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_recent() {
        let buffer = StreamBuffer::with_capacity(10);
        buffer.add_batch(&samples(0..5));
        let recent: Vec<_> = buffer.recent(2).into_iter().map(|s| s.id).collect();
        assert_eq!(recent, vec!["s3", "s4"]);
        assert_eq!(buffer.recent(50).len(), 5);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let buffer = StreamBuffer::with_capacity(0);
        buffer.add_batch(&samples(0..3));
        assert_eq!(ids(&buffer), vec!["s2"]);
    }
}
