//! Grouping of records into batches.
//!
//! Fixed-size and content-aware plans are static. The adaptive plan is decided
//! one batch at a time: the size of the next batch comes from an
//! [`AdaptiveBatchSizer`] that is fed every completed batch's outcome.

use std::collections::VecDeque;
use std::time::Duration;

use crate::models::{AdaptiveBatchingConfig, BatchInsertOptions, BatchingStrategy, ContentRecord};

/// Tunes the batch size from observed latency and failures.
///
/// After a batch finishes the size is multiplied by `shrink_factor` if the
/// batch failed, took longer than `target_latency_ms`, or the failure rate over
/// the last `failure_window` batches is above `max_failure_rate`. Otherwise it
/// is multiplied by `growth_factor` (at least +1) when latency was below
/// `target_latency_ms * comfort_ratio`, and left alone in between.
#[derive(Debug, Clone)]
pub struct AdaptiveBatchSizer {
    config: AdaptiveBatchingConfig,
    current: usize,
    recent: VecDeque<bool>,
}

impl AdaptiveBatchSizer {
    pub fn new(config: AdaptiveBatchingConfig) -> Self {
        let current = config
            .initial_batch_size
            .clamp(config.min_batch_size, config.max_batch_size);
        Self {
            config,
            current,
            recent: VecDeque::new(),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Share of failed batches in the recent window.
    pub fn failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|ok| !**ok).count();
        failures as f64 / self.recent.len() as f64
    }

    /// Feed one batch outcome; returns the size to use next.
    pub fn observe(&mut self, latency: Duration, success: bool) -> usize {
        self.recent.push_back(success);
        while self.recent.len() > self.config.failure_window.max(1) {
            self.recent.pop_front();
        }

        let target = Duration::from_millis(self.config.target_latency_ms);
        let comfortable = target.mul_f64(self.config.comfort_ratio);
        let previous = self.current;

        if !success || latency > target || self.failure_rate() > self.config.max_failure_rate {
            self.current = (self.current as f64 * self.config.shrink_factor).floor() as usize;
        } else if latency < comfortable {
            let grown = (self.current as f64 * self.config.growth_factor).ceil() as usize;
            self.current = grown.max(self.current + 1);
        }
        self.current = self
            .current
            .clamp(self.config.min_batch_size, self.config.max_batch_size);

        if self.current != previous {
            tracing::debug!(
                from = previous,
                to = self.current,
                latency_ms = latency.as_millis() as u64,
                success,
                "adjusted adaptive batch size"
            );
        }
        self.current
    }
}

/// Hands out batches in input order according to the selected strategy.
#[derive(Debug)]
pub struct BatchPlanner {
    strategy: BatchingStrategy,
    queue: VecDeque<ContentRecord>,
    fixed_batch_size: usize,
    max_batch_size_bytes: usize,
    sizer: Option<AdaptiveBatchSizer>,
}

impl BatchPlanner {
    pub fn new(records: Vec<ContentRecord>, options: &BatchInsertOptions) -> Self {
        let sizer = (options.strategy == BatchingStrategy::Adaptive)
            .then(|| AdaptiveBatchSizer::new(options.adaptive.clone()));
        Self {
            strategy: options.strategy,
            queue: records.into(),
            fixed_batch_size: options.fixed_batch_size.max(1),
            max_batch_size_bytes: options.max_batch_size_bytes.max(1),
            sizer,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.sizer.is_some()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Next batch, or `None` once every record has been handed out.
    pub fn next_batch(&mut self) -> Option<Vec<ContentRecord>> {
        if self.queue.is_empty() {
            return None;
        }
        let batch = match self.strategy {
            BatchingStrategy::FixedSize => {
                let take = self.fixed_batch_size.min(self.queue.len());
                self.queue.drain(..take).collect()
            }
            BatchingStrategy::ContentAware => self.take_within_bytes(usize::MAX),
            BatchingStrategy::Adaptive => {
                let limit = self.sizer.as_ref().map_or(1, AdaptiveBatchSizer::current);
                self.take_within_bytes(limit)
            }
        };
        Some(batch)
    }

    /// Report a finished batch to the adaptive sizer, if any.
    pub fn observe(&mut self, latency: Duration, success: bool) {
        if let Some(sizer) = self.sizer.as_mut() {
            sizer.observe(latency, success);
        }
    }

    /// Take up to `max_records` records while the byte budget holds. A record
    /// that alone exceeds the budget becomes a batch of its own.
    fn take_within_bytes(&mut self, max_records: usize) -> Vec<ContentRecord> {
        let mut batch = Vec::new();
        let mut bytes = 0usize;

        while batch.len() < max_records {
            let Some(next) = self.queue.front() else {
                break;
            };
            if !batch.is_empty() && bytes + next.size_bytes > self.max_batch_size_bytes {
                break;
            }
            let oversized = next.size_bytes > self.max_batch_size_bytes;
            bytes += next.size_bytes;
            if let Some(record) = self.queue.pop_front() {
                batch.push(record);
            }
            if oversized {
                break;
            }
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn records(count: usize, size: usize) -> Vec<ContentRecord> {
        (0..count)
            .map(|i| {
                let content = format!("{i:0>width$}", width = size.max(1));
                ContentRecord::with_id(format!("r{i}"), content, Metadata::new())
            })
            .collect()
    }

    fn drain(planner: &mut BatchPlanner) -> Vec<Vec<ContentRecord>> {
        std::iter::from_fn(|| planner.next_batch()).collect()
    }

    fn options(strategy: BatchingStrategy) -> BatchInsertOptions {
        BatchInsertOptions::default().with_strategy(strategy)
    }

    #[test]
    fn test_fixed_size_batch_count() {
        let opts = BatchInsertOptions {
            fixed_batch_size: 25,
            ..options(BatchingStrategy::FixedSize)
        };
        let batches = drain(&mut BatchPlanner::new(records(200, 10), &opts));
        assert_eq!(batches.len(), 8);
        assert!(batches.iter().all(|b| b.len() == 25));

        let batches = drain(&mut BatchPlanner::new(records(201, 10), &opts));
        assert_eq!(batches.len(), 9);
        assert_eq!(batches[8].len(), 1);
    }

    #[test]
    fn test_batches_preserve_input_order() {
        let opts = BatchInsertOptions {
            max_batch_size_bytes: 35,
            ..options(BatchingStrategy::ContentAware)
        };
        let batches = drain(&mut BatchPlanner::new(records(20, 10), &opts));
        let ids: Vec<String> = batches.into_iter().flatten().map(|r| r.id).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("r{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_content_aware_respects_byte_budget() {
        let opts = BatchInsertOptions {
            max_batch_size_bytes: 35,
            ..options(BatchingStrategy::ContentAware)
        };
        let batches = drain(&mut BatchPlanner::new(records(20, 10), &opts));
        assert_eq!(batches.len(), 7);
        assert!(batches.iter().all(|b| b.iter().map(|r| r.size_bytes).sum::<usize>() <= 35));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 20);
    }

    #[test]
    fn test_content_aware_isolates_oversized_record() {
        let opts = BatchInsertOptions {
            max_batch_size_bytes: 50,
            ..options(BatchingStrategy::ContentAware)
        };
        let mut input = records(4, 10);
        input.insert(2, ContentRecord::with_id("big", "x".repeat(500), Metadata::new()));

        let batches = drain(&mut BatchPlanner::new(input, &opts));
        let big = batches.iter().find(|b| b.iter().any(|r| r.id == "big")).unwrap();
        assert_eq!(big.len(), 1);
    }

    #[test]
    fn test_content_heavy_records_make_smaller_batches() {
        let opts = BatchInsertOptions {
            max_batch_size_bytes: 1000,
            ..options(BatchingStrategy::ContentAware)
        };
        let light = drain(&mut BatchPlanner::new(records(100, 10), &opts)).len();
        let heavy = drain(&mut BatchPlanner::new(records(100, 200), &opts)).len();
        assert!(heavy > light);
    }

    #[test]
    fn test_adaptive_uses_sizer() {
        let opts = BatchInsertOptions {
            adaptive: AdaptiveBatchingConfig {
                initial_batch_size: 4,
                ..Default::default()
            },
            ..options(BatchingStrategy::Adaptive)
        };
        let mut planner = BatchPlanner::new(records(50, 10), &opts);
        assert!(planner.is_adaptive());
        assert_eq!(planner.next_batch().unwrap().len(), 4);

        planner.observe(Duration::from_millis(1), true);
        assert_eq!(planner.next_batch().unwrap().len(), 6);

        planner.observe(Duration::from_millis(1), false);
        assert_eq!(planner.next_batch().unwrap().len(), 3);
        assert_eq!(planner.remaining(), 50 - 13);
    }

    #[test]
    fn test_sizer_grows_and_caps() {
        let mut sizer = AdaptiveBatchSizer::new(AdaptiveBatchingConfig {
            initial_batch_size: 10,
            max_batch_size: 20,
            ..Default::default()
        });
        assert_eq!(sizer.observe(Duration::from_millis(10), true), 15);
        assert_eq!(sizer.observe(Duration::from_millis(10), true), 20);
        assert_eq!(sizer.observe(Duration::from_millis(10), true), 20);
    }

    #[test]
    fn test_sizer_shrinks_on_slow_batches() {
        let mut sizer = AdaptiveBatchSizer::new(AdaptiveBatchingConfig {
            initial_batch_size: 16,
            target_latency_ms: 100,
            ..Default::default()
        });
        assert_eq!(sizer.observe(Duration::from_millis(250), true), 8);
        // Between comfortable and target: unchanged
        assert_eq!(sizer.observe(Duration::from_millis(80), true), 8);
    }

    #[test]
    fn test_sizer_shrinks_while_failure_rate_high() {
        let mut sizer = AdaptiveBatchSizer::new(AdaptiveBatchingConfig {
            initial_batch_size: 64,
            failure_window: 4,
            max_failure_rate: 0.2,
            ..Default::default()
        });
        sizer.observe(Duration::from_millis(1), false);
        assert_eq!(sizer.current(), 32);
        // One failure in the window still exceeds the allowed rate
        sizer.observe(Duration::from_millis(1), true);
        assert_eq!(sizer.current(), 16);
        assert!((sizer.failure_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sizer_never_below_min() {
        let mut sizer = AdaptiveBatchSizer::new(AdaptiveBatchingConfig {
            initial_batch_size: 2,
            min_batch_size: 1,
            ..Default::default()
        });
        for _ in 0..5 {
            sizer.observe(Duration::from_millis(1), false);
        }
        assert_eq!(sizer.current(), 1);
    }
}
