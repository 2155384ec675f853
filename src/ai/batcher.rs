//! Dynamic Batching
//!
//! Greedy, order-preserving partition of the comment set into batches that
//! respect both a record cap and a per-call token cap.
//!
//! ## Usage
//!
//! ```ignore
//! let batcher = DynamicBatcher::from_config(&config.batching);
//! let target = rate.recommended_batch_size(batcher.average_tokens(&rows), ..);
//! let batches = batcher.split(&rows, target, config.batching.max_tokens_per_call);
//! ```

use serde::Serialize;

use crate::config::BatchingConfig;
use crate::types::{CommentRecord, truncate_chars};

/// Ordered slice of the input sent to the collaborator in one call.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub records: Vec<CommentRecord>,
    /// Prompt overhead plus the estimate of every comment
    pub estimated_tokens: u64,
    /// Single comment whose estimate alone exceeds the per-call cap
    pub truncate: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn row_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.records.iter().map(|r| r.row_id)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub batches: usize,
    pub comments: usize,
    pub avg_batch_size: f64,
    pub largest_batch: usize,
    pub max_estimated_tokens: u64,
    pub truncated: usize,
}

impl BatchStats {
    pub fn from_batches(batches: &[Batch]) -> Self {
        let comments: usize = batches.iter().map(Batch::len).sum();
        Self {
            batches: batches.len(),
            comments,
            avg_batch_size: if batches.is_empty() {
                0.0
            } else {
                comments as f64 / batches.len() as f64
            },
            largest_batch: batches.iter().map(Batch::len).max().unwrap_or(0),
            max_estimated_tokens: batches.iter().map(|b| b.estimated_tokens).max().unwrap_or(0),
            truncated: batches.iter().filter(|b| b.truncate).count(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DynamicBatcher {
    chars_per_token: usize,
    prompt_overhead: u64,
}

impl DynamicBatcher {
    pub fn new(chars_per_token: usize, prompt_overhead: u64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            prompt_overhead,
        }
    }

    pub fn from_config(config: &BatchingConfig) -> Self {
        Self::new(config.chars_per_token, config.prompt_overhead_tokens)
    }

    /// `ceil(chars / chars_per_token)`, at least 1
    pub fn estimate_tokens(&self, text: &str) -> u64 {
        (text.chars().count().div_ceil(self.chars_per_token) as u64).max(1)
    }

    pub fn average_tokens(&self, comments: &[CommentRecord]) -> u64 {
        if comments.is_empty() {
            return crate::constants::batching::AVG_TOKENS_PER_COMMENT;
        }
        let total: u64 = comments.iter().map(|c| self.estimate_tokens(&c.text)).sum();
        total.div_ceil(comments.len() as u64).max(1)
    }

    /// Character budget of a truncated single-comment call
    pub fn char_budget(&self, max_tokens_per_call: u64) -> usize {
        let tokens = max_tokens_per_call.saturating_sub(self.prompt_overhead).max(1);
        tokens as usize * self.chars_per_token
    }

    /// Cut `text` down so a single-comment call fits `max_tokens_per_call`
    pub fn fit_text<'a>(&self, text: &'a str, max_tokens_per_call: u64) -> &'a str {
        truncate_chars(text, self.char_budget(max_tokens_per_call))
    }

    /// Partition `comments` in order. Deterministic for identical input.
    pub fn split(
        &self,
        comments: &[CommentRecord],
        target_batch_size: usize,
        max_tokens_per_call: u64,
    ) -> Vec<Batch> {
        let target = target_batch_size.max(1);
        let mut batches = Vec::new();
        let mut current: Vec<CommentRecord> = Vec::with_capacity(target.min(comments.len()));
        let mut current_tokens = self.prompt_overhead;

        for comment in comments {
            let estimate = self.estimate_tokens(&comment.text);

            if self.prompt_overhead.saturating_add(estimate) > max_tokens_per_call {
                self.flush(&mut batches, &mut current, &mut current_tokens);
                tracing::debug!(
                    row_id = comment.row_id,
                    estimate,
                    cap = max_tokens_per_call,
                    "Comment exceeds per-call cap, batching alone for truncation"
                );
                batches.push(Batch {
                    index: batches.len(),
                    records: vec![comment.clone()],
                    estimated_tokens: max_tokens_per_call,
                    truncate: true,
                });
                continue;
            }

            if current.len() >= target || current_tokens + estimate > max_tokens_per_call {
                self.flush(&mut batches, &mut current, &mut current_tokens);
            }
            current_tokens += estimate;
            current.push(comment.clone());
        }
        self.flush(&mut batches, &mut current, &mut current_tokens);
        batches
    }

    fn flush(&self, batches: &mut Vec<Batch>, current: &mut Vec<CommentRecord>, tokens: &mut u64) {
        if current.is_empty() {
            return;
        }
        batches.push(Batch {
            index: batches.len(),
            records: std::mem::take(current),
            estimated_tokens: *tokens,
            truncate: false,
        });
        *tokens = self.prompt_overhead;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rows(count: usize, chars: usize) -> Vec<CommentRecord> {
        (0..count)
            .map(|i| CommentRecord::new(i, "x".repeat(chars)))
            .collect()
    }

    #[test]
    fn test_record_cap_splits_in_order() {
        let batcher = DynamicBatcher::new(4, 800);
        let batches = batcher.split(&rows(250, 40), 100, 100_000);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(batches[1].records[0].row_id, 100);
        assert_eq!(batches[2].index, 2);
        assert_eq!(batches[0].estimated_tokens, 800 + 100 * 10);
    }

    #[test]
    fn test_token_cap_binds_before_record_cap() {
        let batcher = DynamicBatcher::new(4, 100);
        // 25 tokens each; (1_100 - 100) / 25 = 40 per batch
        let batches = batcher.split(&rows(100, 100), 100, 1_100);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![40, 40, 20]);
        assert!(batches.iter().all(|b| b.estimated_tokens <= 1_100));
    }

    #[test]
    fn test_oversized_comment_isolated_and_flagged() {
        let batcher = DynamicBatcher::new(4, 100);
        let mut input = rows(3, 8);
        input.insert(1, CommentRecord::new(99, "y".repeat(8_000)));

        let batches = batcher.split(&input, 10, 1_000);
        let layout: Vec<(Vec<usize>, bool)> = batches
            .iter()
            .map(|b| (b.row_ids().collect(), b.truncate))
            .collect();
        assert_eq!(
            layout,
            vec![
                (vec![0], false),
                (vec![99], true),
                (vec![1, 2], false),
            ]
        );
        assert_eq!(batcher.fit_text(&batches[1].records[0].text, 1_000).len(), 3_600);
    }

    #[test]
    fn test_estimate_never_zero() {
        let batcher = DynamicBatcher::new(4, 0);
        assert_eq!(batcher.estimate_tokens(""), 1);
        assert_eq!(batcher.estimate_tokens("abcde"), 2);
        assert_eq!(batcher.estimate_tokens("ñandú"), 2);
    }

    #[test]
    fn test_stats() {
        let batcher = DynamicBatcher::new(4, 800);
        let stats = BatchStats::from_batches(&batcher.split(&rows(250, 40), 100, 100_000));
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.comments, 250);
        assert_eq!(stats.largest_batch, 100);
        assert_eq!(stats.truncated, 0);
    }

    proptest! {
        #[test]
        fn prop_split_preserves_order_and_coverage(
            lengths in prop::collection::vec(0usize..3_000, 0..200),
            target in 1usize..60,
            max_tokens in 300u64..4_000,
        ) {
            let batcher = DynamicBatcher::new(4, 200);
            let input: Vec<CommentRecord> = lengths
                .iter()
                .enumerate()
                .map(|(i, len)| CommentRecord::new(i, "a".repeat(*len)))
                .collect();

            let batches = batcher.split(&input, target, max_tokens);
            let ids: Vec<usize> = batches.iter().flat_map(|b| b.row_ids()).collect();
            prop_assert_eq!(ids, (0..input.len()).collect::<Vec<_>>());

            for (i, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.index, i);
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.len() <= target);
                prop_assert!(batch.estimated_tokens <= max_tokens);
                if batch.truncate {
                    prop_assert_eq!(batch.len(), 1);
                }
            }
        }
    }
}
