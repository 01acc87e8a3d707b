//! When to checkpoint, and how far along a checkpoint is.

use crate::checkpoint::Checkpoint;

/// Width of the window above each threshold in which it fires.
pub const THRESHOLD_WINDOW: f64 = 0.05;

/// Trigger policy: every `iteration_interval` iterations, or when the token
/// ratio first lands in `[t, t + THRESHOLD_WINDOW)` for a threshold `t`.
///
/// The windowed test means a caller checkpointing every iteration sees each
/// threshold fire once; a caller polling coarsely may skip a window.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPolicy {
    pub iteration_interval: u32,
    pub thresholds: Vec<f64>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            iteration_interval: 5,
            thresholds: vec![0.50, 0.75, 0.90],
        }
    }
}

impl CheckpointPolicy {
    pub fn should_checkpoint(&self, tokens_used: u64, token_limit: u64, iteration: u32) -> bool {
        if iteration != 0
            && self.iteration_interval != 0
            && iteration.is_multiple_of(self.iteration_interval)
        {
            return true;
        }
        if token_limit == 0 {
            return false;
        }
        let ratio = tokens_used as f64 / token_limit as f64;
        self.thresholds
            .iter()
            .any(|&threshold| ratio >= threshold && ratio < threshold + THRESHOLD_WINDOW)
    }
}

/// Percentage of criteria met, or 0 when there are no criteria.
pub fn progress(checkpoint: &Checkpoint, total_criteria: usize) -> f64 {
    if total_criteria == 0 {
        return 0.0;
    }
    checkpoint.criteria_met.len() as f64 / total_criteria as f64 * 100.0
}
