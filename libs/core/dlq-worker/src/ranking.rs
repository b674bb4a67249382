//! Top-K ranking of metric samples

use crate::gateway::MetricSample;
use std::cmp::Ordering;

/// Sort by `undelivered_mean` descending, ties broken by subscription id
/// ascending, and keep the first `k`. A `k` larger than the input keeps all.
pub fn rank_top_k(mut samples: Vec<MetricSample>, k: usize) -> Vec<MetricSample> {
    samples.sort_by(compare_offenders);
    samples.truncate(k);
    samples
}

fn compare_offenders(a: &MetricSample, b: &MetricSample) -> Ordering {
    b.undelivered_mean
        .total_cmp(&a.undelivered_mean)
        .then_with(|| a.subscription_id.cmp(&b.subscription_id))
}
