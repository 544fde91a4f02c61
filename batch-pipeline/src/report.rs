use common::types::{AnswerResult, AnswerState};
use serde::Serialize;

use crate::cache::CacheStats;

/// Pure summary over a finished batch: counts, rates, latency percentiles,
/// and the per-question records themselves.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub answered: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub mean_total_ms: f64,
    pub p50_total_ms: u64,
    pub p95_total_ms: u64,
    pub total_attempts: u32,
    pub cache: CacheStats,
    pub results: Vec<AnswerResult>,
}

pub fn aggregate(results: Vec<AnswerResult>, cache: CacheStats) -> BatchReport {
    let total = results.len();
    let answered = count_state(&results, AnswerState::Answered);
    let failed = count_state(&results, AnswerState::Failed);
    let cancelled = count_state(&results, AnswerState::Cancelled);
    let cache_hits = results.iter().filter(|r| r.cache_hit).count();
    let total_attempts = results.iter().map(|r| r.attempts).sum();

    let mut latencies: Vec<u64> = results
        .iter()
        .filter(|r| r.is_answered())
        .map(|r| r.timings.total_ms)
        .collect();
    latencies.sort_unstable();

    BatchReport {
        total,
        answered,
        failed,
        cancelled,
        success_rate: ratio(answered, total),
        cache_hit_rate: ratio(cache_hits, total),
        mean_total_ms: if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        },
        p50_total_ms: percentile(&latencies, 50),
        p95_total_ms: percentile(&latencies, 95),
        total_attempts,
        cache,
        results,
    }
}

fn count_state(results: &[AnswerResult], state: AnswerState) -> usize {
    results.iter().filter(|r| r.state == state).count()
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[u64], pct: u64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * (sorted.len() as u64 - 1) + 50) / 100;
    sorted.get(rank as usize).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::AnswerTimings;

    fn result(index: usize, state: AnswerState, total_ms: u64, cache_hit: bool) -> AnswerResult {
        AnswerResult {
            index,
            question: format!("question {index}"),
            state,
            answer: (state == AnswerState::Answered).then(|| "answer".to_owned()),
            context: None,
            related: Vec::new(),
            cache_hit,
            timings: AnswerTimings {
                selection_ms: 1,
                call_ms: total_ms,
                total_ms,
            },
            model: None,
            attempts: u32::from(state == AnswerState::Answered),
            error: None,
        }
    }

    #[test]
    fn counts_and_rates() {
        let report = aggregate(
            vec![
                result(0, AnswerState::Answered, 100, false),
                result(1, AnswerState::Answered, 300, true),
                result(2, AnswerState::Failed, 0, false),
                result(3, AnswerState::Cancelled, 0, false),
            ],
            CacheStats::default(),
        );
        assert_eq!(report.total, 4);
        assert_eq!(report.answered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.cancelled, 1);
        assert!((report.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((report.cache_hit_rate - 0.25).abs() < f64::EPSILON);
        assert!((report.mean_total_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_ignore_unanswered_questions() {
        let mut results: Vec<AnswerResult> = (0..10)
            .map(|i| result(i, AnswerState::Answered, (i as u64 + 1) * 10, false))
            .collect();
        results.push(result(10, AnswerState::Failed, 0, false));

        let report = aggregate(results, CacheStats::default());
        assert_eq!(report.p50_total_ms, 60);
        assert_eq!(report.p95_total_ms, 100);
    }

    #[test]
    fn empty_batch_reports_zeroes() {
        let report = aggregate(Vec::new(), CacheStats::default());
        assert_eq!(report.total, 0);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.p95_total_ms, 0);
    }
}
