//! Pure ledger policies: criticality, aggregation window, eviction sizing
//! and message truncation. None of these touch storage.

use crate::{Problem, ProblemId, Timestamp};
use chrono::Duration;
use std::num::NonZeroU32;

/// Suffix appended to truncated messages.
pub const TRUNCATION_SUFFIX: &str = "...";

// ============================================================================
// CRITICALITY
// ============================================================================

/// Derive `is_critical` from a record's count and the threshold supplied
/// with the current report.
///
/// There is no memory of earlier thresholds: a later report with a higher
/// threshold de-escalates, and a report without one yields `false`.
pub fn compute_is_critical(count: u32, critical_threshold: Option<NonZeroU32>) -> bool {
    match critical_threshold {
        Some(threshold) => count >= threshold.get(),
        None => false,
    }
}

// ============================================================================
// AGGREGATION WINDOW
// ============================================================================

/// Whether a record last updated at `updated_at` is still inside a window of
/// `period_minutes` ending at `now`. A zero period never matches.
pub fn within_aggregation_window(updated_at: Timestamp, now: Timestamp, period_minutes: u32) -> bool {
    if period_minutes == 0 {
        return false;
    }
    now - updated_at <= Duration::minutes(i64::from(period_minutes))
}

/// Outcome of matching an incoming report against existing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationDecision {
    /// Fold the report into this record.
    Merge(ProblemId),
    /// Insert a fresh record.
    Create,
}

/// Decide between merging and creating.
///
/// `candidate` must be the most recently updated non-dismissed record for
/// the report's (app, key). With `force`, any such candidate is merged into
/// regardless of its age.
pub fn decide_aggregation(
    candidate: Option<&Problem>,
    now: Timestamp,
    period_minutes: u32,
    force: bool,
) -> AggregationDecision {
    match candidate {
        Some(problem) if problem.dismissed => AggregationDecision::Create,
        Some(problem) if force => AggregationDecision::Merge(problem.problem_id),
        Some(problem) if within_aggregation_window(problem.updated_at, now, period_minutes) => {
            AggregationDecision::Merge(problem.problem_id)
        }
        _ => AggregationDecision::Create,
    }
}

// ============================================================================
// EVICTION
// ============================================================================

/// How many of the oldest records must go so that one more insert keeps the
/// app at or under `max_per_app`.
///
/// Evicts `current - max + 1`, which also repairs an app that was already
/// pushed past the cap.
pub fn eviction_count(current: usize, max_per_app: usize) -> usize {
    (current + 1).saturating_sub(max_per_app)
}

/// Pick the `n` oldest records by `created_at`, ties broken by id.
pub fn select_oldest(problems: &[Problem], n: usize) -> Vec<ProblemId> {
    let mut ordered: Vec<&Problem> = problems.iter().collect();
    ordered.sort_by_key(|p| (p.created_at, p.problem_id));
    ordered.into_iter().take(n).map(|p| p.problem_id).collect()
}

// ============================================================================
// TRUNCATION
// ============================================================================

/// Cap `message` at `max_chars` characters. Overflowing messages keep their
/// first `max_chars - 3` characters followed by `"..."`.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_SUFFIX.len());
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}
