//! Merge-or-create for incoming reports.

use crate::eviction::enforce_cap;
use triage_core::{
    compute_is_critical, decide_aggregation, AggregationDecision, NewProblem, ProblemId,
    Timestamp, TriageResult, ValidatedReport,
};
use triage_storage::{AggregateUpdate, ProblemTransaction};

/// What a report did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Folded into an existing record.
    Aggregated { problem_id: ProblemId },
    /// Inserted as a new record after evicting `evicted`.
    Created {
        problem_id: ProblemId,
        evicted: Vec<ProblemId>,
    },
}

impl ReportOutcome {
    pub fn problem_id(&self) -> ProblemId {
        match self {
            ReportOutcome::Aggregated { problem_id } => *problem_id,
            ReportOutcome::Created { problem_id, .. } => *problem_id,
        }
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self, ReportOutcome::Aggregated { .. })
    }
}

/// Apply one validated report inside the app's transaction.
///
/// A keyless report always creates. Otherwise the most recently updated
/// non-dismissed record with the same key is merged into when it is inside
/// the aggregation window (or when the report is forced). Exactly one row is
/// inserted or updated; a create may additionally evict.
pub async fn aggregate_or_create<T>(
    tx: &mut T,
    report: &ValidatedReport,
    now: Timestamp,
    max_per_app: usize,
) -> TriageResult<ReportOutcome>
where
    T: ProblemTransaction + ?Sized,
{
    let decision = match report.key() {
        None => AggregationDecision::Create,
        Some(key) => {
            let candidate = tx.latest_active_by_key(key).await?;
            decide_aggregation(
                candidate.as_ref(),
                now,
                report.aggregation_period_minutes(),
                report.force(),
            )
        }
    };

    match decision {
        AggregationDecision::Merge(problem_id) => {
            tx.aggregate(
                problem_id,
                AggregateUpdate {
                    message: report.message().to_string(),
                    severity: report.severity(),
                    aggregate: report.aggregate().map(str::to_string),
                    critical_threshold: report.critical_threshold(),
                    updated_at: now,
                },
            )
            .await?;
            Ok(ReportOutcome::Aggregated { problem_id })
        }
        AggregationDecision::Create => {
            let evicted = enforce_cap(tx, max_per_app).await?;
            let app_id = tx.app_id();
            let problem_id = tx
                .insert(NewProblem {
                    app_id,
                    problem_type: report.problem_type(),
                    key: report.key().map(str::to_string),
                    message: report.message().to_string(),
                    aggregate: report.aggregate().map(str::to_string),
                    severity: report.severity(),
                    is_critical: compute_is_critical(1, report.critical_threshold()),
                    created_at: now,
                })
                .await?;
            Ok(ReportOutcome::Created {
                problem_id,
                evicted,
            })
        }
    }
}
