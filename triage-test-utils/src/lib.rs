//! TRIAGE Test Utilities
//!
//! Centralized test infrastructure for the TRIAGE workspace:
//! - Proptest generators for reports and their parts
//! - A ledger fixture on an in-memory store and a manual clock
//! - Custom assertions for ledger invariants

// Re-export the in-memory store from its source crate
pub use triage_storage::{InMemoryProblemStore, ProblemFilter, ProblemStore};

// Re-export core types for convenience
pub use triage_core::{
    App, AppId, DismissRequest, Dismisser, EntityType, LedgerConfig, ManualClock, Problem,
    ProblemId, ProblemReport, ProblemType, Severity, StorageError, Timestamp, TriageError,
    TriageResult, ValidationCode,
};

pub use triage_ledger::ProblemLedger;

use std::sync::Arc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating TRIAGE requests.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Severity.
    pub fn arb_severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Info),
            Just(Severity::Warning),
            Just(Severity::Error),
        ]
    }

    /// Generate a key from a small pool so that reports collide.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("webhook-delivery".to_string()),
            Just("tax-sync".to_string()),
            Just("payment-gateway".to_string()),
            Just("shipping-rates".to_string()),
        ]
    }

    /// Generate a message that passes validation untouched.
    pub fn arb_message() -> impl Strategy<Value = String> {
        "[A-Za-z0-9 .,:-]{3,200}"
    }

    /// Generate a message long enough to be truncated.
    pub fn arb_oversized_message() -> impl Strategy<Value = String> {
        (2049usize..4000).prop_map(|len| "e".repeat(len))
    }

    /// Generate a valid ProblemReport.
    pub fn arb_report() -> impl Strategy<Value = ProblemReport> {
        (
            arb_message(),
            proptest::option::of(arb_key()),
            proptest::option::of(arb_severity()),
            proptest::option::of(0i64..=120),
            proptest::option::of(1i64..=10),
        )
            .prop_map(|(message, key, severity, period, threshold)| ProblemReport {
                message,
                key,
                aggregate: None,
                severity,
                aggregation_period: period,
                critical_threshold: threshold,
                force: None,
            })
    }

    /// Generate a sequence of (minutes to advance, report) steps.
    pub fn arb_report_script(max_len: usize) -> impl Strategy<Value = Vec<(i64, ProblemReport)>> {
        prop::collection::vec((0i64..90, arb_report()), 1..=max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// A ledger on a fresh in-memory store with one registered app.
    pub struct LedgerFixture {
        pub ledger: ProblemLedger<InMemoryProblemStore>,
        pub clock: Arc<ManualClock>,
        pub app: App,
    }

    impl LedgerFixture {
        /// Fixture with the default configuration.
        pub async fn new() -> Self {
            Self::with_config(LedgerConfig::default()).await
        }

        /// Fixture with a per-app cap of `max`.
        pub async fn with_cap(max: usize) -> Self {
            Self::with_config(LedgerConfig::default().with_max_problems_per_app(max)).await
        }

        pub async fn with_config(config: LedgerConfig) -> Self {
            let clock = Arc::new(ManualClock::starting_now());
            let ledger =
                ProblemLedger::with_clock(InMemoryProblemStore::new(), config, clock.clone());
            let app = ledger
                .register_app("Fixture App")
                .await
                .expect("fixture app registration");
            Self { ledger, clock, app }
        }

        pub fn app_id(&self) -> AppId {
            self.app.app_id
        }

        pub fn store(&self) -> &InMemoryProblemStore {
            self.ledger.store()
        }

        /// Report as the fixture app.
        pub async fn report(&self, report: ProblemReport) -> TriageResult<Problem> {
            self.ledger.report_problem(self.app_id(), report).await
        }

        /// Every problem of the fixture app, newest first.
        pub async fn problems(&self) -> Vec<Problem> {
            self.ledger
                .list_problems(self.app_id(), &ProblemFilter::default())
                .await
                .expect("list problems")
        }

        /// Register another app on the same ledger.
        pub async fn other_app(&self, name: &str) -> App {
            self.ledger
                .register_app(name)
                .await
                .expect("app registration")
        }
    }

    /// A report with a key, everything else defaulted.
    pub fn keyed_report(key: &str, message: &str) -> ProblemReport {
        ProblemReport::new(message).with_key(key)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for ledger invariants.

    use super::*;

    /// Assert that a TriageResult is a validation error with `code` on `field`.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(
        result: &TriageResult<T>,
        field: &str,
        code: ValidationCode,
    ) {
        match result {
            Err(TriageError::Validation(err)) => {
                assert_eq!(err.field, field, "unexpected field in {:?}", err);
                assert_eq!(err.code, code, "unexpected code in {:?}", err);
            }
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a TriageResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TriageResult<T>, entity_type: EntityType) {
        match result {
            Err(TriageError::Storage(StorageError::NotFound { entity_type: et, .. })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that an app holds no more than `max` records.
    #[track_caller]
    pub fn assert_within_cap(problems: &[Problem], max: usize) {
        assert!(
            problems.len() <= max,
            "{} problems stored, cap is {}",
            problems.len(),
            max
        );
    }

    /// Assert that problems are ordered newest first.
    #[track_caller]
    pub fn assert_newest_first(problems: &[Problem]) {
        for pair in problems.windows(2) {
            assert!(
                (pair[0].created_at, pair[0].problem_id) > (pair[1].created_at, pair[1].problem_id),
                "{} listed before {}",
                pair[0].problem_id,
                pair[1].problem_id
            );
        }
    }

    /// Assert the per-record invariants every stored problem satisfies.
    #[track_caller]
    pub fn assert_well_formed(problem: &Problem, config: &LedgerConfig) {
        assert!(problem.count >= 1, "count below 1: {:?}", problem);
        assert!(
            problem.message.chars().count() <= config.message_max_chars,
            "message over {} chars",
            config.message_max_chars
        );
        assert!(
            problem.updated_at >= problem.created_at,
            "updated_at before created_at: {:?}",
            problem
        );
        if problem.dismissed_by_user_email.is_some() {
            assert!(problem.dismissed, "email set on an active record");
        }
    }
}
