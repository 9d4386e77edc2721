//! TRIAGE Ledger - App Problem Ledger Service
//!
//! Apps report problems; the ledger folds repeated reports with the same key
//! into one record inside a time window, derives criticality from the
//! record's count and the caller's threshold, and keeps each app under a
//! fixed number of records by evicting the oldest. All writes for one app
//! are serialized through that app's lock.
//!
//! ```no_run
//! use triage_core::{LedgerConfig, ProblemReport};
//! use triage_ledger::ProblemLedger;
//! use triage_storage::InMemoryProblemStore;
//!
//! # async fn demo() -> triage_core::TriageResult<()> {
//! let ledger = ProblemLedger::new(InMemoryProblemStore::new(), LedgerConfig::from_env()?);
//! let app = ledger.register_app("Klaviyo").await?;
//! let problem = ledger
//!     .report_problem(
//!         app.app_id,
//!         ProblemReport::new("Sync of customer list failed")
//!             .with_key("customer-sync")
//!             .with_critical_threshold(5),
//!     )
//!     .await?;
//! assert_eq!(problem.count, 1);
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod eviction;
pub mod ledger;
pub mod telemetry;

pub use aggregation::{aggregate_or_create, ReportOutcome};
pub use eviction::enforce_cap;
pub use ledger::ProblemLedger;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, DEFAULT_LOG_FILTER};
