//! TRIAGE Core - Entity Types and Policies
//!
//! Data types shared by every TRIAGE crate, the error taxonomy, ledger
//! configuration, and the pure policies (criticality, aggregation window,
//! eviction sizing, truncation) that the ledger applies under its per-app
//! lock. Nothing here performs I/O.

pub mod clock;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod policy;
pub mod report;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    LedgerConfig, DEFAULT_AGGREGATION_PERIOD_MINUTES, DEFAULT_MAX_DISMISS_BATCH,
    DEFAULT_MAX_PROBLEMS_PER_APP, KEY_MAX_CHARS, KEY_MIN_CHARS, MESSAGE_MAX_CHARS,
    MESSAGE_MIN_CHARS,
};
pub use entities::{App, NewProblem, Problem};
pub use enums::{DismissedBy, EntityType, EnumParseError, ProblemType, Severity};
pub use error::{
    ConfigError, StorageError, TriageError, TriageResult, ValidationCode, ValidationError,
};
pub use identity::{new_entity_id, AppId, EntityId, ProblemId, Timestamp};
pub use policy::{
    compute_is_critical, decide_aggregation, eviction_count, select_oldest, truncate_message,
    within_aggregation_window, AggregationDecision,
};
pub use report::{
    DismissRequest, DismissTarget, Dismisser, ProblemReport, ValidatedDismissal, ValidatedReport,
};
