//! Boundary requests and their validation.
//!
//! Requests arrive loosely typed (signed integers, optional fields) the way a
//! mutation layer hands them over. Validation turns them into the typed forms
//! the ledger accepts, before any lock is taken or row touched.

use crate::{
    policy::truncate_message, AppId, DismissedBy, LedgerConfig, ProblemId, ProblemType, Severity,
    ValidationCode, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

// ============================================================================
// PROBLEM REPORT
// ============================================================================

/// A problem report as received from an app.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProblemReport {
    pub message: String,
    pub key: Option<String>,
    pub aggregate: Option<String>,
    pub severity: Option<Severity>,
    /// Minutes; `None` falls back to the configured default.
    pub aggregation_period: Option<i64>,
    pub critical_threshold: Option<i64>,
    pub force: Option<bool>,
}

impl ProblemReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_aggregation_period(mut self, minutes: i64) -> Self {
        self.aggregation_period = Some(minutes);
        self
    }

    pub fn with_critical_threshold(mut self, threshold: i64) -> Self {
        self.critical_threshold = Some(threshold);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = Some(true);
        self
    }

    /// Validate against `config`.
    ///
    /// Messages below the minimum length are rejected; messages above the
    /// maximum are truncated rather than rejected.
    pub fn validate(self, config: &LedgerConfig) -> Result<ValidatedReport, ValidationError> {
        let message_len = self.message.chars().count();
        if message_len == 0 {
            return Err(ValidationError::new(
                "message",
                ValidationCode::Required,
                "message is required",
            ));
        }
        if message_len < config.message_min_chars {
            return Err(ValidationError::new(
                "message",
                ValidationCode::TooShort,
                format!("must be at least {} characters", config.message_min_chars),
            ));
        }

        if let Some(key) = &self.key {
            let key_len = key.chars().count();
            if key_len < config.key_min_chars {
                return Err(ValidationError::new(
                    "key",
                    ValidationCode::TooShort,
                    format!("must be at least {} characters", config.key_min_chars),
                ));
            }
            if key_len > config.key_max_chars {
                return Err(ValidationError::new(
                    "key",
                    ValidationCode::TooLong,
                    format!("must be at most {} characters", config.key_max_chars),
                ));
            }
        }

        let aggregation_period_minutes = match self.aggregation_period {
            None => config.default_aggregation_period_minutes,
            Some(minutes) => u32::try_from(minutes).map_err(|_| {
                ValidationError::new(
                    "aggregation_period",
                    ValidationCode::Invalid,
                    "must be a non-negative number of minutes",
                )
            })?,
        };

        let critical_threshold = match self.critical_threshold {
            None => None,
            Some(threshold) => {
                let positive = u32::try_from(threshold).ok().and_then(NonZeroU32::new);
                Some(positive.ok_or_else(|| {
                    ValidationError::new(
                        "critical_threshold",
                        ValidationCode::Invalid,
                        "must be a positive integer",
                    )
                })?)
            }
        };

        Ok(ValidatedReport {
            problem_type: ProblemType::Own,
            message: truncate_message(&self.message, config.message_max_chars),
            key: self.key,
            aggregate: self.aggregate,
            severity: self.severity.unwrap_or_default(),
            aggregation_period_minutes,
            critical_threshold,
            force: self.force.unwrap_or(false),
        })
    }
}

/// A report that passed validation. Only constructible through
/// [`ProblemReport::validate`] or [`ValidatedReport::circuit_breaker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReport {
    problem_type: ProblemType,
    message: String,
    key: Option<String>,
    aggregate: Option<String>,
    severity: Severity,
    aggregation_period_minutes: u32,
    critical_threshold: Option<NonZeroU32>,
    force: bool,
}

impl ValidatedReport {
    /// A system-detected problem raised when an app's deliveries keep
    /// failing. Never rejected for length; the message is truncated.
    pub fn circuit_breaker(key: impl Into<String>, message: &str, config: &LedgerConfig) -> Self {
        Self {
            problem_type: ProblemType::CircuitBreaker,
            message: truncate_message(message, config.message_max_chars),
            key: Some(key.into()),
            aggregate: None,
            severity: Severity::Error,
            aggregation_period_minutes: config.default_aggregation_period_minutes,
            critical_threshold: None,
            force: false,
        }
    }

    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn aggregate(&self) -> Option<&str> {
        self.aggregate.as_deref()
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn aggregation_period_minutes(&self) -> u32 {
        self.aggregation_period_minutes
    }

    pub fn critical_threshold(&self) -> Option<NonZeroU32> {
        self.critical_threshold
    }

    pub fn force(&self) -> bool {
        self.force
    }
}

// ============================================================================
// DISMISSAL
// ============================================================================

/// Who is asking for a dismissal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dismisser {
    /// The app itself, acting on its own problems.
    App(AppId),
    /// A staff user acting from the dashboard.
    User { email: String },
}

/// Dismissal request: exactly one of `ids` or `keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissRequest {
    pub app_id: AppId,
    pub ids: Option<Vec<ProblemId>>,
    pub keys: Option<Vec<String>>,
    pub by: Dismisser,
}

impl DismissRequest {
    pub fn by_ids(app_id: AppId, ids: Vec<ProblemId>, by: Dismisser) -> Self {
        Self {
            app_id,
            ids: Some(ids),
            keys: None,
            by,
        }
    }

    pub fn by_keys(app_id: AppId, keys: Vec<String>, by: Dismisser) -> Self {
        Self {
            app_id,
            ids: None,
            keys: Some(keys),
            by,
        }
    }

    pub fn validate(self, config: &LedgerConfig) -> Result<ValidatedDismissal, ValidationError> {
        let target = match (self.ids, self.keys) {
            (Some(ids), None) if !ids.is_empty() => DismissTarget::Ids(ids),
            (None, Some(keys)) if !keys.is_empty() => DismissTarget::Keys(keys),
            (Some(_), Some(_)) => {
                return Err(ValidationError::new(
                    "ids",
                    ValidationCode::Invalid,
                    "provide either ids or keys, not both",
                ))
            }
            _ => {
                return Err(ValidationError::new(
                    "ids",
                    ValidationCode::Required,
                    "provide a non-empty list of ids or keys",
                ))
            }
        };

        let (field, batch) = match &target {
            DismissTarget::Ids(ids) => ("ids", ids.len()),
            DismissTarget::Keys(keys) => ("keys", keys.len()),
        };
        if batch > config.max_dismiss_batch {
            return Err(ValidationError::new(
                field,
                ValidationCode::TooLong,
                format!("at most {} entries per request", config.max_dismiss_batch),
            ));
        }

        let (dismissed_by, user_email) = match self.by {
            Dismisser::App(app_id) => {
                if app_id != self.app_id {
                    return Err(ValidationError::new(
                        "app",
                        ValidationCode::Invalid,
                        "an app can only dismiss its own problems",
                    ));
                }
                (DismissedBy::App, None)
            }
            Dismisser::User { email } => {
                if matches!(target, DismissTarget::Keys(_)) {
                    return Err(ValidationError::new(
                        "keys",
                        ValidationCode::Invalid,
                        "staff users dismiss by ids",
                    ));
                }
                let email = email.trim().to_string();
                if email.is_empty() || !email.contains('@') {
                    return Err(ValidationError::new(
                        "email",
                        ValidationCode::Invalid,
                        "a valid user email is required",
                    ));
                }
                (DismissedBy::User, Some(email))
            }
        };

        Ok(ValidatedDismissal {
            app_id: self.app_id,
            target,
            dismissed_by,
            user_email,
        })
    }
}

/// Records a dismissal applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DismissTarget {
    Ids(Vec<ProblemId>),
    Keys(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDismissal {
    pub app_id: AppId,
    pub target: DismissTarget,
    pub dismissed_by: DismissedBy,
    pub user_email: Option<String>,
}
