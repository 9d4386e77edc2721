//! Core entity structures

use crate::{AppId, DismissedBy, ProblemId, ProblemType, Severity, Timestamp};
use serde::{Deserialize, Serialize};

/// An installed app. Owns zero or more problem records; deleting it
/// deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub app_id: AppId,
    pub name: String,
    pub is_active: bool,
    pub created_at: Timestamp,
}

impl App {
    pub fn new(name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            app_id: AppId::new(),
            name: name.into(),
            is_active: true,
            created_at,
        }
    }
}

/// One operational problem reported for an app, possibly aggregating
/// several reports that shared the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub problem_id: ProblemId,
    pub app_id: AppId,
    pub problem_type: ProblemType,
    pub key: Option<String>,
    pub message: String,
    pub aggregate: Option<String>,
    pub severity: Severity,
    /// Number of reports merged into this record. Always >= 1.
    pub count: u32,
    pub is_critical: bool,
    pub dismissed: bool,
    pub dismissed_by: Option<DismissedBy>,
    pub dismissed_by_user_email: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Problem {
    /// Whether this record can still absorb reports carrying `key`.
    pub fn accepts_key(&self, key: &str) -> bool {
        !self.dismissed && self.key.as_deref() == Some(key)
    }
}

/// A problem record about to be inserted. The store assigns the id and
/// starts the count at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProblem {
    pub app_id: AppId,
    pub problem_type: ProblemType,
    pub key: Option<String>,
    pub message: String,
    pub aggregate: Option<String>,
    pub severity: Severity,
    pub is_critical: bool,
    pub created_at: Timestamp,
}

impl NewProblem {
    pub fn into_problem(self, problem_id: ProblemId) -> Problem {
        Problem {
            problem_id,
            app_id: self.app_id,
            problem_type: self.problem_type,
            key: self.key,
            message: self.message,
            aggregate: self.aggregate,
            severity: self.severity,
            count: 1,
            is_critical: self.is_critical,
            dismissed: false,
            dismissed_by: None,
            dismissed_by_user_email: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_new_problem(key: Option<&str>) -> NewProblem {
        NewProblem {
            app_id: AppId::new(),
            problem_type: ProblemType::Own,
            key: key.map(str::to_string),
            message: "webhook delivery failed".to_string(),
            aggregate: None,
            severity: Severity::Error,
            is_critical: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_into_problem_starts_at_count_one() {
        let new_problem = make_new_problem(Some("webhook"));
        let created_at = new_problem.created_at;
        let problem = new_problem.into_problem(ProblemId(9));

        assert_eq!(problem.problem_id, ProblemId(9));
        assert_eq!(problem.count, 1);
        assert!(!problem.dismissed);
        assert_eq!(problem.updated_at, created_at);
    }

    #[test]
    fn test_dismissed_problem_rejects_key() {
        let mut problem = make_new_problem(Some("webhook")).into_problem(ProblemId(1));
        assert!(problem.accepts_key("webhook"));
        assert!(!problem.accepts_key("other"));

        problem.dismissed = true;
        assert!(!problem.accepts_key("webhook"));
    }

    #[test]
    fn test_keyless_problem_never_accepts() {
        let problem = make_new_problem(None).into_problem(ProblemId(1));
        assert!(!problem.accepts_key("webhook"));
    }
}
