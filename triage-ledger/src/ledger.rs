//! The problem ledger service.
//!
//! Every operation that writes problem rows opens a transaction on the app,
//! which waits for that app's exclusive lock. Request validation happens
//! before the lock is taken.

use crate::aggregation::{aggregate_or_create, ReportOutcome};
use std::sync::Arc;
use tracing::instrument;
use triage_core::{
    App, AppId, Clock, DismissRequest, DismissTarget, EntityType, LedgerConfig, Problem,
    ProblemId, ProblemReport, StorageError, SystemClock, TriageResult, ValidatedReport,
    ValidationCode, ValidationError,
};
use triage_storage::{DismissUpdate, ProblemFilter, ProblemStore, ProblemTransaction};

/// Records, aggregates and evicts problems reported by apps.
pub struct ProblemLedger<S: ProblemStore> {
    store: Arc<S>,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
}

impl<S: ProblemStore> Clone for ProblemLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: ProblemStore> std::fmt::Debug for ProblemLedger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ProblemStore> ProblemLedger<S> {
    /// Create a ledger on the wall clock.
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(store),
            config,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Register a new app.
    #[instrument(skip(self, name))]
    pub async fn register_app(&self, name: &str) -> TriageResult<App> {
        let name = name.trim();
        if name.is_empty() {
            return Err(
                ValidationError::new("name", ValidationCode::Required, "app name is required")
                    .into(),
            );
        }
        let app = App::new(name, self.clock.now());
        self.store.app_insert(&app).await?;
        tracing::info!(app_id = %app.app_id, "App registered");
        Ok(app)
    }

    /// Record a problem reported by the app itself.
    ///
    /// Validation errors are returned before the app lock is taken, so a
    /// rejected report never touches a row.
    #[instrument(skip(self, report), fields(key = ?report.key))]
    pub async fn report_problem(
        &self,
        app_id: AppId,
        report: ProblemReport,
    ) -> TriageResult<Problem> {
        let report = report.validate(&self.config).map_err(|err| {
            tracing::debug!(
                app_id = %app_id,
                field = %err.field,
                code = %err.code,
                "Report rejected"
            );
            err
        })?;
        self.record(app_id, report).await
    }

    /// Record a problem raised when the platform stops delivering to an app.
    #[instrument(skip(self, message))]
    pub async fn report_circuit_breaker_problem(
        &self,
        app_id: AppId,
        key: &str,
        message: &str,
    ) -> TriageResult<Problem> {
        let report = ValidatedReport::circuit_breaker(key, message, &self.config);
        self.record(app_id, report).await
    }

    /// Run a validated report under the app lock and return the row as it
    /// was committed.
    pub async fn record(&self, app_id: AppId, report: ValidatedReport) -> TriageResult<Problem> {
        let mut tx = self.store.begin(app_id).await?;
        let now = self.clock.now();
        let outcome =
            aggregate_or_create(&mut tx, &report, now, self.config.max_problems_per_app).await?;
        let committed = tx.commit().await?;

        match &outcome {
            ReportOutcome::Aggregated { problem_id } => {
                tracing::debug!(app_id = %app_id, problem_id = %problem_id, "Problem aggregated");
            }
            ReportOutcome::Created {
                problem_id,
                evicted,
            } => {
                tracing::debug!(
                    app_id = %app_id,
                    problem_id = %problem_id,
                    evicted = evicted.len(),
                    "Problem created"
                );
            }
        }

        let problem_id = outcome.problem_id();
        committed
            .into_iter()
            .find(|p| p.problem_id == problem_id)
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity_type: EntityType::Problem,
                    id: problem_id.to_string(),
                }
                .into()
            })
    }

    /// Dismiss problems by ids or by keys. Returns the ids that changed;
    /// records that were already dismissed are left as they are.
    #[instrument(skip(self, request), fields(app_id = %request.app_id))]
    pub async fn dismiss_problems(&self, request: DismissRequest) -> TriageResult<Vec<ProblemId>> {
        let dismissal = request.validate(&self.config)?;

        let mut tx = self.store.begin(dismissal.app_id).await?;
        let ids = match dismissal.target {
            DismissTarget::Ids(ids) => {
                for id in &ids {
                    if !tx.contains(*id).await? {
                        return Err(ValidationError::new(
                            "ids",
                            ValidationCode::NotFound,
                            format!("problem {} does not belong to this app", id),
                        )
                        .into());
                    }
                }
                ids
            }
            DismissTarget::Keys(keys) => tx.active_ids_by_keys(&keys).await?,
        };

        let dismissed = tx
            .dismiss(
                &ids,
                DismissUpdate {
                    dismissed_by: dismissal.dismissed_by,
                    user_email: dismissal.user_email,
                },
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            app_id = %dismissal.app_id,
            dismissed = dismissed.len(),
            by = %dismissal.dismissed_by,
            "Problems dismissed"
        );
        Ok(dismissed)
    }

    /// An app's problems, newest first. Takes no lock.
    pub async fn list_problems(
        &self,
        app_id: AppId,
        filter: &ProblemFilter,
    ) -> TriageResult<Vec<Problem>> {
        self.store.problem_list_for_app(app_id, filter).await
    }

    /// Delete an app and all of its problems. Returns how many problems went.
    #[instrument(skip(self))]
    pub async fn delete_app(&self, app_id: AppId) -> TriageResult<usize> {
        let removed = self.store.app_delete(app_id).await?;
        tracing::info!(app_id = %app_id, removed, "App deleted");
        Ok(removed)
    }
}
