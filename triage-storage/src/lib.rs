//! TRIAGE Storage - Store Traits and In-Memory Implementation
//!
//! Defines the storage abstraction for apps and their problem records.
//! Writes to an app's problems only happen inside a [`ProblemTransaction`],
//! which holds that app's exclusive lock from [`ProblemStore::begin`] until
//! it is committed or dropped. Dropping without commit rolls back.

pub mod lock_registry;
pub mod memory;

pub use lock_registry::{AppLockGuard, AppLockRegistry};
pub use memory::{InMemoryProblemStore, InMemoryTransaction};

use async_trait::async_trait;
use std::num::NonZeroU32;
use triage_core::{
    App, AppId, DismissedBy, NewProblem, Problem, ProblemId, Severity, Timestamp, TriageResult,
};

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Fold one more report into an existing record.
///
/// The count is not carried here: the store increments whatever count is
/// stored when the transaction commits, and recomputes `is_critical` from
/// that value and `critical_threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateUpdate {
    pub message: String,
    pub severity: Severity,
    /// Replaces the stored label only when present.
    pub aggregate: Option<String>,
    pub critical_threshold: Option<NonZeroU32>,
    pub updated_at: Timestamp,
}

/// Mark records as dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DismissUpdate {
    pub dismissed_by: DismissedBy,
    pub user_email: Option<String>,
}

/// Options for listing an app's problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemFilter {
    pub include_dismissed: bool,
    pub limit: Option<usize>,
}

impl Default for ProblemFilter {
    fn default() -> Self {
        Self {
            include_dismissed: true,
            limit: None,
        }
    }
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Persistence for apps and problem records.
///
/// Read methods take no lock and may observe a snapshot that is already
/// stale. Every write to problem rows goes through [`ProblemStore::begin`].
#[async_trait]
pub trait ProblemStore: Send + Sync {
    type Transaction: ProblemTransaction;

    // === App Operations ===

    /// Insert a new app.
    async fn app_insert(&self, app: &App) -> TriageResult<()>;

    /// Get an app by ID.
    async fn app_get(&self, app_id: AppId) -> TriageResult<Option<App>>;

    /// Delete an app and, in cascade, all of its problems. Waits for the
    /// app lock. Returns the number of problems removed.
    async fn app_delete(&self, app_id: AppId) -> TriageResult<usize>;

    // === Guarded Writes ===

    /// Open a transaction on `app_id`, waiting for its exclusive lock.
    /// Fails with `StorageError::NotFound` if the app does not exist.
    async fn begin(&self, app_id: AppId) -> TriageResult<Self::Transaction>;

    // === Lock-free Reads ===

    /// Get a problem by ID.
    async fn problem_get(&self, id: ProblemId) -> TriageResult<Option<Problem>>;

    /// All problems of an app sharing `key`, most recently updated first.
    async fn problem_get_by_app_and_key(&self, app_id: AppId, key: &str)
        -> TriageResult<Vec<Problem>>;

    /// Problems of an app, newest first.
    async fn problem_list_for_app(
        &self,
        app_id: AppId,
        filter: &ProblemFilter,
    ) -> TriageResult<Vec<Problem>>;

    /// Number of problems stored for an app, dismissed ones included.
    async fn problem_count_for_app(&self, app_id: AppId) -> TriageResult<usize>;
}

/// Writes to one app's problems under that app's exclusive lock.
///
/// Reads inside the transaction see its own staged writes. Nothing becomes
/// visible to other readers until [`ProblemTransaction::commit`]; dropping
/// the transaction discards every staged write and releases the lock.
#[async_trait]
pub trait ProblemTransaction: Send {
    /// The locked app.
    fn app_id(&self) -> AppId;

    /// Number of problems for the app, dismissed ones included.
    async fn count(&mut self) -> TriageResult<usize>;

    /// Whether `id` is one of this app's problems.
    async fn contains(&mut self, id: ProblemId) -> TriageResult<bool>;

    /// Most recently updated non-dismissed problem carrying `key`.
    async fn latest_active_by_key(&mut self, key: &str) -> TriageResult<Option<Problem>>;

    /// Ids of non-dismissed problems carrying any of `keys`.
    async fn active_ids_by_keys(&mut self, keys: &[String]) -> TriageResult<Vec<ProblemId>>;

    /// The `n` oldest problems by `created_at`, ties broken by id.
    async fn oldest(&mut self, n: usize) -> TriageResult<Vec<ProblemId>>;

    /// Delete problems of this app. Ids that are absent or belong to
    /// another app are ignored. Returns how many were deleted.
    async fn delete(&mut self, ids: &[ProblemId]) -> TriageResult<usize>;

    /// Insert a new problem; the store assigns its id.
    async fn insert(&mut self, problem: NewProblem) -> TriageResult<ProblemId>;

    /// Atomically increment the count of `id` and apply `update`.
    async fn aggregate(&mut self, id: ProblemId, update: AggregateUpdate) -> TriageResult<()>;

    /// Dismiss problems of this app that are not dismissed yet. Returns the
    /// ids that changed.
    async fn dismiss(
        &mut self,
        ids: &[ProblemId],
        update: DismissUpdate,
    ) -> TriageResult<Vec<ProblemId>>;

    /// Make every staged write visible at once and release the lock.
    ///
    /// Returns the committed rows of every inserted, aggregated or dismissed
    /// problem, ordered by id, as they stood when the lock was released.
    async fn commit(self) -> TriageResult<Vec<Problem>>;

    /// Delete the `n` oldest problems. Returns the evicted ids.
    async fn delete_oldest(&mut self, n: usize) -> TriageResult<Vec<ProblemId>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let ids = self.oldest(n).await?;
        self.delete(&ids).await?;
        Ok(ids)
    }
}
