//! In-memory problem store.
//!
//! Tables live behind a single `RwLock`; each app additionally has an async
//! mutex in an [`AppLockRegistry`]. A transaction snapshots the app's rows
//! after taking its lock, stages writes against that snapshot, and replays
//! them under one table write lock on commit. Aggregations are replayed as
//! increments of the stored count, so a count bumped by someone else after
//! the snapshot was taken is never overwritten.

use crate::{
    AggregateUpdate, AppLockGuard, AppLockRegistry, DismissUpdate, ProblemFilter, ProblemStore,
    ProblemTransaction,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use triage_core::{
    compute_is_critical, select_oldest, App, AppId, EntityType, NewProblem, Problem, ProblemId,
    StorageError, TriageError, TriageResult,
};

#[derive(Debug, Default)]
struct Tables {
    apps: HashMap<AppId, App>,
    problems: HashMap<ProblemId, Problem>,
}

#[derive(Debug)]
struct StoreInner {
    tables: RwLock<Tables>,
    next_problem_id: AtomicI64,
    locks: AppLockRegistry,
}

impl StoreInner {
    fn read(&self) -> TriageResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| TriageError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> TriageResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| TriageError::Storage(StorageError::LockPoisoned))
    }

    fn allocate_id(&self) -> ProblemId {
        ProblemId(self.next_problem_id.fetch_add(1, Ordering::SeqCst))
    }
}

fn apply_aggregate(problem: &mut Problem, update: &AggregateUpdate) {
    problem.count = problem.count.saturating_add(1);
    problem.message = update.message.clone();
    problem.severity = update.severity;
    if let Some(aggregate) = &update.aggregate {
        problem.aggregate = Some(aggregate.clone());
    }
    problem.updated_at = update.updated_at;
    problem.is_critical = compute_is_critical(problem.count, update.critical_threshold);
}

fn apply_dismiss(problem: &mut Problem, update: &DismissUpdate) {
    problem.dismissed = true;
    problem.dismissed_by = Some(update.dismissed_by);
    problem.dismissed_by_user_email = update.user_email.clone();
}

fn newest_first(problems: &mut [Problem]) {
    problems.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(b.problem_id.cmp(&a.problem_id))
    });
}

fn app_not_found(app_id: AppId) -> TriageError {
    TriageError::Storage(StorageError::NotFound {
        entity_type: EntityType::App,
        id: app_id.to_string(),
    })
}

// ============================================================================
// STORE
// ============================================================================

/// In-memory store for tests, development and single-process deployments.
#[derive(Debug, Clone)]
pub struct InMemoryProblemStore {
    inner: Arc<StoreInner>,
}

impl Default for InMemoryProblemStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tables: RwLock::new(Tables::default()),
                next_problem_id: AtomicI64::new(1),
                locks: AppLockRegistry::new(),
            }),
        }
    }
}

impl InMemoryProblemStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a stored count directly, without the app lock.
    ///
    /// This is a raw table write, as a concurrent writer outside the ledger
    /// would issue it. Returns the new count.
    pub fn increment_count(&self, id: ProblemId, by: u32) -> TriageResult<u32> {
        let mut tables = self.inner.write()?;
        let problem = tables.problems.get_mut(&id).ok_or_else(|| {
            TriageError::Storage(StorageError::NotFound {
                entity_type: EntityType::Problem,
                id: id.to_string(),
            })
        })?;
        problem.count = problem.count.saturating_add(by);
        Ok(problem.count)
    }

    /// Get count of stored apps.
    pub fn app_count(&self) -> TriageResult<usize> {
        Ok(self.inner.read()?.apps.len())
    }

    /// Get count of stored problems across all apps.
    pub fn problem_total(&self) -> TriageResult<usize> {
        Ok(self.inner.read()?.problems.len())
    }

    /// Apps that currently have a lock entry.
    pub fn registered_locks(&self) -> usize {
        self.inner.locks.len()
    }
}

#[async_trait]
impl ProblemStore for InMemoryProblemStore {
    type Transaction = InMemoryTransaction;

    async fn app_insert(&self, app: &App) -> TriageResult<()> {
        let mut tables = self.inner.write()?;
        if tables.apps.contains_key(&app.app_id) {
            return Err(TriageError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::App,
                reason: "already exists".to_string(),
            }));
        }
        tables.apps.insert(app.app_id, app.clone());
        Ok(())
    }

    async fn app_get(&self, app_id: AppId) -> TriageResult<Option<App>> {
        Ok(self.inner.read()?.apps.get(&app_id).cloned())
    }

    async fn app_delete(&self, app_id: AppId) -> TriageResult<usize> {
        let guard = self.inner.locks.acquire(app_id).await;
        let removed = {
            let mut tables = self.inner.write()?;
            match tables.apps.remove(&app_id) {
                Some(_) => {
                    let before = tables.problems.len();
                    tables.problems.retain(|_, p| p.app_id != app_id);
                    Some(before - tables.problems.len())
                }
                None => None,
            }
        };
        self.inner.locks.release_and_forget(guard);
        removed.ok_or_else(|| app_not_found(app_id))
    }

    async fn begin(&self, app_id: AppId) -> TriageResult<InMemoryTransaction> {
        let guard = self.inner.locks.acquire(app_id).await;
        let view = {
            let tables = self.inner.read()?;
            tables.apps.contains_key(&app_id).then(|| {
                tables
                    .problems
                    .values()
                    .filter(|p| p.app_id == app_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
        };
        let Some(view) = view else {
            // No row to lock; keep unknown ids out of the registry.
            self.inner.locks.release_and_forget(guard);
            return Err(app_not_found(app_id));
        };
        Ok(InMemoryTransaction {
            inner: self.inner.clone(),
            app_id,
            guard,
            view,
            staged: Vec::new(),
        })
    }

    async fn problem_get(&self, id: ProblemId) -> TriageResult<Option<Problem>> {
        Ok(self.inner.read()?.problems.get(&id).cloned())
    }

    async fn problem_get_by_app_and_key(
        &self,
        app_id: AppId,
        key: &str,
    ) -> TriageResult<Vec<Problem>> {
        let tables = self.inner.read()?;
        let mut result: Vec<Problem> = tables
            .problems
            .values()
            .filter(|p| p.app_id == app_id && p.key.as_deref() == Some(key))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(b.problem_id.cmp(&a.problem_id))
        });
        Ok(result)
    }

    async fn problem_list_for_app(
        &self,
        app_id: AppId,
        filter: &ProblemFilter,
    ) -> TriageResult<Vec<Problem>> {
        let tables = self.inner.read()?;
        let mut result: Vec<Problem> = tables
            .problems
            .values()
            .filter(|p| p.app_id == app_id && (filter.include_dismissed || !p.dismissed))
            .cloned()
            .collect();
        newest_first(&mut result);
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn problem_count_for_app(&self, app_id: AppId) -> TriageResult<usize> {
        let tables = self.inner.read()?;
        Ok(tables.problems.values().filter(|p| p.app_id == app_id).count())
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

#[derive(Debug)]
enum StagedWrite {
    Delete(Vec<ProblemId>),
    Insert(Problem),
    Aggregate(ProblemId, AggregateUpdate),
    Dismiss(Vec<ProblemId>, DismissUpdate),
}

/// Transaction over one app's problems. Holds the app lock until dropped.
#[derive(Debug)]
pub struct InMemoryTransaction {
    inner: Arc<StoreInner>,
    app_id: AppId,
    guard: AppLockGuard,
    /// The app's rows as this transaction sees them.
    view: Vec<Problem>,
    staged: Vec<StagedWrite>,
}

impl InMemoryTransaction {
    /// Number of writes waiting for commit.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn view_mut(&mut self, id: ProblemId) -> Option<&mut Problem> {
        self.view.iter_mut().find(|p| p.problem_id == id)
    }
}

#[async_trait]
impl ProblemTransaction for InMemoryTransaction {
    fn app_id(&self) -> AppId {
        self.app_id
    }

    async fn count(&mut self) -> TriageResult<usize> {
        Ok(self.view.len())
    }

    async fn contains(&mut self, id: ProblemId) -> TriageResult<bool> {
        Ok(self.view.iter().any(|p| p.problem_id == id))
    }

    async fn latest_active_by_key(&mut self, key: &str) -> TriageResult<Option<Problem>> {
        Ok(self
            .view
            .iter()
            .filter(|p| p.accepts_key(key))
            .max_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then(a.problem_id.cmp(&b.problem_id))
            })
            .cloned())
    }

    async fn active_ids_by_keys(&mut self, keys: &[String]) -> TriageResult<Vec<ProblemId>> {
        let keys: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut ids: Vec<ProblemId> = self
            .view
            .iter()
            .filter(|p| !p.dismissed && p.key.as_deref().is_some_and(|k| keys.contains(k)))
            .map(|p| p.problem_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn oldest(&mut self, n: usize) -> TriageResult<Vec<ProblemId>> {
        Ok(select_oldest(&self.view, n))
    }

    async fn delete(&mut self, ids: &[ProblemId]) -> TriageResult<usize> {
        let doomed: HashSet<ProblemId> = ids.iter().copied().collect();
        let before = self.view.len();
        self.view.retain(|p| !doomed.contains(&p.problem_id));
        let deleted = before - self.view.len();
        if deleted > 0 {
            self.staged.push(StagedWrite::Delete(ids.to_vec()));
        }
        Ok(deleted)
    }

    async fn insert(&mut self, problem: NewProblem) -> TriageResult<ProblemId> {
        if problem.app_id != self.app_id {
            return Err(TriageError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Problem,
                reason: format!(
                    "problem for app {} inserted in transaction of app {}",
                    problem.app_id, self.app_id
                ),
            }));
        }
        let id = self.inner.allocate_id();
        let problem = problem.into_problem(id);
        self.view.push(problem.clone());
        self.staged.push(StagedWrite::Insert(problem));
        Ok(id)
    }

    async fn aggregate(&mut self, id: ProblemId, update: AggregateUpdate) -> TriageResult<()> {
        let problem = self.view_mut(id).ok_or_else(|| {
            TriageError::Storage(StorageError::NotFound {
                entity_type: EntityType::Problem,
                id: id.to_string(),
            })
        })?;
        apply_aggregate(problem, &update);
        self.staged.push(StagedWrite::Aggregate(id, update));
        Ok(())
    }

    async fn dismiss(
        &mut self,
        ids: &[ProblemId],
        update: DismissUpdate,
    ) -> TriageResult<Vec<ProblemId>> {
        let wanted: HashSet<ProblemId> = ids.iter().copied().collect();
        let mut changed = Vec::new();
        for problem in self.view.iter_mut() {
            if wanted.contains(&problem.problem_id) && !problem.dismissed {
                apply_dismiss(problem, &update);
                changed.push(problem.problem_id);
            }
        }
        changed.sort();
        if !changed.is_empty() {
            self.staged.push(StagedWrite::Dismiss(changed.clone(), update));
        }
        Ok(changed)
    }

    async fn commit(self) -> TriageResult<Vec<Problem>> {
        let InMemoryTransaction {
            inner,
            app_id,
            guard,
            staged,
            ..
        } = self;

        let writes = staged.len();
        let committed = {
            let mut tables = inner.write()?;

            // Check everything first so a failed commit applies nothing.
            if !tables.apps.contains_key(&app_id) {
                return Err(TriageError::Storage(StorageError::TransactionFailed {
                    reason: format!("app {} was deleted during the transaction", app_id),
                }));
            }
            for write in &staged {
                if let StagedWrite::Aggregate(id, _) = write {
                    if !tables.problems.contains_key(id) {
                        return Err(TriageError::Storage(StorageError::ProblemVanished { id: *id }));
                    }
                }
            }

            let mut touched = Vec::new();
            for write in staged {
                match write {
                    StagedWrite::Delete(ids) => {
                        for id in ids {
                            if tables.problems.get(&id).is_some_and(|p| p.app_id == app_id) {
                                tables.problems.remove(&id);
                            }
                        }
                    }
                    StagedWrite::Insert(problem) => {
                        touched.push(problem.problem_id);
                        tables.problems.insert(problem.problem_id, problem);
                    }
                    StagedWrite::Aggregate(id, update) => {
                        if let Some(problem) = tables.problems.get_mut(&id) {
                            apply_aggregate(problem, &update);
                            touched.push(id);
                        }
                    }
                    StagedWrite::Dismiss(ids, update) => {
                        for id in ids {
                            if let Some(problem) = tables.problems.get_mut(&id) {
                                apply_dismiss(problem, &update);
                                touched.push(id);
                            }
                        }
                    }
                }
            }

            // Read back under the same write lock, before the guard drops.
            touched.sort_unstable();
            touched.dedup();
            touched
                .into_iter()
                .filter_map(|id| tables.problems.get(&id).cloned())
                .collect::<Vec<_>>()
        };

        tracing::debug!(
            app_id = %app_id,
            writes,
            held_ms = guard.held_for().as_millis() as u64,
            "Transaction committed"
        );
        drop(guard);
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use std::num::NonZeroU32;
    use triage_core::{DismissedBy, ProblemType, Severity, Timestamp};

    fn make_app() -> App {
        App::new("Stripe payments", Utc::now())
    }

    fn make_new_problem(app_id: AppId, key: &str, created_at: Timestamp) -> NewProblem {
        NewProblem {
            app_id,
            problem_type: ProblemType::Own,
            key: Some(key.to_string()),
            message: format!("problem {}", key),
            aggregate: None,
            severity: Severity::Error,
            is_critical: false,
            created_at,
        }
    }

    fn make_update(at: Timestamp, threshold: Option<u32>) -> AggregateUpdate {
        AggregateUpdate {
            message: "again".to_string(),
            severity: Severity::Warning,
            aggregate: None,
            critical_threshold: threshold.and_then(NonZeroU32::new),
            updated_at: at,
        }
    }

    async fn store_with_app() -> (InMemoryProblemStore, AppId) {
        let store = InMemoryProblemStore::new();
        let app = make_app();
        store.app_insert(&app).await.unwrap();
        (store, app.app_id)
    }

    async fn insert_committed(store: &InMemoryProblemStore, app_id: AppId, key: &str) -> ProblemId {
        let mut tx = store.begin(app_id).await.unwrap();
        let id = tx.insert(make_new_problem(app_id, key, Utc::now())).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    // ========================================================================
    // App Tests
    // ========================================================================

    #[tokio::test]
    async fn test_app_insert_get() {
        let (store, app_id) = store_with_app().await;
        let app = store.app_get(app_id).await.unwrap();
        assert_eq!(app.unwrap().app_id, app_id);
    }

    #[tokio::test]
    async fn test_app_insert_duplicate() {
        let store = InMemoryProblemStore::new();
        let app = make_app();
        store.app_insert(&app).await.unwrap();
        let result = store.app_insert(&app).await;
        assert!(matches!(
            result,
            Err(TriageError::Storage(StorageError::InsertFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_begin_unknown_app_fails() {
        let store = InMemoryProblemStore::new();
        let result = store.begin(AppId::new()).await;
        assert!(matches!(
            result,
            Err(TriageError::Storage(StorageError::NotFound { entity_type: EntityType::App, .. }))
        ));
        assert_eq!(store.registered_locks(), 0);
    }

    #[tokio::test]
    async fn test_app_delete_cascades() {
        let (store, app_id) = store_with_app().await;
        let other = make_app();
        store.app_insert(&other).await.unwrap();

        insert_committed(&store, app_id, "k1").await;
        insert_committed(&store, app_id, "k2").await;
        let survivor = insert_committed(&store, other.app_id, "k1").await;

        let removed = store.app_delete(app_id).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.problem_count_for_app(app_id).await.unwrap(), 0);
        assert!(store.app_get(app_id).await.unwrap().is_none());
        assert!(store.problem_get(survivor).await.unwrap().is_some());
        assert_eq!(store.problem_total().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queued_begin_after_delete_leaves_no_lock() {
        let (store, app_id) = store_with_app().await;
        let app = store.app_get(app_id).await.unwrap().unwrap();
        let tx = store.begin(app_id).await.unwrap();

        let deleter = {
            let store = store.clone();
            tokio::spawn(async move { store.app_delete(app_id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let queued = {
            let store = store.clone();
            tokio::spawn(async move { store.begin(app_id).await.map(|tx| tx.app_id()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        drop(tx);
        assert_eq!(deleter.await.unwrap().unwrap(), 0);
        assert!(matches!(
            queued.await.unwrap(),
            Err(TriageError::Storage(StorageError::NotFound { entity_type: EntityType::App, .. }))
        ));
        assert_eq!(store.registered_locks(), 0);

        // The id is usable again once nobody queues on the old mutex.
        store.app_insert(&app).await.unwrap();
        let tx = store.begin(app_id).await.unwrap();
        assert_eq!(store.registered_locks(), 1);
        assert!(store.inner.locks.try_acquire(app_id).is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_app_delete_unknown_fails() {
        let store = InMemoryProblemStore::new();
        assert!(store.app_delete(AppId::new()).await.is_err());
        assert_eq!(store.registered_locks(), 0);
    }

    // ========================================================================
    // Transaction Tests
    // ========================================================================

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, app_id) = store_with_app().await;
        let mut tx = store.begin(app_id).await.unwrap();
        let id = tx.insert(make_new_problem(app_id, "k1", Utc::now())).await.unwrap();

        assert_eq!(tx.count().await.unwrap(), 1);
        assert!(store.problem_get(id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.problem_get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_rolls_back_everything() {
        let (store, app_id) = store_with_app().await;
        let old = insert_committed(&store, app_id, "k1").await;

        {
            let mut tx = store.begin(app_id).await.unwrap();
            tx.delete_oldest(1).await.unwrap();
            tx.insert(make_new_problem(app_id, "k2", Utc::now())).await.unwrap();
            assert_eq!(tx.staged_len(), 2);
            // dropped without commit
        }

        assert!(store.problem_get(old).await.unwrap().is_some());
        assert_eq!(store.problem_count_for_app(app_id).await.unwrap(), 1);
        // The lock was released by the drop.
        let tx = store.begin(app_id).await.unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_insert_for_other_app_rejected() {
        let (store, app_id) = store_with_app().await;
        let mut tx = store.begin(app_id).await.unwrap();
        let result = tx.insert(make_new_problem(AppId::new(), "k1", Utc::now())).await;
        assert!(result.is_err());
        assert_eq!(tx.staged_len(), 0);
    }

    #[tokio::test]
    async fn test_latest_active_by_key_skips_dismissed() {
        let (store, app_id) = store_with_app().await;
        let first = insert_committed(&store, app_id, "k1").await;

        let mut tx = store.begin(app_id).await.unwrap();
        let update = DismissUpdate {
            dismissed_by: DismissedBy::App,
            user_email: None,
        };
        assert_eq!(tx.dismiss(&[first], update).await.unwrap(), vec![first]);
        assert!(tx.latest_active_by_key("k1").await.unwrap().is_none());
        tx.commit().await.unwrap();

        let stored = store.problem_get(first).await.unwrap().unwrap();
        assert!(stored.dismissed);
        assert_eq!(stored.dismissed_by, Some(DismissedBy::App));
    }

    #[tokio::test]
    async fn test_dismiss_is_idempotent() {
        let (store, app_id) = store_with_app().await;
        let id = insert_committed(&store, app_id, "k1").await;
        let update = DismissUpdate {
            dismissed_by: DismissedBy::User,
            user_email: Some("staff@example.com".to_string()),
        };

        let mut tx = store.begin(app_id).await.unwrap();
        assert_eq!(tx.dismiss(&[id], update.clone()).await.unwrap().len(), 1);
        assert!(tx.dismiss(&[id], update).await.unwrap().is_empty());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_oldest_orders_by_created_then_id() {
        let (store, app_id) = store_with_app().await;
        let base = Utc::now();
        let mut tx = store.begin(app_id).await.unwrap();
        let newest = tx.insert(make_new_problem(app_id, "k1", base)).await.unwrap();
        let tie_a = tx
            .insert(make_new_problem(app_id, "k2", base - Duration::minutes(5)))
            .await
            .unwrap();
        let tie_b = tx
            .insert(make_new_problem(app_id, "k3", base - Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(tx.oldest(2).await.unwrap(), vec![tie_a, tie_b]);
        assert_eq!(tx.oldest(10).await.unwrap().last(), Some(&newest));
    }

    #[tokio::test]
    async fn test_aggregate_increments_stored_count_at_commit() {
        let (store, app_id) = store_with_app().await;
        let id = insert_committed(&store, app_id, "k1").await;

        let mut tx = store.begin(app_id).await.unwrap();
        let seen = tx.latest_active_by_key("k1").await.unwrap().unwrap();
        assert_eq!(seen.count, 1);

        // Someone else bumps the stored row after our snapshot.
        assert_eq!(store.increment_count(id, 10).unwrap(), 11);

        tx.aggregate(id, make_update(Utc::now(), Some(5))).await.unwrap();
        let committed = tx.commit().await.unwrap();

        let stored = store.problem_get(id).await.unwrap().unwrap();
        assert_eq!(committed, vec![stored.clone()]);
        assert_eq!(stored.count, 12);
        assert!(stored.is_critical);
        assert_eq!(stored.message, "again");
        assert_eq!(stored.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_commit_returns_touched_rows() {
        let (store, app_id) = store_with_app().await;
        let evicted = insert_committed(&store, app_id, "k1").await;
        let dismissed = insert_committed(&store, app_id, "k2").await;

        let mut tx = store.begin(app_id).await.unwrap();
        tx.delete(&[evicted]).await.unwrap();
        let update = DismissUpdate {
            dismissed_by: DismissedBy::App,
            user_email: None,
        };
        tx.dismiss(&[dismissed], update).await.unwrap();
        let created = tx.insert(make_new_problem(app_id, "k3", Utc::now())).await.unwrap();
        let committed = tx.commit().await.unwrap();

        let ids: Vec<ProblemId> = committed.iter().map(|p| p.problem_id).collect();
        assert_eq!(ids, vec![dismissed, created]);
        assert!(committed[0].dismissed);
        assert_eq!(committed[1].count, 1);
    }

    #[tokio::test]
    async fn test_aggregate_keeps_label_when_absent() {
        let (store, app_id) = store_with_app().await;
        let mut tx = store.begin(app_id).await.unwrap();
        let mut new_problem = make_new_problem(app_id, "k1", Utc::now());
        new_problem.aggregate = Some("webhooks".to_string());
        let id = tx.insert(new_problem).await.unwrap();
        tx.aggregate(id, make_update(Utc::now(), None)).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.problem_get(id).await.unwrap().unwrap();
        assert_eq!(stored.aggregate.as_deref(), Some("webhooks"));
        assert_eq!(stored.count, 2);
        assert!(!stored.is_critical);
    }

    #[tokio::test]
    async fn test_commit_fails_when_target_vanished() {
        let (store, app_id) = store_with_app().await;
        let id = insert_committed(&store, app_id, "k1").await;

        let mut tx = store.begin(app_id).await.unwrap();
        tx.aggregate(id, make_update(Utc::now(), None)).await.unwrap();
        tx.insert(make_new_problem(app_id, "k2", Utc::now())).await.unwrap();

        // Remove the row behind the transaction's back.
        store.inner.write().unwrap().problems.remove(&id);

        let result = tx.commit().await;
        assert!(matches!(
            result,
            Err(TriageError::Storage(StorageError::ProblemVanished { .. }))
        ));
        // Nothing from the failed commit leaked in.
        assert_eq!(store.problem_count_for_app(app_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_for_app_newest_first_with_filter() {
        let (store, app_id) = store_with_app().await;
        let base = Utc::now();
        let mut tx = store.begin(app_id).await.unwrap();
        let old = tx
            .insert(make_new_problem(app_id, "k1", base - Duration::minutes(2)))
            .await
            .unwrap();
        let mid = tx
            .insert(make_new_problem(app_id, "k2", base - Duration::minutes(1)))
            .await
            .unwrap();
        let new = tx.insert(make_new_problem(app_id, "k3", base)).await.unwrap();
        tx.dismiss(
            &[mid],
            DismissUpdate {
                dismissed_by: DismissedBy::App,
                user_email: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let all = store
            .problem_list_for_app(app_id, &ProblemFilter::default())
            .await
            .unwrap();
        let ids: Vec<ProblemId> = all.iter().map(|p| p.problem_id).collect();
        assert_eq!(ids, vec![new, mid, old]);

        let active = store
            .problem_list_for_app(
                app_id,
                &ProblemFilter {
                    include_dismissed: false,
                    limit: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].problem_id, new);
    }

    #[tokio::test]
    async fn test_get_by_app_and_key() {
        let (store, app_id) = store_with_app().await;
        insert_committed(&store, app_id, "k1").await;
        insert_committed(&store, app_id, "k1").await;
        insert_committed(&store, app_id, "k2").await;

        let found = store.problem_get_by_app_and_key(app_id, "k1").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].problem_id > found[1].problem_id);
    }

    #[tokio::test]
    async fn test_active_ids_by_keys() {
        let (store, app_id) = store_with_app().await;
        let a = insert_committed(&store, app_id, "k1").await;
        let b = insert_committed(&store, app_id, "k2").await;
        insert_committed(&store, app_id, "k3").await;

        let mut tx = store.begin(app_id).await.unwrap();
        let ids = tx
            .active_ids_by_keys(&["k1".to_string(), "k2".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec![a, b]);
    }

    // ========================================================================
    // Property Tests
    // ========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Deleting the n oldest always removes exactly min(n, len) rows and
        /// never a row newer than one that survives.
        #[test]
        fn prop_delete_oldest_removes_prefix(len in 0usize..30, n in 0usize..40) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let (store, app_id) = store_with_app().await;
                let base = Utc::now();
                let mut tx = store.begin(app_id).await.unwrap();
                for i in 0..len {
                    let created = base + Duration::seconds(i as i64);
                    tx.insert(make_new_problem(app_id, &format!("key{}", i), created)).await.unwrap();
                }
                let evicted = tx.delete_oldest(n).await.unwrap();
                tx.commit().await.unwrap();

                assert_eq!(evicted.len(), n.min(len));
                let survivors = store
                    .problem_list_for_app(app_id, &ProblemFilter::default())
                    .await
                    .unwrap();
                assert_eq!(survivors.len(), len - n.min(len));
                if let Some(oldest_survivor) = survivors.last() {
                    for id in &evicted {
                        assert!(*id < oldest_survivor.problem_id);
                    }
                }
            });
        }
    }
}
