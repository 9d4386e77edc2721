//! Per-app record cap.

use triage_core::{eviction_count, ProblemId, TriageResult};
use triage_storage::ProblemTransaction;

/// Make room for one more record under `max_per_app`.
///
/// Runs inside the caller's transaction, before the insert. The oldest
/// records go first (created_at, then id), dismissed ones included.
/// Returns the evicted ids.
pub async fn enforce_cap<T>(tx: &mut T, max_per_app: usize) -> TriageResult<Vec<ProblemId>>
where
    T: ProblemTransaction + ?Sized,
{
    let current = tx.count().await?;
    let excess = eviction_count(current, max_per_app);
    if excess == 0 {
        return Ok(Vec::new());
    }

    let evicted = tx.delete_oldest(excess).await?;
    tracing::debug!(
        app_id = %tx.app_id(),
        current,
        max_per_app,
        evicted = evicted.len(),
        "Evicted oldest problems"
    );
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::{App, NewProblem, ProblemType, Severity};
    use triage_storage::{InMemoryProblemStore, ProblemStore};

    async fn seeded(n: usize) -> (InMemoryProblemStore, triage_core::AppId, Vec<ProblemId>) {
        let store = InMemoryProblemStore::new();
        let app = App::new("Avalara", chrono::Utc::now());
        store.app_insert(&app).await.unwrap();

        let base = chrono::Utc::now();
        let mut tx = store.begin(app.app_id).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = tx
                .insert(NewProblem {
                    app_id: app.app_id,
                    problem_type: ProblemType::Own,
                    key: None,
                    message: format!("tax sync failed #{}", i),
                    aggregate: None,
                    severity: Severity::Error,
                    is_critical: false,
                    created_at: base + chrono::Duration::seconds(i as i64),
                })
                .await
                .unwrap();
            ids.push(id);
        }
        tx.commit().await.unwrap();
        (store, app.app_id, ids)
    }

    #[tokio::test]
    async fn test_under_cap_evicts_nothing() {
        let (store, app_id, _) = seeded(3).await;
        let mut tx = store.begin(app_id).await.unwrap();
        assert!(enforce_cap(&mut tx, 5).await.unwrap().is_empty());
        assert_eq!(tx.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_at_cap_evicts_oldest() {
        let (store, app_id, ids) = seeded(3).await;
        let mut tx = store.begin(app_id).await.unwrap();
        let evicted = enforce_cap(&mut tx, 3).await.unwrap();
        assert_eq!(evicted, vec![ids[0]]);
        assert_eq!(tx.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_over_cap_repairs_to_room_for_one() {
        let (store, app_id, ids) = seeded(6).await;
        let mut tx = store.begin(app_id).await.unwrap();
        let evicted = enforce_cap(&mut tx, 2).await.unwrap();
        assert_eq!(evicted, ids[..5].to_vec());
        assert_eq!(tx.count().await.unwrap(), 1);
    }
}
