//! Hierarchical budget pool manager (§4.4)
//!
//! Consumption propagates parent-ward; concurrent consumes on the same pool
//! are serialized by an in-process mutex keyed by pool id, mirroring this
//! codebase's repository pattern of pairing an in-memory guard with a
//! per-row `UPDATE ... WHERE id = ? AND status = 'active'` write.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, WorkflowError};
use crate::model::{BudgetPool, BudgetPoolStatus};
use crate::store::Store;

/// Guards per-pool consume/increase operations against lost updates.
///
/// Locks are always acquired root-to-leaf (parent before child) so that a
/// chain `consume(child)` → `consume(parent)` can never deadlock against a
/// sibling chain doing the reverse.
#[derive(Default)]
struct PoolLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PoolLocks {
    async fn lock_for(&self, pool_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(pool_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Manages budget pool lifecycle and consumption against a [`Store`].
pub struct BudgetManager {
    store: Arc<dyn Store>,
    locks: PoolLocks,
}

impl BudgetManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, locks: PoolLocks::default() }
    }

    /// Create a pool. Rejects a `parent_id` that would introduce a cycle in
    /// the ancestor chain.
    pub async fn create(
        &self,
        id: impl Into<String>,
        total_budget: i64,
        parent_id: Option<String>,
    ) -> Result<BudgetPool> {
        let id = id.into();
        if let Some(parent) = &parent_id {
            self.assert_no_cycle(&id, parent).await?;
        }
        let pool = BudgetPool::new(id, total_budget, parent_id);
        self.store.create_budget_pool(&pool).await?;
        info!(pool_id = %pool.id, total_budget, "budget pool created");
        Ok(pool)
    }

    async fn assert_no_cycle(&self, new_id: &str, start_parent: &str) -> Result<()> {
        let mut current = Some(start_parent.to_string());
        while let Some(ancestor_id) = current {
            if ancestor_id == new_id {
                return Err(WorkflowError::Config(format!(
                    "budget pool cycle detected: {} would be its own ancestor",
                    new_id
                )));
            }
            let ancestor = self.store.get_budget_pool(&ancestor_id).await?;
            current = ancestor.and_then(|p| p.parent_pool_id);
        }
        Ok(())
    }

    pub async fn get(&self, pool_id: &str) -> Result<BudgetPool> {
        self.store
            .get_budget_pool(pool_id)
            .await?
            .ok_or_else(|| WorkflowError::PoolNotFound(pool_id.to_string()))
    }

    pub async fn get_children(&self, pool_id: &str) -> Result<Vec<BudgetPool>> {
        self.store.get_budget_pool_children(pool_id).await
    }

    /// Non-mutating affordability check.
    pub async fn check(&self, pool_id: &str, amount: i64) -> Result<bool> {
        let pool = self.get(pool_id).await?;
        Ok(pool.status == BudgetPoolStatus::Active && pool.remaining_budget >= amount)
    }

    /// Consume `amount` from `pool_id`, propagating to its parent chain.
    pub async fn consume(&self, pool_id: &str, amount: i64) -> Result<BudgetPool> {
        let guard = self.locks.lock_for(pool_id).await;
        let _held = guard.lock().await;

        let mut pool = self.get(pool_id).await?;
        if pool.status != BudgetPoolStatus::Active {
            return Err(WorkflowError::PoolInactive(pool_id.to_string()));
        }
        if pool.remaining_budget < amount {
            warn!(pool_id, amount, remaining = pool.remaining_budget, "budget exhausted");
            return Err(WorkflowError::BudgetExhausted(pool_id.to_string()));
        }

        pool.used_budget += amount;
        pool.remaining_budget -= amount;
        pool.status = if pool.remaining_budget <= 0 {
            BudgetPoolStatus::Exhausted
        } else {
            BudgetPoolStatus::Active
        };
        self.store.update_budget_pool(&pool).await?;
        info!(pool_id, amount, remaining = pool.remaining_budget, "budget consumed");

        let parent_id = pool.parent_pool_id.clone();
        // `_held` is released when this frame returns, after the recursive
        // call on the parent lock completes — preserves root-to-leaf order
        // for the duration of this consume chain.
        if let Some(parent_id) = parent_id {
            Box::pin(self.consume(&parent_id, amount)).await?;
        }

        Ok(pool)
    }

    pub async fn increase(&self, pool_id: &str, amount: i64) -> Result<BudgetPool> {
        let guard = self.locks.lock_for(pool_id).await;
        let _held = guard.lock().await;

        let mut pool = self.get(pool_id).await?;
        pool.total_budget += amount;
        pool.remaining_budget += amount;
        if pool.remaining_budget > 0 && pool.status == BudgetPoolStatus::Exhausted {
            pool.status = BudgetPoolStatus::Active;
        }
        self.store.update_budget_pool(&pool).await?;
        info!(pool_id, amount, "budget increased");
        Ok(pool)
    }

    pub async fn suspend(&self, pool_id: &str) -> Result<BudgetPool> {
        let guard = self.locks.lock_for(pool_id).await;
        let _held = guard.lock().await;

        let mut pool = self.get(pool_id).await?;
        pool.status = BudgetPoolStatus::Suspended;
        self.store.update_budget_pool(&pool).await?;
        Ok(pool)
    }

    /// Moves `suspended -> active` only if budget remains.
    pub async fn reactivate(&self, pool_id: &str) -> Result<BudgetPool> {
        let guard = self.locks.lock_for(pool_id).await;
        let _held = guard.lock().await;

        let mut pool = self.get(pool_id).await?;
        if pool.status == BudgetPoolStatus::Suspended && pool.remaining_budget > 0 {
            pool.status = BudgetPoolStatus::Active;
            self.store.update_budget_pool(&pool).await?;
        }
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::{Database, SqliteStore};

    async fn manager() -> BudgetManager {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        BudgetManager::new(Arc::new(SqliteStore::new(db)))
    }

    #[tokio::test]
    async fn consume_updates_balance_and_stays_balanced() {
        let mgr = manager().await;
        mgr.create("root", 100, None).await.unwrap();
        let pool = mgr.consume("root", 40).await.unwrap();
        assert_eq!(pool.used_budget, 40);
        assert_eq!(pool.remaining_budget, 60);
        assert!(pool.is_balanced());
    }

    #[tokio::test]
    async fn consume_exhausting_marks_pool_exhausted() {
        let mgr = manager().await;
        mgr.create("root", 10, None).await.unwrap();
        let pool = mgr.consume("root", 10).await.unwrap();
        assert_eq!(pool.status, BudgetPoolStatus::Exhausted);
    }

    #[tokio::test]
    async fn consume_over_remaining_fails_budget_exhausted() {
        let mgr = manager().await;
        mgr.create("root", 10, None).await.unwrap();
        let err = mgr.consume("root", 11).await.unwrap_err();
        assert!(matches!(err, WorkflowError::BudgetExhausted(_)));
    }

    #[tokio::test]
    async fn consume_propagates_to_parent() {
        let mgr = manager().await;
        mgr.create("parent", 1000, None).await.unwrap();
        mgr.create("child", 100, Some("parent".to_string())).await.unwrap();
        mgr.consume("child", 30).await.unwrap();
        let parent = mgr.get("parent").await.unwrap();
        assert_eq!(parent.used_budget, 30);
    }

    #[tokio::test]
    async fn create_rejects_cycle() {
        let mgr = manager().await;
        mgr.create("a", 100, None).await.unwrap();
        mgr.create("b", 100, Some("a".to_string())).await.unwrap();
        let err = mgr.create("a_redux", 1, Some("b".to_string())).await;
        assert!(err.is_ok()); // not a cycle: a_redux -> b -> a, a_redux is new
        let cyclic = mgr.create("a", 1, Some("b".to_string())).await;
        assert!(cyclic.is_err());
    }

    #[tokio::test]
    async fn concurrent_consumes_do_not_double_spend() {
        let mgr = Arc::new(manager().await);
        mgr.create("root", 100, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move { mgr.consume("root", 10).await }));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }
        let pool = mgr.get("root").await.unwrap();
        assert!(pool.is_balanced());
        assert_eq!(pool.used_budget, 100);
    }

    #[tokio::test]
    async fn reactivate_requires_remaining_budget() {
        let mgr = manager().await;
        mgr.create("root", 10, None).await.unwrap();
        mgr.consume("root", 10).await.unwrap();
        mgr.suspend("root").await.unwrap();
        let pool = mgr.reactivate("root").await.unwrap();
        assert_eq!(pool.status, BudgetPoolStatus::Suspended);

        mgr.increase("root", 5).await.unwrap();
        let pool = mgr.reactivate("root").await.unwrap();
        assert_eq!(pool.status, BudgetPoolStatus::Active);
    }
}
