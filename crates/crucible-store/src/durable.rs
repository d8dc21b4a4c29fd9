use async_trait::async_trait;
use crucible_domain::{Evaluation, EvaluationId};

use crate::error::StoreError;

/// The durable store interface: two operations. Output
/// externalization above the large-output threshold is the caller's
/// concern (see `crucible-reconciler`), not this trait's — `Evaluation`
/// already carries `Output::Externalized` when that applies.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    async fn upsert_evaluation(&self, record: &Evaluation) -> Result<(), StoreError>;
    async fn get_evaluation(&self, id: &EvaluationId) -> Result<Option<Evaluation>, StoreError>;

    /// Durable ids in a non-terminal status, for the reaper's stale-record
    /// sweep. Not part of the two-operation spec contract but required by
    /// C9; every implementation still exposes it.
    async fn list_non_terminal(&self) -> Result<Vec<Evaluation>, StoreError>;
}

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Debug, Clone, Default)]
    pub struct InMemoryDurableStore {
        inner: Arc<RwLock<HashMap<EvaluationId, Evaluation>>>,
    }

    impl InMemoryDurableStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl DurableStore for InMemoryDurableStore {
        async fn upsert_evaluation(&self, record: &Evaluation) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn get_evaluation(&self, id: &EvaluationId) -> Result<Option<Evaluation>, StoreError> {
            let guard = self.inner.read().await;
            Ok(guard.get(id).cloned())
        }

        async fn list_non_terminal(&self) -> Result<Vec<Evaluation>, StoreError> {
            let guard = self.inner.read().await;
            Ok(guard.values().filter(|e| !e.status.is_terminal()).cloned().collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crucible_domain::Priority;
        use chrono::Utc;

        fn sample() -> Evaluation {
            Evaluation::new("print(1)", "python", Priority::Normal, 10, serde_json::json!({}), Utc::now())
        }

        #[tokio::test]
        async fn upsert_then_get_round_trips() {
            let store = InMemoryDurableStore::new();
            let eval = sample();
            store.upsert_evaluation(&eval).await.unwrap();
            let got = store.get_evaluation(&eval.id).await.unwrap().unwrap();
            assert_eq!(got.id, eval.id);
        }

        #[tokio::test]
        async fn list_non_terminal_excludes_completed() {
            use crucible_domain::Status;

            let store = InMemoryDurableStore::new();
            let mut a = sample();
            a.status = Status::Running;
            let mut b = sample();
            b.status = Status::Completed;
            store.upsert_evaluation(&a).await.unwrap();
            store.upsert_evaluation(&b).await.unwrap();

            let non_terminal = store.list_non_terminal().await.unwrap();
            assert_eq!(non_terminal.len(), 1);
            assert_eq!(non_terminal[0].id, a.id);
        }
    }
}

pub mod postgres {
    use super::*;
    use sqlx::PgPool;

    // DDL — idempotent; run at every startup via migrate().
    const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS evaluations (
    id         TEXT PRIMARY KEY,
    status     TEXT NOT NULL,
    record     JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_evaluations_status
    ON evaluations (status) WHERE status NOT IN ('completed', 'failed', 'cancelled', 'timeout');
"#;

    /// Durable evaluation store backed by PostgreSQL. JSONB holds the full
    /// record; `status` is broken out into its own column purely to index
    /// the non-terminal sweep the reaper runs.
    #[derive(Clone)]
    pub struct PostgresDurableStore {
        pool: PgPool,
    }

    impl PostgresDurableStore {
        pub async fn connect(url: &str) -> Result<Self, StoreError> {
            let pool = PgPool::connect(url).await.map_err(|e| StoreError::Postgres(e.to_string()))?;
            let store = Self { pool };
            store.migrate().await?;
            Ok(store)
        }

        async fn migrate(&self) -> Result<(), StoreError> {
            sqlx::query(MIGRATIONS).execute(&self.pool).await.map_err(|e| StoreError::Postgres(e.to_string()))?;
            Ok(())
        }
    }

    #[async_trait]
    impl DurableStore for PostgresDurableStore {
        async fn upsert_evaluation(&self, record: &Evaluation) -> Result<(), StoreError> {
            let payload = serde_json::to_value(record)?;
            sqlx::query(
                "INSERT INTO evaluations (id, status, record, updated_at) VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (id) DO UPDATE SET status = $2, record = $3, updated_at = NOW()",
            )
            .bind(record.id.as_str())
            .bind(record.status.to_string())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Postgres(e.to_string()))?;
            Ok(())
        }

        async fn get_evaluation(&self, id: &EvaluationId) -> Result<Option<Evaluation>, StoreError> {
            let row: Option<(serde_json::Value,)> =
                sqlx::query_as("SELECT record FROM evaluations WHERE id = $1")
                    .bind(id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| StoreError::Postgres(e.to_string()))?;
            row.map(|(v,)| serde_json::from_value(v).map_err(StoreError::from)).transpose()
        }

        async fn list_non_terminal(&self) -> Result<Vec<Evaluation>, StoreError> {
            let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
                "SELECT record FROM evaluations WHERE status NOT IN ('completed', 'failed', 'cancelled', 'timeout')",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Postgres(e.to_string()))?;
            rows.into_iter().map(|(v,)| serde_json::from_value(v).map_err(StoreError::from)).collect()
        }
    }
}
