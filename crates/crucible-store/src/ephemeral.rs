use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crucible_domain::{EvaluationId, OutputStream, SandboxId, SlotId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::StoreError;

/// The `eval:{id}:running` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningRecord {
    pub slot: SlotId,
    pub sandbox_id: SandboxId,
    pub started_at: DateTime<Utc>,
}

/// Strongly-typed operations over the transient KV (C2).
///
/// `put_running`/`delete_running` MUST be composite, server-side atomic
/// operations so that "running record present ⇔ id in running set" is
/// never observably violated — see each implementation's doc comment for
/// how it achieves that.
#[async_trait]
pub trait EphemeralStore: Send + Sync + 'static {
    async fn mark_pending(&self, id: &EvaluationId, ttl: Duration) -> Result<(), StoreError>;
    async fn clear_pending(&self, id: &EvaluationId) -> Result<(), StoreError>;

    async fn put_running(&self, id: &EvaluationId, record: RunningRecord) -> Result<(), StoreError>;
    async fn get_running(&self, id: &EvaluationId) -> Result<Option<RunningRecord>, StoreError>;
    async fn delete_running(&self, id: &EvaluationId) -> Result<(), StoreError>;
    async fn list_running(&self) -> Result<HashSet<EvaluationId>, StoreError>;

    /// Appends `chunk` to `stream`'s bounded ring buffer, dropping the
    /// oldest bytes once the buffer would exceed `cap`. stdout and stderr
    /// are tracked as independent buffers, each capped separately.
    async fn append_logs(
        &self,
        id: &EvaluationId,
        stream: OutputStream,
        chunk: &[u8],
        cap: usize,
    ) -> Result<(), StoreError>;
    async fn read_logs(&self, id: &EvaluationId, stream: OutputStream) -> Result<String, StoreError>;
}

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tokio::time::Instant;

    #[derive(Debug, Default)]
    struct Inner {
        pending: HashMap<EvaluationId, Instant>,
        running: HashMap<EvaluationId, RunningRecord>,
        running_set: HashSet<EvaluationId>,
        logs: HashMap<(EvaluationId, OutputStream), Vec<u8>>,
    }

    /// In-memory [`EphemeralStore`], for tests and single-process deployments.
    ///
    /// Maintains `running` and `running_set` as two structures updated
    /// together under one write-lock acquisition, the same atomicity unit
    /// a Redis Lua script gives the distributed implementation.
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryEphemeralStore {
        inner: Arc<RwLock<Inner>>,
    }

    impl InMemoryEphemeralStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Test/diagnostic helper: true if a non-expired pending marker exists.
        pub async fn pending_exists(&self, id: &EvaluationId) -> bool {
            let guard = self.inner.read().await;
            guard.pending.get(id).is_some_and(|expires_at| *expires_at > Instant::now())
        }
    }

    #[async_trait]
    impl EphemeralStore for InMemoryEphemeralStore {
        async fn mark_pending(&self, id: &EvaluationId, ttl: Duration) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.pending.insert(id.clone(), Instant::now() + ttl);
            Ok(())
        }

        async fn clear_pending(&self, id: &EvaluationId) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.pending.remove(id);
            Ok(())
        }

        async fn put_running(&self, id: &EvaluationId, record: RunningRecord) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.running.insert(id.clone(), record);
            guard.running_set.insert(id.clone());
            Ok(())
        }

        async fn get_running(&self, id: &EvaluationId) -> Result<Option<RunningRecord>, StoreError> {
            let guard = self.inner.read().await;
            Ok(guard.running.get(id).cloned())
        }

        async fn delete_running(&self, id: &EvaluationId) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.running.remove(id);
            guard.running_set.remove(id);
            guard.logs.remove(&(id.clone(), OutputStream::Stdout));
            guard.logs.remove(&(id.clone(), OutputStream::Stderr));
            Ok(())
        }

        async fn list_running(&self) -> Result<HashSet<EvaluationId>, StoreError> {
            let guard = self.inner.read().await;
            Ok(guard.running_set.clone())
        }

        async fn append_logs(
            &self,
            id: &EvaluationId,
            stream: OutputStream,
            chunk: &[u8],
            cap: usize,
        ) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            let buf = guard.logs.entry((id.clone(), stream)).or_default();
            buf.extend_from_slice(chunk);
            if buf.len() > cap {
                let drop = buf.len() - cap;
                buf.drain(0..drop);
            }
            Ok(())
        }

        async fn read_logs(&self, id: &EvaluationId, stream: OutputStream) -> Result<String, StoreError> {
            let guard = self.inner.read().await;
            Ok(guard
                .logs
                .get(&(id.clone(), stream))
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn id() -> EvaluationId {
            EvaluationId::from_string("e1")
        }

        fn record() -> RunningRecord {
            RunningRecord { slot: SlotId(1), sandbox_id: SandboxId("sbx-1".into()), started_at: Utc::now() }
        }

        #[tokio::test]
        async fn put_running_updates_record_and_set_together() {
            let store = InMemoryEphemeralStore::new();
            store.put_running(&id(), record()).await.unwrap();

            assert!(store.get_running(&id()).await.unwrap().is_some());
            assert!(store.list_running().await.unwrap().contains(&id()));
        }

        #[tokio::test]
        async fn delete_running_clears_record_set_and_logs_together() {
            let store = InMemoryEphemeralStore::new();
            store.put_running(&id(), record()).await.unwrap();
            store.append_logs(&id(), OutputStream::Stdout, b"hi", 1024).await.unwrap();
            store.append_logs(&id(), OutputStream::Stderr, b"oops", 1024).await.unwrap();

            store.delete_running(&id()).await.unwrap();

            assert!(store.get_running(&id()).await.unwrap().is_none());
            assert!(!store.list_running().await.unwrap().contains(&id()));
            assert_eq!(store.read_logs(&id(), OutputStream::Stdout).await.unwrap(), "");
            assert_eq!(store.read_logs(&id(), OutputStream::Stderr).await.unwrap(), "");
        }

        #[tokio::test]
        async fn append_logs_drops_oldest_bytes_past_cap() {
            let store = InMemoryEphemeralStore::new();
            store.append_logs(&id(), OutputStream::Stdout, b"abcdef", 4).await.unwrap();
            assert_eq!(store.read_logs(&id(), OutputStream::Stdout).await.unwrap(), "cdef");
            store.append_logs(&id(), OutputStream::Stdout, b"gh", 4).await.unwrap();
            assert_eq!(store.read_logs(&id(), OutputStream::Stdout).await.unwrap(), "efgh");
        }

        #[tokio::test]
        async fn stdout_and_stderr_buffers_are_independent() {
            let store = InMemoryEphemeralStore::new();
            store.append_logs(&id(), OutputStream::Stdout, b"out", 1024).await.unwrap();
            store.append_logs(&id(), OutputStream::Stderr, b"err", 1024).await.unwrap();
            assert_eq!(store.read_logs(&id(), OutputStream::Stdout).await.unwrap(), "out");
            assert_eq!(store.read_logs(&id(), OutputStream::Stderr).await.unwrap(), "err");
        }

        #[tokio::test]
        async fn pending_marker_round_trips() {
            let store = InMemoryEphemeralStore::new();
            assert!(!store.pending_exists(&id()).await);
            store.mark_pending(&id(), Duration::from_secs(60)).await.unwrap();
            assert!(store.pending_exists(&id()).await);
            store.clear_pending(&id()).await.unwrap();
            assert!(!store.pending_exists(&id()).await);
        }
    }
}

pub mod redis_backed {
    use super::*;
    use deadpool_redis::{redis::AsyncCommands, Pool};
    use redis::Script;

    const PUT_RUNNING_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return 1
"#;

    const DELETE_RUNNING_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
redis.call('DEL', KEYS[3])
redis.call('DEL', KEYS[4])
return 1
"#;

    const RUNNING_SET_KEY: &str = "running_evaluations";

    fn running_key(id: &EvaluationId) -> String {
        format!("eval:{id}:running")
    }

    fn pending_key(id: &EvaluationId) -> String {
        format!("pending:{id}")
    }

    fn logs_key(id: &EvaluationId, stream: OutputStream) -> String {
        let tag = match stream {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        };
        format!("logs:{id}:{tag}")
    }

    /// Redis-backed [`EphemeralStore`]. Atomicity for `put_running`/
    /// `delete_running` comes from a single `EVAL` call — Redis executes a
    /// script body as one atomic unit.
    #[derive(Clone)]
    pub struct RedisEphemeralStore {
        pool: Pool,
    }

    impl RedisEphemeralStore {
        pub fn new(pool: Pool) -> Self {
            Self { pool }
        }

        async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
            self.pool.get().await.map_err(|e| StoreError::Redis(e.to_string()))
        }
    }

    #[async_trait]
    impl EphemeralStore for RedisEphemeralStore {
        async fn mark_pending(&self, id: &EvaluationId, ttl: Duration) -> Result<(), StoreError> {
            let mut conn = self.conn().await?;
            conn.set_ex::<_, _, ()>(pending_key(id), "1", ttl.as_secs().max(1))
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))
        }

        async fn clear_pending(&self, id: &EvaluationId) -> Result<(), StoreError> {
            let mut conn = self.conn().await?;
            conn.del::<_, ()>(pending_key(id)).await.map_err(|e| StoreError::Redis(e.to_string()))
        }

        async fn put_running(&self, id: &EvaluationId, record: RunningRecord) -> Result<(), StoreError> {
            let payload = serde_json::to_string(&record)?;
            let mut conn = self.conn().await?;
            Script::new(PUT_RUNNING_SCRIPT)
                .key(running_key(id))
                .key(RUNNING_SET_KEY)
                .arg(payload)
                .arg(id.as_str())
                .invoke_async::<()>(&mut conn)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))
        }

        async fn get_running(&self, id: &EvaluationId) -> Result<Option<RunningRecord>, StoreError> {
            let mut conn = self.conn().await?;
            let raw: Option<String> =
                conn.get(running_key(id)).await.map_err(|e| StoreError::Redis(e.to_string()))?;
            raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from)).transpose()
        }

        async fn delete_running(&self, id: &EvaluationId) -> Result<(), StoreError> {
            let mut conn = self.conn().await?;
            Script::new(DELETE_RUNNING_SCRIPT)
                .key(running_key(id))
                .key(RUNNING_SET_KEY)
                .key(logs_key(id, OutputStream::Stdout))
                .key(logs_key(id, OutputStream::Stderr))
                .arg(id.as_str())
                .invoke_async::<()>(&mut conn)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))
        }

        async fn list_running(&self) -> Result<HashSet<EvaluationId>, StoreError> {
            let mut conn = self.conn().await?;
            let ids: HashSet<String> =
                conn.smembers(RUNNING_SET_KEY).await.map_err(|e| StoreError::Redis(e.to_string()))?;
            Ok(ids.into_iter().map(EvaluationId::from_string).collect())
        }

        async fn append_logs(
            &self,
            id: &EvaluationId,
            stream: OutputStream,
            chunk: &[u8],
            cap: usize,
        ) -> Result<(), StoreError> {
            let mut conn = self.conn().await?;
            let key = logs_key(id, stream);
            conn.rpush::<_, _, ()>(&key, chunk).await.map_err(|e| StoreError::Redis(e.to_string()))?;
            // Approximate the byte cap as an entry cap; `cap` here is expressed
            // in bytes at the trait level but Redis lists trim by entry count,
            // so callers push pre-chunked writes sized to keep this close.
            conn.ltrim::<_, ()>(&key, -(cap.max(1) as isize), -1)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))
        }

        async fn read_logs(&self, id: &EvaluationId, stream: OutputStream) -> Result<String, StoreError> {
            let mut conn = self.conn().await?;
            let chunks: Vec<Vec<u8>> = conn
                .lrange(logs_key(id, stream), 0, -1)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))?;
            let bytes: Vec<u8> = chunks.into_iter().flatten().collect();
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}
