use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use crucible_domain::{EvaluationId, Priority};
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::queue::TaskQueue;
use crate::task::{QueueDepth, Task};

const HIGH_KEY: &str = "queue:high";
const NORMAL_KEY: &str = "queue:normal";
const INFLIGHT_ZSET: &str = "queue:inflight";
const INFLIGHT_INDEX: &str = "queue:inflight:index";

fn queue_key(priority: Priority) -> &'static str {
    match priority {
        Priority::High => HIGH_KEY,
        Priority::Normal => NORMAL_KEY,
    }
}

/// Redis sorted-set-backed priority queue. Each band (`high`/`normal`) is a
/// ZSET scored by enqueue timestamp (ascending score = FIFO). In-flight
/// tasks live in a second ZSET scored by visibility deadline, with a hash
/// index from evaluation id to the serialized task for O(1) ack/nack.
pub struct RedisQueue {
    pool: deadpool_redis::Pool,
}

impl RedisQueue {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, QueueError> {
        self.pool.get().await.map_err(|e| QueueError::Pool(e.to_string()))
    }

    async fn reclaim_expired(&self, conn: &mut deadpool_redis::Connection) -> Result<(), QueueError> {
        let now = Utc::now().timestamp() as f64;
        let expired: Vec<String> = conn.zrangebyscore(INFLIGHT_ZSET, f64::MIN, now).await?;
        for member in expired {
            let task: Task = serde_json::from_str(&member)?;
            let key = queue_key(task.priority);
            let score = task.enqueued_at.timestamp() as f64;
            let _: () = conn.zadd(key, &member, score).await?;
            let _: () = conn.zrem(INFLIGHT_ZSET, &member).await?;
            let _: () = conn.hdel(INFLIGHT_INDEX, task.evaluation_id.as_str()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn push(&self, task: Task) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let key = queue_key(task.priority);
        let score = task.enqueued_at.timestamp() as f64;
        let member = serde_json::to_string(&task)?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn pull(&self, visibility_timeout: Duration) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn().await?;
        self.reclaim_expired(&mut conn).await?;

        let mut popped: Vec<(String, f64)> = conn.zpopmin(HIGH_KEY, 1).await?;
        if popped.is_empty() {
            popped = conn.zpopmin(NORMAL_KEY, 1).await?;
        }
        let Some((member, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let task: Task = serde_json::from_str(&member)?;
        let deadline = (Utc::now() + chrono::Duration::from_std(visibility_timeout).unwrap_or_default()).timestamp() as f64;
        let _: () = conn.zadd(INFLIGHT_ZSET, &member, deadline).await?;
        let _: () = conn.hset(INFLIGHT_INDEX, task.evaluation_id.as_str(), &member).await?;
        Ok(Some(task))
    }

    async fn ack(&self, evaluation_id: &EvaluationId) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let member: Option<String> = conn.hget(INFLIGHT_INDEX, evaluation_id.as_str()).await?;
        let member = member.ok_or_else(|| QueueError::NotInFlight(evaluation_id.to_string()))?;
        let _: () = conn.zrem(INFLIGHT_ZSET, &member).await?;
        let _: () = conn.hdel(INFLIGHT_INDEX, evaluation_id.as_str()).await?;
        Ok(())
    }

    async fn nack(&self, evaluation_id: &EvaluationId) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let member: Option<String> = conn.hget(INFLIGHT_INDEX, evaluation_id.as_str()).await?;
        let member = member.ok_or_else(|| QueueError::NotInFlight(evaluation_id.to_string()))?;
        let task: Task = serde_json::from_str(&member)?;

        let _: () = conn.zrem(INFLIGHT_ZSET, &member).await?;
        let _: () = conn.hdel(INFLIGHT_INDEX, evaluation_id.as_str()).await?;

        let key = queue_key(task.priority);
        let score = task.enqueued_at.timestamp() as f64;
        let _: () = conn.zadd(key, &member, score).await?;
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let mut conn = self.conn().await?;
        let high: u64 = conn.zcard(HIGH_KEY).await?;
        let normal: u64 = conn.zcard(NORMAL_KEY).await?;
        let in_flight: u64 = conn.zcard(INFLIGHT_ZSET).await?;
        Ok(QueueDepth { high, normal, in_flight })
    }
}
