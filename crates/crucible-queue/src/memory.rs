use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crucible_domain::{EvaluationId, Priority};
use tokio::sync::RwLock;

use crate::error::QueueError;
use crate::queue::TaskQueue;
use crate::task::{QueueDepth, Task};

struct Inner {
    high: VecDeque<Task>,
    normal: VecDeque<Task>,
    in_flight: HashMap<EvaluationId, (Task, DateTime<Utc>)>,
}

/// VecDeque-backed test double: two FIFO bands plus an in-flight map keyed
/// by evaluation id, mirroring the store's in-memory-double convention.
pub struct InMemoryQueue {
    inner: RwLock<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner { high: VecDeque::new(), normal: VecDeque::new(), in_flight: HashMap::new() }) }
    }

    fn reclaim_expired(inner: &mut Inner, now: DateTime<Utc>) {
        let expired: Vec<EvaluationId> = inner
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| now >= *deadline)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some((task, _)) = inner.in_flight.remove(&id) {
                match task.priority {
                    Priority::High => inner.high.push_front(task),
                    Priority::Normal => inner.normal.push_front(task),
                }
            }
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn push(&self, task: Task) -> Result<(), QueueError> {
        let mut inner = self.inner.write().await;
        match task.priority {
            Priority::High => inner.high.push_back(task),
            Priority::Normal => inner.normal.push_back(task),
        }
        Ok(())
    }

    async fn pull(&self, visibility_timeout: Duration) -> Result<Option<Task>, QueueError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        Self::reclaim_expired(&mut inner, now);

        let task = inner.high.pop_front().or_else(|| inner.normal.pop_front());
        if let Some(task) = task {
            let deadline = now + chrono::Duration::from_std(visibility_timeout).unwrap_or(chrono::Duration::zero());
            inner.in_flight.insert(task.evaluation_id.clone(), (task.clone(), deadline));
            return Ok(Some(task));
        }
        Ok(None)
    }

    async fn ack(&self, evaluation_id: &EvaluationId) -> Result<(), QueueError> {
        let mut inner = self.inner.write().await;
        inner
            .in_flight
            .remove(evaluation_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::NotInFlight(evaluation_id.to_string()))
    }

    async fn nack(&self, evaluation_id: &EvaluationId) -> Result<(), QueueError> {
        let mut inner = self.inner.write().await;
        let (task, _) = inner
            .in_flight
            .remove(evaluation_id)
            .ok_or_else(|| QueueError::NotInFlight(evaluation_id.to_string()))?;
        match task.priority {
            Priority::High => inner.high.push_front(task),
            Priority::Normal => inner.normal.push_front(task),
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let inner = self.inner.read().await;
        Ok(QueueDepth {
            high: inner.high.len() as u64,
            normal: inner.normal.len() as u64,
            in_flight: inner.in_flight.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, priority: Priority) -> Task {
        Task::new(EvaluationId::from_string(id.to_string()), priority)
    }

    #[tokio::test]
    async fn high_priority_drains_before_normal() {
        let queue = InMemoryQueue::new();
        queue.push(task("n1", Priority::Normal)).await.unwrap();
        queue.push(task("h1", Priority::High)).await.unwrap();
        let first = queue.pull(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(first.evaluation_id.as_str(), "h1");
    }

    #[tokio::test]
    async fn fifo_within_a_band() {
        let queue = InMemoryQueue::new();
        queue.push(task("n1", Priority::Normal)).await.unwrap();
        queue.push(task("n2", Priority::Normal)).await.unwrap();
        let first = queue.pull(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(first.evaluation_id.as_str(), "n1");
    }

    #[tokio::test]
    async fn ack_clears_in_flight_and_nack_requeues() {
        let queue = InMemoryQueue::new();
        queue.push(task("a", Priority::Normal)).await.unwrap();
        let pulled = queue.pull(Duration::from_secs(30)).await.unwrap().unwrap();
        queue.nack(&pulled.evaluation_id).await.unwrap();
        let again = queue.pull(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(again.evaluation_id, pulled.evaluation_id);
        queue.ack(&again.evaluation_id).await.unwrap();
        assert!(queue.ack(&again.evaluation_id).await.is_err());
    }

    #[tokio::test]
    async fn expired_visibility_timeout_redelivers() {
        let queue = InMemoryQueue::new();
        queue.push(task("a", Priority::Normal)).await.unwrap();
        queue.pull(Duration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let redelivered = queue.pull(Duration::from_secs(30)).await.unwrap();
        assert!(redelivered.is_some());
    }

    #[tokio::test]
    async fn depth_reports_current_band_and_in_flight_counts() {
        let queue = InMemoryQueue::new();
        queue.push(task("h1", Priority::High)).await.unwrap();
        queue.push(task("n1", Priority::Normal)).await.unwrap();
        queue.push(task("n2", Priority::Normal)).await.unwrap();
        queue.pull(Duration::from_secs(30)).await.unwrap();

        let depth = queue.depth().await.unwrap();
        assert_eq!(depth, QueueDepth { high: 0, normal: 2, in_flight: 1 });
    }
}
