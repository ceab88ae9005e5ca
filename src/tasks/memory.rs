use super::{DEFAULT_DEAD_CAPACITY, Envelope, QueueBackend, QueueStats};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::time::Instant;

/// In-process queue backend for tests and single-node development.
///
/// Mirrors the Redis layout: a pending list, a leased set keyed by expiry and
/// a dead-letter list, all pointing at a shared table of envelopes.
pub struct MemoryQueue {
    state: Mutex<State>,
    dead_capacity: usize,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, Envelope>,
    pending: VecDeque<String>,
    leased: HashMap<String, Instant>,
    dead: VecDeque<String>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            dead_capacity: DEFAULT_DEAD_CAPACITY,
        }
    }
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` dead letters (at least one).
    #[must_use]
    pub fn with_dead_capacity(mut self, capacity: usize) -> Self {
        self.dead_capacity = capacity.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(&self, envelope: &Envelope) -> Result<()> {
        let mut state = self.lock();
        state.tasks.insert(envelope.id.clone(), envelope.clone());
        state.pending.push_back(envelope.id.clone());
        Ok(())
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Envelope>> {
        let mut state = self.lock();
        while let Some(id) = state.pending.pop_front() {
            if let Some(envelope) = state.tasks.get(&id).cloned() {
                state.leased.insert(id, Instant::now() + lease);
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }

    async fn ack(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.leased.remove(id);
        state.tasks.remove(id);
        Ok(())
    }

    async fn retry(&self, envelope: &Envelope, delay: Duration) -> Result<()> {
        let mut state = self.lock();
        state.tasks.insert(envelope.id.clone(), envelope.clone());
        state
            .leased
            .insert(envelope.id.clone(), Instant::now() + delay);
        Ok(())
    }

    async fn bury(&self, envelope: &Envelope) -> Result<()> {
        let mut state = self.lock();
        state.tasks.insert(envelope.id.clone(), envelope.clone());
        state.leased.remove(&envelope.id);
        state.dead.push_back(envelope.id.clone());
        while state.dead.len() > self.dead_capacity {
            if let Some(evicted) = state.dead.pop_front() {
                state.tasks.remove(&evicted);
            }
        }
        Ok(())
    }

    async fn recover_expired(&self) -> Result<usize> {
        let mut state = self.lock();
        let now = Instant::now();
        let mut expired: Vec<(String, Instant)> = state
            .leased
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(id, expires_at)| (id.clone(), *expires_at))
            .collect();
        expired.sort_by_key(|(_, expires_at)| *expires_at);
        for (id, _) in &expired {
            state.leased.remove(id);
            state.pending.push_back(id.clone());
        }
        Ok(expired.len())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.lock();
        Ok(QueueStats {
            pending: state.pending.len() as u64,
            leased: state.leased.len() as u64,
            dead: state.dead.len() as u64,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<Envelope>> {
        let state = self.lock();
        Ok(state
            .dead
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claims_in_fifo_order() -> Result<()> {
        let queue = MemoryQueue::new();
        let first = Envelope::new("a", vec![1]);
        let second = Envelope::new("b", vec![2]);
        queue.push(&first).await?;
        queue.push(&second).await?;

        let lease = Duration::from_secs(30);
        assert_eq!(queue.claim(lease).await?.map(|e| e.id), Some(first.id));
        assert_eq!(queue.claim(lease).await?.map(|e| e.id), Some(second.id));
        assert!(queue.claim(lease).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn leased_task_is_not_claimed_twice() -> Result<()> {
        let queue = MemoryQueue::new();
        queue.push(&Envelope::new("a", Vec::new())).await?;
        assert!(queue.claim(Duration::from_secs(30)).await?.is_some());
        assert!(queue.claim(Duration::from_secs(30)).await?.is_none());
        assert_eq!(
            queue.stats().await?,
            QueueStats {
                pending: 0,
                leased: 1,
                dead: 0
            }
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_recovered() -> Result<()> {
        let queue = MemoryQueue::new();
        let envelope = Envelope::new("a", Vec::new());
        queue.push(&envelope).await?;
        queue.claim(Duration::from_secs(5)).await?;

        assert_eq!(queue.recover_expired().await?, 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(queue.recover_expired().await?, 1);

        let reclaimed = queue.claim(Duration::from_secs(5)).await?;
        assert_eq!(reclaimed.map(|e| e.id), Some(envelope.id));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retry_keeps_task_hidden_until_delay() -> Result<()> {
        let queue = MemoryQueue::new();
        let envelope = Envelope::new("a", Vec::new());
        queue.push(&envelope).await?;
        let mut claimed = queue
            .claim(Duration::from_secs(30))
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing task"))?;
        claimed.retried = 1;
        queue.retry(&claimed, Duration::from_secs(2)).await?;

        assert_eq!(queue.recover_expired().await?, 0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(queue.recover_expired().await?, 1);
        let again = queue
            .claim(Duration::from_secs(30))
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing task"))?;
        assert_eq!(again.retried, 1);
        Ok(())
    }

    #[tokio::test]
    async fn dead_letters_are_newest_first() -> Result<()> {
        let queue = MemoryQueue::new();
        let first = Envelope::new("a", Vec::new());
        let second = Envelope::new("b", Vec::new());
        queue.bury(&first).await?;
        queue.bury(&second).await?;

        let dead = queue.dead_letters(1).await?;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn oldest_dead_letters_are_evicted_beyond_capacity() -> Result<()> {
        let queue = MemoryQueue::new().with_dead_capacity(2);
        let buried: Vec<Envelope> = (0..3).map(|n| Envelope::new(format!("t{n}"), Vec::new())).collect();
        for envelope in &buried {
            queue.bury(envelope).await?;
        }

        assert_eq!(queue.stats().await?.dead, 2);
        let ids: Vec<String> = queue.dead_letters(10).await?.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![buried[2].id.clone(), buried[1].id.clone()]);
        assert!(!queue.lock().tasks.contains_key(&buried[0].id));
        Ok(())
    }
}
