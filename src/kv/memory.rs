use super::KvStore;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Process-local key-value store with TTLs.
///
/// Expiry uses `tokio::time::Instant`, so tests running with a paused clock can
/// move time forward with `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory kv lock poisoned"))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.live(now));
        Ok(f(&mut entries, now))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries, _| entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
        })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.with_entries(|entries, now| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
            true
        })
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries, _| entries.remove(key).map(|entry| entry.value))
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: now + ttl,
            });
            let count = entry.value.parse::<u64>().unwrap_or(0).saturating_add(1);
            entry.value = count.to_string();
            count
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() -> Result<()> {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_secs(10)).await?;
        assert_eq!(kv.get("k").await?, Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(kv.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn take_removes_value() -> Result<()> {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_secs(10)).await?;
        assert_eq!(kv.take("k").await?, Some("v".to_string()));
        assert_eq!(kv.take("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn set_nx_respects_existing_until_expiry() -> Result<()> {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_ex("gate", "1", Duration::from_secs(5)).await?);
        assert!(!kv.set_nx_ex("gate", "1", Duration::from_secs(5)).await?);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(kv.set_nx_ex("gate", "1", Duration::from_secs(5)).await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_after_window() -> Result<()> {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr_ex("hits", Duration::from_secs(60)).await?, 1);
        assert_eq!(kv.incr_ex("hits", Duration::from_secs(60)).await?, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(kv.incr_ex("hits", Duration::from_secs(60)).await?, 1);
        Ok(())
    }
}
