use std::{
  collections::HashMap,
  hash::Hash,
  sync::Arc,
  time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{Mutex, RwLock};

/// A simple async map guarded by a single `RwLock`, handing out clones
/// of the stored value rather than references. Used for the small,
/// frequently-read status caches (server status, deployment status,
/// ownership lookups) that don't need fine-grained per-key locking.
#[derive(Debug)]
pub struct CloneCache<K, V>(RwLock<HashMap<K, V>>);

impl<K, V> Default for CloneCache<K, V> {
  fn default() -> Self {
    Self(RwLock::new(HashMap::new()))
  }
}

impl<K, V> CloneCache<K, V>
where
  K: Eq + Hash + Clone,
  V: Clone,
{
  pub async fn get(&self, key: &K) -> Option<V> {
    self.0.read().await.get(key).cloned()
  }

  pub async fn insert(&self, key: K, value: V) {
    self.0.write().await.insert(key, value);
  }

  pub async fn remove(&self, key: &K) -> Option<V> {
    self.0.write().await.remove(key)
  }

  pub async fn len(&self) -> usize {
    self.0.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  /// Drop entries whose key is not in `keep`, returning the number removed.
  pub async fn retain_keys(&self, keep: &std::collections::HashSet<K>) -> usize {
    let mut guard = self.0.write().await;
    let before = guard.len();
    guard.retain(|k, _| keep.contains(k));
    before - guard.len()
  }
}

/// A per-key lock with a cached, timestamped result, used to de-duplicate
/// concurrent calls to the same expensive idempotent operation (e.g. an
/// image pull): the first caller does the work, later callers within the
/// timeout window observe the cached outcome instead of repeating it.
pub struct TimeoutCache<K, V>(RwLock<HashMap<K, Arc<Mutex<CachedResult<V>>>>>);

impl<K, V> Default for TimeoutCache<K, V> {
  fn default() -> Self {
    Self(RwLock::new(HashMap::new()))
  }
}

pub struct CachedResult<V> {
  pub last_ts: i64,
  res: Option<Result<V, String>>,
}

impl<V> Default for CachedResult<V> {
  fn default() -> Self {
    Self { last_ts: 0, res: None }
  }
}

impl<V: Clone> CachedResult<V> {
  pub fn set(&mut self, res: &Result<V, anyhow::Error>, ts: i64) {
    self.last_ts = ts;
    self.res = Some(match res {
      Ok(v) => Ok(v.clone()),
      Err(e) => Err(format!("{e:#}")),
    });
  }

  pub fn clone_res(&self) -> Result<V, anyhow::Error> {
    match &self.res {
      Some(Ok(v)) => Ok(v.clone()),
      Some(Err(e)) => Err(anyhow::Error::msg(e.clone())),
      None => Err(anyhow::anyhow!("no cached result yet")),
    }
  }
}

impl<K, V> TimeoutCache<K, V>
where
  K: Eq + Hash + Clone,
{
  pub async fn get_lock(&self, key: K) -> Arc<Mutex<CachedResult<V>>> {
    if let Some(lock) = self.0.read().await.get(&key) {
      return lock.clone();
    }
    let mut write = self.0.write().await;
    write
      .entry(key)
      .or_insert_with(|| Arc::new(Mutex::new(CachedResult::default())))
      .clone()
  }
}

pub fn unix_millis() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .expect("system clock before unix epoch")
    .as_millis() as i64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn clone_cache_roundtrip() {
    let cache = CloneCache::<String, u32>::default();
    cache.insert("a".to_string(), 1).await;
    assert_eq!(cache.get(&"a".to_string()).await, Some(1));
    assert_eq!(cache.get(&"b".to_string()).await, None);
    assert_eq!(cache.remove(&"a".to_string()).await, Some(1));
    assert!(cache.is_empty().await);
  }

  #[tokio::test]
  async fn timeout_cache_shares_lock_per_key() {
    let cache = TimeoutCache::<String, u32>::default();
    let a = cache.get_lock("x".to_string()).await;
    let b = cache.get_lock("x".to_string()).await;
    {
      let mut guard = a.lock().await;
      guard.set(&Ok(7), 100);
    }
    let guard = b.lock().await;
    assert_eq!(guard.last_ts, 100);
    assert_eq!(guard.clone_res().unwrap(), 7);
  }
}
