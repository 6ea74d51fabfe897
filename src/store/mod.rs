//! Scored proxy store
//!
//! The pool lives in a sorted set: members are canonical `ip:port` strings,
//! scores are reliability ratings bounded by [`ScoreBounds`]. Every mutation
//! is a single atomic backend call, so the getter, tester and server can share
//! one store without any client-side locking.

pub mod memory;
pub mod redis;

use crate::error::StoreError;
use crate::proxy::{Proxy, ProxyParser};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tracing::Instrument;

pub use self::memory::MemoryBackend;
pub use self::redis::{RedisBackend, RedisSettings};

/// Score limits for the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBounds {
    pub min: i64,
    pub init: i64,
    pub max: i64,
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self {
            min: 0,
            init: 10,
            max: 100,
        }
    }
}

/// Outcome of an atomic decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// Member kept with the new score.
    Lowered(i64),
    /// Score fell to the floor and the member was removed.
    Removed(i64),
    /// Member was not in the set.
    Missing,
}

/// Sorted-set operations the store needs from its backend.
///
/// Each method must be atomic on its own.
#[async_trait]
pub trait ScoreBackend: Send + Sync {
    /// Insert only when absent. Returns whether the member was added.
    async fn insert_if_absent(&self, member: &str, score: i64) -> Result<bool, StoreError>;

    async fn score(&self, member: &str) -> Result<Option<i64>, StoreError>;

    /// Decrement by one, removing the member once its score is `<= floor`.
    async fn decrement(&self, member: &str, floor: i64) -> Result<Decrement, StoreError>;

    /// Unconditional upsert.
    async fn set_score(&self, member: &str, score: i64) -> Result<(), StoreError>;

    async fn cardinality(&self) -> Result<u64, StoreError>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn range_by_score(&self, min: i64, max: i64) -> Result<Vec<String>, StoreError>;

    /// Members at ranks `start..=stop` ordered by descending score.
    async fn rev_range_by_rank(&self, start: u64, stop: u64) -> Result<Vec<String>, StoreError>;

    /// Incremental scan; a returned cursor of `0` ends the pass.
    async fn scan(&self, cursor: u64, count: usize) -> Result<(u64, Vec<String>), StoreError>;
}

/// The pool of scored proxies
#[derive(Clone)]
pub struct ProxyStore {
    backend: Arc<dyn ScoreBackend>,
    bounds: ScoreBounds,
    span: tracing::Span,
}

impl ProxyStore {
    pub fn new(backend: Arc<dyn ScoreBackend>, bounds: ScoreBounds) -> Self {
        Self {
            backend,
            bounds,
            span: tracing::info_span!("store"),
        }
    }

    /// A store over a fresh in-process backend
    pub fn in_memory(bounds: ScoreBounds) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), bounds)
    }

    pub fn bounds(&self) -> ScoreBounds {
        self.bounds
    }

    /// Add a proxy at the initial score; no-op when it is already pooled
    pub async fn add(&self, proxy: &Proxy) -> Result<bool, StoreError> {
        self.add_with_score(proxy, self.bounds.init).await
    }

    pub async fn add_with_score(&self, proxy: &Proxy, score: i64) -> Result<bool, StoreError> {
        let member = proxy.to_string();
        if !ProxyParser::is_valid_proxy(&member) {
            tracing::warn!(parent: &self.span, %member, "invalid proxy, adding anyway");
        }
        let added = self.backend.insert_if_absent(&member, score).await?;
        if added {
            tracing::debug!(parent: &self.span, %member, score, "proxy added");
        }
        Ok(added)
    }

    pub async fn exists(&self, proxy: &Proxy) -> Result<bool, StoreError> {
        Ok(self.backend.score(&proxy.to_string()).await?.is_some())
    }

    pub async fn score(&self, proxy: &Proxy) -> Result<Option<i64>, StoreError> {
        self.backend.score(&proxy.to_string()).await
    }

    /// Lower the score by one, evicting the proxy at the floor
    pub async fn decrease(&self, proxy: &Proxy) -> Result<Decrement, StoreError> {
        let outcome = self
            .backend
            .decrement(&proxy.to_string(), self.bounds.min)
            .instrument(self.span.clone())
            .await?;
        match outcome {
            Decrement::Lowered(score) => {
                tracing::info!(parent: &self.span, %proxy, score, "score decreased by 1");
            }
            Decrement::Removed(score) => {
                tracing::info!(parent: &self.span, %proxy, score, "score hit the floor, removed");
            }
            Decrement::Missing => {
                tracing::debug!(parent: &self.span, %proxy, "decrease on a proxy no longer pooled");
            }
        }
        Ok(outcome)
    }

    /// Mark a proxy as known-good
    pub async fn set_max(&self, proxy: &Proxy) -> Result<(), StoreError> {
        tracing::info!(parent: &self.span, %proxy, score = self.bounds.max, "proxy valid, set to max");
        self.backend
            .set_score(&proxy.to_string(), self.bounds.max)
            .await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.backend.cardinality().await
    }

    /// Pick a proxy at random, preferring the ones at max score.
    ///
    /// Falls back to the entries ranked `MIN..=MAX` by descending score and
    /// fails with [`StoreError::PoolEmpty`] when nothing is pooled.
    pub async fn random(&self) -> Result<Proxy, StoreError> {
        let best = self
            .backend
            .range_by_score(self.bounds.max, self.bounds.max)
            .await?;
        if let Some(proxy) = pick_random(&best) {
            return Ok(proxy);
        }

        let start = self.bounds.min.max(0) as u64;
        let stop = self.bounds.max.max(0) as u64;
        let ranked = self.backend.rev_range_by_rank(start, stop).await?;
        pick_random(&ranked).ok_or(StoreError::PoolEmpty)
    }

    /// All proxies with a score inside the bounds
    pub async fn all(&self) -> Result<Vec<Proxy>, StoreError> {
        let members = self
            .backend
            .range_by_score(self.bounds.min, self.bounds.max)
            .await?;
        Ok(ProxyParser::parse_many(&members))
    }

    /// One page of an incremental scan over the pool
    pub async fn batch(&self, cursor: u64, count: usize) -> Result<(u64, Vec<Proxy>), StoreError> {
        let (next, members) = self.backend.scan(cursor, count).await?;
        Ok((next, ProxyParser::parse_many(&members)))
    }
}

fn pick_random(members: &[String]) -> Option<Proxy> {
    let candidates = ProxyParser::parse_many(members);
    if candidates.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..candidates.len());
    candidates.into_iter().nth(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn store() -> ProxyStore {
        ProxyStore::in_memory(ScoreBounds::default())
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = store();
        let proxy = Proxy::new("1.2.3.4", 8080);

        assert!(store.add(&proxy).await.unwrap());
        store.decrease(&proxy).await.unwrap();
        assert!(!store.add(&proxy).await.unwrap());

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.score(&proxy).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_decrease_evicts_at_min() {
        let store = store();
        let proxy = Proxy::new("1.2.3.4", 8080);
        store.add(&proxy).await.unwrap();

        let bounds = store.bounds();
        for _ in 0..(bounds.init - bounds.min - 1) {
            assert!(matches!(
                store.decrease(&proxy).await.unwrap(),
                Decrement::Lowered(_)
            ));
        }
        assert!(store.exists(&proxy).await.unwrap());

        assert_eq!(
            store.decrease(&proxy).await.unwrap(),
            Decrement::Removed(bounds.min)
        );
        assert!(!store.exists(&proxy).await.unwrap());
        assert_eq!(store.decrease(&proxy).await.unwrap(), Decrement::Missing);
    }

    #[tokio::test]
    async fn test_concurrent_decreases_are_linearizable() {
        let store = store();
        let proxy = Proxy::new("1.2.3.4", 8080);
        store.add(&proxy).await.unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let proxy = proxy.clone();
                tokio::spawn(async move { store.decrease(&proxy).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.score(&proxy).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_set_max_overwrites() {
        let store = store();
        let proxy = Proxy::new("1.2.3.4", 8080);
        store.add(&proxy).await.unwrap();
        store.set_max(&proxy).await.unwrap();

        assert!(store.exists(&proxy).await.unwrap());
        assert_eq!(store.score(&proxy).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_random_prefers_max_score() {
        let store = store();
        let good = Proxy::new("1.1.1.1", 80);
        let poor = Proxy::new("2.2.2.2", 80);
        store.add(&good).await.unwrap();
        store.add_with_score(&poor, 1).await.unwrap();
        store.set_max(&good).await.unwrap();

        for _ in 0..20 {
            assert_eq!(store.random().await.unwrap(), good);
        }
    }

    #[tokio::test]
    async fn test_random_falls_back_to_ranked() {
        let store = store();
        let proxy = Proxy::new("1.1.1.1", 80);
        store.add(&proxy).await.unwrap();
        assert_eq!(store.random().await.unwrap(), proxy);
    }

    #[tokio::test]
    async fn test_random_on_empty_pool() {
        let store = store();
        assert!(matches!(store.random().await, Err(StoreError::PoolEmpty)));
    }

    #[tokio::test]
    async fn test_batch_covers_pool() {
        let store = store();
        for i in 0..23 {
            store.add(&Proxy::new(format!("10.0.0.{}", i), 8080)).await.unwrap();
        }

        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let (next, proxies) = store.batch(cursor, 5).await.unwrap();
            seen.extend(proxies);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let all: HashSet<_> = store.all().await.unwrap().into_iter().collect();
        assert_eq!(seen, all);
        assert_eq!(all.len(), 23);
    }
}
