//! In-process sorted set

use super::{Decrement, ScoreBackend};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
struct Entry {
    score: i64,
    seq: u64,
}

#[derive(Debug, Default)]
struct SortedSet {
    /// Member to score, ordered by member so ties break the same way every time
    entries: BTreeMap<String, Entry>,
    /// Insertion sequence to member; scan cursors point into this map
    order: BTreeMap<u64, String>,
    last_seq: u64,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(entry) = self.entries.get_mut(member) {
            entry.score = score;
            return;
        }
        self.last_seq += 1;
        let seq = self.last_seq;
        self.entries.insert(member.to_string(), Entry { score, seq });
        self.order.insert(seq, member.to_string());
    }

    fn remove(&mut self, member: &str) {
        if let Some(entry) = self.entries.remove(member) {
            self.order.remove(&entry.seq);
        }
    }
}

/// Sorted-set backend kept in memory.
///
/// Shared between tasks of one process; every operation takes the lock once.
/// Scan cursors are insertion sequence numbers, so members removed mid-scan
/// never shift the members that are still to be visited.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    set: RwLock<SortedSet>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScoreBackend for MemoryBackend {
    async fn insert_if_absent(&self, member: &str, score: i64) -> Result<bool, StoreError> {
        let mut set = self.set.write();
        if set.entries.contains_key(member) {
            return Ok(false);
        }
        set.insert(member, score);
        Ok(true)
    }

    async fn score(&self, member: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.set.read().entries.get(member).map(|entry| entry.score))
    }

    async fn decrement(&self, member: &str, floor: i64) -> Result<Decrement, StoreError> {
        let mut set = self.set.write();
        let Some(entry) = set.entries.get_mut(member) else {
            return Ok(Decrement::Missing);
        };
        entry.score -= 1;
        let current = entry.score;
        if current <= floor {
            set.remove(member);
            return Ok(Decrement::Removed(current));
        }
        Ok(Decrement::Lowered(current))
    }

    async fn set_score(&self, member: &str, score: i64) -> Result<(), StoreError> {
        self.set.write().insert(member, score);
        Ok(())
    }

    async fn cardinality(&self) -> Result<u64, StoreError> {
        Ok(self.set.read().entries.len() as u64)
    }

    async fn range_by_score(&self, min: i64, max: i64) -> Result<Vec<String>, StoreError> {
        let set = self.set.read();
        let mut hits: Vec<(&String, i64)> = set
            .entries
            .iter()
            .filter(|(_, entry)| entry.score >= min && entry.score <= max)
            .map(|(member, entry)| (member, entry.score))
            .collect();
        hits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(hits.into_iter().map(|(member, _)| member.clone()).collect())
    }

    async fn rev_range_by_rank(&self, start: u64, stop: u64) -> Result<Vec<String>, StoreError> {
        if start > stop {
            return Ok(Vec::new());
        }
        let set = self.set.read();
        let mut ranked: Vec<(&String, i64)> = set
            .entries
            .iter()
            .map(|(member, entry)| (member, entry.score))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(a.0)));
        Ok(ranked
            .into_iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn scan(&self, cursor: u64, count: usize) -> Result<(u64, Vec<String>), StoreError> {
        let set = self.set.read();
        let page: Vec<(u64, &String)> = set
            .order
            .range(cursor..)
            .take(count.max(1))
            .map(|(&seq, member)| (seq, member))
            .collect();
        let next = match page.last() {
            Some(&(seq, _)) if set.order.range(seq + 1..).next().is_some() => seq + 1,
            _ => 0,
        };
        Ok((next, page.into_iter().map(|(_, member)| member.clone()).collect()))
    }
}
