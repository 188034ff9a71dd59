use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::partition::PartitionId;

/// A value held in a partition together with its merge metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Opaque value bytes.
    pub value: Vec<u8>,
    /// Logical update timestamp; `None` when the writer did not stamp it.
    pub timestamp: Option<u64>,
    /// Read/write hit count.
    pub hits: u64,
}

impl Entry {
    /// Entry stamped with a logical timestamp and no hits.
    pub fn new(value: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            value: value.into(),
            timestamp: Some(timestamp),
            hits: 0,
        }
    }

    /// Entry without a logical timestamp.
    pub fn unstamped(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            timestamp: None,
            hits: 0,
        }
    }

    /// Builder-style hit count override.
    #[must_use]
    pub const fn with_hits(mut self, hits: u64) -> Self {
        self.hits = hits;
        self
    }
}

/// Entries of one partition, keyed and ordered by entry key.
pub type PartitionData = BTreeMap<String, Entry>;

/// Per-partition data held by one (sub-)cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStore {
    partitions: BTreeMap<PartitionId, PartitionData>,
}

impl PartitionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn put(
        &mut self,
        partition: PartitionId,
        key: impl Into<String>,
        entry: Entry,
    ) -> Option<Entry> {
        self.partitions
            .entry(partition)
            .or_default()
            .insert(key.into(), entry)
    }

    /// Read an entry.
    #[must_use]
    pub fn get(&self, partition: PartitionId, key: &str) -> Option<&Entry> {
        self.partitions.get(&partition)?.get(key)
    }

    /// Entries of a partition, if it holds any.
    #[must_use]
    pub fn partition(&self, partition: PartitionId) -> Option<&PartitionData> {
        self.partitions.get(&partition)
    }

    /// Replace a partition's entries wholesale. Empty data removes the partition.
    pub fn replace_partition(&mut self, partition: PartitionId, data: PartitionData) {
        if data.is_empty() {
            self.partitions.remove(&partition);
        } else {
            self.partitions.insert(partition, data);
        }
    }

    /// Partitions holding at least one entry, in id order.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.keys().copied()
    }

    /// Total entries across partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn empty_replacement_drops_the_partition() {
        let mut store = PartitionStore::new();
        store.put(PartitionId(3), "k", Entry::new("v", 1));
        store.put(PartitionId(5), "k", Entry::unstamped("w").with_hits(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.partition_ids().collect::<Vec<_>>(), vec![PartitionId(3), PartitionId(5)]);

        store.replace_partition(PartitionId(3), PartitionData::new());
        assert!(store.partition(PartitionId(3)).is_none());
        assert_eq!(store.get(PartitionId(5), "k").unwrap().hits, 2);
        assert!(!store.is_empty());
    }
}
