use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{Result, ShardScaleError};
use crate::keyspace::{soft_compare, HashRange};
use crate::types::ShardId;

/// A shard as reported by the stream control plane. Parent ids are set on
/// shards produced by a split or merge; their parents are closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: ShardId,
    pub range: HashRange,
    pub parent: Option<ShardId>,
    pub adjacent_parent: Option<ShardId>,
}

impl Shard {
    pub fn root(id: impl Into<ShardId>, range: HashRange) -> Self {
        Self {
            id: id.into(),
            range,
            parent: None,
            adjacent_parent: None,
        }
    }
}

/// Ordered view of the open shards of a stream.
///
/// A shard is open iff no other shard in the listing names it as parent or
/// adjacent parent. The open set always partitions the keyspace: ranges are
/// pairwise disjoint and their union is `[0, keyspace_max]` ([`validate`]
/// checks exactly that).
///
/// [`validate`]: ShardTopology::validate
#[derive(Debug, Clone)]
pub struct ShardTopology {
    shards: Vec<Shard>,
    keyspace_max: u128,
}

impl ShardTopology {
    /// Build the open-shard view from a raw listing, ordered by ascending
    /// start hash.
    pub fn from_listing(all: Vec<Shard>, keyspace_max: u128) -> Self {
        let mut closed: HashSet<ShardId> = HashSet::new();
        for shard in &all {
            if let Some(parent) = &shard.parent {
                closed.insert(parent.clone());
            }
            if let Some(parent) = &shard.adjacent_parent {
                closed.insert(parent.clone());
            }
        }

        let mut shards: Vec<Shard> = all
            .into_iter()
            .filter(|shard| !closed.contains(&shard.id))
            .collect();
        shards.sort_by(|a, b| a.range.start.cmp(&b.range.start));

        Self {
            shards,
            keyspace_max,
        }
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn keyspace_max(&self) -> u128 {
        self.keyspace_max
    }

    pub fn shard_by_id(&self, id: &str) -> Option<&Shard> {
        self.shards.iter().find(|shard| shard.id == id)
    }

    /// The open shard whose range contains `hash`.
    pub fn shard_at_hash(&self, hash: u128) -> Option<&Shard> {
        self.shards
            .binary_search_by(|shard| {
                if shard.range.end < hash {
                    Ordering::Less
                } else if shard.range.start > hash {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|idx| &self.shards[idx])
    }

    /// True when every open shard covers `1/n` of the keyspace within the
    /// fixed-point comparison tolerance.
    pub fn is_balanced(&self, n: u32) -> bool {
        if n == 0 || self.shards.len() != n as usize {
            return false;
        }
        let ideal = 1.0 / n as f64;
        self.shards.iter().all(|shard| {
            soft_compare(shard.range.fraction_of(self.keyspace_max), ideal) == Ordering::Equal
        })
    }

    /// Ranges must be pairwise disjoint and cover the whole keyspace.
    pub fn validate(&self) -> Result<()> {
        let first = self
            .shards
            .first()
            .ok_or_else(|| ShardScaleError::Inconsistent("no open shards".to_string()))?;
        if first.range.start != 0 {
            return Err(ShardScaleError::Inconsistent(format!(
                "lowest open shard {} starts at {}, not 0",
                first.id, first.range.start
            )));
        }

        for pair in self.shards.windows(2) {
            if !pair[0].range.adjoins_below(&pair[1].range) {
                return Err(ShardScaleError::Inconsistent(format!(
                    "open shards {} [{}..{}] and {} [{}..{}] are not contiguous",
                    pair[0].id,
                    pair[0].range.start,
                    pair[0].range.end,
                    pair[1].id,
                    pair[1].range.start,
                    pair[1].range.end
                )));
            }
        }

        let last = self.shards.last().expect("non-empty");
        if last.range.end != self.keyspace_max {
            return Err(ShardScaleError::Inconsistent(format!(
                "highest open shard {} ends at {}, not at the keyspace max",
                last.id, last.range.end
            )));
        }
        Ok(())
    }
}
