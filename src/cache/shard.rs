//! Shard Router Module
//!
//! Maps entity ids onto a fixed number of logical shards so hot entities are
//! spread across the keyspace and bulk invalidation can run per shard.
//!
//! The mapping is FNV-1a (32-bit) over the UTF-8 bytes of the id, modulo the
//! shard count. It is stable across processes and releases; changing a
//! feature's shard count requires clearing that feature's keys first.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Shard index for `entity_id`. A shard count of 0 is treated as 1.
pub fn shard_for(entity_id: &str, shard_count: u32) -> u32 {
    fnv1a(entity_id.as_bytes()) % shard_count.max(1)
}

// == Sharded Keyspace ==
/// Builds `<namespace>:<shardId>:<entityId>` keys and the patterns that cover them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedKeyspace {
    namespace: String,
    shard_count: u32,
}

impl ShardedKeyspace {
    pub fn new(namespace: impl Into<String>, shard_count: u32) -> Self {
        Self {
            namespace: namespace.into(),
            shard_count: shard_count.max(1),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shard_of(&self, entity_id: &str) -> u32 {
        shard_for(entity_id, self.shard_count)
    }

    pub fn key(&self, entity_id: &str) -> String {
        format!("{}:{}:{}", self.namespace, self.shard_of(entity_id), entity_id)
    }

    /// Key for a sub-resource of an entity, e.g. `bundle:3:b42:details`.
    pub fn key_with_suffix(&self, entity_id: &str, suffix: &str) -> String {
        format!("{}:{}", self.key(entity_id), suffix)
    }

    /// Every sub-resource key of one entity.
    pub fn entity_pattern(&self, entity_id: &str) -> String {
        format!("{}:*", self.key(entity_id))
    }

    /// Every key stored on one shard.
    pub fn shard_pattern(&self, shard: u32) -> String {
        format!("{}:{}:*", self.namespace, shard)
    }

    /// Every key in the namespace, on any shard.
    pub fn all_pattern(&self) -> String {
        format!("{}:*:*", self.namespace)
    }
}
