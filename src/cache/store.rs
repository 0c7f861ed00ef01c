//! Cache Store Module
//!
//! In-process Redis-style keyspace: strings, lists, hashes and sets with
//! per-key TTL, LRU eviction and cursor-based scanning.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{glob_match, CacheEntry, CacheStats, CacheValue, LruTracker, MAX_KEY_LENGTH};
use crate::error::{Result, SyncError};

/// Abandoned scan cursors are dropped once this many are outstanding.
const MAX_OPEN_CURSORS: usize = 1024;

// == Cache Store ==
#[derive(Debug)]
pub struct CacheStore {
    /// Ordered so scans can resume after the last key examined
    entries: BTreeMap<String, CacheEntry>,
    lru: LruTracker,
    stats: CacheStats,
    max_entries: usize,
    /// Open scan cursors mapped to the last key they examined
    cursors: HashMap<u64, String>,
    next_cursor: u64,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore holding at most `max_entries` keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            cursors: HashMap::new(),
            next_cursor: 1,
        }
    }

    // == Strings ==
    /// Returns the string stored at `key`, or None when absent or expired.
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let value = match self.live(key) {
            Some(CacheEntry {
                value: CacheValue::Text(text),
                ..
            }) => Some(text.clone()),
            Some(entry) => return Err(wrong_type(key, &entry.value)),
            None => None,
        };

        match value {
            Some(text) => {
                self.stats.record_hit();
                self.lru.touch(key);
                Ok(Some(text))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Stores a string, replacing any previous value of any type and resetting TTL.
    pub fn set(&mut self, key: &str, value: String, ttl: Option<u64>) -> Result<()> {
        validate_key(key)?;
        if !self.entries.contains_key(key) {
            self.make_room();
        }
        self.entries
            .insert(key.to_string(), CacheEntry::new(CacheValue::Text(value), ttl));
        self.lru.touch(key);
        Ok(())
    }

    /// Removes a key of any type. Returns true if it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.lru.remove(key);
                !entry.is_expired()
            }
            None => false,
        }
    }

    // == Scan ==
    /// Examines up to `count` keys after `cursor` and returns those matching `pattern`.
    ///
    /// Cursor 0 starts a new iteration; a returned cursor of 0 means the
    /// iteration is complete. Keys deleted between calls do not cause
    /// surviving keys to be skipped.
    pub fn scan(&mut self, cursor: u64, pattern: &str, count: usize) -> (u64, Vec<String>) {
        let resume = if cursor == 0 {
            None
        } else {
            match self.cursors.remove(&cursor) {
                Some(last) => Some(last),
                None => return (0, Vec::new()),
            }
        };

        let now = current_timestamp_ms();
        let lower = match resume.as_deref() {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };

        let mut matched = Vec::new();
        let mut last_examined = None;
        let mut exhausted = true;
        for (examined, (key, entry)) in self
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .enumerate()
        {
            if examined == count.max(1) {
                exhausted = false;
                break;
            }
            if !entry.is_expired_at(now) && glob_match(pattern, key) {
                matched.push(key.clone());
            }
            last_examined = Some(key.clone());
        }

        match (exhausted, last_examined) {
            (false, Some(last)) => {
                if self.cursors.len() >= MAX_OPEN_CURSORS {
                    self.cursors.clear();
                }
                let id = self.next_cursor;
                self.next_cursor += 1;
                self.cursors.insert(id, last);
                (id, matched)
            }
            _ => (0, matched),
        }
    }

    // == Lists ==
    /// Pushes each value onto the head in order. Returns the new length.
    pub fn lpush(&mut self, key: &str, values: &[String]) -> Result<usize> {
        let entry = self.writable(key, || CacheValue::List(VecDeque::new()))?;
        match &mut entry.value {
            CacheValue::List(list) => {
                for value in values {
                    list.push_front(value.clone());
                }
                Ok(list.len())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    /// Returns elements `start..=stop`, negative indices counting from the tail.
    pub fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        match self.live(key) {
            Some(CacheEntry {
                value: CacheValue::List(list),
                ..
            }) => Ok(resolve_range(start, stop, list.len())
                .map(|(s, e)| list.range(s..=e).cloned().collect())
                .unwrap_or_default()),
            Some(entry) => Err(wrong_type(key, &entry.value)),
            None => Ok(Vec::new()),
        }
    }

    /// Keeps only elements `start..=stop`; an empty result removes the key.
    pub fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> Result<()> {
        let emptied = match self.live_mut(key) {
            Some(CacheEntry {
                value: CacheValue::List(list),
                ..
            }) => {
                match resolve_range(start, stop, list.len()) {
                    Some((s, e)) => {
                        list.truncate(e + 1);
                        list.drain(..s);
                    }
                    None => list.clear(),
                }
                list.is_empty()
            }
            Some(entry) => return Err(wrong_type(key, &entry.value)),
            None => false,
        };
        if emptied {
            self.delete(key);
        }
        Ok(())
    }

    pub fn llen(&mut self, key: &str) -> Result<usize> {
        match self.live(key) {
            Some(CacheEntry {
                value: CacheValue::List(list),
                ..
            }) => Ok(list.len()),
            Some(entry) => Err(wrong_type(key, &entry.value)),
            None => Ok(0),
        }
    }

    // == Hashes ==
    /// Adds `delta` to an integer hash field, creating it at 0. Returns the new value.
    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let entry = self.writable(key, || CacheValue::Hash(HashMap::new()))?;
        match &mut entry.value {
            CacheValue::Hash(hash) => {
                let current = match hash.get(field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| {
                        SyncError::InvalidRequest(format!(
                            "hash field {field} of {key} is not an integer"
                        ))
                    })?,
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            other => Err(wrong_type(key, other)),
        }
    }

    pub fn hset(&mut self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let entry = self.writable(key, || CacheValue::Hash(HashMap::new()))?;
        match &mut entry.value {
            CacheValue::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    pub fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>> {
        let hash = match self.live(key) {
            Some(CacheEntry {
                value: CacheValue::Hash(hash),
                ..
            }) => Some(hash.clone()),
            Some(entry) => return Err(wrong_type(key, &entry.value)),
            None => None,
        };
        match hash {
            Some(hash) => {
                self.stats.record_hit();
                self.lru.touch(key);
                Ok(hash)
            }
            None => {
                self.stats.record_miss();
                Ok(HashMap::new())
            }
        }
    }

    // == Sets ==
    /// Returns true if the member was newly added.
    pub fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        let entry = self.writable(key, || CacheValue::Set(HashSet::new()))?;
        match &mut entry.value {
            CacheValue::Set(set) => Ok(set.insert(member.to_string())),
            other => Err(wrong_type(key, other)),
        }
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        let (removed, emptied) = match self.live_mut(key) {
            Some(CacheEntry {
                value: CacheValue::Set(set),
                ..
            }) => (set.remove(member), set.is_empty()),
            Some(entry) => return Err(wrong_type(key, &entry.value)),
            None => (false, false),
        };
        if emptied {
            self.delete(key);
        }
        Ok(removed)
    }

    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        match self.live(key) {
            Some(CacheEntry {
                value: CacheValue::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(entry) => Err(wrong_type(key, &entry.value)),
            None => Ok(Vec::new()),
        }
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = current_timestamp_ms();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
            self.lru.remove(key);
        }
        self.stats.record_expired(expired.len());
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Internals ==
    /// Drops the key if it has expired, then returns the live entry.
    fn live(&mut self, key: &str) -> Option<&CacheEntry> {
        self.purge_if_expired(key);
        self.entries.get(key)
    }

    fn live_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.purge_if_expired(key);
        self.entries.get_mut(key)
    }

    fn purge_if_expired(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(CacheEntry::is_expired) {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expired(1);
        }
    }

    /// Returns the live entry for a collection write, creating it with `init` if absent.
    fn writable(
        &mut self,
        key: &str,
        init: impl FnOnce() -> CacheValue,
    ) -> Result<&mut CacheEntry> {
        validate_key(key)?;
        self.purge_if_expired(key);
        if !self.entries.contains_key(key) {
            self.make_room();
        }
        self.lru.touch(key);
        Ok(self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(init(), None)))
    }

    /// Evicts least recently used keys until one more key fits.
    fn make_room(&mut self) {
        while self.entries.len() >= self.max_entries {
            match self.lru.evict_oldest() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                    self.stats.record_eviction();
                }
                None => break,
            }
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SyncError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(SyncError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

fn wrong_type(key: &str, value: &CacheValue) -> SyncError {
    SyncError::InvalidRequest(format!(
        "WRONGTYPE key {key} holds a {}",
        value.type_name()
    ))
}

/// Resolves Redis-style inclusive indices against a list length.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = CacheStore::new(100);
        store.set("key1", "value1".to_string(), None).unwrap();

        assert_eq!(store.get("key1").unwrap(), Some("value1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_missing_is_none() {
        let mut store = CacheStore::new(100);
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let mut store = CacheStore::new(100);
        store.set("key1", "value1".to_string(), Some(1)).unwrap();
        assert!(store.get("key1").unwrap().is_some());

        sleep(Duration::from_millis(1100));

        assert_eq!(store.get("key1").unwrap(), None);
        assert_eq!(store.stats().expired, 1);
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = CacheStore::new(3);
        store.set("key1", "v".to_string(), None).unwrap();
        store.set("key2", "v".to_string(), None).unwrap();
        store.set("key3", "v".to_string(), None).unwrap();
        store.get("key1").unwrap();

        store.set("key4", "v".to_string(), None).unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.get("key1").unwrap().is_some());
        assert!(store.get("key2").unwrap().is_none());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_store_rejects_long_key() {
        let mut store = CacheStore::new(10);
        let key = "x".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            store.set(&key, "v".to_string(), None),
            Err(SyncError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let mut store = CacheStore::new(10);
        store.lpush("queue:timed-out", &strings(&["a"])).unwrap();
        assert!(store.get("queue:timed-out").is_err());
        assert!(store.hincrby("queue:timed-out", "f", 1).is_err());
    }

    #[test]
    fn test_list_push_range_trim() {
        let mut store = CacheStore::new(10);
        store.lpush("q", &strings(&["1", "2", "3", "4"])).unwrap();

        // head is the most recent push
        assert_eq!(store.lrange("q", 0, -1).unwrap(), strings(&["4", "3", "2", "1"]));
        // oldest two from the tail
        assert_eq!(store.lrange("q", -2, -1).unwrap(), strings(&["2", "1"]));

        store.ltrim("q", 0, -3).unwrap();
        assert_eq!(store.lrange("q", 0, -1).unwrap(), strings(&["4", "3"]));
        assert_eq!(store.llen("q").unwrap(), 2);
    }

    #[test]
    fn test_ltrim_to_empty_removes_key() {
        let mut store = CacheStore::new(10);
        store.lpush("q", &strings(&["1", "2"])).unwrap();
        store.ltrim("q", 0, -3).unwrap();
        assert_eq!(store.llen("q").unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_lrange_out_of_bounds() {
        let mut store = CacheStore::new(10);
        store.lpush("q", &strings(&["1", "2"])).unwrap();
        assert_eq!(store.lrange("q", -50, -1).unwrap().len(), 2);
        assert!(store.lrange("q", 5, 10).unwrap().is_empty());
        assert!(store.lrange("missing", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_hash_increment_and_read() {
        let mut store = CacheStore::new(10);
        assert_eq!(store.hincrby("h", "passCount", 2).unwrap(), 2);
        assert_eq!(store.hincrby("h", "passCount", 5).unwrap(), 7);
        store
            .hset("h", &[("needsSync".to_string(), "1".to_string())])
            .unwrap();

        let all = store.hgetall("h").unwrap();
        assert_eq!(all.get("passCount").map(String::as_str), Some("7"));
        assert_eq!(all.get("needsSync").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_set_membership() {
        let mut store = CacheStore::new(10);
        assert!(store.sadd("dirty", "exam-1").unwrap());
        assert!(!store.sadd("dirty", "exam-1").unwrap());
        store.sadd("dirty", "exam-2").unwrap();
        assert_eq!(store.smembers("dirty").unwrap(), strings(&["exam-1", "exam-2"]));

        assert!(store.srem("dirty", "exam-1").unwrap());
        assert!(store.srem("dirty", "exam-2").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_pages_until_cursor_zero() {
        let mut store = CacheStore::new(100);
        for i in 0..25 {
            store.set(&format!("bundle:{}:b{i}", i % 4), "v".to_string(), None).unwrap();
            store.set(&format!("other:{i}"), "v".to_string(), None).unwrap();
        }

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, "bundle:*", 7);
            found.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 25);
    }

    #[test]
    fn test_scan_survives_deletes_between_pages() {
        let mut store = CacheStore::new(100);
        for i in 0..10 {
            store.set(&format!("k:{i}"), "v".to_string(), None).unwrap();
        }

        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next, keys) = store.scan(cursor, "k:*", 3);
            for key in keys {
                if store.delete(&key) {
                    deleted += 1;
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(deleted, 10);
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_unknown_cursor_ends_iteration() {
        let mut store = CacheStore::new(10);
        store.set("a", "v".to_string(), None).unwrap();
        assert_eq!(store.scan(999, "*", 10), (0, Vec::new()));
    }

    #[test]
    fn test_cleanup_expired() {
        let mut store = CacheStore::new(100);
        store.set("short", "v".to_string(), Some(1)).unwrap();
        store.set("long", "v".to_string(), Some(10)).unwrap();

        sleep(Duration::from_millis(1100));

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
