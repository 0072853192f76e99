// Copyright 2018-2026 the jsrt authors. MIT license.

//! The in-memory module cache: a DJB2-hashed bucket table plus an
//! intrusive LRU list, both threaded through one slot arena (indices
//! instead of pointers). Single-loop-thread use; no locking.
//!
//! Invariants: every live entry sits in exactly one bucket chain and at
//! exactly one LRU position, and `count` never exceeds `max_entries`
//! (puts pre-evict).

use std::time::Duration;
use std::time::Instant;

#[derive(Debug)]
pub struct HttpCacheEntry {
  pub url: String,
  pub body: Vec<u8>,
  pub size: usize,
  pub cached_at: Instant,
  pub expires_at: Instant,
  pub etag: Option<String>,
  pub last_modified: Option<String>,
  bucket_next: Option<usize>,
  lru_prev: Option<usize>,
  lru_next: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub capacity: usize,
  pub bytes: usize,
  pub hits: u64,
  pub misses: u64,
}

pub struct HttpCache {
  buckets: Vec<Option<usize>>,
  slots: Vec<Option<HttpCacheEntry>>,
  free: Vec<usize>,
  lru_head: Option<usize>,
  lru_tail: Option<usize>,
  max_entries: usize,
  count: usize,
  size_bytes: usize,
  hits: u64,
  misses: u64,
  default_ttl: Duration,
}

/// DJB2 over the URL bytes.
fn hash_url(url: &str, bucket_count: usize) -> usize {
  let mut hash: u64 = 5381;
  for &byte in url.as_bytes() {
    hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(byte as u64);
  }
  (hash % bucket_count as u64) as usize
}

impl HttpCache {
  pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
    let max_entries = if max_entries == 0 { 100 } else { max_entries };
    // A prime bucket count near the entry limit.
    let bucket_count = if max_entries > 100 { 101 } else { 53 };
    HttpCache {
      buckets: vec![None; bucket_count],
      slots: Vec::new(),
      free: Vec::new(),
      lru_head: None,
      lru_tail: None,
      max_entries,
      count: 0,
      size_bytes: 0,
      hits: 0,
      misses: 0,
      default_ttl,
    }
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      entries: self.count,
      capacity: self.max_entries,
      bytes: self.size_bytes,
      hits: self.hits,
      misses: self.misses,
    }
  }

  pub fn get(&mut self, url: &str) -> Option<&HttpCacheEntry> {
    self.get_at(url, Instant::now())
  }

  /// Lookup with an explicit clock. An expired entry is removed and
  /// counted as a miss; a live one moves to the LRU head.
  pub fn get_at(&mut self, url: &str, now: Instant) -> Option<&HttpCacheEntry> {
    let Some(slot) = self.find_slot(url) else {
      self.misses += 1;
      return None;
    };
    if now > self.entry(slot).expires_at {
      self.remove_slot(slot);
      self.misses += 1;
      return None;
    }
    self.lru_unlink(slot);
    self.lru_push_front(slot);
    self.hits += 1;
    Some(self.entry(slot))
  }

  pub fn put(
    &mut self,
    url: &str,
    body: Vec<u8>,
    etag: Option<String>,
    last_modified: Option<String>,
  ) {
    self.put_at(url, body, etag, last_modified, Instant::now());
  }

  /// Insert (or replace in place) with an explicit clock. The entry
  /// always ends up at the LRU head; at capacity the LRU tail is
  /// evicted first.
  pub fn put_at(
    &mut self,
    url: &str,
    body: Vec<u8>,
    etag: Option<String>,
    last_modified: Option<String>,
    now: Instant,
  ) {
    if let Some(slot) = self.find_slot(url) {
      let expires_at = now + self.default_ttl;
      let size = body.len();
      let entry = self.slots[slot].as_mut().unwrap();
      self.size_bytes = self.size_bytes - entry.size + size;
      entry.body = body;
      entry.size = size;
      entry.etag = etag;
      entry.last_modified = last_modified;
      entry.cached_at = now;
      entry.expires_at = expires_at;
      self.lru_unlink(slot);
      self.lru_push_front(slot);
      return;
    }

    while self.count >= self.max_entries {
      self.evict_lru();
    }

    let size = body.len();
    let entry = HttpCacheEntry {
      url: url.to_string(),
      body,
      size,
      cached_at: now,
      expires_at: now + self.default_ttl,
      etag,
      last_modified,
      bucket_next: None,
      lru_prev: None,
      lru_next: None,
    };
    let slot = match self.free.pop() {
      Some(slot) => {
        self.slots[slot] = Some(entry);
        slot
      }
      None => {
        self.slots.push(Some(entry));
        self.slots.len() - 1
      }
    };

    let bucket = hash_url(url, self.buckets.len());
    self.entry_mut(slot).bucket_next = self.buckets[bucket];
    self.buckets[bucket] = Some(slot);
    self.lru_push_front(slot);
    self.count += 1;
    self.size_bytes += size;
  }

  pub fn remove(&mut self, url: &str) {
    if let Some(slot) = self.find_slot(url) {
      self.remove_slot(slot);
    }
  }

  pub fn clear(&mut self) {
    self.buckets.iter_mut().for_each(|bucket| *bucket = None);
    self.slots.clear();
    self.free.clear();
    self.lru_head = None;
    self.lru_tail = None;
    self.count = 0;
    self.size_bytes = 0;
  }

  /// The URL currently at the LRU head (most recently used).
  pub fn most_recent_url(&self) -> Option<&str> {
    self.lru_head.map(|slot| self.entry(slot).url.as_str())
  }

  pub fn contains(&self, url: &str) -> bool {
    self.find_slot(url).is_some()
  }

  // Internal plumbing.

  fn entry(&self, slot: usize) -> &HttpCacheEntry {
    self.slots[slot].as_ref().unwrap()
  }

  fn entry_mut(&mut self, slot: usize) -> &mut HttpCacheEntry {
    self.slots[slot].as_mut().unwrap()
  }

  fn find_slot(&self, url: &str) -> Option<usize> {
    let bucket = hash_url(url, self.buckets.len());
    let mut cursor = self.buckets[bucket];
    while let Some(slot) = cursor {
      let entry = self.entry(slot);
      if entry.url == url {
        return Some(slot);
      }
      cursor = entry.bucket_next;
    }
    None
  }

  fn bucket_unlink(&mut self, slot: usize) {
    let bucket = hash_url(&self.entry(slot).url, self.buckets.len());
    let mut cursor = self.buckets[bucket];
    let mut prev: Option<usize> = None;
    while let Some(current) = cursor {
      if current == slot {
        let next = self.entry(current).bucket_next;
        match prev {
          Some(prev) => self.entry_mut(prev).bucket_next = next,
          None => self.buckets[bucket] = next,
        }
        return;
      }
      prev = Some(current);
      cursor = self.entry(current).bucket_next;
    }
  }

  fn lru_push_front(&mut self, slot: usize) {
    let old_head = self.lru_head;
    {
      let entry = self.entry_mut(slot);
      entry.lru_prev = None;
      entry.lru_next = old_head;
    }
    if let Some(old_head) = old_head {
      self.entry_mut(old_head).lru_prev = Some(slot);
    }
    self.lru_head = Some(slot);
    if self.lru_tail.is_none() {
      self.lru_tail = Some(slot);
    }
  }

  fn lru_unlink(&mut self, slot: usize) {
    let (prev, next) = {
      let entry = self.entry(slot);
      (entry.lru_prev, entry.lru_next)
    };
    match prev {
      Some(prev) => self.entry_mut(prev).lru_next = next,
      None => self.lru_head = next,
    }
    match next {
      Some(next) => self.entry_mut(next).lru_prev = prev,
      None => self.lru_tail = prev,
    }
    let entry = self.entry_mut(slot);
    entry.lru_prev = None;
    entry.lru_next = None;
  }

  fn remove_slot(&mut self, slot: usize) {
    self.bucket_unlink(slot);
    self.lru_unlink(slot);
    let entry = self.slots[slot].take().unwrap();
    self.count -= 1;
    self.size_bytes -= entry.size;
    self.free.push(slot);
  }

  fn evict_lru(&mut self) {
    if let Some(tail) = self.lru_tail {
      log::debug!("evicting {} from the module cache", self.entry(tail).url);
      self.remove_slot(tail);
    }
  }

  #[cfg(test)]
  fn check_invariants(&self) {
    // Bucket chains and the LRU list must both see exactly `count`
    // entries.
    let mut in_buckets = 0;
    for &head in &self.buckets {
      let mut cursor = head;
      while let Some(slot) = cursor {
        in_buckets += 1;
        cursor = self.entry(slot).bucket_next;
      }
    }
    assert_eq!(in_buckets, self.count);

    let mut in_lru = 0;
    let mut cursor = self.lru_head;
    let mut prev = None;
    while let Some(slot) = cursor {
      assert_eq!(self.entry(slot).lru_prev, prev);
      in_lru += 1;
      prev = cursor;
      cursor = self.entry(slot).lru_next;
    }
    assert_eq!(in_lru, self.count);
    assert_eq!(self.lru_tail, prev);
    assert!(self.count <= self.max_entries);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cache(max_entries: usize) -> HttpCache {
    HttpCache::new(max_entries, Duration::from_secs(3600))
  }

  fn put(cache: &mut HttpCache, url: &str) {
    cache.put(url, url.as_bytes().to_vec(), None, None);
  }

  #[test]
  fn get_returns_what_put_stored() {
    let mut cache = cache(10);
    cache.put(
      "https://esm.sh/a.js",
      b"export default 1".to_vec(),
      Some("\"etag\"".to_string()),
      None,
    );
    let entry = cache.get("https://esm.sh/a.js").unwrap();
    assert_eq!(entry.body, b"export default 1");
    assert_eq!(entry.etag.as_deref(), Some("\"etag\""));
    assert_eq!(cache.stats().hits, 1);
    cache.check_invariants();
  }

  #[test]
  fn lru_eviction_scenario() {
    // put A, B, C; touch A; put D => B (the least recently got) leaves.
    let mut cache = cache(3);
    put(&mut cache, "A");
    put(&mut cache, "B");
    put(&mut cache, "C");
    assert!(cache.get("A").is_some());
    put(&mut cache, "D");

    assert!(cache.contains("A"));
    assert!(!cache.contains("B"));
    assert!(cache.contains("C"));
    assert!(cache.contains("D"));
    assert_eq!(cache.stats().entries, 3);
    cache.check_invariants();
  }

  #[test]
  fn put_always_lands_at_lru_head() {
    let mut cache = cache(5);
    put(&mut cache, "one");
    put(&mut cache, "two");
    assert_eq!(cache.most_recent_url(), Some("two"));
    // Replacing an existing URL promotes it too.
    put(&mut cache, "one");
    assert_eq!(cache.most_recent_url(), Some("one"));
    assert_eq!(cache.stats().entries, 2);
    cache.check_invariants();
  }

  #[test]
  fn replacement_updates_bytes_in_place() {
    let mut cache = cache(5);
    cache.put("mod", vec![0; 100], None, None);
    assert_eq!(cache.stats().bytes, 100);
    cache.put("mod", vec![0; 40], None, None);
    assert_eq!(cache.stats().bytes, 40);
    assert_eq!(cache.stats().entries, 1);
    cache.check_invariants();
  }

  #[test]
  fn expired_entry_is_removed_on_get_and_counts_a_miss() {
    let mut cache = HttpCache::new(10, Duration::from_secs(1));
    let now = Instant::now();
    cache.put_at("X", b"data".to_vec(), None, None, now);
    let later = now + Duration::from_secs(2);
    assert!(cache.get_at("X", later).is_none());
    assert_eq!(cache.stats().misses, 1);
    assert!(!cache.contains("X"));
    assert_eq!(cache.stats().entries, 0);
    cache.check_invariants();
  }

  #[test]
  fn entry_within_ttl_is_served() {
    let mut cache = HttpCache::new(10, Duration::from_secs(10));
    let now = Instant::now();
    cache.put_at("X", b"data".to_vec(), None, None, now);
    let soon = now + Duration::from_secs(5);
    assert!(cache.get_at("X", soon).is_some());
    assert_eq!(cache.stats().hits, 1);
  }

  #[test]
  fn remove_and_clear() {
    let mut cache = cache(10);
    put(&mut cache, "a");
    put(&mut cache, "b");
    cache.remove("a");
    assert!(!cache.contains("a"));
    assert_eq!(cache.stats().entries, 1);
    cache.check_invariants();
    cache.clear();
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().bytes, 0);
    cache.check_invariants();
  }

  #[test]
  fn many_entries_through_shared_buckets() {
    // More URLs than buckets forces chain collisions.
    let mut cache = HttpCache::new(200, Duration::from_secs(3600));
    for i in 0..200 {
      put(&mut cache, &format!("https://esm.sh/pkg-{i}.js"));
    }
    cache.check_invariants();
    for i in 0..200 {
      assert!(cache.contains(&format!("https://esm.sh/pkg-{i}.js")), "{i}");
    }
    // One more put evicts exactly the least recently used.
    put(&mut cache, "https://esm.sh/extra.js");
    assert_eq!(cache.stats().entries, 200);
    assert!(!cache.contains("https://esm.sh/pkg-0.js"));
    cache.check_invariants();
  }

  #[test]
  fn capacity_is_never_exceeded() {
    let mut cache = cache(4);
    for i in 0..50 {
      put(&mut cache, &format!("url-{i}"));
      assert!(cache.stats().entries <= 4);
    }
    cache.check_invariants();
  }
}
