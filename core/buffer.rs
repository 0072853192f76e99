// Copyright 2018-2026 the jsrt authors. MIT license.

//! Tiered scratch-buffer pool shared between the loop thread and the
//! worker pool. Buffers come back zero-length with their tier capacity
//! intact; anything that does not fit a tier is heap-allocated and
//! dropped on release.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

const TIER_SIZES: [usize; 4] = [4096, 16384, 65536, 262144];
const TIER_CAPACITY: usize = 8;

static GLOBAL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

pub struct BufferPool {
  tiers: [Mutex<Vec<Vec<u8>>>; 4],
}

impl BufferPool {
  pub fn new() -> Self {
    Self {
      tiers: [
        Mutex::new(Vec::new()),
        Mutex::new(Vec::new()),
        Mutex::new(Vec::new()),
        Mutex::new(Vec::new()),
      ],
    }
  }

  pub fn global() -> &'static BufferPool {
    &GLOBAL
  }

  fn tier_for(size: usize) -> Option<usize> {
    TIER_SIZES.iter().position(|&cap| size <= cap)
  }

  /// Returns an empty buffer with at least `min_size` capacity.
  pub fn acquire(&self, min_size: usize) -> Vec<u8> {
    match Self::tier_for(min_size) {
      Some(tier) => {
        let mut slots = self.tiers[tier].lock();
        match slots.pop() {
          Some(buf) => buf,
          None => Vec::with_capacity(TIER_SIZES[tier]),
        }
      }
      None => Vec::with_capacity(min_size),
    }
  }

  /// Hands a buffer back. Over-tier and over-capacity buffers are simply
  /// dropped.
  pub fn release(&self, mut buf: Vec<u8>) {
    buf.clear();
    let Some(tier) = TIER_SIZES.iter().position(|&cap| buf.capacity() == cap)
    else {
      return;
    };
    let mut slots = self.tiers[tier].lock();
    if slots.len() < TIER_CAPACITY {
      slots.push(buf);
    }
  }

  #[cfg(test)]
  fn pooled(&self, tier: usize) -> usize {
    self.tiers[tier].lock().len()
  }
}

impl Default for BufferPool {
  fn default() -> Self {
    Self::new()
  }
}
