// Copyright 2018-2024 the Deno authors. MIT license.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Wall clock milliseconds, except that two calls in the same process never
/// return the same value and never go backwards.
pub fn monotonic_now() -> u64 {
  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0);
  let prev = LAST_TIMESTAMP
    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
      Some(now.max(last + 1))
    })
    .unwrap_or_else(|last| last);
  now.max(prev + 1)
}
