//! Capped exponential retry backoff.
//!
//! The delay before attempt `n + 1` is `base * 2^n`, capped at one of two
//! ceilings: an ordinary cap for transient failures and a longer cap when the
//! object is known to be missing on the primary, since retrying faster than
//! the primary can recreate it is wasted work. The exponent saturates, so an
//! arbitrarily large retry count still yields a valid, capped timestamp.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
   base_secs:        u64,
   cap_secs:         u64,
   missing_cap_secs: u64,
}

impl RetryPolicy {
   pub const fn new(base: Duration, cap: Duration, missing_cap: Duration) -> Self {
      Self {
         base_secs:        base.as_secs(),
         cap_secs:         cap.as_secs(),
         missing_cap_secs: missing_cap.as_secs(),
      }
   }

   pub const fn from_config(cfg: &Config) -> Self {
      Self {
         base_secs:        cfg.retry_base_secs,
         cap_secs:         cfg.retry_cap_secs,
         missing_cap_secs: cfg.missing_on_primary_retry_cap_secs,
      }
   }

   pub const fn cap(&self, missing_on_primary: bool) -> Duration {
      if missing_on_primary {
         Duration::from_secs(self.missing_cap_secs)
      } else {
         Duration::from_secs(self.cap_secs)
      }
   }

   /// Delay before the next attempt after `retry_count` failures.
   pub fn backoff(&self, retry_count: u32, missing_on_primary: bool) -> Duration {
      let cap = self.cap(missing_on_primary).as_secs();
      let factor = 1u64.checked_shl(retry_count.min(63)).unwrap_or(u64::MAX);
      Duration::from_secs(self.base_secs.saturating_mul(factor).min(cap))
   }

   /// Absolute time of the next eligible attempt.
   pub fn next_retry_at(
      &self,
      now: DateTime<Utc>,
      retry_count: u32,
      missing_on_primary: bool,
   ) -> DateTime<Utc> {
      let secs = self.backoff(retry_count, missing_on_primary).as_secs();
      let delta = i64::try_from(secs)
         .ok()
         .and_then(TimeDelta::try_seconds)
         .unwrap_or(TimeDelta::MAX);
      now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
   }
}

impl Default for RetryPolicy {
   fn default() -> Self {
      Self::from_config(&Config::default())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   const HOUR: Duration = Duration::from_secs(3600);

   #[test]
   fn grows_exponentially_from_base() {
      let policy = RetryPolicy::default();
      assert_eq!(policy.backoff(0, false), Duration::from_secs(30));
      assert_eq!(policy.backoff(1, false), Duration::from_secs(60));
      assert_eq!(policy.backoff(3, false), Duration::from_secs(240));
   }

   #[test]
   fn caps_at_one_hour_for_ordinary_failures() {
      let policy = RetryPolicy::default();
      assert_eq!(policy.backoff(31, false), HOUR);
      assert_eq!(policy.backoff(u32::MAX, false), HOUR);
   }

   #[test]
   fn caps_at_four_hours_when_missing_on_primary() {
      let policy = RetryPolicy::default();
      assert_eq!(policy.backoff(100, true), HOUR * 4);
   }

   #[test]
   fn huge_retry_count_produces_valid_timestamp() {
      let policy = RetryPolicy::default();
      let now = Utc::now();
      let at = policy.next_retry_at(now, 10_000, false);
      assert_eq!(at - now, TimeDelta::hours(1));
   }

   #[test]
   fn absurd_cap_saturates_instead_of_panicking() {
      let policy = RetryPolicy::new(Duration::from_secs(1), Duration::MAX, Duration::MAX);
      let at = policy.next_retry_at(Utc::now(), 200, true);
      assert_eq!(at, DateTime::<Utc>::MAX_UTC);
   }
}
