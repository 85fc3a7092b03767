//! Wall-clock source shared by the services.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
   fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
   fn now(&self) -> DateTime<Utc> {
      Utc::now()
   }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
   now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
   pub const fn new(start: DateTime<Utc>) -> Self {
      Self { now: Mutex::new(start) }
   }

   pub fn advance(&self, by: Duration) {
      let mut now = self.now.lock();
      *now += by;
   }
}

impl Clock for ManualClock {
   fn now(&self) -> DateTime<Utc> {
      *self.now.lock()
   }
}
