//! A `Clock` abstraction passed into the pipeline and anomaly detector
//! so tests can run the whole state machine without wall-clock waits
//! (Design Notes: "a `Clock` abstraction is passed into the detector
//! and pipeline for deterministic tests").

use std::{
  sync::Arc,
  time::{Duration, SystemTime, UNIX_EPOCH},
};

pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
  fn now_secs(&self) -> i64 {
    self.now_millis() / 1000
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or(Duration::ZERO)
      .as_millis() as i64
  }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
  Arc::new(SystemClock)
}

/// A clock that only advances when told to, for deterministic tests of
/// the anomaly detector's window bucketing and the pipeline's guard
/// points.
#[derive(Debug)]
pub struct FixedClock(std::sync::atomic::AtomicI64);

impl FixedClock {
  pub fn new(now_millis: i64) -> Self {
    Self(std::sync::atomic::AtomicI64::new(now_millis))
  }

  pub fn advance(&self, delta_millis: i64) {
    self.0.fetch_add(delta_millis, std::sync::atomic::Ordering::SeqCst);
  }
}

impl Clock for FixedClock {
  fn now_millis(&self) -> i64 {
    self.0.load(std::sync::atomic::Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_clock_advances_on_demand() {
    let clock = FixedClock::new(1_000);
    assert_eq!(clock.now_millis(), 1_000);
    clock.advance(500);
    assert_eq!(clock.now_millis(), 1_500);
  }
}
