//! Capture clock and session epoch

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::types::{StreamKind, Timestamp};

/// Monotonic clock stamping both streams of one sensor session
///
/// All timestamps are seconds since the clock base, so color and depth frames
/// captured at the same instant carry the same value regardless of which
/// producer stamped them.
#[derive(Clone)]
pub struct CaptureClock {
    base: Arc<Instant>,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            base: Arc::new(Instant::now()),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.base.elapsed())
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CaptureClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureClock")
            .field("elapsed", &self.base.elapsed())
            .finish()
    }
}

/// Which stream is allowed to set the session epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpochPolicy {
    /// Only a color frame latches the epoch; earlier depth frames are dropped
    #[default]
    Rgb,
    /// Whichever stream produces the first frame
    Any,
}

impl EpochPolicy {
    pub fn may_latch(self, kind: StreamKind) -> bool {
        match self {
            EpochPolicy::Rgb => kind == StreamKind::Rgb,
            EpochPolicy::Any => true,
        }
    }
}

const UNSET: u64 = u64::MAX;

/// Shared time origin of a session.
///
/// Latched exactly once by the first eligible frame; lock-free so capture
/// callbacks on different threads can race on it.
#[derive(Debug)]
pub struct SessionEpoch {
    bits: AtomicU64,
    policy: EpochPolicy,
}

/// Result of placing one frame on the session timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpochPlacement {
    /// Session-relative time of the frame
    Relative(Timestamp),
    /// No epoch yet and this stream may not set it
    NoEpoch,
    /// Frame predates the epoch
    BeforeEpoch,
}

impl SessionEpoch {
    pub fn new(policy: EpochPolicy) -> Self {
        Self {
            bits: AtomicU64::new(UNSET),
            policy,
        }
    }

    pub fn policy(&self) -> EpochPolicy {
        self.policy
    }

    pub fn get(&self) -> Option<Timestamp> {
        match self.bits.load(Ordering::Acquire) {
            UNSET => None,
            bits => Some(Timestamp::from_secs(f64::from_bits(bits))),
        }
    }

    /// Latch the epoch if eligible and map `timestamp` onto the session timeline
    pub fn place(&self, kind: StreamKind, timestamp: Timestamp) -> EpochPlacement {
        let epoch = match self.get() {
            Some(epoch) => epoch,
            None if self.policy.may_latch(kind) => {
                match self.bits.compare_exchange(
                    UNSET,
                    timestamp.secs.to_bits(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => timestamp,
                    // lost the race to the other stream
                    Err(bits) => Timestamp::from_secs(f64::from_bits(bits)),
                }
            }
            None => return EpochPlacement::NoEpoch,
        };
        match timestamp.relative_to(epoch) {
            Some(relative) => EpochPlacement::Relative(relative),
            None => EpochPlacement::BeforeEpoch,
        }
    }

    pub fn reset(&self) {
        self.bits.store(UNSET, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_basic() {
        let clock = CaptureClock::new();
        thread::sleep(Duration::from_millis(10));
        let ts = clock.now();
        assert!(ts.secs >= 0.01);
    }

    #[test]
    fn test_rgb_policy_drops_depth_before_epoch() {
        let epoch = SessionEpoch::new(EpochPolicy::Rgb);
        assert_eq!(
            epoch.place(StreamKind::Depth, Timestamp::from_secs(3.9)),
            EpochPlacement::NoEpoch
        );
        assert_eq!(epoch.get(), None);

        assert_eq!(
            epoch.place(StreamKind::Rgb, Timestamp::from_secs(4.0)),
            EpochPlacement::Relative(Timestamp::ZERO)
        );
        assert_eq!(epoch.get(), Some(Timestamp::from_secs(4.0)));
        assert_eq!(
            epoch.place(StreamKind::Depth, Timestamp::from_secs(4.0)),
            EpochPlacement::Relative(Timestamp::ZERO)
        );
        assert_eq!(
            epoch.place(StreamKind::Depth, Timestamp::from_secs(3.5)),
            EpochPlacement::BeforeEpoch
        );
    }

    #[test]
    fn test_any_policy_latches_once() {
        let epoch = SessionEpoch::new(EpochPolicy::Any);
        assert_eq!(
            epoch.place(StreamKind::Depth, Timestamp::from_secs(1.0)),
            EpochPlacement::Relative(Timestamp::ZERO)
        );
        assert_eq!(
            epoch.place(StreamKind::Rgb, Timestamp::from_secs(1.25)),
            EpochPlacement::Relative(Timestamp::from_secs(0.25))
        );
        epoch.reset();
        assert_eq!(epoch.get(), None);
    }

    #[test]
    fn test_concurrent_latch_agrees() {
        let epoch = Arc::new(SessionEpoch::new(EpochPolicy::Any));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let epoch = epoch.clone();
                thread::spawn(move || {
                    epoch.place(StreamKind::Rgb, Timestamp::from_secs(10.0 + i as f64));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let latched = epoch.get().unwrap().secs;
        assert!((10.0..18.0).contains(&latched));
    }
}
