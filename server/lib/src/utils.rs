use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::{thread_rng, Rng};

pub fn duration_from_epoch_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// A duration near `base`, at most `spread` away in either direction.
/// Applied to consumer retry timing so replicas do not refresh in lock step.
pub fn jitter(base: Duration, spread: Duration) -> Duration {
    if spread.is_zero() {
        return base;
    }
    let band = spread.as_millis() as u64;
    let off = thread_rng().gen_range(0..=band * 2);
    base.saturating_sub(spread) + Duration::from_millis(off)
}
