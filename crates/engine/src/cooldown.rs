//! Exponential cool-down applied when a target is re-queued after a block
//! or CAPTCHA.

use std::time::Duration;

use rand::Rng;

const BASE_SECS: u64 = 30;
const CAP_SECS: u64 = 300;

/// `min(30s * 2^attempts, 300s)` before jitter.
pub fn cooldown_base(attempts: i32) -> Duration {
    let shift = attempts.clamp(0, 10) as u32;
    let secs = BASE_SECS.saturating_mul(1u64 << shift).min(CAP_SECS);
    Duration::from_secs(secs)
}

/// The cool-down actually slept: base ±25%.
pub fn cooldown<R: Rng>(attempts: i32, rng: &mut R) -> Duration {
    let base = cooldown_base(attempts).as_millis() as f64;
    let factor = rng.gen_range(0.75..=1.25);
    Duration::from_millis((base * factor) as u64)
}
