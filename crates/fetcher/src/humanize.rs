//! Humanized pacing. Everything here is a deterministic function of a
//! seeded PRNG so tests can pin exact behavior while runtime stays varied.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform jitter of ±25% around the monitor's delay.
pub fn jittered<R: Rng>(delay: Duration, rng: &mut R) -> Duration {
    let ms = delay.as_millis() as f64;
    let factor = rng.gen_range(0.75..=1.25);
    Duration::from_millis((ms * factor) as u64)
}

/// One scroll step: pixels down, then a pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollStep {
    pub pixels: u32,
    pub pause: Duration,
}

/// Derive the whole humanization plan for one page view from
/// (content_length, attempt). Same inputs, same plan.
fn page_rng(content_length: usize, attempt: u32) -> StdRng {
    let seed = (content_length as u64)
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(attempt as u64);
    StdRng::seed_from_u64(seed)
}

/// 3-7 scroll increments of 200-600 px with 0.3-1.5 s pauses.
pub fn scroll_plan(content_length: usize, attempt: u32) -> Vec<ScrollStep> {
    let mut rng = page_rng(content_length, attempt);
    let steps = rng.gen_range(3..=7);
    (0..steps)
        .map(|_| ScrollStep {
            pixels: rng.gen_range(200..=600),
            pause: Duration::from_millis(rng.gen_range(300..=1500)),
        })
        .collect()
}

/// "Reading" a page at 200-300 words per minute. Visible text is a small
/// slice of raw HTML, so assume ~1 word per 60 bytes of markup; the result
/// is clamped to [2 s, 30 s].
pub fn reading_time(content_length: usize, attempt: u32) -> Duration {
    let mut rng = page_rng(content_length, attempt ^ 0x5151);
    let wpm = rng.gen_range(200..=300) as f64;
    let words = (content_length as f64 / 60.0).max(1.0);
    let secs = words / wpm * 60.0;
    Duration::from_secs_f64(secs.clamp(2.0, 30.0))
}

/// How many requests the current session runs before a long pause:
/// re-randomized each session to 0.9x-1.2x of the configured nominal
/// (45-60 for the default of 50).
pub fn session_length<R: Rng>(nominal: u32, rng: &mut R) -> u32 {
    let lo = (nominal * 9 / 10).max(1);
    let hi = (nominal * 6 / 5).max(lo);
    rng.gen_range(lo..=hi)
}

/// The long pause itself: 30-90 s.
pub fn session_break<R: Rng>(rng: &mut R) -> Duration {
    Duration::from_millis(rng.gen_range(30_000..=90_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_quarter() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let d = jittered(Duration::from_millis(4_000), &mut rng);
            assert!(d >= Duration::from_millis(3_000), "{d:?}");
            assert!(d <= Duration::from_millis(5_000), "{d:?}");
        }
    }

    #[test]
    fn scroll_plan_is_deterministic_and_bounded() {
        let a = scroll_plan(48_213, 1);
        let b = scroll_plan(48_213, 1);
        assert_eq!(a, b);

        assert!((3..=7).contains(&a.len()));
        for step in &a {
            assert!((200..=600).contains(&step.pixels));
            assert!(step.pause >= Duration::from_millis(300));
            assert!(step.pause <= Duration::from_millis(1500));
        }

        // A different attempt draws from a different seed; at minimum the
        // plan stays within the same bounds.
        let c = scroll_plan(48_213, 2);
        for step in &c {
            assert!((200..=600).contains(&step.pixels));
        }
    }

    #[test]
    fn reading_time_clamped_and_scales() {
        let tiny = reading_time(100, 1);
        assert_eq!(tiny, Duration::from_secs(2));

        let huge = reading_time(5_000_000, 1);
        assert_eq!(huge, Duration::from_secs(30));

        // ~50 words of visible text: 10-15 s depending on the drawn wpm.
        let medium = reading_time(3_000, 1);
        assert!(medium > tiny && medium < huge);
        assert_eq!(medium, reading_time(3_000, 1));
    }

    #[test]
    fn session_parameters_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let len = session_length(50, &mut rng);
            assert!((45..=60).contains(&len));
            let pause = session_break(&mut rng);
            assert!(pause >= Duration::from_secs(30) && pause <= Duration::from_secs(90));
        }
    }

    #[test]
    fn session_length_scales_with_nominal() {
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..100 {
            assert!((90..=120).contains(&session_length(100, &mut rng)));
        }
        // Tiny nominals still produce a sane window.
        assert!(session_length(1, &mut rng) >= 1);
    }
}
