//! Device fingerprint rotation — a small fixed pool of plausible
//! user-agent + viewport pairs. One is drawn at random on every session
//! creation, so a restored account may come back on a different profile.

use perch_core::models::Fingerprint;
use rand::Rng;

/// Rotation pool: common desktop profiles, nothing exotic.
const POOL: &[(&str, u32, u32)] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        1920,
        1080,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        1440,
        900,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
        1536,
        864,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        1680,
        1050,
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        1920,
        1200,
    ),
];

/// Draw a fingerprint from the rotation pool.
pub fn random_fingerprint() -> Fingerprint {
    let (ua, w, h) = POOL[rand::thread_rng().gen_range(0..POOL.len())];
    Fingerprint {
        user_agent: ua.to_string(),
        viewport_width: w,
        viewport_height: h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_comes_from_pool() {
        for _ in 0..20 {
            let fp = random_fingerprint();
            assert!(
                POOL.iter()
                    .any(|(ua, w, h)| *ua == fp.user_agent
                        && *w == fp.viewport_width
                        && *h == fp.viewport_height)
            );
        }
    }
}
