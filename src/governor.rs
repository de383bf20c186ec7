//! Adaptive health governor (C7).
//!
//! A post-request feedback loop: after every forwarded request, asks the
//! request log for today's rolling success rate on the provider that was
//! used and disables it once enough fresh samples show it underperforming.
//! Runs as a fire-and-forget task so it never delays the response path.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::Platform;

const MIN_NEW_REQUESTS: i64 = 5;
const SUCCESS_RATE_THRESHOLD: f64 = 0.80;

static LAST_CHECK_REQUESTS: Lazy<Mutex<HashMap<(Platform, String), i64>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Runs one governor tick for `(platform, provider)`. Safe to call
/// concurrently; the only mutable state is the mutex-guarded baseline map.
pub fn check(platform: Platform, provider: &str) {
    if provider.is_empty() {
        return;
    }

    let (rate, total) = crate::db::success_rate(platform.as_str(), provider);
    let key = (platform, provider.to_string());

    let mut last_check = LAST_CHECK_REQUESTS.lock().unwrap();
    let baseline = match last_check.get(&key) {
        None => {
            // First time seeing this provider today (or since restart):
            // seed the baseline rather than risk disabling on a stale count.
            last_check.insert(key, total);
            return;
        }
        Some(v) => *v,
    };

    let delta = total - baseline;
    if delta < MIN_NEW_REQUESTS {
        return;
    }

    if rate >= SUCCESS_RATE_THRESHOLD {
        last_check.insert(key, total);
        return;
    }

    drop(last_check);
    crate::logger::warn(
        "governor",
        &format!(
            "disabling provider '{}' on platform '{}': success_rate={:.2} over {} requests",
            provider,
            platform,
            rate,
            total
        ),
    );
    crate::registry::disable(platform, provider);
    LAST_CHECK_REQUESTS.lock().unwrap().insert(key, total);
}

/// Schedules a governor tick as a fire-and-forget task, per the
/// concurrency model: log persistence and health checks never block the
/// client-facing response path.
pub fn schedule_check(platform: Platform, provider: String) {
    tokio::spawn(async move {
        check(platform, &provider);
    });
}

/// Test-only: seeds the baseline for `(platform, name)` directly, so
/// scenario tests can start from a known "already observed" count instead of
/// relying on `check`'s first-observation seeding to land at the right value.
#[cfg(test)]
pub(crate) fn seed_baseline_for_test(platform: Platform, name: &str, value: i64) {
    LAST_CHECK_REQUESTS.lock().unwrap().insert((platform, name.to_string()), value);
}
