//! Request-boundary rate limiting
//!
//! Fixed one-minute windows per API key and per user, checked before
//! stage 1 of the pipeline.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Fixed-window limiter
pub struct RateLimiter {
    api_per_min: u32,
    chat_per_min: u32,
    api_windows: DashMap<String, Window>,
    user_windows: DashMap<String, Window>,
}

struct Window {
    started: Instant,
    count: u32,
}

const WINDOW: Duration = Duration::from_secs(60);

impl RateLimiter {
    pub fn new(api_per_min: u32, chat_per_min: u32) -> Self {
        Self {
            api_per_min,
            chat_per_min,
            api_windows: DashMap::new(),
            user_windows: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &helmsman_config::RateLimitSettings) -> Self {
        Self::new(
            settings.api_rate_limit_per_min,
            settings.chat_rate_limit_per_min,
        )
    }

    /// Per-API-key check, all endpoints
    pub fn check_api_key(&self, api_key: &str) -> Result<(), u64> {
        Self::bump(&self.api_windows, api_key, self.api_per_min)
    }

    /// Per-user check, chat endpoints
    pub fn check_user(&self, user_id: &str) -> Result<(), u64> {
        Self::bump(&self.user_windows, user_id, self.chat_per_min)
    }

    fn bump(windows: &DashMap<String, Window>, key: &str, limit: u32) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= WINDOW {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after = WINDOW
                .saturating_sub(now.duration_since(entry.started))
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_within_window() {
        let limiter = RateLimiter::new(100, 3);

        for _ in 0..3 {
            assert!(limiter.check_user("u1").is_ok());
        }
        let retry_after = limiter.check_user("u1").unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);

        // Another user is unaffected
        assert!(limiter.check_user("u2").is_ok());
    }

    #[test]
    fn test_api_and_user_limits_independent() {
        let limiter = RateLimiter::new(2, 1);
        assert!(limiter.check_api_key("k1").is_ok());
        assert!(limiter.check_api_key("k1").is_ok());
        assert!(limiter.check_api_key("k1").is_err());
        assert!(limiter.check_user("u1").is_ok());
    }
}
