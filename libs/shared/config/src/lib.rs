use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Runtime policy knobs for the scheduling core.
///
/// Loaded from the environment by the embedding application; every value has
/// a default so the core stays usable in tests without any setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum accepted appointment duration, in minutes.
    pub min_appointment_minutes: i64,
    /// Maximum accepted appointment duration, in minutes.
    pub max_appointment_minutes: i64,
    /// Create appointments directly in `confirmed` instead of `tentative`.
    pub auto_confirm: bool,
    /// Keep completed appointments counting as slot blockers.
    pub block_completed_slots: bool,
    /// Minutes before an unconfirmed tentative hold stops blocking its slot.
    /// Zero disables expiry.
    pub tentative_hold_minutes: i64,
    /// How long a booking attempt may wait on the store's write-intent lock
    /// before it is rejected as busy.
    pub lock_wait_timeout_ms: u64,
    /// Window within which a repeated idempotency key returns the original
    /// booking result instead of creating a new appointment.
    pub idempotency_window_hours: i64,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            min_appointment_minutes: env_i64("SCHEDULER_MIN_APPOINTMENT_MINUTES", 15),
            max_appointment_minutes: env_i64("SCHEDULER_MAX_APPOINTMENT_MINUTES", 120),
            auto_confirm: env_bool("SCHEDULER_AUTO_CONFIRM", false),
            block_completed_slots: env_bool("SCHEDULER_BLOCK_COMPLETED_SLOTS", false),
            tentative_hold_minutes: env_i64("SCHEDULER_TENTATIVE_HOLD_MINUTES", 30),
            lock_wait_timeout_ms: env_i64("SCHEDULER_LOCK_WAIT_TIMEOUT_MS", 5_000).max(0) as u64,
            idempotency_window_hours: env_i64("SCHEDULER_IDEMPOTENCY_WINDOW_HOURS", 24),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_appointment_minutes > 0
            && self.max_appointment_minutes >= self.min_appointment_minutes
            && self.tentative_hold_minutes >= 0
            && self.idempotency_window_hours > 0
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_appointment_minutes: 15,
            max_appointment_minutes: 120,
            auto_confirm: false,
            block_completed_slots: false,
            tentative_hold_minutes: 30,
            lock_wait_timeout_ms: 5_000,
            idempotency_window_hours: 24,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!("{} is not a valid boolean, using default {}", key, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SchedulerConfig::default().is_valid());
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        env::set_var("SCHEDULER_AUTO_CONFIRM_TEST", "yes");
        assert!(env_bool("SCHEDULER_AUTO_CONFIRM_TEST", false));
        env::set_var("SCHEDULER_AUTO_CONFIRM_TEST", "off");
        assert!(!env_bool("SCHEDULER_AUTO_CONFIRM_TEST", true));
        env::remove_var("SCHEDULER_AUTO_CONFIRM_TEST");
    }
}
