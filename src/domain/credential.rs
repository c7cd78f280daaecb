//! API credentials and their rolling usage windows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An interchangeable access token for the speech-to-text backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The raw token, for building request headers only
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Stable short identifier (first 12 hex chars of SHA256(secret)).
    ///
    /// Used as the key in persisted usage maps so the secret itself never
    /// lands in a checkpoint file.
    pub fn id(&self) -> String {
        let digest = Sha256::digest(self.secret.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("id", &self.id()).finish()
    }
}

/// Per-credential budgets, in seconds of audio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub hourly: f64,
    pub daily: f64,
}

impl QuotaLimits {
    /// Whether a fresh credential could ever take an item of this cost
    pub fn admits(&self, cost: f64) -> bool {
        cost <= self.hourly && cost <= self.daily
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            hourly: 6000.0,
            daily: 25000.0,
        }
    }
}

/// Which budget window blocked a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWindow {
    Hourly,
    Daily,
}

impl std::fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaWindow::Hourly => write!(f, "hourly"),
            QuotaWindow::Daily => write!(f, "daily"),
        }
    }
}

/// Rolling hourly and daily consumption of one credential.
///
/// Each window is anchored at the first check after it was last reset and
/// resets on its own once its length has elapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialUsage {
    pub hourly_used: f64,
    pub hour_start: DateTime<Utc>,
    pub daily_used: f64,
    pub day_start: DateTime<Utc>,
}

impl CredentialUsage {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            hourly_used: 0.0,
            hour_start: now,
            daily_used: 0.0,
            day_start: now,
        }
    }

    /// Reset any window whose length has elapsed at `now`
    pub fn roll(&mut self, now: DateTime<Utc>) {
        if now - self.hour_start >= Duration::hours(1) {
            self.hourly_used = 0.0;
            self.hour_start = now;
        }
        if now - self.day_start >= Duration::days(1) {
            self.daily_used = 0.0;
            self.day_start = now;
        }
    }

    /// The first window that cannot absorb `cost`, if any
    pub fn blocking_window(&self, limits: &QuotaLimits, cost: f64) -> Option<QuotaWindow> {
        if self.hourly_used + cost > limits.hourly {
            Some(QuotaWindow::Hourly)
        } else if self.daily_used + cost > limits.daily {
            Some(QuotaWindow::Daily)
        } else {
            None
        }
    }

    pub fn has_headroom(&self, limits: &QuotaLimits, cost: f64) -> bool {
        self.blocking_window(limits, cost).is_none()
    }

    /// Charge `cost` against both windows
    pub fn record(&mut self, cost: f64) {
        self.hourly_used += cost;
        self.daily_used += cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(hourly: f64, daily: f64) -> QuotaLimits {
        QuotaLimits { hourly, daily }
    }

    #[test]
    fn test_limits_admit_only_items_that_fit_both_windows() {
        let limits = limits(100.0, 150.0);
        assert!(limits.admits(100.0));
        assert!(!limits.admits(100.5));
        assert!(!self::limits(200.0, 150.0).admits(160.0));
    }

    #[test]
    fn test_credential_id_hides_secret() {
        let cred = Credential::new("gsk_very_secret_token");
        let id = cred.id();

        assert_eq!(id.len(), 12);
        assert_eq!(id, Credential::new("gsk_very_secret_token").id());
        assert_ne!(id, Credential::new("gsk_other").id());
        assert!(!format!("{:?}", cred).contains("secret_token"));
    }

    #[test]
    fn test_headroom_checks_both_windows() {
        let now = Utc::now();
        let mut usage = CredentialUsage::new(now);
        let limits = limits(100.0, 150.0);

        assert!(usage.has_headroom(&limits, 100.0));
        usage.record(60.0);
        assert_eq!(usage.blocking_window(&limits, 60.0), Some(QuotaWindow::Hourly));
        assert!(usage.has_headroom(&limits, 40.0));

        // New hour, same day: hourly clears but the daily budget still binds
        usage.roll(now + Duration::minutes(61));
        assert_eq!(usage.hourly_used, 0.0);
        usage.record(60.0);
        usage.roll(now + Duration::minutes(125));
        assert_eq!(usage.blocking_window(&limits, 60.0), Some(QuotaWindow::Daily));
    }

    #[test]
    fn test_windows_reset_independently() {
        let start = Utc::now();
        let mut usage = CredentialUsage::new(start);
        usage.record(50.0);

        usage.roll(start + Duration::minutes(59));
        assert_eq!(usage.hourly_used, 50.0);

        let later = start + Duration::minutes(60);
        usage.roll(later);
        assert_eq!(usage.hourly_used, 0.0);
        assert_eq!(usage.hour_start, later);
        assert_eq!(usage.daily_used, 50.0);
        assert_eq!(usage.day_start, start);

        usage.roll(start + Duration::hours(24));
        assert_eq!(usage.daily_used, 0.0);
    }
}
