#![forbid(unsafe_code)]

//! Engine configuration.

use crate::evidence::EvidenceSinkConfig;

/// Environment variable overriding [`TimeSyncConfig::resync_on_new_subscription`].
pub const ENV_RESYNC_ON_SUBSCRIBE: &str = "TIMESYNC_RESYNC_ON_SUBSCRIBE";

/// Configuration for a [`TimeSync`](crate::TimeSync) engine.
#[derive(Debug, Clone)]
pub struct TimeSyncConfig {
    /// Force a fresh snapshot and broadcast whenever a subscription opens a
    /// new interval tracker. Default: `true`.
    pub resync_on_new_subscription: bool,
    /// Where reconcile evidence goes. Disabled by default.
    pub evidence: EvidenceSinkConfig,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            resync_on_new_subscription: true,
            evidence: EvidenceSinkConfig::disabled(),
        }
    }
}

impl TimeSyncConfig {
    /// Defaults, with overrides read from the environment.
    ///
    /// `TIMESYNC_RESYNC_ON_SUBSCRIBE` accepts `1/0/true/false/yes/no/on/off`;
    /// anything else keeps the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (used by tests).
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(flag) = lookup(ENV_RESYNC_ON_SUBSCRIBE).as_deref().and_then(parse_flag) {
            self.resync_on_new_subscription = flag;
        }
        self
    }

    #[must_use]
    pub fn with_resync_on_new_subscription(mut self, enabled: bool) -> Self {
        self.resync_on_new_subscription = enabled;
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: EvidenceSinkConfig) -> Self {
        self.evidence = evidence;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resyncs() {
        let config = TimeSyncConfig::default();
        assert!(config.resync_on_new_subscription);
        assert!(!config.evidence.enabled);
    }

    #[test]
    fn env_override_parses_flags() {
        let off = TimeSyncConfig::default()
            .with_env_overrides(|k| (k == ENV_RESYNC_ON_SUBSCRIBE).then(|| "off".into()));
        assert!(!off.resync_on_new_subscription);

        let on = TimeSyncConfig::default()
            .with_resync_on_new_subscription(false)
            .with_env_overrides(|_| Some(" TRUE ".into()));
        assert!(on.resync_on_new_subscription);
    }

    #[test]
    fn garbage_env_keeps_value() {
        let config = TimeSyncConfig::default()
            .with_resync_on_new_subscription(false)
            .with_env_overrides(|_| Some("maybe".into()));
        assert!(!config.resync_on_new_subscription);
        let config = config.with_env_overrides(|_| None);
        assert!(!config.resync_on_new_subscription);
    }
}
