use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `RECLAIM__`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
}

// ─── Channel Config ─────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_session_path")]
    pub session_path: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// Seconds to wait for a pairing code to be scanned before giving up.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Base reconnect delay; attempt N waits N * base.
    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_session_path() -> String {
    "sessions".to_string()
}
fn default_session_id() -> String {
    "reclaim_session".to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    60
}
fn default_reconnect_base_secs() -> u64 {
    3
}
fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            session_path: default_session_path(),
            session_id: default_session_id(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            reconnect_base_secs: default_reconnect_base_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

// ─── Quota Config ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Rolling window length over which the send cap is enforced.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_window_cap")]
    pub window_cap: u64,
}

fn default_window_secs() -> u64 {
    3600
}
fn default_window_cap() -> u64 {
    100
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            window_cap: default_window_cap(),
        }
    }
}

// ─── Delivery Config ────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Base delay for per-job exponential retry backoff.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    /// Requeue delay while the channel is disconnected.
    #[serde(default = "default_not_connected_requeue_secs")]
    pub not_connected_requeue_secs: u64,
}

fn default_workers() -> usize {
    5
}
fn default_retry_base_secs() -> u64 {
    30
}
fn default_not_connected_requeue_secs() -> u64 {
    30
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_base_secs: default_retry_base_secs(),
            not_connected_requeue_secs: default_not_connected_requeue_secs(),
        }
    }
}

// ─── Campaign Config ────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignConfig {
    /// Days before the same campaign type may re-trigger for a recipient.
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: u32,
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Hour-of-day slots (UTC) in which stage sends may be scheduled.
    #[serde(default = "default_allowed_hours")]
    pub allowed_hours: Vec<u32>,
    /// Seconds between periodic eligibility scans.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_cooldown_days() -> u32 {
    7
}
fn default_max_attempts() -> u32 {
    3
}
fn default_allowed_hours() -> Vec<u32> {
    vec![9, 14, 19]
}
fn default_scan_interval_secs() -> u64 {
    86_400
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            cooldown_days: default_cooldown_days(),
            default_max_attempts: default_max_attempts(),
            allowed_hours: default_allowed_hours(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("RECLAIM")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.quota.window_secs, 3600);
        assert_eq!(config.quota.window_cap, 100);
        assert_eq!(config.channel.handshake_timeout_secs, 60);
        assert_eq!(config.channel.max_reconnect_attempts, 5);
        assert_eq!(config.delivery.workers, 5);
        assert_eq!(config.campaign.cooldown_days, 7);
        assert_eq!(config.campaign.allowed_hours, vec![9, 14, 19]);
    }
}
