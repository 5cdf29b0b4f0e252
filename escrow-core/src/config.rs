//! Configuration for the escrow ledger

use crate::{settings::ProtocolSettings, types::Amount};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Initial protocol settings
    pub settings: SettingsConfig,

    /// Durable journal
    pub journal: JournalConfig,

    /// Event bus
    pub events: EventsConfig,

    /// Async front end
    pub actor: ActorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "escrow-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            settings: SettingsConfig::default(),
            journal: JournalConfig::default(),
            events: EventsConfig::default(),
            actor: ActorConfig::default(),
        }
    }
}

/// Initial protocol settings; amounts are decimal strings in native units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Registration fee, e.g. "0.01"
    pub app_registration_fee: String,

    /// Reward for a 1-star rating
    pub min_feedback_reward: String,

    /// Reward for a 5-star rating
    pub max_feedback_reward: String,

    /// App owner share, percent
    pub app_owner_reward_percentage: u8,

    /// Protocol share, percent
    pub protocol_fee_percentage: u8,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self::from(&ProtocolSettings::default())
    }
}

impl From<&ProtocolSettings> for SettingsConfig {
    fn from(settings: &ProtocolSettings) -> Self {
        Self {
            app_registration_fee: settings.app_registration_fee.to_string(),
            min_feedback_reward: settings.min_feedback_reward.to_string(),
            max_feedback_reward: settings.max_feedback_reward.to_string(),
            app_owner_reward_percentage: settings.app_owner_reward_percentage,
            protocol_fee_percentage: settings.protocol_fee_percentage,
        }
    }
}

impl SettingsConfig {
    /// Parse into validated protocol settings
    pub fn to_settings(&self) -> crate::Result<ProtocolSettings> {
        let settings = ProtocolSettings {
            app_registration_fee: parse_amount("app_registration_fee", &self.app_registration_fee)?,
            min_feedback_reward: parse_amount("min_feedback_reward", &self.min_feedback_reward)?,
            max_feedback_reward: parse_amount("max_feedback_reward", &self.max_feedback_reward)?,
            app_owner_reward_percentage: self.app_owner_reward_percentage,
            protocol_fee_percentage: self.protocol_fee_percentage,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_amount(field: &str, value: &str) -> crate::Result<Amount> {
    Amount::parse_decimal(value)
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", field, e)))
}

/// Journal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Persist and replay committed commands
    pub enabled: bool,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: PathBuf::from("./data/escrow"),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per lagging subscriber
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox size (backpressure)
    pub mailbox_capacity: usize,

    /// How often the node drains the transfer outbox, in milliseconds
    pub outbox_drain_interval_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            outbox_drain_interval_ms: 500,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ESCROW_DATA_DIR") {
            config.journal.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(enabled) = std::env::var("ESCROW_JOURNAL_ENABLED") {
            config.journal.enabled = enabled
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid ESCROW_JOURNAL_ENABLED: {}", enabled)))?;
        }

        if let Ok(capacity) = std::env::var("ESCROW_EVENT_CAPACITY") {
            config.events.channel_capacity = capacity
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid ESCROW_EVENT_CAPACITY: {}", capacity)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the initial settings and channel sizes
    pub fn validate(&self) -> crate::Result<()> {
        self.settings.to_settings()?;
        if self.events.channel_capacity == 0 {
            return Err(crate::Error::Config("events.channel_capacity must be > 0".to_string()));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config("actor.mailbox_capacity must be > 0".to_string()));
        }
        if self.actor.outbox_drain_interval_ms == 0 {
            return Err(crate::Error::Config(
                "actor.outbox_drain_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "escrow-core");
        assert!(!config.journal.enabled);
        assert_eq!(config.settings.app_registration_fee, "0.01");
        assert_eq!(config.settings.to_settings().unwrap(), ProtocolSettings::default());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [settings]
            app_registration_fee = "0.05"
            min_feedback_reward = "1"
            max_feedback_reward = "5"
            app_owner_reward_percentage = 10
            protocol_fee_percentage = 10

            [journal]
            enabled = true
            data_dir = "/tmp/escrow"
            "#,
        )
        .unwrap();

        let settings = config.settings.to_settings().unwrap();
        assert_eq!(settings.app_registration_fee, Amount::parse_decimal("0.05").unwrap());
        assert_eq!(settings.max_feedback_reward, Amount::from_units(5));
        assert!(config.journal.enabled);
        assert_eq!(config.events.channel_capacity, 1024);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = Config::default();
        config.settings.app_owner_reward_percentage = 50;
        config.settings.protocol_fee_percentage = 60;
        assert!(matches!(
            config.validate(),
            Err(crate::Error::InvalidPercentages { .. })
        ));

        let mut config = Config::default();
        config.settings.min_feedback_reward = "lots".to_string();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.actor.outbox_drain_interval_ms = 0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
