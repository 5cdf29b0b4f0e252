//! Protocol settings registry
//!
//! Holds the protocol-wide parameters as an explicit, versioned value.
//! Operations that need settings take an `Arc` snapshot so a concurrent
//! governance update never changes parameters mid-operation.

use crate::{
    types::{Amount, Principal, Role},
    Error, Result,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default registration fee: 0.01 native units
pub const DEFAULT_APP_REGISTRATION_FEE: Amount =
    Amount::from_base_units(10_000_000_000_000_000);

/// Default minimum feedback reward: 10 native units
pub const DEFAULT_MIN_FEEDBACK_REWARD: Amount = Amount::from_units(10);

/// Default maximum feedback reward: 100 native units
pub const DEFAULT_MAX_FEEDBACK_REWARD: Amount = Amount::from_units(100);

/// Default app owner share of each base reward
pub const DEFAULT_APP_OWNER_REWARD_PERCENTAGE: u8 = 20;

/// Default protocol share of each base reward
pub const DEFAULT_PROTOCOL_FEE_PERCENTAGE: u8 = 5;

/// Protocol-wide parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Flat fee charged at registration
    pub app_registration_fee: Amount,

    /// Reward for a 1-star rating
    pub min_feedback_reward: Amount,

    /// Reward for a 5-star rating
    pub max_feedback_reward: Amount,

    /// App owner share, percent
    pub app_owner_reward_percentage: u8,

    /// Protocol treasury share, percent
    pub protocol_fee_percentage: u8,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            app_registration_fee: DEFAULT_APP_REGISTRATION_FEE,
            min_feedback_reward: DEFAULT_MIN_FEEDBACK_REWARD,
            max_feedback_reward: DEFAULT_MAX_FEEDBACK_REWARD,
            app_owner_reward_percentage: DEFAULT_APP_OWNER_REWARD_PERCENTAGE,
            protocol_fee_percentage: DEFAULT_PROTOCOL_FEE_PERCENTAGE,
        }
    }
}

impl ProtocolSettings {
    /// Validate settings invariants
    pub fn validate(&self) -> Result<()> {
        let owner = self.app_owner_reward_percentage;
        let protocol = self.protocol_fee_percentage;
        if u16::from(owner) + u16::from(protocol) > 100 {
            return Err(Error::InvalidPercentages { owner, protocol });
        }

        if self.min_feedback_reward > self.max_feedback_reward {
            return Err(Error::InvalidRewardBounds {
                min: self.min_feedback_reward,
                max: self.max_feedback_reward,
            });
        }

        Ok(())
    }

    /// Reviewer share, percent (the remainder)
    pub fn reviewer_percentage(&self) -> u8 {
        100u8
            .saturating_sub(self.app_owner_reward_percentage)
            .saturating_sub(self.protocol_fee_percentage)
    }
}

#[derive(Debug)]
struct Versioned {
    version: u64,
    settings: Arc<ProtocolSettings>,
}

/// Single-writer holder of the current settings
#[derive(Debug)]
pub struct SettingsRegistry {
    current: RwLock<Versioned>,
}

impl SettingsRegistry {
    /// Create registry; initial settings must be valid
    pub fn new(initial: ProtocolSettings) -> Result<Self> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(Versioned {
                version: 1,
                settings: Arc::new(initial),
            }),
        })
    }

    /// Current settings snapshot
    pub fn get(&self) -> Arc<ProtocolSettings> {
        self.current.read().settings.clone()
    }

    /// Current version (starts at 1, bumped on every update)
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Replace the settings wholesale; returns the new version
    pub fn update(
        &self,
        caller: &Principal,
        role: Role,
        new_settings: ProtocolSettings,
    ) -> Result<u64> {
        Self::check_update(caller, role, &new_settings)?;
        Ok(self.replace(new_settings))
    }

    /// Authorization and validation for an update, without applying it
    pub fn check_update(caller: &Principal, role: Role, new_settings: &ProtocolSettings) -> Result<()> {
        if role != Role::Administrator {
            return Err(Error::Unauthorized {
                caller: caller.clone(),
                action: "update protocol settings",
            });
        }
        new_settings.validate()
    }

    /// Swap in already-validated settings
    pub(crate) fn replace(&self, new_settings: ProtocolSettings) -> u64 {
        let mut current = self.current.write();
        current.version += 1;
        current.settings = Arc::new(new_settings);
        current.version
    }
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self {
            current: RwLock::new(Versioned {
                version: 1,
                settings: Arc::new(ProtocolSettings::default()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Principal {
        Principal::new("0xadmin")
    }

    #[test]
    fn test_default_settings() {
        let settings = ProtocolSettings::default();
        assert_eq!(settings.app_registration_fee, Amount::parse_decimal("0.01").unwrap());
        assert_eq!(settings.min_feedback_reward, Amount::from_units(10));
        assert_eq!(settings.max_feedback_reward, Amount::from_units(100));
        assert_eq!(settings.reviewer_percentage(), 75);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_percentages_over_100() {
        let settings = ProtocolSettings {
            app_owner_reward_percentage: 50,
            protocol_fee_percentage: 60,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidPercentages { owner: 50, protocol: 60 })
        ));
    }

    #[test]
    fn test_accepts_percentages_summing_to_100() {
        let settings = ProtocolSettings {
            app_owner_reward_percentage: 95,
            protocol_fee_percentage: 5,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reviewer_percentage(), 0);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let settings = ProtocolSettings {
            min_feedback_reward: Amount::from_units(200),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidRewardBounds { .. })));
    }

    #[test]
    fn test_update_bumps_version() {
        let registry = SettingsRegistry::default();
        let new_settings = ProtocolSettings {
            protocol_fee_percentage: 10,
            ..Default::default()
        };
        let version = registry.update(&admin(), Role::Administrator, new_settings).unwrap();
        assert_eq!(version, 2);
        assert_eq!(registry.get().protocol_fee_percentage, 10);
    }

    #[test]
    fn test_failed_update_leaves_settings_unchanged() {
        let registry = SettingsRegistry::default();
        let bad = ProtocolSettings {
            app_owner_reward_percentage: 50,
            protocol_fee_percentage: 60,
            ..Default::default()
        };
        assert!(registry.update(&admin(), Role::Administrator, bad).is_err());
        assert_eq!(registry.version(), 1);
        assert_eq!(*registry.get(), ProtocolSettings::default());
    }

    #[test]
    fn test_participant_cannot_update() {
        let registry = SettingsRegistry::default();
        let result = registry.update(
            &Principal::new("0xmallory"),
            Role::Participant,
            ProtocolSettings::default(),
        );
        assert!(matches!(result, Err(Error::Unauthorized { .. })));
    }
}
