//! Ledger configuration
//!
//! The activation threshold and reward amounts are deliberately not baked
//! into the schema; they arrive from the environment with conservative
//! defaults so deployments can tune payouts without a migration.

use crate::referral::RewardAmounts;

/// Tunable policy for the referral lifecycle.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Games the referred user must play (with onboarding complete) before
    /// the referral becomes `active`.
    pub activation_games_threshold: u32,
    /// Payout applied when a referral is granted.
    pub rewards: RewardAmounts,
    /// One-shot welcome bonus for the referred user.
    pub welcome_bonus_coins: u64,
    pub welcome_bonus_experience: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            activation_games_threshold: 3,
            rewards: RewardAmounts {
                referrer_coins: 100,
                referrer_experience: 50,
                referred_coins: 50,
                referred_experience: 25,
            },
            welcome_bonus_coins: 50,
            welcome_bonus_experience: 0,
        }
    }
}

impl LedgerConfig {
    /// Build the config from environment variables, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            activation_games_threshold: env_parse(
                "REFERRAL_ACTIVATION_GAMES",
                defaults.activation_games_threshold,
            ),
            rewards: RewardAmounts {
                referrer_coins: env_parse("REFERRAL_REFERRER_COINS", defaults.rewards.referrer_coins),
                referrer_experience: env_parse(
                    "REFERRAL_REFERRER_XP",
                    defaults.rewards.referrer_experience,
                ),
                referred_coins: env_parse("REFERRAL_REFERRED_COINS", defaults.rewards.referred_coins),
                referred_experience: env_parse(
                    "REFERRAL_REFERRED_XP",
                    defaults.rewards.referred_experience,
                ),
            },
            welcome_bonus_coins: env_parse("REFERRAL_WELCOME_COINS", defaults.welcome_bonus_coins),
            welcome_bonus_experience: env_parse(
                "REFERRAL_WELCOME_XP",
                defaults.welcome_bonus_experience,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = LedgerConfig::default();
        assert!(config.activation_games_threshold > 0);
        assert!(config.rewards.referrer_coins > 0);
        assert!(config.rewards.referred_coins > 0);
    }
}
