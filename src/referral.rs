//! Referral domain model
//!
//! A referral moves forward-only through `pending → active → rewarded`.
//! The status lives in a closed enum with explicit transition checks; the
//! storage layer persists it as the lowercase string form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ReferralId = i64;
pub type MilestoneId = i64;

/// Lifecycle state of a referral relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    /// Referred user registered with a code but is not yet engaged.
    Pending,
    /// Engagement criteria met (onboarding done + games threshold reached).
    Active,
    /// Rewards paid out to both parties. Terminal.
    Rewarded,
}

impl ReferralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Active => "active",
            ReferralStatus::Rewarded => "rewarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReferralStatus::Pending),
            "active" => Some(ReferralStatus::Active),
            "rewarded" => Some(ReferralStatus::Rewarded),
            _ => None,
        }
    }

    /// Forward-only transition rule: pending → active → rewarded.
    pub fn can_transition_to(self, next: ReferralStatus) -> bool {
        matches!(
            (self, next),
            (ReferralStatus::Pending, ReferralStatus::Active)
                | (ReferralStatus::Active, ReferralStatus::Rewarded)
        )
    }
}

impl std::fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One referrer → referred relationship.
#[derive(Debug, Clone, Serialize)]
pub struct Referral {
    pub id: ReferralId,
    pub referrer_user_id: UserId,
    pub referred_user_id: UserId,
    /// The code the referred user signed up with.
    pub referral_code: String,
    pub status: ReferralStatus,
    pub referrer_coins_earned: u32,
    pub referrer_experience_earned: u32,
    pub referred_coins_earned: u32,
    pub referred_experience_earned: u32,
    pub referred_completed_onboarding: bool,
    pub referred_games_played: u32,
    pub activated_at: Option<DateTime<Utc>>,
    pub rewarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Referral {
    /// Whether a pending referral qualifies for activation.
    pub fn meets_activation_criteria(&self, games_threshold: u32) -> bool {
        self.referred_completed_onboarding && self.referred_games_played >= games_threshold
    }
}

/// Static reward tier, unlocked at a cumulative referral count.
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneDefinition {
    pub id: MilestoneId,
    pub referrals_count: u32,
    pub title: String,
    pub description: Option<String>,
    pub reward_coins: u32,
    pub reward_experience: u32,
    pub reward_badge: Option<String>,
    pub is_active: bool,
}

/// Record of a user crossing a milestone. At most one per (user, milestone).
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneClaim {
    pub id: i64,
    pub user_id: UserId,
    pub milestone_id: MilestoneId,
    pub claimed_at: DateTime<Utc>,
}

/// User profile with referral bookkeeping and the coin/experience balances
/// the reward granter credits.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub coins: u64,
    pub experience: u64,
    pub referral_code: Option<String>,
    pub referred_by_user_id: Option<UserId>,
    /// Welcome-bonus flag for the *referred* user, settable once.
    pub referral_rewards_claimed: bool,
    /// Cached count of this user's rewarded referrals. The `referrals`
    /// table is the source of truth.
    pub total_referrals: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configured payout for a single referral reward grant.
#[derive(Debug, Clone, Copy)]
pub struct RewardAmounts {
    pub referrer_coins: u32,
    pub referrer_experience: u32,
    pub referred_coins: u32,
    pub referred_experience: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            ReferralStatus::Pending,
            ReferralStatus::Active,
            ReferralStatus::Rewarded,
        ] {
            assert_eq!(ReferralStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReferralStatus::parse("cancelled"), None);
    }

    #[test]
    fn transitions_are_forward_only() {
        use ReferralStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Rewarded));

        assert!(!Pending.can_transition_to(Rewarded)); // no skipping
        assert!(!Active.can_transition_to(Pending));
        assert!(!Rewarded.can_transition_to(Active));
        assert!(!Rewarded.can_transition_to(Pending));
        assert!(!Rewarded.can_transition_to(Rewarded));
    }

    #[test]
    fn activation_requires_both_criteria() {
        let mut referral = Referral {
            id: 1,
            referrer_user_id: 1,
            referred_user_id: 2,
            referral_code: "ABCD2345".into(),
            status: ReferralStatus::Pending,
            referrer_coins_earned: 0,
            referrer_experience_earned: 0,
            referred_coins_earned: 0,
            referred_experience_earned: 0,
            referred_completed_onboarding: false,
            referred_games_played: 5,
            activated_at: None,
            rewarded_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // enough games, onboarding missing
        assert!(!referral.meets_activation_criteria(3));

        referral.referred_completed_onboarding = true;
        referral.referred_games_played = 2;
        assert!(!referral.meets_activation_criteria(3));

        referral.referred_games_played = 3;
        assert!(referral.meets_activation_criteria(3));
    }
}
