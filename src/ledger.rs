//! Referral lifecycle service
//!
//! Coordinates the four ledger operations over the injected repositories:
//! issuance (signup with a code), activation (engagement threshold),
//! reward granting, and milestone evaluation. Repositories own atomicity;
//! this layer owns validation, ordering, and policy from `LedgerConfig`.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::referral::{MilestoneClaim, Referral, ReferralId, ReferralStatus, UserId};
use crate::storage::repository::StorageManager;

/// Result of a successful reward grant.
#[derive(Debug)]
pub struct GrantOutcome {
    pub referral: Referral,
    /// Referrer's total after this grant.
    pub total_referrals: u32,
    /// Milestones newly claimed as a consequence of this grant.
    pub milestones_claimed: Vec<MilestoneClaim>,
}

/// Result of an engagement report.
#[derive(Debug)]
pub struct EngagementOutcome {
    pub referral: Referral,
    /// True when this report moved the referral from pending to active.
    pub newly_activated: bool,
}

/// Read-only aggregation of a user's referral standing.
#[derive(Debug, serde::Serialize)]
pub struct ReferralSummary {
    pub user_id: UserId,
    pub referral_code: Option<String>,
    pub total_referrals: u32,
    pub pending: u32,
    pub active: u32,
    pub rewarded: u32,
    pub coins_earned: u64,
    pub experience_earned: u64,
    pub milestones_claimed: u32,
}

/// The referral ledger service.
pub struct ReferralLedger {
    storage: Arc<StorageManager>,
    config: LedgerConfig,
}

impl ReferralLedger {
    pub fn new(storage: Arc<StorageManager>, config: LedgerConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Return the user's referral code, assigning one lazily.
    pub async fn referral_code(&self, user: UserId) -> Result<String, LedgerError> {
        self.storage.profiles.assign_code(user).await
    }

    /// Issuance: a new user registered with a referral code.
    ///
    /// Validates before anything is written: the code must resolve to
    /// exactly one referrer, self-referral is rejected, and a user who was
    /// already referred cannot be referred again.
    pub async fn register_referral(
        &self,
        code: &str,
        new_user: UserId,
    ) -> Result<Referral, LedgerError> {
        let referrer = self
            .storage
            .profiles
            .find_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::InvalidReferralCode(code.to_string()))?;

        if referrer.id == new_user {
            return Err(LedgerError::SelfReferral(new_user));
        }

        let referred = self
            .storage
            .profiles
            .get(new_user)
            .await?
            .ok_or(LedgerError::ProfileNotFound(new_user))?;
        if let Some(existing) = referred.referred_by_user_id {
            // Retried signup or a second code; the first referral stands.
            return Err(LedgerError::DuplicateReferral {
                referrer: existing,
                referred: new_user,
            });
        }

        let referral = self
            .storage
            .referrals
            .create_pending(referrer.id, new_user, code)
            .await?;
        info!(
            "Referral {} issued: {} referred {}",
            referral.id, referrer.id, new_user
        );
        Ok(referral)
    }

    /// Activation evaluator: fold an engagement report from the gameplay
    /// collaborator into the referred user's referral and promote it to
    /// `active` once onboarding is complete and the games threshold is met.
    ///
    /// Safe to re-invoke: an already-active or rewarded referral is left
    /// untouched. Returns `Ok(None)` when the user was never referred.
    pub async fn record_engagement(
        &self,
        referred: UserId,
        completed_onboarding: bool,
        games_delta: u32,
    ) -> Result<Option<EngagementOutcome>, LedgerError> {
        let Some(updated) = self
            .storage
            .referrals
            .record_engagement(referred, completed_onboarding, games_delta)
            .await?
        else {
            return Ok(None);
        };

        if updated.status == ReferralStatus::Pending
            && updated.meets_activation_criteria(self.config.activation_games_threshold)
        {
            if let Some(active) = self.storage.referrals.activate(updated.id).await? {
                return Ok(Some(EngagementOutcome {
                    referral: active,
                    newly_activated: true,
                }));
            }
        }

        Ok(Some(EngagementOutcome {
            referral: updated,
            newly_activated: false,
        }))
    }

    /// Reward granter: pay out an `active` referral and run the milestone
    /// evaluator on the referrer's new total.
    ///
    /// The repository enforces the active → rewarded precondition
    /// atomically; a second grant for the same id fails with
    /// `InvalidStateTransition` and changes nothing.
    pub async fn grant_reward(&self, id: ReferralId) -> Result<GrantOutcome, LedgerError> {
        let (referral, total_referrals) = self
            .storage
            .referrals
            .grant_reward(id, &self.config.rewards)
            .await?;

        let milestones_claimed = self
            .evaluate_milestones(referral.referrer_user_id, total_referrals)
            .await?;

        Ok(GrantOutcome {
            referral,
            total_referrals,
            milestones_claimed,
        })
    }

    /// Milestone evaluator: claim every active definition the referrer's
    /// total has reached but not yet claimed. A concurrent or repeated
    /// evaluation loses the claim race and treats it as already handled.
    pub async fn evaluate_milestones(
        &self,
        user: UserId,
        total_referrals: u32,
    ) -> Result<Vec<MilestoneClaim>, LedgerError> {
        let mut claimed = Vec::new();
        for definition in self.storage.milestones.reached(total_referrals).await? {
            match self.storage.claims.claim(user, &definition).await {
                Ok(claim) => {
                    info!(
                        "User {} reached milestone '{}' ({} referrals)",
                        user, definition.title, definition.referrals_count
                    );
                    claimed.push(claim);
                }
                Err(LedgerError::AlreadyClaimed) => {
                    debug!(
                        "Milestone '{}' already claimed by user {}",
                        definition.title, user
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(claimed)
    }

    /// One-shot welcome bonus for a referred user.
    pub async fn claim_welcome_bonus(&self, user: UserId) -> Result<(), LedgerError> {
        let profile = self
            .storage
            .profiles
            .get(user)
            .await?
            .ok_or(LedgerError::ProfileNotFound(user))?;
        if profile.referred_by_user_id.is_none() {
            return Err(LedgerError::NotReferred(user));
        }

        self.storage
            .profiles
            .claim_welcome_bonus(
                user,
                self.config.welcome_bonus_coins,
                self.config.welcome_bonus_experience,
            )
            .await?;
        info!("User {} claimed the welcome bonus", user);
        Ok(())
    }

    /// Read-only summary of a user's referral standing.
    pub async fn referral_summary(&self, user: UserId) -> Result<ReferralSummary, LedgerError> {
        let profile = self
            .storage
            .profiles
            .get(user)
            .await?
            .ok_or(LedgerError::ProfileNotFound(user))?;
        let referrals = self.storage.referrals.list_by_referrer(user).await?;
        let claims = self.storage.claims.list_for_user(user).await?;

        let mut pending = 0;
        let mut active = 0;
        let mut rewarded = 0;
        let mut coins_earned = 0u64;
        let mut experience_earned = 0u64;
        for referral in &referrals {
            match referral.status {
                ReferralStatus::Pending => pending += 1,
                ReferralStatus::Active => active += 1,
                ReferralStatus::Rewarded => {
                    rewarded += 1;
                    coins_earned += referral.referrer_coins_earned as u64;
                    experience_earned += referral.referrer_experience_earned as u64;
                }
            }
        }

        Ok(ReferralSummary {
            user_id: user,
            referral_code: profile.referral_code,
            total_referrals: profile.total_referrals,
            pending,
            active,
            rewarded,
            coins_earned,
            experience_earned,
            milestones_claimed: claims.len() as u32,
        })
    }
}

// ============================================================================
// Tests (in-memory backend)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    async fn test_ledger() -> ReferralLedger {
        let storage = storage::init_memory_storage()
            .await
            .expect("memory storage init");
        ReferralLedger::new(Arc::new(storage), LedgerConfig::default())
    }

    async fn create_user(ledger: &ReferralLedger, name: &str) -> UserId {
        ledger.storage().profiles.create(name).await.expect("create profile")
    }

    /// Drive one referral through signup → engagement → activation.
    async fn referred_and_active(ledger: &ReferralLedger, code: &str, user: UserId) -> Referral {
        ledger.register_referral(code, user).await.expect("register");
        let outcome = ledger
            .record_engagement(user, true, ledger.config().activation_games_threshold)
            .await
            .expect("engagement")
            .expect("referral exists");
        assert!(outcome.newly_activated);
        outcome.referral
    }

    #[tokio::test]
    async fn register_creates_pending_referral() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;

        let code = ledger.referral_code(alice).await.unwrap();
        let referral = ledger.register_referral(&code, bob).await.unwrap();

        assert_eq!(referral.status, ReferralStatus::Pending);
        assert_eq!(referral.referrer_user_id, alice);
        assert_eq!(referral.referred_user_id, bob);
        assert_eq!(referral.referral_code, code);
        assert!(referral.activated_at.is_none());

        let bob_profile = ledger.storage().profiles.get(bob).await.unwrap().unwrap();
        assert_eq!(bob_profile.referred_by_user_id, Some(alice));

        let by_referred = ledger
            .storage()
            .referrals
            .get_by_referred(bob)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_referred.id, referral.id);
    }

    #[tokio::test]
    async fn referral_code_is_stable_once_assigned() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;

        let first = ledger.referral_code(alice).await.unwrap();
        let second = ledger.referral_code(alice).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn register_rejects_unknown_code() {
        let ledger = test_ledger().await;
        let bob = create_user(&ledger, "bob").await;

        let err = ledger.register_referral("NOSUCH00", bob).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReferralCode(_)));
    }

    #[tokio::test]
    async fn register_rejects_self_referral_before_writing() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let code = ledger.referral_code(alice).await.unwrap();

        let err = ledger.register_referral(&code, alice).await.unwrap_err();
        assert!(matches!(err, LedgerError::SelfReferral(id) if id == alice));

        // Nothing was written.
        assert!(ledger
            .storage()
            .referrals
            .list_by_referrer(alice)
            .await
            .unwrap()
            .is_empty());
        let profile = ledger.storage().profiles.get(alice).await.unwrap().unwrap();
        assert_eq!(profile.referred_by_user_id, None);
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let carol = create_user(&ledger, "carol").await;
        let bob = create_user(&ledger, "bob").await;

        let alice_code = ledger.referral_code(alice).await.unwrap();
        let carol_code = ledger.referral_code(carol).await.unwrap();

        ledger.register_referral(&alice_code, bob).await.unwrap();

        // Retried signup with the same code.
        let err = ledger.register_referral(&alice_code, bob).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReferral { .. }));

        // A different referrer cannot claim an already-referred user either.
        let err = ledger.register_referral(&carol_code, bob).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReferral { .. }));

        assert_eq!(
            ledger
                .storage()
                .referrals
                .list_by_referrer(alice)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn pair_uniqueness_holds_at_the_repository() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;

        let referrals = &ledger.storage().referrals;
        referrals.create_pending(alice, bob, "AAAA2222").await.unwrap();
        let err = referrals
            .create_pending(alice, bob, "AAAA2222")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReferral { .. }));
    }

    #[tokio::test]
    async fn activation_waits_for_both_criteria() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;
        let code = ledger.referral_code(alice).await.unwrap();
        ledger.register_referral(&code, bob).await.unwrap();

        // Two games, onboarding done: still short of the threshold (3).
        let outcome = ledger
            .record_engagement(bob, true, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.referral.status, ReferralStatus::Pending);
        assert!(!outcome.newly_activated);

        // Third game crosses the threshold.
        let outcome = ledger
            .record_engagement(bob, false, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.referral.status, ReferralStatus::Active);
        assert!(outcome.newly_activated);
        assert!(outcome.referral.activated_at.is_some());
        assert_eq!(outcome.referral.referred_games_played, 3);
    }

    #[tokio::test]
    async fn engagement_is_idempotent_after_activation() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;
        let code = ledger.referral_code(alice).await.unwrap();
        let active = referred_and_active(&ledger, &code, bob).await;

        let outcome = ledger
            .record_engagement(bob, true, 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.referral.status, ReferralStatus::Active);
        assert!(!outcome.newly_activated);
        assert_eq!(outcome.referral.activated_at, active.activated_at);
    }

    #[tokio::test]
    async fn engagement_for_unreferred_user_is_a_noop() {
        let ledger = test_ledger().await;
        let dave = create_user(&ledger, "dave").await;

        let outcome = ledger.record_engagement(dave, true, 10).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn grant_pays_both_parties_and_bumps_the_counter() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;
        let code = ledger.referral_code(alice).await.unwrap();
        let active = referred_and_active(&ledger, &code, bob).await;

        let outcome = ledger.grant_reward(active.id).await.unwrap();
        let rewards = ledger.config().rewards;

        assert_eq!(outcome.referral.status, ReferralStatus::Rewarded);
        assert!(outcome.referral.rewarded_at.is_some());
        assert_eq!(outcome.referral.referrer_coins_earned, rewards.referrer_coins);
        assert_eq!(outcome.referral.referred_coins_earned, rewards.referred_coins);
        assert_eq!(outcome.total_referrals, 1);

        let alice_profile = ledger.storage().profiles.get(alice).await.unwrap().unwrap();
        assert_eq!(alice_profile.total_referrals, 1);
        assert_eq!(alice_profile.coins, rewards.referrer_coins as u64);
        assert_eq!(alice_profile.experience, rewards.referrer_experience as u64);

        let bob_profile = ledger.storage().profiles.get(bob).await.unwrap().unwrap();
        assert_eq!(bob_profile.coins, rewards.referred_coins as u64);
        assert_eq!(bob_profile.experience, rewards.referred_experience as u64);
    }

    #[tokio::test]
    async fn double_grant_is_rejected_and_changes_nothing() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;
        let code = ledger.referral_code(alice).await.unwrap();
        let active = referred_and_active(&ledger, &code, bob).await;

        ledger.grant_reward(active.id).await.unwrap();
        let err = ledger.grant_reward(active.id).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidStateTransition {
                status: ReferralStatus::Rewarded,
                expected: ReferralStatus::Active,
                ..
            }
        ));

        // Exactly one payout happened and the row stayed rewarded.
        let alice_profile = ledger.storage().profiles.get(alice).await.unwrap().unwrap();
        assert_eq!(alice_profile.total_referrals, 1);
        assert_eq!(
            alice_profile.coins,
            ledger.config().rewards.referrer_coins as u64
        );
        let stored = ledger
            .storage()
            .referrals
            .get(active.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReferralStatus::Rewarded);
    }

    #[tokio::test]
    async fn grant_requires_an_active_referral() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;
        let code = ledger.referral_code(alice).await.unwrap();
        let pending = ledger.register_referral(&code, bob).await.unwrap();

        let err = ledger.grant_reward(pending.id).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidStateTransition {
                status: ReferralStatus::Pending,
                ..
            }
        ));

        let err = ledger.grant_reward(9999).await.unwrap_err();
        assert!(matches!(err, LedgerError::ReferralNotFound(9999)));
    }

    #[tokio::test]
    async fn fifth_grant_claims_the_first_milestone_once() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let code = ledger.referral_code(alice).await.unwrap();

        for i in 0..5 {
            let friend = create_user(&ledger, &format!("friend{}", i)).await;
            let active = referred_and_active(&ledger, &code, friend).await;
            let outcome = ledger.grant_reward(active.id).await.unwrap();

            if i < 4 {
                assert!(outcome.milestones_claimed.is_empty());
            } else {
                assert_eq!(outcome.milestones_claimed.len(), 1);
            }
        }

        let claims = ledger.storage().claims.list_for_user(alice).await.unwrap();
        assert_eq!(claims.len(), 1);

        // Re-running the evaluator adds nothing.
        let again = ledger.evaluate_milestones(alice, 5).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(
            ledger
                .storage()
                .claims
                .list_for_user(alice)
                .await
                .unwrap()
                .len(),
            1
        );

        // Milestone reward landed on top of the five referral payouts.
        let rewards = ledger.config().rewards;
        let milestones = ledger.storage().milestones.get_active().await.unwrap();
        let milestone = &milestones[0];
        let profile = ledger.storage().profiles.get(alice).await.unwrap().unwrap();
        assert_eq!(
            profile.coins,
            5 * rewards.referrer_coins as u64 + milestone.reward_coins as u64
        );
    }

    #[tokio::test]
    async fn claims_never_exceed_eligible_definitions() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let code = ledger.referral_code(alice).await.unwrap();

        for i in 0..6 {
            let friend = create_user(&ledger, &format!("friend{}", i)).await;
            let active = referred_and_active(&ledger, &code, friend).await;
            ledger.grant_reward(active.id).await.unwrap();
        }

        let profile = ledger.storage().profiles.get(alice).await.unwrap().unwrap();
        let eligible = ledger
            .storage()
            .milestones
            .reached(profile.total_referrals)
            .await
            .unwrap();
        let claims = ledger.storage().claims.list_for_user(alice).await.unwrap();
        assert!(claims.len() <= eligible.len());
    }

    #[tokio::test]
    async fn cached_counter_matches_rewarded_count() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let code = ledger.referral_code(alice).await.unwrap();

        for i in 0..3 {
            let friend = create_user(&ledger, &format!("friend{}", i)).await;
            let active = referred_and_active(&ledger, &code, friend).await;
            ledger.grant_reward(active.id).await.unwrap();
        }

        let profile = ledger.storage().profiles.get(alice).await.unwrap().unwrap();
        let recount = ledger.storage().referrals.count_rewarded(alice).await.unwrap();
        assert_eq!(profile.total_referrals as u64, recount);
    }

    #[tokio::test]
    async fn welcome_bonus_is_one_shot_and_referred_only() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let bob = create_user(&ledger, "bob").await;
        let dave = create_user(&ledger, "dave").await;
        let code = ledger.referral_code(alice).await.unwrap();
        ledger.register_referral(&code, bob).await.unwrap();

        ledger.claim_welcome_bonus(bob).await.unwrap();
        let profile = ledger.storage().profiles.get(bob).await.unwrap().unwrap();
        assert!(profile.referral_rewards_claimed);
        assert_eq!(profile.coins, ledger.config().welcome_bonus_coins);

        let err = ledger.claim_welcome_bonus(bob).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyClaimed));

        // Never referred: no bonus to claim.
        let err = ledger.claim_welcome_bonus(dave).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotReferred(id) if id == dave));
    }

    #[tokio::test]
    async fn summary_reflects_the_ledger() {
        let ledger = test_ledger().await;
        let alice = create_user(&ledger, "alice").await;
        let code = ledger.referral_code(alice).await.unwrap();

        // One of each status.
        let pending_user = create_user(&ledger, "pat").await;
        ledger.register_referral(&code, pending_user).await.unwrap();

        let active_user = create_user(&ledger, "abby").await;
        referred_and_active(&ledger, &code, active_user).await;

        let rewarded_user = create_user(&ledger, "remy").await;
        let active = referred_and_active(&ledger, &code, rewarded_user).await;
        ledger.grant_reward(active.id).await.unwrap();

        let summary = ledger.referral_summary(alice).await.unwrap();
        assert_eq!(summary.referral_code.as_deref(), Some(code.as_str()));
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.rewarded, 1);
        assert_eq!(summary.total_referrals, 1);
        assert_eq!(
            summary.coins_earned,
            ledger.config().rewards.referrer_coins as u64
        );
    }
}
