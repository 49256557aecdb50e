//! In-Memory Repository Adapters
//!
//! Implements the Repository traits from `repository.rs` over a single
//! mutex-guarded state. The mutex gives every multi-table transition the
//! same all-or-nothing behavior the PostgreSQL adapters get from
//! transactions. Used by the test suite and as the fallback backend when
//! no database is configured; state is not persisted.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::repository::*;
use crate::codes::{derive_code, MAX_CODE_ATTEMPTS};
use crate::error::LedgerError;
use crate::referral::{
    MilestoneClaim, MilestoneDefinition, Referral, ReferralId, ReferralStatus, RewardAmounts,
    UserId, UserProfile,
};

/// Mutex-guarded ledger state shared by the memory adapters
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_profile_id: i64,
    next_referral_id: i64,
    next_milestone_id: i64,
    next_claim_id: i64,
    profiles: BTreeMap<UserId, UserProfile>,
    usernames: HashMap<String, UserId>,
    codes: HashMap<String, UserId>,
    referrals: BTreeMap<ReferralId, Referral>,
    pairs: HashSet<(UserId, UserId)>,
    milestones: Vec<MilestoneDefinition>,
    claims: Vec<MilestoneClaim>,
    claim_index: HashSet<(UserId, i64)>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ========================================================================
    // Profile Operations
    // ========================================================================

    fn create_profile(&self, username: &str) -> RepoResult<UserId> {
        let mut s = self.state.lock();
        if s.usernames.contains_key(username) {
            return Err(LedgerError::UsernameTaken(username.to_string()));
        }
        s.next_profile_id += 1;
        let id = s.next_profile_id;
        let now = Utc::now();
        s.profiles.insert(
            id,
            UserProfile {
                id,
                username: username.to_string(),
                coins: 0,
                experience: 0,
                referral_code: None,
                referred_by_user_id: None,
                referral_rewards_claimed: false,
                total_referrals: 0,
                created_at: now,
                updated_at: now,
            },
        );
        s.usernames.insert(username.to_string(), id);
        Ok(id)
    }

    fn get_profile(&self, id: UserId) -> Option<UserProfile> {
        self.state.lock().profiles.get(&id).cloned()
    }

    fn find_profile_by_code(&self, code: &str) -> Option<UserProfile> {
        let s = self.state.lock();
        s.codes.get(code).and_then(|id| s.profiles.get(id)).cloned()
    }

    fn assign_code(&self, id: UserId) -> RepoResult<String> {
        let mut s = self.state.lock();
        let existing = match s.profiles.get(&id) {
            Some(p) => p.referral_code.clone(),
            None => return Err(LedgerError::ProfileNotFound(id)),
        };
        if let Some(code) = existing {
            return Ok(code);
        }

        for attempt in 0..MAX_CODE_ATTEMPTS {
            let code = derive_code(id, attempt);
            if s.codes.contains_key(&code) {
                continue;
            }
            s.codes.insert(code.clone(), id);
            if let Some(p) = s.profiles.get_mut(&id) {
                p.referral_code = Some(code.clone());
                p.updated_at = Utc::now();
            }
            return Ok(code);
        }

        Err(LedgerError::Constraint(format!(
            "could not derive a unique referral code for user {} in {} attempts",
            id, MAX_CODE_ATTEMPTS
        )))
    }

    fn claim_welcome_bonus(&self, id: UserId, coins: u64, experience: u64) -> RepoResult<()> {
        let mut s = self.state.lock();
        let profile = s
            .profiles
            .get_mut(&id)
            .ok_or(LedgerError::ProfileNotFound(id))?;
        if profile.referral_rewards_claimed {
            return Err(LedgerError::AlreadyClaimed);
        }
        profile.referral_rewards_claimed = true;
        profile.coins += coins;
        profile.experience += experience;
        profile.updated_at = Utc::now();
        Ok(())
    }

    // ========================================================================
    // Referral Operations
    // ========================================================================

    fn create_pending(
        &self,
        referrer: UserId,
        referred: UserId,
        code: &str,
    ) -> RepoResult<Referral> {
        let mut s = self.state.lock();
        if s.pairs.contains(&(referrer, referred)) {
            return Err(LedgerError::DuplicateReferral { referrer, referred });
        }

        s.next_referral_id += 1;
        let id = s.next_referral_id;
        let now = Utc::now();
        let referral = Referral {
            id,
            referrer_user_id: referrer,
            referred_user_id: referred,
            referral_code: code.to_string(),
            status: ReferralStatus::Pending,
            referrer_coins_earned: 0,
            referrer_experience_earned: 0,
            referred_coins_earned: 0,
            referred_experience_earned: 0,
            referred_completed_onboarding: false,
            referred_games_played: 0,
            activated_at: None,
            rewarded_at: None,
            created_at: now,
            updated_at: now,
        };
        s.pairs.insert((referrer, referred));
        s.referrals.insert(id, referral.clone());
        if let Some(p) = s.profiles.get_mut(&referred) {
            p.referred_by_user_id = Some(referrer);
            p.updated_at = now;
        }
        Ok(referral)
    }

    fn get_referral(&self, id: ReferralId) -> Option<Referral> {
        self.state.lock().referrals.get(&id).cloned()
    }

    fn get_by_referred(&self, referred: UserId) -> Option<Referral> {
        self.state
            .lock()
            .referrals
            .values()
            .find(|r| r.referred_user_id == referred)
            .cloned()
    }

    fn list_by_referrer(&self, referrer: UserId) -> Vec<Referral> {
        self.state
            .lock()
            .referrals
            .values()
            .filter(|r| r.referrer_user_id == referrer)
            .cloned()
            .collect()
    }

    fn record_engagement(
        &self,
        referred: UserId,
        completed_onboarding: bool,
        games_delta: u32,
    ) -> Option<Referral> {
        let mut s = self.state.lock();
        let referral = s
            .referrals
            .values_mut()
            .find(|r| r.referred_user_id == referred)?;
        referral.referred_completed_onboarding =
            referral.referred_completed_onboarding || completed_onboarding;
        referral.referred_games_played += games_delta;
        referral.updated_at = Utc::now();
        Some(referral.clone())
    }

    fn activate(&self, id: ReferralId) -> Option<Referral> {
        let mut s = self.state.lock();
        let referral = s.referrals.get_mut(&id)?;
        if !referral.status.can_transition_to(ReferralStatus::Active) {
            return None;
        }
        let now = Utc::now();
        referral.status = ReferralStatus::Active;
        referral.activated_at = Some(now);
        referral.updated_at = now;
        Some(referral.clone())
    }

    fn grant_reward(&self, id: ReferralId, amounts: &RewardAmounts) -> RepoResult<(Referral, u32)> {
        let mut s = self.state.lock();

        let mut referral = match s.referrals.get(&id) {
            Some(r) => r.clone(),
            None => return Err(LedgerError::ReferralNotFound(id)),
        };
        if !referral.status.can_transition_to(ReferralStatus::Rewarded) {
            return Err(LedgerError::InvalidStateTransition {
                id,
                status: referral.status,
                expected: ReferralStatus::Active,
            });
        }

        let now = Utc::now();
        referral.status = ReferralStatus::Rewarded;
        referral.referrer_coins_earned = amounts.referrer_coins;
        referral.referrer_experience_earned = amounts.referrer_experience;
        referral.referred_coins_earned = amounts.referred_coins;
        referral.referred_experience_earned = amounts.referred_experience;
        referral.rewarded_at = Some(now);
        referral.updated_at = now;

        let referrer_id = referral.referrer_user_id;
        let referred_id = referral.referred_user_id;

        let new_total = {
            let referrer = s
                .profiles
                .get_mut(&referrer_id)
                .ok_or(LedgerError::ProfileNotFound(referrer_id))?;
            referrer.coins += amounts.referrer_coins as u64;
            referrer.experience += amounts.referrer_experience as u64;
            referrer.total_referrals += 1;
            referrer.updated_at = now;
            referrer.total_referrals
        };

        let referred = s
            .profiles
            .get_mut(&referred_id)
            .ok_or(LedgerError::ProfileNotFound(referred_id))?;
        referred.coins += amounts.referred_coins as u64;
        referred.experience += amounts.referred_experience as u64;
        referred.updated_at = now;

        s.referrals.insert(id, referral.clone());
        Ok((referral, new_total))
    }

    fn count_rewarded(&self, referrer: UserId) -> u64 {
        self.state
            .lock()
            .referrals
            .values()
            .filter(|r| r.referrer_user_id == referrer && r.status == ReferralStatus::Rewarded)
            .count() as u64
    }

    // ========================================================================
    // Milestone / Claim Operations
    // ========================================================================

    fn active_milestones(&self) -> Vec<MilestoneDefinition> {
        let mut defs: Vec<MilestoneDefinition> = self
            .state
            .lock()
            .milestones
            .iter()
            .filter(|m| m.is_active)
            .cloned()
            .collect();
        defs.sort_by_key(|m| m.referrals_count);
        defs
    }

    fn reached_milestones(&self, total: u32) -> Vec<MilestoneDefinition> {
        self.active_milestones()
            .into_iter()
            .filter(|m| m.referrals_count <= total)
            .collect()
    }

    fn upsert_definition(
        &self,
        referrals_count: u32,
        title: &str,
        description: Option<&str>,
        reward_coins: u32,
        reward_experience: u32,
        reward_badge: Option<&str>,
    ) -> bool {
        let mut s = self.state.lock();
        if s.milestones
            .iter()
            .any(|m| m.referrals_count == referrals_count)
        {
            return false;
        }
        s.next_milestone_id += 1;
        let id = s.next_milestone_id;
        s.milestones.push(MilestoneDefinition {
            id,
            referrals_count,
            title: title.to_string(),
            description: description.map(str::to_string),
            reward_coins,
            reward_experience,
            reward_badge: reward_badge.map(str::to_string),
            is_active: true,
        });
        true
    }

    fn milestone_count(&self) -> usize {
        self.state.lock().milestones.len()
    }

    fn claim_milestone(
        &self,
        user: UserId,
        milestone: &MilestoneDefinition,
    ) -> RepoResult<MilestoneClaim> {
        let mut s = self.state.lock();
        if s.claim_index.contains(&(user, milestone.id)) {
            return Err(LedgerError::AlreadyClaimed);
        }

        s.next_claim_id += 1;
        let id = s.next_claim_id;
        let now = Utc::now();
        let claim = MilestoneClaim {
            id,
            user_id: user,
            milestone_id: milestone.id,
            claimed_at: now,
        };
        s.claim_index.insert((user, milestone.id));
        s.claims.push(claim.clone());

        let profile = s
            .profiles
            .get_mut(&user)
            .ok_or(LedgerError::ProfileNotFound(user))?;
        profile.coins += milestone.reward_coins as u64;
        profile.experience += milestone.reward_experience as u64;
        profile.updated_at = now;

        Ok(claim)
    }

    fn claims_for_user(&self, user: UserId) -> Vec<MilestoneClaim> {
        self.state
            .lock()
            .claims
            .iter()
            .filter(|c| c.user_id == user)
            .cloned()
            .collect()
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// Adapter wrapping MemoryStore for ProfileRepo
pub struct MemProfileRepo {
    store: Arc<MemoryStore>,
}

impl MemProfileRepo {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProfileRepo for MemProfileRepo {
    async fn create(&self, username: &str) -> RepoResult<UserId> {
        self.store.create_profile(username)
    }

    async fn get(&self, id: UserId) -> RepoResult<Option<UserProfile>> {
        Ok(self.store.get_profile(id))
    }

    async fn find_by_code(&self, code: &str) -> RepoResult<Option<UserProfile>> {
        Ok(self.store.find_profile_by_code(code))
    }

    async fn assign_code(&self, id: UserId) -> RepoResult<String> {
        self.store.assign_code(id)
    }

    async fn claim_welcome_bonus(&self, id: UserId, coins: u64, experience: u64) -> RepoResult<()> {
        self.store.claim_welcome_bonus(id, coins, experience)
    }

    async fn count(&self) -> RepoResult<usize> {
        Ok(self.store.state.lock().profiles.len())
    }
}

/// Adapter for ReferralRepo
pub struct MemReferralRepo {
    store: Arc<MemoryStore>,
}

impl MemReferralRepo {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReferralRepo for MemReferralRepo {
    async fn get(&self, id: ReferralId) -> RepoResult<Option<Referral>> {
        Ok(self.store.get_referral(id))
    }

    async fn get_by_referred(&self, referred: UserId) -> RepoResult<Option<Referral>> {
        Ok(self.store.get_by_referred(referred))
    }

    async fn list_by_referrer(&self, referrer: UserId) -> RepoResult<Vec<Referral>> {
        Ok(self.store.list_by_referrer(referrer))
    }

    async fn create_pending(
        &self,
        referrer: UserId,
        referred: UserId,
        code: &str,
    ) -> RepoResult<Referral> {
        self.store.create_pending(referrer, referred, code)
    }

    async fn record_engagement(
        &self,
        referred: UserId,
        completed_onboarding: bool,
        games_delta: u32,
    ) -> RepoResult<Option<Referral>> {
        Ok(self
            .store
            .record_engagement(referred, completed_onboarding, games_delta))
    }

    async fn activate(&self, id: ReferralId) -> RepoResult<Option<Referral>> {
        Ok(self.store.activate(id))
    }

    async fn grant_reward(
        &self,
        id: ReferralId,
        amounts: &RewardAmounts,
    ) -> RepoResult<(Referral, u32)> {
        self.store.grant_reward(id, amounts)
    }

    async fn count_rewarded(&self, referrer: UserId) -> RepoResult<u64> {
        Ok(self.store.count_rewarded(referrer))
    }
}

/// Adapter for MilestoneRepo
pub struct MemMilestoneRepo {
    store: Arc<MemoryStore>,
}

impl MemMilestoneRepo {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MilestoneRepo for MemMilestoneRepo {
    async fn get_active(&self) -> RepoResult<Vec<MilestoneDefinition>> {
        Ok(self.store.active_milestones())
    }

    async fn reached(&self, total: u32) -> RepoResult<Vec<MilestoneDefinition>> {
        Ok(self.store.reached_milestones(total))
    }

    async fn upsert_definition(
        &self,
        referrals_count: u32,
        title: &str,
        description: Option<&str>,
        reward_coins: u32,
        reward_experience: u32,
        reward_badge: Option<&str>,
    ) -> RepoResult<bool> {
        Ok(self.store.upsert_definition(
            referrals_count,
            title,
            description,
            reward_coins,
            reward_experience,
            reward_badge,
        ))
    }

    async fn count(&self) -> RepoResult<usize> {
        Ok(self.store.milestone_count())
    }
}

/// Adapter for ClaimRepo
pub struct MemClaimRepo {
    store: Arc<MemoryStore>,
}

impl MemClaimRepo {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClaimRepo for MemClaimRepo {
    async fn claim(
        &self,
        user: UserId,
        milestone: &MilestoneDefinition,
    ) -> RepoResult<MilestoneClaim> {
        self.store.claim_milestone(user, milestone)
    }

    async fn list_for_user(&self, user: UserId) -> RepoResult<Vec<MilestoneClaim>> {
        Ok(self.store.claims_for_user(user))
    }
}
