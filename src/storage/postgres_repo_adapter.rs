//! PostgreSQL Repository Adapters
//!
//! Implements the Repository traits from `repository.rs` using PostgresStore
//! as the backend. Converts between SQL row types and domain types.

use async_trait::async_trait;
use std::sync::Arc;

use super::postgres::{ClaimRow, MilestoneRow, PostgresStore, ProfileRow, ReferralRow};
use super::repository::*;

use crate::error::LedgerError;
use crate::referral::{
    MilestoneClaim, MilestoneDefinition, Referral, ReferralId, ReferralStatus, RewardAmounts,
    UserId, UserProfile,
};

// ============================================================================
// Type Conversion Helpers
// ============================================================================

fn row_to_profile(row: &ProfileRow) -> UserProfile {
    UserProfile {
        id: row.id,
        username: row.username.clone(),
        coins: row.coins as u64,
        experience: row.experience as u64,
        referral_code: row.referral_code.clone(),
        referred_by_user_id: row.referred_by_user_id,
        referral_rewards_claimed: row.referral_rewards_claimed,
        total_referrals: row.total_referrals as u32,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn row_to_referral(row: &ReferralRow) -> Result<Referral, LedgerError> {
    let status = ReferralStatus::parse(&row.status).ok_or_else(|| {
        LedgerError::Constraint(format!(
            "referral {} has unknown status '{}'",
            row.id, row.status
        ))
    })?;

    Ok(Referral {
        id: row.id,
        referrer_user_id: row.referrer_user_id,
        referred_user_id: row.referred_user_id,
        referral_code: row.referral_code.clone(),
        status,
        referrer_coins_earned: row.referrer_coins_earned as u32,
        referrer_experience_earned: row.referrer_experience_earned as u32,
        referred_coins_earned: row.referred_coins_earned as u32,
        referred_experience_earned: row.referred_experience_earned as u32,
        referred_completed_onboarding: row.referred_completed_onboarding,
        referred_games_played: row.referred_games_played as u32,
        activated_at: row.activated_at,
        rewarded_at: row.rewarded_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_milestone(row: &MilestoneRow) -> MilestoneDefinition {
    MilestoneDefinition {
        id: row.id,
        referrals_count: row.referrals_count as u32,
        title: row.title.clone(),
        description: row.description.clone(),
        reward_coins: row.reward_coins as u32,
        reward_experience: row.reward_experience as u32,
        reward_badge: row.reward_badge.clone(),
        is_active: row.is_active,
    }
}

fn row_to_claim(row: &ClaimRow) -> MilestoneClaim {
    MilestoneClaim {
        id: row.id,
        user_id: row.user_id,
        milestone_id: row.milestone_id,
        claimed_at: row.claimed_at,
    }
}

// ============================================================================
// ProfileRepo Adapter
// ============================================================================

pub struct PgProfileRepo {
    store: Arc<PostgresStore>,
}

impl PgProfileRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProfileRepo for PgProfileRepo {
    async fn create(&self, username: &str) -> RepoResult<UserId> {
        self.store.create_profile(username).await
    }

    async fn get(&self, id: UserId) -> RepoResult<Option<UserProfile>> {
        let row = self.store.get_profile(id).await?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn find_by_code(&self, code: &str) -> RepoResult<Option<UserProfile>> {
        let row = self.store.get_profile_by_code(code).await?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn assign_code(&self, id: UserId) -> RepoResult<String> {
        self.store.assign_referral_code(id).await
    }

    async fn claim_welcome_bonus(&self, id: UserId, coins: u64, experience: u64) -> RepoResult<()> {
        self.store
            .claim_welcome_bonus(id, coins as i64, experience as i64)
            .await
    }

    async fn count(&self) -> RepoResult<usize> {
        let c = self.store.count_profiles().await?;
        Ok(c as usize)
    }
}

// ============================================================================
// ReferralRepo Adapter
// ============================================================================

pub struct PgReferralRepo {
    store: Arc<PostgresStore>,
}

impl PgReferralRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReferralRepo for PgReferralRepo {
    async fn get(&self, id: ReferralId) -> RepoResult<Option<Referral>> {
        let row = self.store.get_referral(id).await?;
        row.as_ref().map(row_to_referral).transpose()
    }

    async fn get_by_referred(&self, referred: UserId) -> RepoResult<Option<Referral>> {
        let row = self.store.get_referral_by_referred(referred).await?;
        row.as_ref().map(row_to_referral).transpose()
    }

    async fn list_by_referrer(&self, referrer: UserId) -> RepoResult<Vec<Referral>> {
        let rows = self.store.list_referrals_by_referrer(referrer).await?;
        rows.iter().map(row_to_referral).collect()
    }

    async fn create_pending(
        &self,
        referrer: UserId,
        referred: UserId,
        code: &str,
    ) -> RepoResult<Referral> {
        let row = self.store.create_referral(referrer, referred, code).await?;
        row_to_referral(&row)
    }

    async fn record_engagement(
        &self,
        referred: UserId,
        completed_onboarding: bool,
        games_delta: u32,
    ) -> RepoResult<Option<Referral>> {
        let row = self
            .store
            .record_engagement(referred, completed_onboarding, games_delta as i32)
            .await?;
        row.as_ref().map(row_to_referral).transpose()
    }

    async fn activate(&self, id: ReferralId) -> RepoResult<Option<Referral>> {
        let row = self.store.activate_referral(id).await?;
        row.as_ref().map(row_to_referral).transpose()
    }

    async fn grant_reward(
        &self,
        id: ReferralId,
        amounts: &RewardAmounts,
    ) -> RepoResult<(Referral, u32)> {
        let (row, new_total) = self.store.grant_reward(id, amounts).await?;
        Ok((row_to_referral(&row)?, new_total as u32))
    }

    async fn count_rewarded(&self, referrer: UserId) -> RepoResult<u64> {
        let c = self.store.count_rewarded(referrer).await?;
        Ok(c as u64)
    }
}

// ============================================================================
// MilestoneRepo Adapter
// ============================================================================

pub struct PgMilestoneRepo {
    store: Arc<PostgresStore>,
}

impl PgMilestoneRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MilestoneRepo for PgMilestoneRepo {
    async fn get_active(&self) -> RepoResult<Vec<MilestoneDefinition>> {
        let rows = self.store.get_active_milestones().await?;
        Ok(rows.iter().map(row_to_milestone).collect())
    }

    async fn reached(&self, total: u32) -> RepoResult<Vec<MilestoneDefinition>> {
        let rows = self.store.reached_milestones(total as i32).await?;
        Ok(rows.iter().map(row_to_milestone).collect())
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
        self.store
            .upsert_milestone(
                referrals_count as i32,
                title,
                description,
                reward_coins as i32,
                reward_experience as i32,
                reward_badge,
            )
            .await
    }

    async fn count(&self) -> RepoResult<usize> {
        let c = self.store.count_milestones().await?;
        Ok(c as usize)
    }
}

// ============================================================================
// ClaimRepo Adapter
// ============================================================================

pub struct PgClaimRepo {
    store: Arc<PostgresStore>,
}

impl PgClaimRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClaimRepo for PgClaimRepo {
    async fn claim(
        &self,
        user: UserId,
        milestone: &MilestoneDefinition,
    ) -> RepoResult<MilestoneClaim> {
        let row = self
            .store
            .claim_milestone(
                user,
                milestone.id,
                milestone.reward_coins as i64,
                milestone.reward_experience as i64,
            )
            .await?;
        Ok(row_to_claim(&row))
    }

    async fn list_for_user(&self, user: UserId) -> RepoResult<Vec<MilestoneClaim>> {
        let rows = self.store.get_claims(user).await?;
        Ok(rows.iter().map(row_to_claim).collect())
    }
}
