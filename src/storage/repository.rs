//! Repository traits - abstraction layer for data access
//!
//! The ledger components interact with storage through these traits, making
//! it easy to swap backends (PostgreSQL in production, in-memory for tests
//! and database-less development).
//!
//! Multi-table transitions (`create_pending`, `grant_reward`, `claim`) are
//! trait methods rather than caller-side compositions so every backend can
//! make them atomic: the PostgreSQL adapters use transactions with row
//! locks, the in-memory adapter serializes through its mutex.

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::referral::{
    MilestoneClaim, MilestoneDefinition, Referral, ReferralId, RewardAmounts, UserId, UserProfile,
};

/// Generic result type for repository operations
pub type RepoResult<T> = Result<T, LedgerError>;

/// Repository for user profiles and their referral bookkeeping
#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn create(&self, username: &str) -> RepoResult<UserId>;
    async fn get(&self, id: UserId) -> RepoResult<Option<UserProfile>>;
    async fn find_by_code(&self, code: &str) -> RepoResult<Option<UserProfile>>;
    /// Return the user's referral code, lazily assigning a unique one.
    async fn assign_code(&self, id: UserId) -> RepoResult<String>;
    /// One-shot welcome bonus; `AlreadyClaimed` on the second attempt.
    async fn claim_welcome_bonus(&self, id: UserId, coins: u64, experience: u64) -> RepoResult<()>;
    async fn count(&self) -> RepoResult<usize>;
}

/// Repository for referral relationships and their lifecycle
#[async_trait]
pub trait ReferralRepo: Send + Sync {
    async fn get(&self, id: ReferralId) -> RepoResult<Option<Referral>>;
    async fn get_by_referred(&self, referred: UserId) -> RepoResult<Option<Referral>>;
    async fn list_by_referrer(&self, referrer: UserId) -> RepoResult<Vec<Referral>>;
    /// Insert a `pending` referral and stamp `referred_by_user_id`,
    /// atomically. `DuplicateReferral` if the pair already exists.
    async fn create_pending(
        &self,
        referrer: UserId,
        referred: UserId,
        code: &str,
    ) -> RepoResult<Referral>;
    /// Merge an engagement report; `None` if the user was never referred.
    async fn record_engagement(
        &self,
        referred: UserId,
        completed_onboarding: bool,
        games_delta: u32,
    ) -> RepoResult<Option<Referral>>;
    /// Compare-and-set pending → active; `None` when not pending.
    async fn activate(&self, id: ReferralId) -> RepoResult<Option<Referral>>;
    /// Atomic active → rewarded: populate earned fields, credit both
    /// parties, bump the referrer's counter. Returns the updated referral
    /// and the referrer's new total.
    async fn grant_reward(
        &self,
        id: ReferralId,
        amounts: &RewardAmounts,
    ) -> RepoResult<(Referral, u32)>;
    /// Recount of rewarded referrals (audit path for the cached counter).
    async fn count_rewarded(&self, referrer: UserId) -> RepoResult<u64>;
}

/// Repository for the static milestone catalog
#[async_trait]
pub trait MilestoneRepo: Send + Sync {
    async fn get_active(&self) -> RepoResult<Vec<MilestoneDefinition>>;
    /// Active definitions with `referrals_count <= total`.
    async fn reached(&self, total: u32) -> RepoResult<Vec<MilestoneDefinition>>;
    /// Seed helper: insert unless the threshold exists. True when inserted.
    async fn upsert_definition(
        &self,
        referrals_count: u32,
        title: &str,
        description: Option<&str>,
        reward_coins: u32,
        reward_experience: u32,
        reward_badge: Option<&str>,
    ) -> RepoResult<bool>;
    async fn count(&self) -> RepoResult<usize>;
}

/// Repository for the milestone claim ledger
#[async_trait]
pub trait ClaimRepo: Send + Sync {
    /// Record a claim and credit its reward atomically; `AlreadyClaimed`
    /// when the (user, milestone) pair is already present.
    async fn claim(
        &self,
        user: UserId,
        milestone: &MilestoneDefinition,
    ) -> RepoResult<MilestoneClaim>;
    async fn list_for_user(&self, user: UserId) -> RepoResult<Vec<MilestoneClaim>>;
}

// ============================================================================
// Unified Storage Manager
// ============================================================================

/// Central storage manager that holds all repositories
pub struct StorageManager {
    pub profiles: Box<dyn ProfileRepo>,
    pub referrals: Box<dyn ReferralRepo>,
    pub milestones: Box<dyn MilestoneRepo>,
    pub claims: Box<dyn ClaimRepo>,
}
