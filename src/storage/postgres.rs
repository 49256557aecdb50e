//! PostgreSQL storage - referral ledger persistence
//!
//! All mutable ledger state lives in PostgreSQL. Uses `sqlx` for async
//! queries; multi-table transitions (referral creation, reward grants,
//! milestone claims) run inside transactions so the tables stay mutually
//! consistent. Unique-index violations are translated into domain errors
//! at this layer, never propagated raw.
//!
//! ## Tables
//! - user_profiles, referrals, referral_milestones, user_referral_milestones

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use super::migrations;
use crate::codes::{derive_code, MAX_CODE_ATTEMPTS};
use crate::error::{map_unique_violation, LedgerError};
use crate::referral::{ReferralStatus, RewardAmounts};

/// PostgreSQL connection pool wrapper
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and run migrations
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("PostgreSQL connected (max_connections={})", max_connections);

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Connect with an existing pool (for testing / shared pools)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run all pending migrations
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        // Create migrations tracking table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name VARCHAR(100) PRIMARY KEY,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        for (name, sql) in migrations::get_migrations() {
            let applied: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM _migrations WHERE name = $1)")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;

            if !applied {
                info!("Running migration: {}", name);
                sqlx::raw_sql(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| LedgerError::Migration(format!("{}: {}", name, e)))?;

                sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
                    .bind(name)
                    .execute(&self.pool)
                    .await?;

                info!("Migration applied: {}", name);
            } else {
                debug!("Migration already applied: {}", name);
            }
        }

        Ok(())
    }

    // ========================================================================
    // Profile Operations
    // ========================================================================

    /// Create a new user profile
    pub async fn create_profile(&self, username: &str) -> Result<i64, LedgerError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO user_profiles (username) VALUES ($1) RETURNING id")
                .bind(username)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    map_unique_violation(e, LedgerError::UsernameTaken(username.to_string()))
                })?;

        info!("Created profile: {} (id={})", username, id);
        Ok(id)
    }

    /// Get profile by ID
    pub async fn get_profile(&self, id: i64) -> Result<Option<ProfileRow>, LedgerError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, username, coins, experience, referral_code, referred_by_user_id,
                    referral_rewards_claimed, total_referrals, created_at, updated_at
             FROM user_profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Get profile by referral code
    pub async fn get_profile_by_code(&self, code: &str) -> Result<Option<ProfileRow>, LedgerError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, username, coins, experience, referral_code, referred_by_user_id,
                    referral_rewards_claimed, total_referrals, created_at, updated_at
             FROM user_profiles WHERE referral_code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Return the user's referral code, assigning one lazily if absent.
    ///
    /// Codes derive from the user id plus a nonce; the unique index arbitrates
    /// collisions and the nonce is bumped until the update sticks.
    pub async fn assign_referral_code(&self, user_id: i64) -> Result<String, LedgerError> {
        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT referral_code FROM user_profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let existing = existing.ok_or(LedgerError::ProfileNotFound(user_id))?;
        if let Some(code) = existing {
            return Ok(code);
        }

        for attempt in 0..MAX_CODE_ATTEMPTS {
            let code = derive_code(user_id, attempt);
            let result = sqlx::query(
                "UPDATE user_profiles SET referral_code = $2, updated_at = NOW()
                 WHERE id = $1 AND referral_code IS NULL",
            )
            .bind(user_id)
            .bind(&code)
            .execute(&self.pool)
            .await;

            match result {
                Ok(r) if r.rows_affected() == 1 => {
                    debug!("Assigned referral code {} to user {}", code, user_id);
                    return Ok(code);
                }
                Ok(_) => {
                    // Lost a race: another request assigned the code first.
                    let assigned: Option<String> = sqlx::query_scalar(
                        "SELECT referral_code FROM user_profiles WHERE id = $1",
                    )
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?;
                    return assigned.ok_or_else(|| {
                        LedgerError::Constraint(format!(
                            "referral code for user {} vanished mid-assignment",
                            user_id
                        ))
                    });
                }
                Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                    continue; // code taken by another user, try next nonce
                }
                Err(e) => return Err(LedgerError::Database(e)),
            }
        }

        Err(LedgerError::Constraint(format!(
            "could not derive a unique referral code for user {} in {} attempts",
            user_id, MAX_CODE_ATTEMPTS
        )))
    }

    /// One-shot welcome bonus for a referred user. The conditional UPDATE is
    /// the idempotence guard: zero rows affected means already claimed.
    pub async fn claim_welcome_bonus(
        &self,
        user_id: i64,
        coins: i64,
        experience: i64,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE user_profiles
             SET referral_rewards_claimed = TRUE,
                 coins = coins + $2,
                 experience = experience + $3,
                 updated_at = NOW()
             WHERE id = $1 AND referral_rewards_claimed = FALSE",
        )
        .bind(user_id)
        .bind(coins)
        .bind(experience)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_profiles WHERE id = $1)")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?;
            return if exists {
                Err(LedgerError::AlreadyClaimed)
            } else {
                Err(LedgerError::ProfileNotFound(user_id))
            };
        }

        Ok(())
    }

    /// Count profiles
    pub async fn count_profiles(&self) -> Result<i64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Referral Operations
    // ========================================================================

    /// Create a pending referral and stamp the referred profile, atomically.
    ///
    /// A violation of the (referrer, referred) unique pair maps to
    /// `DuplicateReferral`.
    pub async fn create_referral(
        &self,
        referrer: i64,
        referred: i64,
        code: &str,
    ) -> Result<ReferralRow, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row: ReferralRow = sqlx::query_as(
            "INSERT INTO referrals (referrer_user_id, referred_user_id, referral_code)
             VALUES ($1, $2, $3)
             RETURNING id, referrer_user_id, referred_user_id, referral_code, status,
                       referrer_coins_earned, referrer_experience_earned,
                       referred_coins_earned, referred_experience_earned,
                       referred_completed_onboarding, referred_games_played,
                       activated_at, rewarded_at, created_at, updated_at",
        )
        .bind(referrer)
        .bind(referred)
        .bind(code)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, LedgerError::DuplicateReferral { referrer, referred })
        })?;

        sqlx::query(
            "UPDATE user_profiles SET referred_by_user_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(referred)
        .bind(referrer)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Created referral {} ({} -> {}) via code {}",
            row.id, referrer, referred, code
        );
        Ok(row)
    }

    /// Get referral by ID
    pub async fn get_referral(&self, id: i64) -> Result<Option<ReferralRow>, LedgerError> {
        let row = sqlx::query_as::<_, ReferralRow>(
            "SELECT id, referrer_user_id, referred_user_id, referral_code, status,
                    referrer_coins_earned, referrer_experience_earned,
                    referred_coins_earned, referred_experience_earned,
                    referred_completed_onboarding, referred_games_played,
                    activated_at, rewarded_at, created_at, updated_at
             FROM referrals WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Get the referral that brought in a given user, if any
    pub async fn get_referral_by_referred(
        &self,
        referred: i64,
    ) -> Result<Option<ReferralRow>, LedgerError> {
        let row = sqlx::query_as::<_, ReferralRow>(
            "SELECT id, referrer_user_id, referred_user_id, referral_code, status,
                    referrer_coins_earned, referrer_experience_earned,
                    referred_coins_earned, referred_experience_earned,
                    referred_completed_onboarding, referred_games_played,
                    activated_at, rewarded_at, created_at, updated_at
             FROM referrals WHERE referred_user_id = $1",
        )
        .bind(referred)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// All referrals issued by a referrer
    pub async fn list_referrals_by_referrer(
        &self,
        referrer: i64,
    ) -> Result<Vec<ReferralRow>, LedgerError> {
        let rows = sqlx::query_as::<_, ReferralRow>(
            "SELECT id, referrer_user_id, referred_user_id, referral_code, status,
                    referrer_coins_earned, referrer_experience_earned,
                    referred_coins_earned, referred_experience_earned,
                    referred_completed_onboarding, referred_games_played,
                    activated_at, rewarded_at, created_at, updated_at
             FROM referrals WHERE referrer_user_id = $1
             ORDER BY created_at",
        )
        .bind(referrer)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Merge an engagement report into the referred user's referral row.
    /// Returns the updated row, or None if the user was never referred.
    pub async fn record_engagement(
        &self,
        referred: i64,
        completed_onboarding: bool,
        games_delta: i32,
    ) -> Result<Option<ReferralRow>, LedgerError> {
        let row = sqlx::query_as::<_, ReferralRow>(
            "UPDATE referrals
             SET referred_completed_onboarding = referred_completed_onboarding OR $2,
                 referred_games_played = referred_games_played + $3,
                 updated_at = NOW()
             WHERE referred_user_id = $1
             RETURNING id, referrer_user_id, referred_user_id, referral_code, status,
                       referrer_coins_earned, referrer_experience_earned,
                       referred_coins_earned, referred_experience_earned,
                       referred_completed_onboarding, referred_games_played,
                       activated_at, rewarded_at, created_at, updated_at",
        )
        .bind(referred)
        .bind(completed_onboarding)
        .bind(games_delta)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Promote pending → active. Compare-and-set on status: returns None when
    /// the referral is not pending (already active/rewarded, or missing), so
    /// concurrent evaluations apply at most once.
    pub async fn activate_referral(&self, id: i64) -> Result<Option<ReferralRow>, LedgerError> {
        let row = sqlx::query_as::<_, ReferralRow>(
            "UPDATE referrals
             SET status = 'active', activated_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING id, referrer_user_id, referred_user_id, referral_code, status,
                       referrer_coins_earned, referrer_experience_earned,
                       referred_coins_earned, referred_experience_earned,
                       referred_completed_onboarding, referred_games_played,
                       activated_at, rewarded_at, created_at, updated_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref r) = row {
            info!("Referral {} activated (referrer {})", r.id, r.referrer_user_id);
        }
        Ok(row)
    }

    /// Transition active → rewarded and credit both parties (atomic).
    ///
    /// The row lock serializes concurrent grant attempts for the same id;
    /// whichever transaction wins flips the status, the loser sees a
    /// non-active row and fails with `InvalidStateTransition`.
    /// Returns the updated row and the referrer's new total_referrals.
    pub async fn grant_reward(
        &self,
        id: i64,
        amounts: &RewardAmounts,
    ) -> Result<(ReferralRow, i32), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<ReferralRow> = sqlx::query_as(
            "SELECT id, referrer_user_id, referred_user_id, referral_code, status,
                    referrer_coins_earned, referrer_experience_earned,
                    referred_coins_earned, referred_experience_earned,
                    referred_completed_onboarding, referred_games_played,
                    activated_at, rewarded_at, created_at, updated_at
             FROM referrals WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = current.ok_or(LedgerError::ReferralNotFound(id))?;
        let status = ReferralStatus::parse(&current.status).ok_or_else(|| {
            LedgerError::Constraint(format!(
                "referral {} has unknown status '{}'",
                id, current.status
            ))
        })?;
        if status != ReferralStatus::Active {
            return Err(LedgerError::InvalidStateTransition {
                id,
                status,
                expected: ReferralStatus::Active,
            });
        }

        let updated: ReferralRow = sqlx::query_as(
            "UPDATE referrals
             SET status = 'rewarded',
                 referrer_coins_earned = $2,
                 referrer_experience_earned = $3,
                 referred_coins_earned = $4,
                 referred_experience_earned = $5,
                 rewarded_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING id, referrer_user_id, referred_user_id, referral_code, status,
                       referrer_coins_earned, referrer_experience_earned,
                       referred_coins_earned, referred_experience_earned,
                       referred_completed_onboarding, referred_games_played,
                       activated_at, rewarded_at, created_at, updated_at",
        )
        .bind(id)
        .bind(amounts.referrer_coins as i32)
        .bind(amounts.referrer_experience as i32)
        .bind(amounts.referred_coins as i32)
        .bind(amounts.referred_experience as i32)
        .fetch_one(&mut *tx)
        .await?;

        let new_total: i32 = sqlx::query_scalar(
            "UPDATE user_profiles
             SET coins = coins + $2,
                 experience = experience + $3,
                 total_referrals = total_referrals + 1,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING total_referrals",
        )
        .bind(updated.referrer_user_id)
        .bind(amounts.referrer_coins as i64)
        .bind(amounts.referrer_experience as i64)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE user_profiles
             SET coins = coins + $2, experience = experience + $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(updated.referred_user_id)
        .bind(amounts.referred_coins as i64)
        .bind(amounts.referred_experience as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Referral {} rewarded (referrer {} now at {} referrals)",
            id, updated.referrer_user_id, new_total
        );
        Ok((updated, new_total))
    }

    /// Count rewarded referrals for a referrer (audit path for the cached
    /// total_referrals counter)
    pub async fn count_rewarded(&self, referrer: i64) -> Result<i64, LedgerError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM referrals WHERE referrer_user_id = $1 AND status = 'rewarded'",
        )
        .bind(referrer)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ========================================================================
    // Milestone Operations
    // ========================================================================

    /// Active milestone definitions, lowest threshold first
    pub async fn get_active_milestones(&self) -> Result<Vec<MilestoneRow>, LedgerError> {
        let rows = sqlx::query_as::<_, MilestoneRow>(
            "SELECT id, referrals_count, title, description, reward_coins, reward_experience,
                    reward_badge, is_active, created_at, updated_at
             FROM referral_milestones WHERE is_active = TRUE
             ORDER BY referrals_count",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Active definitions whose threshold a referral total has reached
    pub async fn reached_milestones(&self, total: i32) -> Result<Vec<MilestoneRow>, LedgerError> {
        let rows = sqlx::query_as::<_, MilestoneRow>(
            "SELECT id, referrals_count, title, description, reward_coins, reward_experience,
                    reward_badge, is_active, created_at, updated_at
             FROM referral_milestones WHERE is_active = TRUE AND referrals_count <= $1
             ORDER BY referrals_count",
        )
        .bind(total)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Insert a milestone definition unless the threshold already exists.
    /// Returns true when a row was inserted.
    pub async fn upsert_milestone(
        &self,
        referrals_count: i32,
        title: &str,
        description: Option<&str>,
        reward_coins: i32,
        reward_experience: i32,
        reward_badge: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "INSERT INTO referral_milestones
                 (referrals_count, title, description, reward_coins, reward_experience, reward_badge)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (referrals_count) DO NOTHING",
        )
        .bind(referrals_count)
        .bind(title)
        .bind(description)
        .bind(reward_coins)
        .bind(reward_experience)
        .bind(reward_badge)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Count milestone definitions
    pub async fn count_milestones(&self) -> Result<i64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM referral_milestones")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Claim Operations
    // ========================================================================

    /// Record a milestone claim and credit its reward, atomically.
    ///
    /// The unique (user, milestone) index is the concurrency mechanism: a
    /// duplicate insert maps to `AlreadyClaimed` and nothing is credited.
    pub async fn claim_milestone(
        &self,
        user_id: i64,
        milestone_id: i64,
        reward_coins: i64,
        reward_experience: i64,
    ) -> Result<ClaimRow, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let claim: ClaimRow = sqlx::query_as(
            "INSERT INTO user_referral_milestones (user_id, milestone_id)
             VALUES ($1, $2)
             RETURNING id, user_id, milestone_id, claimed_at",
        )
        .bind(user_id)
        .bind(milestone_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, LedgerError::AlreadyClaimed))?;

        sqlx::query(
            "UPDATE user_profiles
             SET coins = coins + $2, experience = experience + $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(reward_coins)
        .bind(reward_experience)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("User {} claimed milestone {}", user_id, milestone_id);
        Ok(claim)
    }

    /// All claims for a user, oldest first
    pub async fn get_claims(&self, user_id: i64) -> Result<Vec<ClaimRow>, LedgerError> {
        let rows = sqlx::query_as::<_, ClaimRow>(
            "SELECT id, user_id, milestone_id, claimed_at
             FROM user_referral_milestones WHERE user_id = $1
             ORDER BY claimed_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// ============================================================================
// Row types (for sqlx query_as mapping)
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: i64,
    pub username: String,
    pub coins: i64,
    pub experience: i64,
    pub referral_code: Option<String>,
    pub referred_by_user_id: Option<i64>,
    pub referral_rewards_claimed: bool,
    pub total_referrals: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReferralRow {
    pub id: i64,
    pub referrer_user_id: i64,
    pub referred_user_id: i64,
    pub referral_code: String,
    pub status: String,
    pub referrer_coins_earned: i32,
    pub referrer_experience_earned: i32,
    pub referred_coins_earned: i32,
    pub referred_experience_earned: i32,
    pub referred_completed_onboarding: bool,
    pub referred_games_played: i32,
    pub activated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rewarded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MilestoneRow {
    pub id: i64,
    pub referrals_count: i32,
    pub title: String,
    pub description: Option<String>,
    pub reward_coins: i32,
    pub reward_experience: i32,
    pub reward_badge: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ClaimRow {
    pub id: i64,
    pub user_id: i64,
    pub milestone_id: i64,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
}
