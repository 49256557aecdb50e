//! Database migrations - PostgreSQL schema for the referral ledger
//!
//! Four tables: user profiles (with referral bookkeeping and balances),
//! the referral relationships themselves, the milestone catalog, and the
//! per-user milestone claim ledger.

/// SQL migration for creating all tables
pub const MIGRATION_V1: &str = r#"
-- ============================================================================
-- Referral Ledger Schema v1
-- ============================================================================

-- ============================================================================
-- 1. User Profiles
-- ============================================================================

CREATE TABLE IF NOT EXISTS user_profiles (
    id              BIGSERIAL PRIMARY KEY,
    username        VARCHAR(50) UNIQUE NOT NULL,

    -- Balances credited by reward grants and milestone claims
    coins           BIGINT NOT NULL DEFAULT 0 CHECK (coins >= 0),
    experience      BIGINT NOT NULL DEFAULT 0 CHECK (experience >= 0),

    -- Referral bookkeeping
    referral_code   VARCHAR(12) UNIQUE,
    referred_by_user_id BIGINT REFERENCES user_profiles(id) ON DELETE SET NULL,
    referral_rewards_claimed BOOLEAN NOT NULL DEFAULT FALSE,
    total_referrals INTEGER NOT NULL DEFAULT 0 CHECK (total_referrals >= 0),

    created_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);

CREATE INDEX idx_profiles_referral_code ON user_profiles(referral_code);
CREATE INDEX idx_profiles_referred_by ON user_profiles(referred_by_user_id);

-- ============================================================================
-- 2. Referrals
-- ============================================================================

CREATE TABLE IF NOT EXISTS referrals (
    id              BIGSERIAL PRIMARY KEY,
    referrer_user_id BIGINT NOT NULL REFERENCES user_profiles(id) ON DELETE CASCADE,
    referred_user_id BIGINT NOT NULL REFERENCES user_profiles(id) ON DELETE CASCADE,
    referral_code   VARCHAR(12) NOT NULL,

    -- 'pending' | 'active' | 'rewarded'
    status          VARCHAR(32) NOT NULL DEFAULT 'pending',

    -- Populated exactly once, at the rewarded transition
    referrer_coins_earned       INTEGER NOT NULL DEFAULT 0 CHECK (referrer_coins_earned >= 0),
    referrer_experience_earned  INTEGER NOT NULL DEFAULT 0 CHECK (referrer_experience_earned >= 0),
    referred_coins_earned       INTEGER NOT NULL DEFAULT 0 CHECK (referred_coins_earned >= 0),
    referred_experience_earned  INTEGER NOT NULL DEFAULT 0 CHECK (referred_experience_earned >= 0),

    -- Engagement reported by the gameplay collaborator
    referred_completed_onboarding BOOLEAN NOT NULL DEFAULT FALSE,
    referred_games_played INTEGER NOT NULL DEFAULT 0 CHECK (referred_games_played >= 0),

    activated_at    TIMESTAMP WITH TIME ZONE,
    rewarded_at     TIMESTAMP WITH TIME ZONE,
    created_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),

    CONSTRAINT unique_referral_pair UNIQUE (referrer_user_id, referred_user_id)
);

CREATE INDEX idx_referrals_referrer_status ON referrals(referrer_user_id, status);
CREATE INDEX idx_referrals_referred ON referrals(referred_user_id);

-- ============================================================================
-- 3. Milestone Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS referral_milestones (
    id              BIGSERIAL PRIMARY KEY,
    referrals_count INTEGER NOT NULL UNIQUE CHECK (referrals_count > 0),
    title           VARCHAR(255) NOT NULL,
    description     TEXT,
    reward_coins    INTEGER NOT NULL DEFAULT 0 CHECK (reward_coins >= 0),
    reward_experience INTEGER NOT NULL DEFAULT 0 CHECK (reward_experience >= 0),
    reward_badge    VARCHAR(64),
    is_active       BOOLEAN NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);

-- ============================================================================
-- 4. Milestone Claim Ledger
-- ============================================================================

CREATE TABLE IF NOT EXISTS user_referral_milestones (
    id              BIGSERIAL PRIMARY KEY,
    user_id         BIGINT NOT NULL REFERENCES user_profiles(id) ON DELETE CASCADE,
    milestone_id    BIGINT NOT NULL REFERENCES referral_milestones(id) ON DELETE CASCADE,
    claimed_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),

    CONSTRAINT unique_user_milestone UNIQUE (user_id, milestone_id)
);

CREATE INDEX idx_claims_user ON user_referral_milestones(user_id);
"#;

/// Get all migration SQL statements in order
pub fn get_migrations() -> Vec<(&'static str, &'static str)> {
    vec![("v1_initial_schema", MIGRATION_V1)]
}
