//! LedgerService — referral lifecycle endpoints
//!
//! Endpoints:
//! - POST /referral.LedgerService/CreateProfile
//! - POST /referral.LedgerService/GetReferralCode
//! - POST /referral.LedgerService/RegisterReferral
//! - POST /referral.LedgerService/RecordEngagement
//! - POST /referral.LedgerService/GrantReward
//! - POST /referral.LedgerService/GetReferralSummary

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

use super::ApiState;
use crate::error::LedgerError;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/referral.LedgerService/CreateProfile", post(create_profile))
        .route("/referral.LedgerService/GetReferralCode", post(get_referral_code))
        .route("/referral.LedgerService/RegisterReferral", post(register_referral))
        .route("/referral.LedgerService/RecordEngagement", post(record_engagement))
        .route("/referral.LedgerService/GrantReward", post(grant_reward))
        .route("/referral.LedgerService/GetReferralSummary", post(get_referral_summary))
}

/// Log a rejection at the right level and return its client-facing reason.
fn failure_reason(op: &str, err: &LedgerError) -> String {
    if err.is_business_rule() {
        debug!("{} rejected: {}", op, err);
    } else {
        warn!("{} failed: {}", op, err);
    }
    err.to_string()
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct CreateProfileRequest {
    pub username: String,
}

#[derive(Serialize)]
pub struct CreateProfileResponse {
    pub success: bool,
    pub failure_reason: String,
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct ReferralCodeRequest {
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct ReferralCodeResponse {
    pub success: bool,
    pub failure_reason: String,
    pub referral_code: String,
}

#[derive(Deserialize)]
pub struct RegisterReferralRequest {
    pub referral_code: String,
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct RegisterReferralResponse {
    pub success: bool,
    pub failure_reason: String,
    pub referral_id: i64,
    pub status: String,
}

#[derive(Deserialize)]
pub struct RecordEngagementRequest {
    pub user_id: i64,
    #[serde(default)]
    pub completed_onboarding: bool,
    #[serde(default)]
    pub games_played: u32,
}

#[derive(Serialize)]
pub struct RecordEngagementResponse {
    pub success: bool,
    pub failure_reason: String,
    /// False when the user has no referral on record.
    pub referred: bool,
    pub status: String,
    pub newly_activated: bool,
}

#[derive(Deserialize)]
pub struct GrantRewardRequest {
    pub referral_id: i64,
}

#[derive(Serialize)]
pub struct GrantRewardResponse {
    pub success: bool,
    pub failure_reason: String,
    pub status: String,
    pub referrer_total_referrals: u32,
    /// Ids of milestones newly claimed by this grant.
    pub milestones_claimed: Vec<i64>,
}

#[derive(Deserialize)]
pub struct ReferralSummaryRequest {
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct ReferralSummaryResponse {
    pub success: bool,
    pub failure_reason: String,
    pub referral_code: String,
    pub total_referrals: u32,
    pub pending: u32,
    pub active: u32,
    pub rewarded: u32,
    pub coins_earned: u64,
    pub experience_earned: u64,
    pub milestones_claimed: u32,
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_profile(
    State(state): State<ApiState>,
    Json(req): Json<CreateProfileRequest>,
) -> Json<CreateProfileResponse> {
    match state.ledger.storage().profiles.create(&req.username).await {
        Ok(user_id) => Json(CreateProfileResponse {
            success: true,
            failure_reason: String::new(),
            user_id,
        }),
        Err(e) => Json(CreateProfileResponse {
            success: false,
            failure_reason: failure_reason("CreateProfile", &e),
            user_id: 0,
        }),
    }
}

async fn get_referral_code(
    State(state): State<ApiState>,
    Json(req): Json<ReferralCodeRequest>,
) -> Json<ReferralCodeResponse> {
    match state.ledger.referral_code(req.user_id).await {
        Ok(code) => Json(ReferralCodeResponse {
            success: true,
            failure_reason: String::new(),
            referral_code: code,
        }),
        Err(e) => Json(ReferralCodeResponse {
            success: false,
            failure_reason: failure_reason("GetReferralCode", &e),
            referral_code: String::new(),
        }),
    }
}

async fn register_referral(
    State(state): State<ApiState>,
    Json(req): Json<RegisterReferralRequest>,
) -> Json<RegisterReferralResponse> {
    match state
        .ledger
        .register_referral(&req.referral_code, req.user_id)
        .await
    {
        Ok(referral) => {
            state.metrics.referrals_created.fetch_add(1, Ordering::Relaxed);
            Json(RegisterReferralResponse {
                success: true,
                failure_reason: String::new(),
                referral_id: referral.id,
                status: referral.status.to_string(),
            })
        }
        Err(e) => Json(RegisterReferralResponse {
            success: false,
            failure_reason: failure_reason("RegisterReferral", &e),
            referral_id: 0,
            status: String::new(),
        }),
    }
}

async fn record_engagement(
    State(state): State<ApiState>,
    Json(req): Json<RecordEngagementRequest>,
) -> Json<RecordEngagementResponse> {
    match state
        .ledger
        .record_engagement(req.user_id, req.completed_onboarding, req.games_played)
        .await
    {
        Ok(Some(outcome)) => {
            if outcome.newly_activated {
                state
                    .metrics
                    .referrals_activated
                    .fetch_add(1, Ordering::Relaxed);
            }
            Json(RecordEngagementResponse {
                success: true,
                failure_reason: String::new(),
                referred: true,
                status: outcome.referral.status.to_string(),
                newly_activated: outcome.newly_activated,
            })
        }
        // Not an error: most players were never referred.
        Ok(None) => Json(RecordEngagementResponse {
            success: true,
            failure_reason: String::new(),
            referred: false,
            status: String::new(),
            newly_activated: false,
        }),
        Err(e) => Json(RecordEngagementResponse {
            success: false,
            failure_reason: failure_reason("RecordEngagement", &e),
            referred: false,
            status: String::new(),
            newly_activated: false,
        }),
    }
}

async fn grant_reward(
    State(state): State<ApiState>,
    Json(req): Json<GrantRewardRequest>,
) -> Json<GrantRewardResponse> {
    match state.ledger.grant_reward(req.referral_id).await {
        Ok(outcome) => {
            state.metrics.rewards_granted.fetch_add(1, Ordering::Relaxed);
            state
                .metrics
                .milestones_claimed
                .fetch_add(outcome.milestones_claimed.len() as u64, Ordering::Relaxed);
            Json(GrantRewardResponse {
                success: true,
                failure_reason: String::new(),
                status: outcome.referral.status.to_string(),
                referrer_total_referrals: outcome.total_referrals,
                milestones_claimed: outcome
                    .milestones_claimed
                    .iter()
                    .map(|c| c.milestone_id)
                    .collect(),
            })
        }
        Err(e) => Json(GrantRewardResponse {
            success: false,
            failure_reason: failure_reason("GrantReward", &e),
            status: String::new(),
            referrer_total_referrals: 0,
            milestones_claimed: Vec::new(),
        }),
    }
}

async fn get_referral_summary(
    State(state): State<ApiState>,
    Json(req): Json<ReferralSummaryRequest>,
) -> Json<ReferralSummaryResponse> {
    match state.ledger.referral_summary(req.user_id).await {
        Ok(summary) => Json(ReferralSummaryResponse {
            success: true,
            failure_reason: String::new(),
            referral_code: summary.referral_code.unwrap_or_default(),
            total_referrals: summary.total_referrals,
            pending: summary.pending,
            active: summary.active,
            rewarded: summary.rewarded,
            coins_earned: summary.coins_earned,
            experience_earned: summary.experience_earned,
            milestones_claimed: summary.milestones_claimed,
        }),
        Err(e) => Json(ReferralSummaryResponse {
            success: false,
            failure_reason: failure_reason("GetReferralSummary", &e),
            referral_code: String::new(),
            total_referrals: 0,
            pending: 0,
            active: 0,
            rewarded: 0,
            coins_earned: 0,
            experience_earned: 0,
            milestones_claimed: 0,
        }),
    }
}
