//! MilestoneService — milestone catalog and bonus endpoints
//!
//! Endpoints:
//! - POST /referral.MilestoneService/ListMilestones
//! - POST /referral.MilestoneService/GetClaims
//! - POST /referral.MilestoneService/ClaimWelcomeBonus

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

use super::ApiState;

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/referral.MilestoneService/ListMilestones", post(list_milestones))
        .route("/referral.MilestoneService/GetClaims", post(get_claims))
        .route(
            "/referral.MilestoneService/ClaimWelcomeBonus",
            post(claim_welcome_bonus),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct ListMilestonesRequest {}

#[derive(Serialize)]
pub struct ListMilestonesResponse {
    pub milestones: Vec<MilestoneEntry>,
}

#[derive(Serialize)]
pub struct MilestoneEntry {
    pub id: i64,
    pub referrals_count: u32,
    pub title: String,
    pub description: String,
    pub reward_coins: u32,
    pub reward_experience: u32,
    pub reward_badge: String,
}

#[derive(Deserialize)]
pub struct GetClaimsRequest {
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct GetClaimsResponse {
    pub claims: Vec<ClaimEntry>,
}

#[derive(Serialize)]
pub struct ClaimEntry {
    pub milestone_id: i64,
    pub claimed_at: i64,
}

#[derive(Deserialize)]
pub struct WelcomeBonusRequest {
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct WelcomeBonusResponse {
    pub success: bool,
    pub failure_reason: String,
    pub coins_awarded: u64,
    pub experience_awarded: u64,
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_milestones(
    State(state): State<ApiState>,
    Json(_req): Json<ListMilestonesRequest>,
) -> Json<ListMilestonesResponse> {
    let definitions = state
        .ledger
        .storage()
        .milestones
        .get_active()
        .await
        .unwrap_or_default();

    let milestones = definitions
        .iter()
        .map(|m| MilestoneEntry {
            id: m.id,
            referrals_count: m.referrals_count,
            title: m.title.clone(),
            description: m.description.clone().unwrap_or_default(),
            reward_coins: m.reward_coins,
            reward_experience: m.reward_experience,
            reward_badge: m.reward_badge.clone().unwrap_or_default(),
        })
        .collect();

    Json(ListMilestonesResponse { milestones })
}

async fn get_claims(
    State(state): State<ApiState>,
    Json(req): Json<GetClaimsRequest>,
) -> Json<GetClaimsResponse> {
    let claims = state
        .ledger
        .storage()
        .claims
        .list_for_user(req.user_id)
        .await
        .unwrap_or_default();

    Json(GetClaimsResponse {
        claims: claims
            .iter()
            .map(|c| ClaimEntry {
                milestone_id: c.milestone_id,
                claimed_at: c.claimed_at.timestamp(),
            })
            .collect(),
    })
}

async fn claim_welcome_bonus(
    State(state): State<ApiState>,
    Json(req): Json<WelcomeBonusRequest>,
) -> Json<WelcomeBonusResponse> {
    match state.ledger.claim_welcome_bonus(req.user_id).await {
        Ok(()) => {
            state
                .metrics
                .welcome_bonuses_claimed
                .fetch_add(1, Ordering::Relaxed);
            let config = state.ledger.config();
            Json(WelcomeBonusResponse {
                success: true,
                failure_reason: String::new(),
                coins_awarded: config.welcome_bonus_coins,
                experience_awarded: config.welcome_bonus_experience,
            })
        }
        Err(e) => {
            if e.is_business_rule() {
                debug!("ClaimWelcomeBonus rejected: {}", e);
            } else {
                warn!("ClaimWelcomeBonus failed: {}", e);
            }
            Json(WelcomeBonusResponse {
                success: false,
                failure_reason: e.to_string(),
                coins_awarded: 0,
                experience_awarded: 0,
            })
        }
    }
}
