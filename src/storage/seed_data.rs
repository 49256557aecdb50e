//! Seed Data - default milestone catalog
//!
//! Populates `referral_milestones` with the standard reward tiers. Inserts
//! are keyed on the unique referrals_count, so re-running at every startup
//! is harmless and operator-edited rows are left alone.

use tracing::info;

use super::repository::{MilestoneRepo, RepoResult};

struct MilestoneSeed {
    referrals_count: u32,
    title: &'static str,
    description: &'static str,
    reward_coins: u32,
    reward_experience: u32,
    reward_badge: &'static str,
}

const DEFAULT_MILESTONES: &[MilestoneSeed] = &[
    MilestoneSeed {
        referrals_count: 5,
        title: "Recruiter",
        description: "Bring 5 friends into the game",
        reward_coins: 100,
        reward_experience: 50,
        reward_badge: "badge_recruiter_bronze",
    },
    MilestoneSeed {
        referrals_count: 10,
        title: "Talent Scout",
        description: "Bring 10 friends into the game",
        reward_coins: 250,
        reward_experience: 120,
        reward_badge: "badge_recruiter_silver",
    },
    MilestoneSeed {
        referrals_count: 25,
        title: "Ambassador",
        description: "Bring 25 friends into the game",
        reward_coins: 750,
        reward_experience: 400,
        reward_badge: "badge_recruiter_gold",
    },
    MilestoneSeed {
        referrals_count: 50,
        title: "Evangelist",
        description: "Bring 50 friends into the game",
        reward_coins: 2000,
        reward_experience: 1000,
        reward_badge: "badge_recruiter_platinum",
    },
    MilestoneSeed {
        referrals_count: 100,
        title: "Legend",
        description: "Bring 100 friends into the game",
        reward_coins: 5000,
        reward_experience: 2500,
        reward_badge: "badge_recruiter_diamond",
    },
];

/// Seed the milestone catalog. Returns the number of rows inserted.
pub async fn seed_milestones(milestones: &dyn MilestoneRepo) -> RepoResult<usize> {
    let mut inserted = 0;
    for seed in DEFAULT_MILESTONES {
        let created = milestones
            .upsert_definition(
                seed.referrals_count,
                seed.title,
                Some(seed.description),
                seed.reward_coins,
                seed.reward_experience,
                Some(seed.reward_badge),
            )
            .await?;
        if created {
            inserted += 1;
        }
    }

    info!(
        "Seeded {} milestone definitions ({} already present)",
        inserted,
        DEFAULT_MILESTONES.len() - inserted
    );
    Ok(inserted)
}
