//! Storage Layer - unified data access for the referral ledger
//!
//! Implements the Repository pattern with two backends:
//! - **PostgreSQL**: production persistence (sqlx pool, embedded migrations)
//! - **In-memory**: test double / database-less development mode
//!
//! ## Architecture
//! ```text
//! [ReferralLedger / API handlers]
//!        ↓
//! [Repository Traits]
//!        ↓
//! ┌──────────────────┬───────────────┐
//! │ PostgresStore    │ MemoryStore   │
//! │ + PgRepoAdapters │ + MemAdapters │
//! └──────────────────┴───────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let storage = storage::init_postgres_storage("postgres://...", 10).await?;
//! let referral = storage.referrals.get(1).await?;
//! ```

pub mod memory_repo_adapter;
pub mod migrations;
pub mod postgres;
pub mod postgres_repo_adapter;
pub mod repository;
pub mod seed_data;

use std::sync::Arc;
use tracing::info;

use self::memory_repo_adapter::*;
use self::postgres::PostgresStore;
use self::postgres_repo_adapter::*;
use self::repository::StorageManager;
use crate::error::LedgerError;

/// Initialize PostgreSQL-backed storage: connect, run migrations, seed the
/// milestone catalog, and return a StorageManager with all repositories.
pub async fn init_postgres_storage(
    database_url: &str,
    max_connections: u32,
) -> Result<StorageManager, LedgerError> {
    let pg = Arc::new(PostgresStore::new(database_url, max_connections).await?);

    let manager = StorageManager {
        profiles: Box::new(PgProfileRepo::new(pg.clone())),
        referrals: Box::new(PgReferralRepo::new(pg.clone())),
        milestones: Box::new(PgMilestoneRepo::new(pg.clone())),
        claims: Box::new(PgClaimRepo::new(pg)),
    };

    seed_data::seed_milestones(manager.milestones.as_ref()).await?;
    info!("PostgreSQL storage initialized");
    Ok(manager)
}

/// Initialize the in-memory backend (tests and database-less runs).
pub async fn init_memory_storage() -> Result<StorageManager, LedgerError> {
    let store = MemoryStore::new();

    let manager = StorageManager {
        profiles: Box::new(MemProfileRepo::new(store.clone())),
        referrals: Box::new(MemReferralRepo::new(store.clone())),
        milestones: Box::new(MemMilestoneRepo::new(store.clone())),
        claims: Box::new(MemClaimRepo::new(store)),
    };

    seed_data::seed_milestones(manager.milestones.as_ref()).await?;
    info!("In-memory storage initialized");
    Ok(manager)
}
