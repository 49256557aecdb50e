use std::sync::Arc;
use tracing::{info, warn};

use referral_ledger::{api, storage, LedgerConfig, ReferralLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = LedgerConfig::from_env();
    info!(
        "Referral ledger starting (activation threshold: {} games)",
        config.activation_games_threshold
    );

    // ========================================================================
    // 1. Initialize storage (PostgreSQL when configured, in-memory otherwise)
    // ========================================================================
    let storage = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pg_max_connections: u32 = std::env::var("PG_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10);

            info!("Connecting to PostgreSQL: {}...", database_url);
            storage::init_postgres_storage(&database_url, pg_max_connections).await?
        }
        Err(_) => {
            warn!("DATABASE_URL not set - using in-memory storage, state will not survive restart");
            storage::init_memory_storage().await?
        }
    };

    let ledger = Arc::new(ReferralLedger::new(Arc::new(storage), config));

    // ========================================================================
    // 2. Start the HTTP API server (blocks until shutdown)
    // ========================================================================
    let port: u16 = std::env::var("API_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(50051);

    api::start_api_server(ledger, port)
        .await
        .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

    Ok(())
}
