//! Referral Ledger Library
//!
//! Core modules for the referral ledger service:
//! - Referral lifecycle (pending → active → rewarded) with forward-only
//!   transitions and at-most-once reward semantics
//! - Milestone catalog and claim ledger with unique-claim enforcement
//! - Repository-pattern storage (PostgreSQL + in-memory backends)
//! - HTTP/JSON API endpoints for the game backend
//! - Server metrics (Prometheus + JSON export)

pub mod api; // HTTP/JSON API endpoints
pub mod codes; // Referral code derivation (sha3-based)
pub mod config; // Activation threshold + reward amounts
pub mod error; // Domain error taxonomy
pub mod ledger; // Lifecycle components over the repositories
pub mod metrics; // Server metrics (Prometheus + JSON export)
pub mod referral; // Domain types + status state machine
pub mod storage; // Unified data storage (PostgreSQL + in-memory)

// Re-export commonly used types
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::{GrantOutcome, ReferralLedger, ReferralSummary};
pub use referral::{Referral, ReferralStatus};
pub use storage::postgres::PostgresStore;
