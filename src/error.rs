//! Error types for the referral ledger
//!
//! Business-rule rejections (invalid code, duplicate referral, bad state
//! transition, double claim) are expected outcomes, not system failures.
//! Callers log them and report them to the client; only `Database`,
//! `Migration` and `Constraint` indicate something actually went wrong.

use crate::referral::{ReferralId, ReferralStatus, UserId};

/// Error type for all ledger and storage operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("referral code '{0}' does not resolve to a user")]
    InvalidReferralCode(String),

    #[error("user {0} cannot refer themselves")]
    SelfReferral(UserId),

    #[error("referral from user {referrer} to user {referred} already exists")]
    DuplicateReferral { referrer: UserId, referred: UserId },

    #[error("referral {id} is '{status}', operation requires '{expected}'")]
    InvalidStateTransition {
        id: ReferralId,
        status: ReferralStatus,
        expected: ReferralStatus,
    },

    #[error("reward already claimed")]
    AlreadyClaimed,

    #[error("user {0} was not referred by anyone")]
    NotReferred(UserId),

    #[error("username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("profile {0} not found")]
    ProfileNotFound(UserId),

    #[error("referral {0} not found")]
    ReferralNotFound(ReferralId),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Whether this error is a business-rule rejection (expected, recoverable)
    /// as opposed to a storage/infrastructure failure.
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            LedgerError::Database(_) | LedgerError::Migration(_) | LedgerError::Constraint(_)
        )
    }
}

/// Map a unique-index violation (SQLSTATE 23505) to the given domain error,
/// passing any other database error through unchanged.
pub(crate) fn map_unique_violation(err: sqlx::Error, domain: LedgerError) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => domain,
        _ => LedgerError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rule_classification() {
        assert!(LedgerError::SelfReferral(1).is_business_rule());
        assert!(LedgerError::AlreadyClaimed.is_business_rule());
        assert!(LedgerError::InvalidReferralCode("X".into()).is_business_rule());
        assert!(!LedgerError::Migration("boom".into()).is_business_rule());
        assert!(!LedgerError::Constraint("boom".into()).is_business_rule());
    }

    #[test]
    fn transition_error_message_names_both_states() {
        let err = LedgerError::InvalidStateTransition {
            id: 7,
            status: ReferralStatus::Rewarded,
            expected: ReferralStatus::Active,
        };
        let msg = err.to_string();
        assert!(msg.contains("rewarded"));
        assert!(msg.contains("active"));
    }
}
