//! Engine error taxonomy.
//!
//! Callers need to tell three situations apart: "nothing happened, fix
//! your input", "nothing happened, this was already done", and "nothing
//! happened, the system is misconfigured". `ErrorKind` carries that
//! classification alongside the concrete variant.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::interfaces::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification of an `EngineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rejected before any persistence.
    InvalidInput,
    /// Referenced entity does not exist.
    NotFound,
    /// The requested transition conflicts with current state. The correct
    /// outcome may already be in place; callers should not blindly retry.
    Conflict,
    /// Operator attention required (e.g. no active rate schedule).
    Misconfigured,
    /// Storage or other internal failure.
    Internal,
}

/// Errors returned by engine operations.
///
/// Any error from a mutating operation guarantees the underlying
/// transaction was rolled back first: error implies no state change.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("sale amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("sale reference must not be empty")]
    EmptyReference,

    #[error("invalid rate schedule: {0}")]
    InvalidSchedule(String),

    #[error("affiliate {0} not found")]
    AffiliateNotFound(Uuid),

    #[error("sale {0} not found")]
    SaleNotFound(Uuid),

    #[error("no affiliate holds referral code {0}")]
    UnknownReferralCode(String),

    #[error("sale reference already recorded: {0}")]
    DuplicateReference(String),

    #[error("affiliate {0} is not active")]
    InactiveAffiliate(Uuid),

    #[error("sale {0} is not verified")]
    NotVerified(Uuid),

    #[error("sale {0} verification already settled")]
    AlreadyVerified(Uuid),

    #[error("commissions already distributed for sale {0}")]
    AlreadyDistributed(Uuid),

    #[error("commissions already released for sale {0}")]
    AlreadyReleased(Uuid),

    #[error("no commissions distributed for sale {0}")]
    NotDistributed(Uuid),

    #[error("could not generate a unique referral code after {attempts} attempts")]
    ReferralCodeExhausted { attempts: u32 },

    #[error("no active commission rate schedule is configured")]
    NoActiveSchedule,

    #[error("unsupported storage backend: {0}")]
    UnsupportedStorage(String),

    #[error("storage initialization failed: {0}")]
    StorageInit(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl EngineError {
    /// Classify this error for caller-side handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NonPositiveAmount(_) | Self::EmptyReference | Self::InvalidSchedule(_) => {
                ErrorKind::InvalidInput
            }
            Self::AffiliateNotFound(_) | Self::SaleNotFound(_) | Self::UnknownReferralCode(_) => {
                ErrorKind::NotFound
            }
            Self::DuplicateReference(_)
            | Self::InactiveAffiliate(_)
            | Self::NotVerified(_)
            | Self::AlreadyVerified(_)
            | Self::AlreadyDistributed(_)
            | Self::AlreadyReleased(_)
            | Self::NotDistributed(_) => ErrorKind::Conflict,
            Self::NoActiveSchedule | Self::UnsupportedStorage(_) | Self::StorageInit(_) => {
                ErrorKind::Misconfigured
            }
            Self::ReferralCodeExhausted { .. } | Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

/// Storage conflicts surface as the matching domain conflict: a re-check
/// that fires inside a transaction means someone else already performed
/// the operation, which callers treat identically to the outer check.
impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateReference(reference) => Self::DuplicateReference(reference),
            StorageError::BatchExists { sale_id } => Self::AlreadyDistributed(sale_id),
            StorageError::BatchAlreadyPaid { sale_id } => Self::AlreadyReleased(sale_id),
            StorageError::BatchMissing { sale_id } => Self::NotDistributed(sale_id),
            StorageError::VerificationSettled { sale_id } => Self::AlreadyVerified(sale_id),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflicts_map_to_domain_conflicts() {
        let sale_id = Uuid::new_v4();
        let err: EngineError = StorageError::BatchExists { sale_id }.into();
        assert!(matches!(err, EngineError::AlreadyDistributed(id) if id == sale_id));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: EngineError = StorageError::DuplicateReference("ORD-1".into()).into();
        assert!(matches!(err, EngineError::DuplicateReference(_)));
    }

    #[test]
    fn misconfiguration_is_distinct_from_input_errors() {
        assert_eq!(EngineError::NoActiveSchedule.kind(), ErrorKind::Misconfigured);
        assert_eq!(
            EngineError::NonPositiveAmount(Decimal::ZERO).kind(),
            ErrorKind::InvalidInput
        );
    }
}
