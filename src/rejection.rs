//! Translation of destination contract rejections into typed outcomes
//!
//! The teleport contract only reports failures as assertion text, so this is
//! the one place that matches on message substrings. The matched strings are
//! the contract's literal assertion messages; a contract upgrade that rewords
//! them silently turns idempotent rejections into retries. The tests below pin
//! every message.

use crate::error::OracleError;

/// Meaning of a failed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The action was already applied; treat as success.
    AlreadyHandled,
    /// The oracle credential or identity was refused; stop the relay.
    Unauthorized,
    /// The contract will never accept this action; do not retry.
    Permanent,
    /// Anything else; rotate endpoint and retry.
    Retryable,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::AlreadyHandled => "already_handled",
            RejectionKind::Unauthorized => "unauthorized",
            RejectionKind::Permanent => "permanent",
            RejectionKind::Retryable => "retryable",
        }
    }
}

const ALREADY_HANDLED: &[&str] = &[
    "oracle has already signed",
    "oracle has already approved",
    "already marked as claimed",
    "this teleport has already completed",
    "this reference has already completed",
    "teleport is already claimed",
    "already completed",
];

const UNAUTHORIZED: &[&str] = &[
    "account is not an oracle",
    "missing required authority",
    "unsatisfied_authorization",
];

const PERMANENT: &[&str] = &[
    "quantity mismatch",
    "account mismatch",
    "teleport not found",
    "quantity cannot be negative",
    "asset not valid",
    "another oracle has already registered teleport",
];

/// Classify a contract rejection message.
pub fn classify_rejection(message: &str) -> RejectionKind {
    let msg = message.to_lowercase();

    // Checked before the idempotent list: "another oracle has already
    // registered" must not match a generic "already" rule.
    if PERMANENT.iter().any(|p| msg.contains(p)) {
        return RejectionKind::Permanent;
    }
    if ALREADY_HANDLED.iter().any(|p| msg.contains(p)) {
        return RejectionKind::AlreadyHandled;
    }
    if UNAUTHORIZED.iter().any(|p| msg.contains(p)) {
        return RejectionKind::Unauthorized;
    }
    RejectionKind::Retryable
}

/// Classify an error returned by `push_action`.
pub fn classify_submission_error(error: &OracleError) -> RejectionKind {
    match error {
        OracleError::Unauthorized(_) => RejectionKind::Unauthorized,
        OracleError::Rejected(msg) => classify_rejection(msg),
        _ => RejectionKind::Retryable,
    }
}
