//! Human-readable status lines shown after a verification attempt.

use crate::types::VerificationResult;
use serde::Serialize;

pub const UNINITIATED: &str = "Verification Uninitiated";
pub const VERIFIED: &str = "Verified";
pub const UNVERIFIED: &str = "Unverified";
pub const WELCOME: &str = "Welcome to the system!";
pub const FAILURE: &str = "Authentication Failure. Please Try Again";

/// The two status strings a front end renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusText {
    pub verification: &'static str,
    pub message: &'static str,
}

impl Default for StatusText {
    fn default() -> Self {
        Self::uninitiated()
    }
}

impl StatusText {
    /// State before any verification has run.
    pub const fn uninitiated() -> Self {
        Self {
            verification: UNINITIATED,
            message: "",
        }
    }

    /// Map a verification outcome to status lines. Errors render the same
    /// as a negative decision.
    pub fn from_outcome<E>(outcome: &Result<VerificationResult, E>) -> Self {
        match outcome {
            Ok(result) if result.verified => Self {
                verification: VERIFIED,
                message: WELCOME,
            },
            _ => Self {
                verification: UNVERIFIED,
                message: FAILURE,
            },
        }
    }
}
