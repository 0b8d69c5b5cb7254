//! error types
//!

use thiserror::Error;

/// The global error type for the bakery.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    /// Any failure while verifying a macaroon against its caveats:
    /// signature mismatches, missing or reused discharges, failed
    /// verification-id decryption and rejected first-party caveats all
    /// funnel here.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Sentinel returned by checkers for conditions they do not handle.
    /// Checker composition alone interprets it, falling through to the
    /// next checker in the chain.
    #[error("caveat not recognized")]
    CaveatNotRecognized,

    /// A first-party caveat was understood but not satisfied.
    #[error("caveat {caveat:?} not satisfied: {reason}")]
    CaveatNotSatisfied { caveat: String, reason: String },

    /// A condition was understood by a checker and rejected. The bare
    /// display form is intentional: the reason is always embedded in a
    /// carrying error such as [`Error::CaveatNotSatisfied`].
    #[error("{0}")]
    ConditionFailed(String),

    /// A third-party checker rejected the condition it was asked to
    /// discharge.
    #[error("third party check failed: {0}")]
    ThirdPartyCheckFailed(String),

    /// A storage lookup found no item for the requested id. The service
    /// rewrites this into [`Error::Verification`] before surfacing it: a
    /// missing root key is indistinguishable from a fake macaroon.
    #[error("not found")]
    NotFound,

    #[error("cannot decode key: {0}")]
    KeyDecode(String),

    #[error("cannot decode caveat id: {0}")]
    CaveatIdDecode(String),

    #[error("cannot encode caveat id: {0}")]
    CaveatIdEncode(String),

    #[error("cannot find public key for location {location:?}: {reason}")]
    PublicKeyLookup { location: String, reason: String },

    /// A caveat was malformed at construction or routing time.
    #[error("invalid caveat: {0}")]
    InvalidCaveat(String),

    /// Macaroon wire data could not be serialized or deserialized.
    #[error("invalid macaroon data: {0}")]
    Format(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("too many discharge hops")]
    DischargeLimitExceeded,

    /// Propagated from any host-provided call (storage, locator,
    /// discharge fetch) that was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn verification(reason: impl std::fmt::Display) -> Error {
        Error::Verification(reason.to_string())
    }

    /// Returns true if this error reports a failed macaroon
    /// verification, as opposed to a structural or host failure.
    pub fn is_verification(&self) -> bool {
        matches!(self, Error::Verification(_))
    }
}
