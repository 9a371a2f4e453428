/// Error taxonomy for the federation flow.
///
/// Every terminal state a callback can reach maps to exactly one of these
/// variants, so HTTP adapters can translate them into user-appropriate
/// responses without ever surfacing an opaque failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// A provider was registered or used without a client id/secret.
    ///
    /// Fatal and never retried; raised before any network call is made.
    MisconfiguredProvider { driver: String, missing: String },

    /// No adapter is registered for this (realm, driver) pair.
    ///
    /// User-facing not-found, not an internal error.
    UnknownProvider { realm: String, driver: String },

    /// The authorization-code exchange or profile fetch failed.
    ///
    /// Wraps transport and provider-side errors; raw HTTP client errors are
    /// never exposed to callers (they may embed tokens or codes).
    ExchangeFailed { driver: String, reason: String },

    /// No local user matched and the realm policy forbids auto-creation.
    LoginNotPermitted,

    /// A save collided with the unique (realm, driver, provider_user_id)
    /// index. This is a concurrency signal: the caller must re-read and
    /// retry against the now-existing record.
    ConstraintViolation,

    /// Any other persistence failure.
    Storage(String),
}

impl std::fmt::Display for FederationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FederationError::MisconfiguredProvider { driver, missing } => {
                write!(f, "provider '{driver}' is misconfigured: missing {missing}")
            }
            FederationError::UnknownProvider { realm, driver } => {
                write!(f, "no provider '{driver}' registered for realm '{realm}'")
            }
            FederationError::ExchangeFailed { driver, reason } => {
                write!(f, "authorization exchange with '{driver}' failed: {reason}")
            }
            FederationError::LoginNotPermitted => {
                write!(f, "login not permitted: no matching local user and auto-creation is disabled")
            }
            FederationError::ConstraintViolation => {
                write!(f, "federated identity already persisted by a concurrent callback")
            }
            FederationError::Storage(reason) => {
                write!(f, "storage error: {reason}")
            }
        }
    }
}

impl std::error::Error for FederationError {}

impl FederationError {
    pub fn exchange(driver: &str, reason: impl std::fmt::Display) -> Self {
        FederationError::ExchangeFailed {
            driver: driver.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(reason: impl std::fmt::Display) -> Self {
        FederationError::Storage(reason.to_string())
    }
}
