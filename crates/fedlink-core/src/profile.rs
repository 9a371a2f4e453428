use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The profile an identity provider hands back after a successful
/// authorization-code exchange.
///
/// `subject_id` is the provider's stable identifier for the account and is
/// the only field guaranteed to be present. Everything else is best-effort:
/// some providers omit names, some hide emails behind extra scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalProfile {
    /// Provider-scoped stable subject identifier.
    pub subject_id: String,

    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,

    /// Bearer token for provider API calls (e.g. avatar fetch).
    pub access_token: String,

    /// Absent when the provider did not grant offline access.
    pub refresh_token: Option<String>,

    /// Access-token lifetime in seconds, when reported.
    pub expires_in: Option<i64>,

    /// The provider's raw profile payload, stored opaquely on the link
    /// record for later inspection.
    pub raw: Value,
}

impl ExternalProfile {
    /// A refresh token that is present but empty is treated as absent;
    /// it must never replace a previously stored one.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}
