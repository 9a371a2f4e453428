use serde::{Deserialize, Serialize};

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Query string for GET /auth/{realm}/{driver}/callback
///
/// Providers that deny the authorization send `error` instead of `code`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Response for GET /auth/{realm}/providers
#[derive(Debug, Serialize, Deserialize)]
pub struct ProvidersResponse {
    pub realm: String,
    pub drivers: Vec<String>,
}

/// Response for GET /auth/me
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfoResponse {
    pub kind: String,
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Pending authorization round-trip, cached under the opaque `state` value
/// between redirect and callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginState {
    pub realm: String,
    pub driver: String,
}
