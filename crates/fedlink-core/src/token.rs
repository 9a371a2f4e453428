use serde_json::Value;

/// The fields we care about from an OAuth token-exchange response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderErrorFields {
    pub error: String,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenParseError {
    /// The provider returned an explicit error payload (often with HTTP 200).
    ProviderError(ProviderErrorFields),

    /// The body was parseable but did not contain an access token or a provider error.
    MissingAccessToken,

    /// The body could not be parsed as JSON or x-www-form-urlencoded.
    InvalidFormat,
}

impl std::fmt::Display for TokenParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenParseError::ProviderError(err) => {
                write!(f, "token exchange returned error '{}'", err.error)?;
                if let Some(desc) = &err.error_description {
                    if !desc.is_empty() {
                        write!(f, ": {desc}")?;
                    }
                }
                if let Some(uri) = &err.error_uri {
                    if !uri.is_empty() {
                        write!(f, " ({uri})")?;
                    }
                }
                Ok(())
            }
            TokenParseError::MissingAccessToken => {
                write!(f, "token exchange response missing access_token")
            }
            TokenParseError::InvalidFormat => {
                write!(f, "token exchange response had an unrecognized format")
            }
        }
    }
}

impl std::error::Error for TokenParseError {}

/// Parse an OAuth token exchange response body.
///
/// Supports JSON (preferred) and `application/x-www-form-urlencoded` bodies;
/// some providers still answer form-encoded, and several return error
/// payloads with HTTP 200.
///
/// This intentionally does **not** return the raw body on error to avoid
/// accidentally leaking tokens into logs.
pub fn parse_token_exchange_body(body: &str) -> Result<TokenExchangeResponse, TokenParseError> {
    // 1) JSON
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(tok) = v.get("access_token").and_then(|v| v.as_str()) {
            return Ok(TokenExchangeResponse {
                access_token: tok.to_string(),
                refresh_token: v
                    .get("refresh_token")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string()),
                expires_in: v.get("expires_in").and_then(expires_in_value),
            });
        }

        if let Some(err) = v.get("error").and_then(|v| v.as_str()) {
            let desc = v
                .get("error_description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let uri = v
                .get("error_uri")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            return Err(TokenParseError::ProviderError(ProviderErrorFields {
                error: err.to_string(),
                error_description: desc,
                error_uri: uri,
            }));
        }

        return Err(TokenParseError::MissingAccessToken);
    }

    // 2) x-www-form-urlencoded
    let pairs = parse_form_urlencoded(body);
    if !pairs.is_empty() {
        let mut response = TokenExchangeResponse::default();
        let mut err: Option<String> = None;
        let mut desc: Option<String> = None;
        let mut uri: Option<String> = None;

        for (k, v) in pairs {
            match k.as_str() {
                "access_token" => response.access_token = v,
                "refresh_token" => {
                    if !v.is_empty() {
                        response.refresh_token = Some(v);
                    }
                }
                "expires_in" => response.expires_in = v.parse::<i64>().ok(),
                "error" => err = Some(v),
                "error_description" => desc = Some(v),
                "error_uri" => uri = Some(v),
                _ => {}
            }
        }

        if !response.access_token.is_empty() {
            return Ok(response);
        }

        if let Some(err) = err {
            return Err(TokenParseError::ProviderError(ProviderErrorFields {
                error: err,
                error_description: desc,
                error_uri: uri,
            }));
        }

        return Err(TokenParseError::MissingAccessToken);
    }

    Err(TokenParseError::InvalidFormat)
}

/// Some providers report `expires_in` as a JSON number, others as a string.
fn expires_in_value(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn parse_form_urlencoded(body: &str) -> Vec<(String, String)> {
    // Very small parser: split by '&', then split each pair on the first '='.
    // Decode using `urlencoding`, which is designed for application/x-www-form-urlencoded.
    let mut out = Vec::new();

    // Fast check to avoid treating arbitrary strings as form bodies.
    if !body.contains('=') {
        return out;
    }

    for part in body.split('&') {
        if part.is_empty() {
            continue;
        }
        let (k, v) = match part.split_once('=') {
            Some((k, v)) => (k, v),
            None => (part, ""),
        };

        let k = urlencoding::decode(k)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| k.to_string());
        let v = urlencoding::decode(v)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| v.to_string());

        out.push((k, v));
    }

    out
}
