use async_trait::async_trait;
use serde_json::Value;

use fedlink_core::avatar::source_fingerprint;
use fedlink_core::mapping::{map_attributes, AttributeMapper, UserAttributes};
use fedlink_core::token::{parse_token_exchange_body, TokenParseError};
use fedlink_core::{ExternalProfile, FederationError};

use super::{merge_scopes, IdProvider, ProviderCredentials, ReconcilePolicy};

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// Google identity provider (Workspace / Google Cloud Identity).
///
/// Supports restricting sign-in to one hosted domain via the `hd` parameter
/// and requests offline access so a refresh token is granted on first
/// consent.
pub struct GoogleProvider {
    credentials: ProviderCredentials,
    scopes: Vec<String>,
    hosted_domain: Option<String>,
    policy: ReconcilePolicy,
    mapper: Option<AttributeMapper>,
}

impl GoogleProvider {
    pub fn builder() -> GoogleProviderBuilder {
        GoogleProviderBuilder::default()
    }
}

#[derive(Default)]
pub struct GoogleProviderBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    scopes: Vec<String>,
    hosted_domain: Option<String>,
    policy: ReconcilePolicy,
    mapper: Option<AttributeMapper>,
}

impl GoogleProviderBuilder {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Fill client id/secret from the realm configuration source; explicit
    /// setters keep precedence.
    pub fn credentials_from(
        mut self,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        if self.client_id.is_none() {
            self.client_id = client_id;
        }
        if self.client_secret.is_none() {
            self.client_secret = client_secret;
        }
        self
    }

    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Restrict sign-in to one Workspace domain (e.g. "example.com").
    pub fn hosted_domain(mut self, domain: impl Into<String>) -> Self {
        self.hosted_domain = Some(domain.into());
        self
    }

    pub fn auto_create_user(mut self, value: bool) -> Self {
        self.policy.auto_create_user = value;
        self
    }

    pub fn auto_update_user(mut self, value: bool) -> Self {
        self.policy.auto_update_user = value;
        self
    }

    pub fn sync_avatar(mut self, value: bool) -> Self {
        self.policy.sync_avatar = value;
        self
    }

    pub fn map_user_attributes(mut self, mapper: AttributeMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn build(self) -> Result<GoogleProvider, FederationError> {
        let credentials = ProviderCredentials::resolve(
            "google",
            self.client_id,
            self.client_secret,
            None,
            None,
        )?;

        Ok(GoogleProvider {
            credentials,
            scopes: self.scopes,
            hosted_domain: self.hosted_domain,
            policy: self.policy,
            mapper: self.mapper,
        })
    }
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("credentials", &self.credentials)
            .field("scopes", &self.scopes)
            .field("hosted_domain", &self.hosted_domain)
            .field("policy", &self.policy)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

#[async_trait]
impl IdProvider for GoogleProvider {
    fn driver(&self) -> &str {
        "google"
    }

    fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    fn authorization_url(
        &self,
        callback_url: &str,
        state: &str,
    ) -> Result<String, FederationError> {
        let scope = merge_scopes(DEFAULT_SCOPES, &self.scopes);

        let mut url = format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt={}&state={}",
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(callback_url),
            urlencoding::encode(&scope),
            urlencoding::encode("consent select_account"),
            urlencoding::encode(state),
        );

        if let Some(hd) = &self.hosted_domain {
            url.push_str("&hd=");
            url.push_str(&urlencoding::encode(hd));
        }

        Ok(url)
    }

    async fn exchange_code(
        &self,
        http: &reqwest::Client,
        callback_url: &str,
        code: &str,
    ) -> Result<ExternalProfile, FederationError> {
        let token_resp = http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", callback_url),
            ])
            .send()
            .await
            .map_err(|e| FederationError::exchange("google", format!("token request: {e}")))?;

        let status = token_resp.status();
        let body = token_resp
            .text()
            .await
            .map_err(|e| FederationError::exchange("google", format!("token response: {e}")))?;

        let tokens = parse_token_exchange_body(&body).map_err(|e| match e {
            TokenParseError::ProviderError(_) => FederationError::exchange("google", e),
            other => FederationError::exchange("google", format!("status {status}: {other}")),
        })?;

        let userinfo = http
            .get(USERINFO_URL)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| FederationError::exchange("google", format!("userinfo request: {e}")))?;

        let userinfo_status = userinfo.status();
        if !userinfo_status.is_success() {
            return Err(FederationError::exchange(
                "google",
                format!("userinfo returned {userinfo_status}"),
            ));
        }

        let raw: Value = userinfo
            .json()
            .await
            .map_err(|e| FederationError::exchange("google", format!("userinfo body: {e}")))?;

        let subject_id = raw
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FederationError::exchange("google", "no subject id in userinfo"))?
            .to_string();

        Ok(ExternalProfile {
            subject_id,
            name: raw.get("name").and_then(|v| v.as_str()).map(String::from),
            email: raw.get("email").and_then(|v| v.as_str()).map(String::from),
            avatar_url: raw
                .get("picture")
                .and_then(|v| v.as_str())
                .map(String::from),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            raw,
        })
    }

    async fn avatar_fingerprint(
        &self,
        _http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<String> {
        // Google exposes no change signal beyond the URL itself.
        profile
            .avatar_url
            .as_deref()
            .map(source_fingerprint)
    }

    async fn fetch_avatar(
        &self,
        http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<Vec<u8>> {
        let url = profile.avatar_url.as_deref()?;

        // Ask for a higher resolution than the default thumbnail.
        let url = url.replace("=s96-c", "=s400-c");

        let resp = match http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Google avatar fetch failed: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            log::warn!("Google avatar fetch returned {}", resp.status());
            return None;
        }

        match resp.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                log::warn!("Google avatar body read failed: {e}");
                None
            }
        }
    }

    fn map_attributes(&self, profile: &ExternalProfile) -> UserAttributes {
        map_attributes(profile, self.mapper.as_ref())
    }
}
