use async_trait::async_trait;
use serde_json::Value;

use fedlink_core::avatar::source_fingerprint;
use fedlink_core::mapping::{map_attributes, AttributeMapper, UserAttributes};
use fedlink_core::token::{parse_token_exchange_body, TokenParseError};
use fedlink_core::{ExternalProfile, FederationError};

use super::{merge_scopes, IdProvider, ProviderCredentials, ReconcilePolicy};

const GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";
const GRAPH_PHOTO_META_URL: &str = "https://graph.microsoft.com/v1.0/me/photo";
const GRAPH_PHOTO_DATA_URL: &str = "https://graph.microsoft.com/v1.0/me/photo/$value";

const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access", "User.Read"];

/// Microsoft Entra ID provider (driver "azure").
///
/// Tenant-scoped: "common", "organizations", "consumers", or a tenant GUID.
/// Profile and avatar come from Microsoft Graph; the avatar change signal is
/// the photo metadata ETag, so dedup reacts to actual image changes.
pub struct EntraProvider {
    credentials: ProviderCredentials,
    tenant: String,
    scopes: Vec<String>,
    policy: ReconcilePolicy,
    mapper: Option<AttributeMapper>,
}

impl EntraProvider {
    pub fn builder() -> EntraProviderBuilder {
        EntraProviderBuilder::default()
    }

    fn authorize_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
            self.tenant
        )
    }

    fn token_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant
        )
    }
}

pub struct EntraProviderBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    tenant: String,
    scopes: Vec<String>,
    policy: ReconcilePolicy,
    mapper: Option<AttributeMapper>,
}

impl Default for EntraProviderBuilder {
    fn default() -> Self {
        EntraProviderBuilder {
            client_id: None,
            client_secret: None,
            tenant: "common".to_string(),
            scopes: Vec::new(),
            policy: ReconcilePolicy::default(),
            mapper: None,
        }
    }
}

impl EntraProviderBuilder {
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

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        if !tenant.trim().is_empty() {
            self.tenant = tenant.trim().to_string();
        }
        self
    }

    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
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

    pub fn build(self) -> Result<EntraProvider, FederationError> {
        let credentials = ProviderCredentials::resolve(
            "azure",
            self.client_id,
            self.client_secret,
            None,
            None,
        )?;

        Ok(EntraProvider {
            credentials,
            tenant: self.tenant,
            scopes: self.scopes,
            policy: self.policy,
            mapper: self.mapper,
        })
    }
}

impl std::fmt::Debug for EntraProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntraProvider")
            .field("credentials", &self.credentials)
            .field("tenant", &self.tenant)
            .field("scopes", &self.scopes)
            .field("policy", &self.policy)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

#[async_trait]
impl IdProvider for EntraProvider {
    fn driver(&self) -> &str {
        "azure"
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

        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&response_mode=query&scope={}&prompt=select_account&state={}",
            self.authorize_endpoint(),
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(callback_url),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        ))
    }

    async fn exchange_code(
        &self,
        http: &reqwest::Client,
        callback_url: &str,
        code: &str,
    ) -> Result<ExternalProfile, FederationError> {
        let scope = merge_scopes(DEFAULT_SCOPES, &self.scopes);

        let token_resp = http
            .post(self.token_endpoint())
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", callback_url),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FederationError::exchange("azure", format!("token request: {e}")))?;

        let status = token_resp.status();
        let body = token_resp
            .text()
            .await
            .map_err(|e| FederationError::exchange("azure", format!("token response: {e}")))?;

        let tokens = parse_token_exchange_body(&body).map_err(|e| match e {
            TokenParseError::ProviderError(_) => FederationError::exchange("azure", e),
            other => FederationError::exchange("azure", format!("status {status}: {other}")),
        })?;

        let me_resp = http
            .get(GRAPH_ME_URL)
            .header("Accept", "application/json")
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| FederationError::exchange("azure", format!("profile request: {e}")))?;

        let me_status = me_resp.status();
        if !me_status.is_success() {
            return Err(FederationError::exchange(
                "azure",
                format!("profile fetch returned {me_status}"),
            ));
        }

        let raw: Value = me_resp
            .json()
            .await
            .map_err(|e| FederationError::exchange("azure", format!("profile body: {e}")))?;

        let subject_id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FederationError::exchange("azure", "no subject id in profile"))?
            .to_string();

        let email = raw
            .get("mail")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                raw.get("userPrincipalName")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
            })
            .map(String::from);

        Ok(ExternalProfile {
            subject_id,
            name: raw
                .get("displayName")
                .and_then(|v| v.as_str())
                .map(String::from),
            email,
            // Graph photos have no public URL; avatar access goes through
            // the authenticated photo endpoints below.
            avatar_url: None,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            raw,
        })
    }

    async fn avatar_fingerprint(
        &self,
        http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<String> {
        let resp = match http
            .get(GRAPH_PHOTO_META_URL)
            .header("Accept", "application/json")
            .bearer_auth(&profile.access_token)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Graph photo metadata request failed: {e}");
                return None;
            }
        };

        // 404 simply means the account has no photo.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return None;
        }
        if !resp.status().is_success() {
            log::warn!("Graph photo metadata returned {}", resp.status());
            return None;
        }

        let meta: Value = match resp.json().await {
            Ok(meta) => meta,
            Err(e) => {
                log::warn!("Graph photo metadata body failed: {e}");
                return None;
            }
        };

        meta.get("@odata.mediaEtag")
            .and_then(|v| v.as_str())
            .filter(|etag| !etag.is_empty())
            .map(source_fingerprint)
    }

    async fn fetch_avatar(
        &self,
        http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<Vec<u8>> {
        let resp = match http
            .get(GRAPH_PHOTO_DATA_URL)
            .bearer_auth(&profile.access_token)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Graph photo fetch failed: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            log::warn!("Graph photo fetch returned {}", resp.status());
            return None;
        }

        match resp.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                log::warn!("Graph photo body read failed: {e}");
                None
            }
        }
    }

    fn map_attributes(&self, profile: &ExternalProfile) -> UserAttributes {
        map_attributes(profile, self.mapper.as_ref())
    }
}
