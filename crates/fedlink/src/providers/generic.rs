use async_trait::async_trait;
use serde_json::Value;

use fedlink_core::avatar::source_fingerprint;
use fedlink_core::mapping::{map_attributes, AttributeMapper, UserAttributes};
use fedlink_core::token::{parse_token_exchange_body, TokenParseError};
use fedlink_core::{ExternalProfile, FederationError};

use super::{merge_scopes, IdProvider, ProviderCredentials, ReconcilePolicy};

const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// Catch-all adapter for any standard OAuth2/OIDC provider.
///
/// Endpoints and the userinfo field names are configurable, so providers
/// without a dedicated adapter (Okta, Keycloak, GitLab, ...) can be wired
/// up from configuration alone.
pub struct GenericProvider {
    driver: String,
    credentials: ProviderCredentials,
    authorize_url: String,
    token_url: String,
    userinfo_url: String,
    scopes: Vec<String>,
    extra_params: Vec<(String, String)>,
    subject_field: String,
    name_field: String,
    email_field: String,
    avatar_field: String,
    policy: ReconcilePolicy,
    mapper: Option<AttributeMapper>,
}

impl GenericProvider {
    pub fn builder(driver: impl Into<String>) -> GenericProviderBuilder {
        GenericProviderBuilder {
            driver: driver.into(),
            client_id: None,
            client_secret: None,
            authorize_url: None,
            token_url: None,
            userinfo_url: None,
            scopes: Vec::new(),
            extra_params: Vec::new(),
            subject_field: "sub".to_string(),
            name_field: "name".to_string(),
            email_field: "email".to_string(),
            avatar_field: "picture".to_string(),
            policy: ReconcilePolicy::default(),
            mapper: None,
        }
    }
}

pub struct GenericProviderBuilder {
    driver: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    authorize_url: Option<String>,
    token_url: Option<String>,
    userinfo_url: Option<String>,
    scopes: Vec<String>,
    extra_params: Vec<(String, String)>,
    subject_field: String,
    name_field: String,
    email_field: String,
    avatar_field: String,
    policy: ReconcilePolicy,
    mapper: Option<AttributeMapper>,
}

impl GenericProviderBuilder {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        userinfo_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = Some(authorize_url.into());
        self.token_url = Some(token_url.into());
        self.userinfo_url = Some(userinfo_url.into());
        self
    }

    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Extra authorization-request parameters (e.g. `audience`, `prompt`).
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    /// Override the userinfo JSON field names.
    pub fn profile_fields(
        mut self,
        subject: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        avatar: impl Into<String>,
    ) -> Self {
        self.subject_field = subject.into();
        self.name_field = name.into();
        self.email_field = email.into();
        self.avatar_field = avatar.into();
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

    pub fn build(self) -> Result<GenericProvider, FederationError> {
        let credentials = ProviderCredentials::resolve(
            &self.driver,
            self.client_id,
            self.client_secret,
            None,
            None,
        )?;

        let misconfigured = |missing: &str| FederationError::MisconfiguredProvider {
            driver: self.driver.clone(),
            missing: missing.to_string(),
        };

        Ok(GenericProvider {
            credentials,
            authorize_url: self.authorize_url.ok_or_else(|| misconfigured("authorize URL"))?,
            token_url: self.token_url.ok_or_else(|| misconfigured("token URL"))?,
            userinfo_url: self.userinfo_url.ok_or_else(|| misconfigured("userinfo URL"))?,
            driver: self.driver,
            scopes: self.scopes,
            extra_params: self.extra_params,
            subject_field: self.subject_field,
            name_field: self.name_field,
            email_field: self.email_field,
            avatar_field: self.avatar_field,
            policy: self.policy,
            mapper: self.mapper,
        })
    }
}

/// Subject ids come back as strings from most providers and numbers from a
/// few (GitHub-style APIs).
fn field_as_string(raw: &Value, field: &str) -> Option<String> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl std::fmt::Debug for GenericProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericProvider")
            .field("driver", &self.driver)
            .field("credentials", &self.credentials)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("scopes", &self.scopes)
            .field("extra_params", &self.extra_params)
            .field("subject_field", &self.subject_field)
            .field("name_field", &self.name_field)
            .field("email_field", &self.email_field)
            .field("avatar_field", &self.avatar_field)
            .field("policy", &self.policy)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

#[async_trait]
impl IdProvider for GenericProvider {
    fn driver(&self) -> &str {
        &self.driver
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
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(callback_url),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        );

        for (key, value) in &self.extra_params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        Ok(url)
    }

    async fn exchange_code(
        &self,
        http: &reqwest::Client,
        callback_url: &str,
        code: &str,
    ) -> Result<ExternalProfile, FederationError> {
        let driver = self.driver.clone();

        let token_resp = http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", callback_url),
            ])
            .send()
            .await
            .map_err(|e| FederationError::exchange(&driver, format!("token request: {e}")))?;

        let status = token_resp.status();
        let body = token_resp
            .text()
            .await
            .map_err(|e| FederationError::exchange(&driver, format!("token response: {e}")))?;

        let tokens = parse_token_exchange_body(&body).map_err(|e| match e {
            TokenParseError::ProviderError(_) => FederationError::exchange(&driver, e),
            other => FederationError::exchange(&driver, format!("status {status}: {other}")),
        })?;

        let userinfo = http
            .get(&self.userinfo_url)
            .header("Accept", "application/json")
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| FederationError::exchange(&driver, format!("userinfo request: {e}")))?;

        let userinfo_status = userinfo.status();
        if !userinfo_status.is_success() {
            return Err(FederationError::exchange(
                &driver,
                format!("userinfo returned {userinfo_status}"),
            ));
        }

        let raw: Value = userinfo
            .json()
            .await
            .map_err(|e| FederationError::exchange(&driver, format!("userinfo body: {e}")))?;

        let subject_id = field_as_string(&raw, &self.subject_field).ok_or_else(|| {
            FederationError::exchange(&driver, format!("no '{}' in userinfo", self.subject_field))
        })?;

        Ok(ExternalProfile {
            subject_id,
            name: field_as_string(&raw, &self.name_field),
            email: field_as_string(&raw, &self.email_field),
            avatar_url: field_as_string(&raw, &self.avatar_field),
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
        profile.avatar_url.as_deref().map(source_fingerprint)
    }

    async fn fetch_avatar(
        &self,
        http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<Vec<u8>> {
        let url = profile.avatar_url.as_deref()?;

        let resp = match http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Avatar fetch for '{}' failed: {e}", self.driver);
                return None;
            }
        };

        if !resp.status().is_success() {
            log::warn!("Avatar fetch for '{}' returned {}", self.driver, resp.status());
            return None;
        }

        match resp.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                log::warn!("Avatar body read for '{}' failed: {e}", self.driver);
                None
            }
        }
    }

    fn map_attributes(&self, profile: &ExternalProfile) -> UserAttributes {
        map_attributes(profile, self.mapper.as_ref())
    }
}
