use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use moka::sync::Cache;
use rand::RngCore;

use fedlink_core::FederationError;

use crate::collaborators::{LocalUser, SessionService};

/// In-process session service backed by a TTL cache.
///
/// Tokens are opaque 256-bit random values; there is nothing to decode or
/// verify, possession is the whole credential. Sessions do not survive a
/// restart, which is acceptable for a single-node deployment; hosts needing
/// shared or durable sessions supply their own `SessionService`.
pub struct CacheSessionService {
    sessions: Cache<String, LocalUser>,
}

impl CacheSessionService {
    pub fn new(ttl_seconds: u64) -> Self {
        CacheSessionService {
            sessions: Cache::builder()
                .time_to_live(Duration::from_secs(ttl_seconds))
                .build(),
        }
    }

    /// Look a session token back up, e.g. for the whoami endpoint.
    pub fn resolve(&self, token: &str) -> Option<LocalUser> {
        self.sessions.get(token)
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.invalidate(token);
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[async_trait]
impl SessionService for CacheSessionService {
    async fn login(&self, user: &LocalUser) -> Result<String, FederationError> {
        let token = Self::generate_token();
        self.sessions.insert(token.clone(), user.clone());
        Ok(token)
    }
}
