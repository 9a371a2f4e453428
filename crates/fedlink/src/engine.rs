use std::sync::Arc;

use fedlink_core::avatar::detect_image_format;
use fedlink_core::{ExternalProfile, FederationError};

use crate::collaborators::{AvatarStorage, LocalUser, LocalUserStore, OwnerRef, SessionService};
use crate::providers::IdProvider;
use crate::record::IdentityRecord;
use crate::store::IdentityStore;

/// Bounded recovery from concurrent first logins for the same provider
/// identity. Each retry re-reads the winner's record.
const MAX_CLAIM_ATTEMPTS: usize = 3;

/// Outcome of a reconciled callback.
#[derive(Debug, Clone)]
pub struct ReconciledLogin {
    pub user: LocalUser,
    pub record: IdentityRecord,
    /// Whether this login created the local user.
    pub created_user: bool,
    /// Opaque session token minted by the `SessionService`.
    pub session: String,
}

/// The callback reconciliation pipeline.
///
/// Everything environment-shaped is behind a collaborator trait, so the
/// pipeline itself is deterministic given the provider's responses:
/// exchange, link resolution, user resolution, attribute sync, avatar sync,
/// token persistence, session establishment.
pub struct ReconciliationEngine {
    store: Arc<dyn IdentityStore>,
    users: Arc<dyn LocalUserStore>,
    sessions: Arc<dyn SessionService>,
    avatars: Arc<dyn AvatarStorage>,
    http: reqwest::Client,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        users: Arc<dyn LocalUserStore>,
        sessions: Arc<dyn SessionService>,
        avatars: Arc<dyn AvatarStorage>,
        http: reqwest::Client,
    ) -> Self {
        ReconciliationEngine {
            store,
            users,
            sessions,
            avatars,
            http,
        }
    }

    /// Run the full reconciliation for an authorization callback.
    ///
    /// `callback_url` must be the exact redirect URI used for the
    /// authorization request; providers reject the code exchange otherwise.
    pub async fn handle_callback(
        &self,
        provider: &dyn IdProvider,
        realm: &str,
        callback_url: &str,
        code: &str,
    ) -> Result<ReconciledLogin, FederationError> {
        let profile = provider.exchange_code(&self.http, callback_url, code).await?;
        let policy = provider.policy();

        let (mut record, mut user, created_user) =
            self.resolve_link(provider, realm, &profile).await?;

        if policy.auto_update_user && !created_user {
            let attrs = provider.map_attributes(&profile);
            user.apply_attributes(&attrs);
            self.users.save(&user).await?;
        }

        if policy.sync_avatar {
            self.reconcile_avatar(provider, &profile, &mut record, &user.owner)
                .await;
        }

        let now = chrono::Utc::now().timestamp();
        record.update_tokens(
            profile.access_token.clone(),
            profile.usable_refresh_token().map(String::from),
            profile.expires_in.map(|secs| now + secs),
        );
        record.provider_data = Some(profile.raw.clone());
        let record = self.store.save(record).await?;

        let session = self.sessions.login(&user).await?;

        log::info!(
            "Reconciled '{}' login in realm '{}' for subject '{}' (created_user: {created_user})",
            provider.driver(),
            realm,
            profile.subject_id,
        );

        Ok(ReconciledLogin {
            user,
            record,
            created_user,
            session,
        })
    }

    /// Resolve the link record and its local user, creating either side as
    /// policy allows.
    ///
    /// First login for a new user claims the (realm, driver, subject) triple
    /// in storage before the user row is created; a lost race then surfaces
    /// as `ConstraintViolation` with no local user to orphan, and the loser
    /// re-reads the winner's record.
    async fn resolve_link(
        &self,
        provider: &dyn IdProvider,
        realm: &str,
        profile: &ExternalProfile,
    ) -> Result<(IdentityRecord, LocalUser, bool), FederationError> {
        let driver = provider.driver();

        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            if attempt > 0 {
                log::info!(
                    "Retrying link resolution for '{driver}' subject '{}' (attempt {})",
                    profile.subject_id,
                    attempt + 1,
                );
            }

            let existing = self
                .store
                .find_by_provider_identity(realm, driver, &profile.subject_id)
                .await?;

            let record = match existing {
                Some(record) => {
                    if let Some(owner) = record.owner.clone() {
                        return match self.users.resolve(&owner).await? {
                            Some(user) => Ok((record, user, false)),
                            None => Err(FederationError::storage(format!(
                                "link {} points at missing {} '{}'",
                                record.id, owner.kind, owner.id,
                            ))),
                        };
                    }
                    // Persisted but unlinked: a previous callback claimed the
                    // triple and crashed before linking. Finish the job.
                    record
                }
                None => IdentityRecord::new(realm, driver, &profile.subject_id),
            };

            match self.resolve_user(provider, realm, profile, record).await? {
                Some(resolved) => return Ok(resolved),
                // Lost a claim race; re-read the winner's record.
                None => continue,
            }
        }

        Err(FederationError::ConstraintViolation)
    }

    /// Attach an unlinked record to a local user. Returns `None` when a
    /// concurrent callback claimed the triple first.
    async fn resolve_user(
        &self,
        provider: &dyn IdProvider,
        realm: &str,
        profile: &ExternalProfile,
        mut record: IdentityRecord,
    ) -> Result<Option<(IdentityRecord, LocalUser, bool)>, FederationError> {
        let matched = match profile.email.as_deref() {
            Some(email) => self.users.find_by_email(realm, email).await?,
            None => None,
        };

        if let Some(user) = matched {
            record.link_to(user.owner.clone());
            return match self.store.save(record).await {
                Ok(saved) => Ok(Some((saved, user, false))),
                Err(FederationError::ConstraintViolation) => Ok(None),
                Err(e) => Err(e),
            };
        }

        if !provider.policy().auto_create_user {
            return Err(FederationError::LoginNotPermitted);
        }

        // Claim the triple before creating the user.
        let claimed = match self.store.save(record).await {
            Ok(saved) => saved,
            Err(FederationError::ConstraintViolation) => return Ok(None),
            Err(e) => return Err(e),
        };

        let attrs = provider.map_attributes(profile);
        let user = self.users.create(realm, &attrs).await?;

        let mut record = claimed;
        record.link_to(user.owner.clone());
        let saved = self.store.save(record).await?;

        Ok(Some((saved, user, true)))
    }

    /// Best-effort avatar sync. Skips the download entirely when the
    /// provider's change signal matches the stored hash; the hash only moves
    /// forward after the blob is stored.
    async fn reconcile_avatar(
        &self,
        provider: &dyn IdProvider,
        profile: &ExternalProfile,
        record: &mut IdentityRecord,
        owner: &OwnerRef,
    ) {
        let Some(fingerprint) = provider.avatar_fingerprint(&self.http, profile).await else {
            return;
        };

        if record.avatar_hash.as_deref() == Some(fingerprint.as_str()) {
            return;
        }

        let Some(bytes) = provider.fetch_avatar(&self.http, profile).await else {
            return;
        };

        let Some((_, mime)) = detect_image_format(&bytes) else {
            log::warn!(
                "Avatar for '{}' is not a recognized image format, skipping",
                provider.driver(),
            );
            return;
        };

        match self.avatars.store(owner, &bytes, mime).await {
            Ok(()) => record.avatar_hash = Some(fingerprint),
            Err(e) => log::warn!("Avatar store for '{}' failed: {e}", provider.driver()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use fedlink_core::mapping::{map_attributes, UserAttributes};
    use fedlink_core::ExternalProfile;

    use super::*;
    use crate::providers::ReconcilePolicy;

    struct StubProvider {
        profile: ExternalProfile,
        policy: ReconcilePolicy,
        fingerprint: Option<String>,
        avatar_bytes: Option<Vec<u8>>,
        fetch_calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(profile: ExternalProfile) -> Self {
            StubProvider {
                profile,
                policy: ReconcilePolicy {
                    auto_create_user: true,
                    auto_update_user: true,
                    sync_avatar: true,
                },
                fingerprint: None,
                avatar_bytes: None,
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdProvider for StubProvider {
        fn driver(&self) -> &str {
            "stub"
        }

        fn policy(&self) -> ReconcilePolicy {
            self.policy
        }

        fn authorization_url(&self, _: &str, _: &str) -> Result<String, FederationError> {
            Ok("http://idp/authorize".to_string())
        }

        async fn exchange_code(
            &self,
            _: &reqwest::Client,
            _: &str,
            _: &str,
        ) -> Result<ExternalProfile, FederationError> {
            Ok(self.profile.clone())
        }

        async fn avatar_fingerprint(
            &self,
            _: &reqwest::Client,
            _: &ExternalProfile,
        ) -> Option<String> {
            self.fingerprint.clone()
        }

        async fn fetch_avatar(&self, _: &reqwest::Client, _: &ExternalProfile) -> Option<Vec<u8>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.avatar_bytes.clone()
        }

        fn map_attributes(&self, profile: &ExternalProfile) -> UserAttributes {
            map_attributes(profile, None)
        }
    }

    #[derive(Default)]
    struct MemoryIdentityStore {
        records: Mutex<HashMap<(String, String, String), IdentityRecord>>,
        /// Simulates a concurrent winner: the Nth insert fails with
        /// `ConstraintViolation` after planting the winner's record.
        fail_insert_with_winner: Mutex<Option<IdentityRecord>>,
    }

    impl MemoryIdentityStore {
        fn key(record: &IdentityRecord) -> (String, String, String) {
            (
                record.realm.clone(),
                record.driver.clone(),
                record.provider_user_id.clone(),
            )
        }

        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl IdentityStore for MemoryIdentityStore {
        async fn find_by_provider_identity(
            &self,
            realm: &str,
            driver: &str,
            provider_user_id: &str,
        ) -> Result<Option<IdentityRecord>, FederationError> {
            let key = (
                realm.to_string(),
                driver.to_string(),
                provider_user_id.to_string(),
            );
            Ok(self.records.lock().unwrap().get(&key).cloned())
        }

        async fn save(&self, mut record: IdentityRecord) -> Result<IdentityRecord, FederationError> {
            if !record.persisted {
                if let Some(winner) = self.fail_insert_with_winner.lock().unwrap().take() {
                    self.records
                        .lock()
                        .unwrap()
                        .insert(Self::key(&winner), winner);
                    return Err(FederationError::ConstraintViolation);
                }

                let mut records = self.records.lock().unwrap();
                if records.contains_key(&Self::key(&record)) {
                    return Err(FederationError::ConstraintViolation);
                }
                record.persisted = true;
                records.insert(Self::key(&record), record.clone());
                return Ok(record);
            }

            self.records
                .lock()
                .unwrap()
                .insert(Self::key(&record), record.clone());
            Ok(record)
        }
    }

    #[derive(Default)]
    struct MemoryUserStore {
        users: Mutex<Vec<LocalUser>>,
        create_calls: AtomicUsize,
        save_calls: AtomicUsize,
    }

    impl MemoryUserStore {
        fn with_user(name: &str, email: &str) -> (Self, OwnerRef) {
            let owner = OwnerRef::new("users", "u-existing");
            let store = MemoryUserStore::default();
            store.users.lock().unwrap().push(LocalUser {
                owner: owner.clone(),
                name: Some(name.to_string()),
                email: Some(email.to_string()),
            });
            (store, owner)
        }

        fn len(&self) -> usize {
            self.users.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LocalUserStore for MemoryUserStore {
        async fn resolve(&self, owner: &OwnerRef) -> Result<Option<LocalUser>, FederationError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| &u.owner == owner)
                .cloned())
        }

        async fn find_by_email(
            &self,
            _realm: &str,
            email: &str,
        ) -> Result<Option<LocalUser>, FederationError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email.as_deref() == Some(email))
                .cloned())
        }

        async fn create(
            &self,
            _realm: &str,
            attrs: &UserAttributes,
        ) -> Result<LocalUser, FederationError> {
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
            let user = LocalUser {
                owner: OwnerRef::new("users", &format!("u-{n}")),
                name: attrs.get("name").cloned(),
                email: attrs.get("email").cloned(),
            };
            self.users.lock().unwrap().push(user.clone());
            Ok(user)
        }

        async fn save(&self, user: &LocalUser) -> Result<(), FederationError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            let mut users = self.users.lock().unwrap();
            if let Some(slot) = users.iter_mut().find(|u| u.owner == user.owner) {
                *slot = user.clone();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubSessions {
        logins: AtomicUsize,
    }

    #[async_trait]
    impl SessionService for StubSessions {
        async fn login(&self, _: &LocalUser) -> Result<String, FederationError> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sess-{n}"))
        }
    }

    #[derive(Default)]
    struct MemoryAvatars {
        stored: Mutex<Vec<(OwnerRef, String)>>,
    }

    #[async_trait]
    impl AvatarStorage for MemoryAvatars {
        async fn store(
            &self,
            owner: &OwnerRef,
            _bytes: &[u8],
            mime: &str,
        ) -> Result<(), FederationError> {
            self.stored
                .lock()
                .unwrap()
                .push((owner.clone(), mime.to_string()));
            Ok(())
        }
    }

    fn profile(subject: &str, email: Option<&str>) -> ExternalProfile {
        ExternalProfile {
            subject_id: subject.to_string(),
            name: Some("Ada".to_string()),
            email: email.map(String::from),
            avatar_url: None,
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expires_in: Some(3600),
            raw: json!({"sub": subject}),
        }
    }

    struct Harness {
        store: Arc<MemoryIdentityStore>,
        users: Arc<MemoryUserStore>,
        sessions: Arc<StubSessions>,
        avatars: Arc<MemoryAvatars>,
        engine: ReconciliationEngine,
    }

    fn harness(users: MemoryUserStore) -> Harness {
        harness_with_store(users, MemoryIdentityStore::default())
    }

    fn harness_with_store(users: MemoryUserStore, store: MemoryIdentityStore) -> Harness {
        let store = Arc::new(store);
        let users = Arc::new(users);
        let sessions = Arc::new(StubSessions::default());
        let avatars = Arc::new(MemoryAvatars::default());

        let engine = ReconciliationEngine::new(
            store.clone(),
            users.clone(),
            sessions.clone(),
            avatars.clone(),
            reqwest::Client::new(),
        );

        Harness {
            store,
            users,
            sessions,
            avatars,
            engine,
        }
    }

    #[tokio::test]
    async fn first_login_creates_and_links_user() {
        let h = harness(MemoryUserStore::default());
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert!(login.created_user);
        assert_eq!(login.user.email.as_deref(), Some("a@x.com"));
        assert_eq!(login.record.owner.as_ref(), Some(&login.user.owner));
        assert_eq!(login.record.access_token.as_deref(), Some("at-1"));
        assert_eq!(login.session, "sess-0");
        assert_eq!(h.users.len(), 1);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn existing_email_user_is_attached_not_duplicated() {
        let (users, owner) = MemoryUserStore::with_user("Ada", "a@x.com");
        let h = harness(users);
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert!(!login.created_user);
        assert_eq!(login.user.owner, owner);
        assert_eq!(h.users.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.users.len(), 1);
    }

    #[tokio::test]
    async fn repeat_login_reuses_the_link() {
        let h = harness(MemoryUserStore::default());
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        let first = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();
        let second = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert!(first.created_user);
        assert!(!second.created_user);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(first.user.owner, second.user.owner);
        assert_eq!(h.users.len(), 1);
        assert_eq!(h.store.len(), 1);
        // Each callback mints a fresh session.
        assert_ne!(first.session, second.session);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected_when_auto_create_is_off() {
        let h = harness(MemoryUserStore::default());
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.policy.auto_create_user = false;

        let err = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap_err();

        assert_eq!(err, FederationError::LoginNotPermitted);
        assert_eq!(h.users.len(), 0);
        // Rejection leaves no claimed triple behind.
        assert_eq!(h.store.len(), 0);
        assert_eq!(h.sessions.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn profile_without_email_still_creates_when_allowed() {
        let h = harness(MemoryUserStore::default());
        let provider = StubProvider::new(profile("g-1", None));

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert!(login.created_user);
        assert_eq!(login.user.email, None);
        assert_eq!(login.user.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn refresh_token_survives_exchange_without_one() {
        let h = harness(MemoryUserStore::default());

        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        h.engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        let mut renewed = profile("g-1", Some("a@x.com"));
        renewed.access_token = "at-2".to_string();
        renewed.refresh_token = None;
        let provider = StubProvider::new(renewed);

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert_eq!(login.record.access_token.as_deref(), Some("at-2"));
        assert_eq!(login.record.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn attributes_sync_on_repeat_login() {
        let (users, owner) = MemoryUserStore::with_user("Old Name", "a@x.com");
        let h = harness(users);
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        h.engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        let user = h.users.resolve(&owner).await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn attributes_frozen_when_auto_update_is_off() {
        let (users, owner) = MemoryUserStore::with_user("Old Name", "a@x.com");
        let h = harness(users);
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.policy.auto_update_user = false;

        h.engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        let user = h.users.resolve(&owner).await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Old Name"));
        assert_eq!(h.users.save_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn avatar_downloads_once_per_fingerprint() {
        let h = harness(MemoryUserStore::default());
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.fingerprint = Some("fp-1".to_string());
        provider.avatar_bytes = Some(vec![0xFF, 0xD8, 0xFF, 0xE0]);

        let first = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();
        let second = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert_eq!(first.record.avatar_hash.as_deref(), Some("fp-1"));
        assert_eq!(second.record.avatar_hash.as_deref(), Some("fp-1"));
        assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 1);

        let stored = h.avatars.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, "image/jpeg");
    }

    #[tokio::test]
    async fn changed_fingerprint_triggers_a_fresh_download() {
        let h = harness(MemoryUserStore::default());
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.fingerprint = Some("fp-1".to_string());
        provider.avatar_bytes = Some(vec![0xFF, 0xD8, 0xFF, 0xE0]);

        h.engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        provider.fingerprint = Some("fp-2".to_string());
        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert_eq!(login.record.avatar_hash.as_deref(), Some("fp-2"));
        assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn avatar_failure_never_blocks_login() {
        let h = harness(MemoryUserStore::default());
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.fingerprint = Some("fp-1".to_string());
        provider.avatar_bytes = None;

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        // Hash is only advanced after a successful store, so the next login
        // retries the download.
        assert_eq!(login.record.avatar_hash, None);
        assert_eq!(login.session, "sess-0");
    }

    #[tokio::test]
    async fn unrecognized_avatar_bytes_are_not_stored() {
        let h = harness(MemoryUserStore::default());
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.fingerprint = Some("fp-1".to_string());
        provider.avatar_bytes = Some(b"<html>error page</html>".to_vec());

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert_eq!(login.record.avatar_hash, None);
        assert!(h.avatars.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_skipped_when_sync_is_off() {
        let h = harness(MemoryUserStore::default());
        let mut provider = StubProvider::new(profile("g-1", Some("a@x.com")));
        provider.policy.sync_avatar = false;
        provider.fingerprint = Some("fp-1".to_string());
        provider.avatar_bytes = Some(vec![0xFF, 0xD8, 0xFF, 0xE0]);

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert_eq!(login.record.avatar_hash, None);
        assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lost_claim_race_attaches_to_the_winner() {
        let store = MemoryIdentityStore::default();

        // The winner's record, linked to the user the winner created.
        let mut winner = IdentityRecord::new("web", "stub", "g-1");
        winner.link_to(OwnerRef::new("users", "u-winner"));
        winner.persisted = true;

        *store.fail_insert_with_winner.lock().unwrap() = Some(winner);

        let users = MemoryUserStore::default();
        users.users.lock().unwrap().push(LocalUser {
            owner: OwnerRef::new("users", "u-winner"),
            name: Some("Ada".to_string()),
            email: Some("a@x.com".to_string()),
        });

        let h = harness_with_store(users, store);
        // No email match, so the loser goes down the claim-then-create path.
        let provider = StubProvider::new(profile("g-1", None));

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert!(!login.created_user);
        assert_eq!(login.user.owner.id, "u-winner");
        // The loser never created a user of its own.
        assert_eq!(h.users.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.users.len(), 1);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn interrupted_claim_is_finished_on_next_login() {
        let store = MemoryIdentityStore::default();

        // A claim that crashed before linking: persisted, no owner.
        let mut orphaned = IdentityRecord::new("web", "stub", "g-1");
        orphaned.persisted = true;
        store
            .records
            .lock()
            .unwrap()
            .insert(MemoryIdentityStore::key(&orphaned), orphaned.clone());

        let h = harness_with_store(MemoryUserStore::default(), store);
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert!(login.created_user);
        assert_eq!(login.record.id, orphaned.id);
        assert!(login.record.owner.is_some());
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn dangling_owner_is_a_storage_error() {
        let store = MemoryIdentityStore::default();

        let mut dangling = IdentityRecord::new("web", "stub", "g-1");
        dangling.link_to(OwnerRef::new("users", "u-gone"));
        dangling.persisted = true;
        store
            .records
            .lock()
            .unwrap()
            .insert(MemoryIdentityStore::key(&dangling), dangling);

        let h = harness_with_store(MemoryUserStore::default(), store);
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        let err = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::Storage(_)));
    }

    #[tokio::test]
    async fn realms_do_not_share_links() {
        let h = harness(MemoryUserStore::default());
        let provider = StubProvider::new(profile("g-1", None));

        let web = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();
        let admin = h
            .engine
            .handle_callback(&provider, "admin", "http://cb", "code")
            .await
            .unwrap();

        assert!(web.created_user);
        assert!(admin.created_user);
        assert_ne!(web.record.id, admin.record.id);
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn provider_payload_and_expiry_are_persisted() {
        let h = harness(MemoryUserStore::default());
        let provider = StubProvider::new(profile("g-1", Some("a@x.com")));

        let before = chrono::Utc::now().timestamp();
        let login = h
            .engine
            .handle_callback(&provider, "web", "http://cb", "code")
            .await
            .unwrap();

        assert_eq!(login.record.provider_data, Some(json!({"sub": "g-1"})));
        let expires_at = login.record.access_token_expires_at.unwrap();
        assert!(expires_at >= before + 3600);
    }
}
