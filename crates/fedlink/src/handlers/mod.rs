use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use uuid::Uuid;

use fedlink_core::FederationError;

use crate::app_state::AppState;
use crate::models::{CallbackQuery, ErrorResponse, LoginState, ProvidersResponse, SessionInfoResponse};

pub const SESSION_COOKIE: &str = "fedlink_session";

/// GET /auth/{realm}/{driver}/redirect
///
/// Issues the opaque `state` value, remembers which (realm, driver) it
/// belongs to, and sends the browser to the provider.
pub async fn redirect(
    app_state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (realm, driver) = path.into_inner();

    let provider = match app_state.registry.resolve(&realm, &driver) {
        Ok(provider) => provider,
        Err(e) => return federation_error_response(e),
    };

    let state = Uuid::new_v4().to_string();
    app_state.login_states.insert(
        state.clone(),
        LoginState {
            realm: realm.clone(),
            driver: driver.clone(),
        },
    );

    let callback_url = app_state.callback_url(&realm, &driver);
    match provider.authorization_url(&callback_url, &state) {
        Ok(url) => HttpResponse::Found()
            .insert_header(("Location", url))
            .finish(),
        Err(e) => federation_error_response(e),
    }
}

/// GET /auth/{realm}/{driver}/callback
///
/// Validates and consumes the `state`, runs the reconciliation pipeline,
/// sets the session cookie, and redirects to the post-login URL.
pub async fn callback(
    app_state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<CallbackQuery>,
) -> impl Responder {
    let (realm, driver) = path.into_inner();

    if let Some(error) = &query.error {
        log::warn!(
            "Provider '{driver}' returned callback error '{error}': {}",
            query.error_description.as_deref().unwrap_or("no description"),
        );
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "authorization_denied".to_string(),
            message: format!("the provider denied the authorization: {error}"),
        });
    }

    let (Some(code), Some(state)) = (&query.code, &query.state) else {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "invalid_callback".to_string(),
            message: "missing code or state parameter".to_string(),
        });
    };

    // Single use: `remove` takes the entry atomically, so of two concurrent
    // callbacks replaying the same state at most one passes validation.
    let login_state = app_state.login_states.remove(state);

    match login_state {
        Some(ls) if ls.realm == realm && ls.driver == driver => {}
        _ => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "invalid_state".to_string(),
                message: "unknown or expired state parameter".to_string(),
            });
        }
    }

    let provider = match app_state.registry.resolve(&realm, &driver) {
        Ok(provider) => provider,
        Err(e) => return federation_error_response(e),
    };

    let callback_url = app_state.callback_url(&realm, &driver);
    let login = match app_state
        .engine
        .handle_callback(provider.as_ref(), &realm, &callback_url, code)
        .await
    {
        Ok(login) => login,
        Err(e) => return federation_error_response(e),
    };

    let cookie = Cookie::build(SESSION_COOKIE, login.session)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();

    HttpResponse::Found()
        .cookie(cookie)
        .insert_header(("Location", app_state.post_login_url.clone()))
        .finish()
}

/// GET /auth/{realm}/providers
pub async fn providers(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let realm = path.into_inner();
    let drivers = app_state.registry.drivers(&realm);

    HttpResponse::Ok().json(ProvidersResponse { realm, drivers })
}

/// GET /auth/me
pub async fn me(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let Some(cookie) = req.cookie(SESSION_COOKIE) else {
        return unauthorized();
    };

    match app_state.sessions.resolve(cookie.value()) {
        Some(user) => HttpResponse::Ok().json(SessionInfoResponse {
            kind: user.owner.kind,
            id: user.owner.id,
            name: user.name,
            email: user.email,
        }),
        None => unauthorized(),
    }
}

/// POST /auth/logout
pub async fn logout(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        app_state.sessions.revoke(cookie.value());
    }

    let mut expired = Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();
    expired.make_removal();

    HttpResponse::Ok().cookie(expired).finish()
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(ErrorResponse {
        error: "unauthorized".to_string(),
        message: "no valid session".to_string(),
    })
}

/// One status code per terminal reconciliation state.
fn federation_error_response(err: FederationError) -> HttpResponse {
    match &err {
        FederationError::UnknownProvider { .. } => HttpResponse::NotFound().json(ErrorResponse {
            error: "provider_not_found".to_string(),
            message: err.to_string(),
        }),
        FederationError::LoginNotPermitted => HttpResponse::Forbidden().json(ErrorResponse {
            error: "login_not_permitted".to_string(),
            message: err.to_string(),
        }),
        FederationError::ExchangeFailed { .. } => {
            log::error!("Authorization exchange failed: {err}");
            HttpResponse::BadGateway().json(ErrorResponse {
                error: "exchange_failed".to_string(),
                message: err.to_string(),
            })
        }
        FederationError::MisconfiguredProvider { .. } => {
            log::error!("Provider misconfiguration reached a request: {err}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "provider_misconfigured".to_string(),
                message: err.to_string(),
            })
        }
        FederationError::ConstraintViolation | FederationError::Storage(_) => {
            log::error!("Reconciliation failed: {err}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "reconciliation_failed".to_string(),
                message: "could not reconcile the federated identity".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use moka::sync::Cache;

    use fedlink_core::mapping::UserAttributes;

    use super::*;
    use crate::avatar_store::FsAvatarStorage;
    use crate::collaborators::{LocalUser, LocalUserStore, OwnerRef, SessionService};
    use crate::engine::ReconciliationEngine;
    use crate::providers::{GoogleProvider, IdProvider};
    use crate::record::IdentityRecord;
    use crate::registry::ProviderRegistry;
    use crate::session::CacheSessionService;
    use crate::store::IdentityStore;

    struct NoopIdentityStore;

    #[async_trait]
    impl IdentityStore for NoopIdentityStore {
        async fn find_by_provider_identity(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<IdentityRecord>, FederationError> {
            Ok(None)
        }

        async fn save(&self, record: IdentityRecord) -> Result<IdentityRecord, FederationError> {
            Ok(record)
        }
    }

    struct NoopUserStore;

    #[async_trait]
    impl LocalUserStore for NoopUserStore {
        async fn resolve(&self, _: &OwnerRef) -> Result<Option<LocalUser>, FederationError> {
            Ok(None)
        }

        async fn find_by_email(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<LocalUser>, FederationError> {
            Ok(None)
        }

        async fn create(
            &self,
            _: &str,
            _: &UserAttributes,
        ) -> Result<LocalUser, FederationError> {
            Ok(LocalUser {
                owner: OwnerRef::new("users", "u-1"),
                name: None,
                email: None,
            })
        }

        async fn save(&self, _: &LocalUser) -> Result<(), FederationError> {
            Ok(())
        }
    }

    fn app_state() -> web::Data<AppState> {
        let sessions = Arc::new(CacheSessionService::new(60));
        let engine = ReconciliationEngine::new(
            Arc::new(NoopIdentityStore),
            Arc::new(NoopUserStore),
            sessions.clone(),
            Arc::new(FsAvatarStorage::new(std::env::temp_dir())),
            reqwest::Client::new(),
        );

        let mut registry = ProviderRegistry::new();
        registry.register(
            "web",
            Arc::new(
                GoogleProvider::builder()
                    .client_id("cid")
                    .client_secret("cs")
                    .build()
                    .unwrap(),
            ) as Arc<dyn IdProvider>,
        );

        web::Data::new(AppState {
            registry: Arc::new(registry),
            engine: Arc::new(engine),
            sessions,
            login_states: Cache::builder().build(),
            base_url: "http://localhost:8080".to_string(),
            post_login_url: "/".to_string(),
        })
    }

    fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/auth/me", web::get().to(me))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/{realm}/providers", web::get().to(providers))
            .route("/auth/{realm}/{driver}/redirect", web::get().to(redirect))
            .route("/auth/{realm}/{driver}/callback", web::get().to(callback));
    }

    #[actix_web::test]
    async fn redirect_sends_browser_to_provider() {
        let state = app_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/web/google/redirect")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers().get("Location").unwrap().to_str().unwrap();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(location.contains("callback"));
    }

    #[actix_web::test]
    async fn redirect_for_unknown_driver_is_not_found() {
        let app =
            test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/web/github/redirect")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn callback_rejects_unknown_state() {
        let app =
            test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/web/google/callback?code=abc&state=forged")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn callback_state_is_single_use() {
        let state = app_state();
        state.login_states.insert(
            "st-1".to_string(),
            LoginState {
                realm: "web".to_string(),
                driver: "google".to_string(),
            },
        );
        let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        // First use consumes the entry (the exchange itself fails without a
        // live provider, which is fine for this assertion).
        let req = test::TestRequest::get()
            .uri("/auth/web/google/callback?code=abc&state=st-1")
            .to_request();
        test::call_service(&app, req).await;

        assert!(state.login_states.get("st-1").is_none());

        // A replay of the same state fails validation outright.
        let req = test::TestRequest::get()
            .uri("/auth/web/google/callback?code=abc&state=st-1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn callback_state_is_bound_to_realm_and_driver() {
        let state = app_state();
        state.login_states.insert(
            "st-1".to_string(),
            LoginState {
                realm: "admin".to_string(),
                driver: "google".to_string(),
            },
        );
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/web/google/callback?code=abc&state=st-1")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn callback_surfaces_provider_denial() {
        let app =
            test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/web/google/callback?error=access_denied&state=st-1")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "authorization_denied");
    }

    #[actix_web::test]
    async fn providers_lists_registered_drivers() {
        let app =
            test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/web/providers")
            .to_request();
        let body: ProvidersResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.realm, "web");
        assert_eq!(body.drivers, vec!["google".to_string()]);
    }

    #[actix_web::test]
    async fn me_requires_a_session() {
        let app =
            test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let req = test::TestRequest::get().uri("/auth/me").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn me_resolves_a_live_session() {
        let state = app_state();
        let token = state
            .sessions
            .login(&LocalUser {
                owner: OwnerRef::new("users", "u-1"),
                name: Some("Ada".to_string()),
                email: Some("a@x.com".to_string()),
            })
            .await
            .unwrap();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::get()
            .uri("/auth/me")
            .cookie(Cookie::new(SESSION_COOKIE, token))
            .to_request();
        let body: SessionInfoResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.id, "u-1");
        assert_eq!(body.email.as_deref(), Some("a@x.com"));
    }

    #[actix_web::test]
    async fn logout_revokes_the_session() {
        let state = app_state();
        let token = state
            .sessions
            .login(&LocalUser {
                owner: OwnerRef::new("users", "u-1"),
                name: None,
                email: None,
            })
            .await
            .unwrap();
        let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/auth/logout")
            .cookie(Cookie::new(SESSION_COOKIE, token.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.sessions.resolve(&token).is_none());
    }
}
