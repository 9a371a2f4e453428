use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use migration::MigratorTrait;
use moka::sync::Cache;
use sea_orm::Database;

use crate::app_state::AppState;
use crate::avatar_store::FsAvatarStorage;
use crate::config::ServeConfig;
use crate::engine::ReconciliationEngine;
use crate::handlers;
use crate::providers::{EntraProvider, GoogleProvider, IdProvider};
use crate::registry::ProviderRegistry;
use crate::session::CacheSessionService;
use crate::store::SeaOrmIdentityStore;
use crate::users::SeaOrmUserStore;

/// A callback must come back within this window.
const LOGIN_STATE_TTL: Duration = Duration::from_secs(10 * 60);

pub async fn run_server(config: ServeConfig) -> anyhow::Result<()> {
    log::info!("Starting fedlink federation server...");

    log::info!("Connecting to database: {}", config.database_url);
    let db = Database::connect(&config.database_url).await?;

    log::info!("Running database migrations...");
    migration::Migrator::up(&db, None).await?;
    log::info!("Database migrations completed");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let registry = build_registry(&config)?;
    if registry.drivers(&config.realm).is_empty() {
        log::warn!(
            "No identity providers configured for realm '{}'; set GOOGLE_CLIENT_ID/SECRET or AZURE_CLIENT_ID/SECRET",
            config.realm,
        );
    }

    let sessions = Arc::new(CacheSessionService::new(config.session_ttl));

    let engine = ReconciliationEngine::new(
        Arc::new(SeaOrmIdentityStore::new(db.clone())),
        Arc::new(SeaOrmUserStore::new(db)),
        sessions.clone(),
        Arc::new(FsAvatarStorage::new(&config.avatar_dir)),
        http,
    );

    let login_states = Cache::builder()
        .max_capacity(10_000)
        .time_to_live(LOGIN_STATE_TTL)
        .build();

    let app_state = web::Data::new(AppState {
        registry: Arc::new(registry),
        engine: Arc::new(engine),
        sessions,
        login_states,
        base_url: config.base_url.clone(),
        post_login_url: config.post_login_url.clone(),
    });

    let bind_address = config.bind_address.clone();
    let cors_origins = config.cors_origin_list();

    log::info!("Listening on {bind_address}");

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .supports_credentials()
            .max_age(3600);

        for origin in &cors_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .route("/auth/me", web::get().to(handlers::me))
            .route("/auth/logout", web::post().to(handlers::logout))
            .route(
                "/auth/{realm}/providers",
                web::get().to(handlers::providers),
            )
            .route(
                "/auth/{realm}/{driver}/redirect",
                web::get().to(handlers::redirect),
            )
            .route(
                "/auth/{realm}/{driver}/callback",
                web::get().to(handlers::callback),
            )
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

/// Build the provider registry from the serve configuration. Providers with
/// incomplete credentials are skipped with a warning rather than half
/// registered.
fn build_registry(config: &ServeConfig) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if config.google_client_id.is_some() || config.google_client_secret.is_some() {
        let mut builder = GoogleProvider::builder()
            .credentials_from(
                config.google_client_id.clone(),
                config.google_client_secret.clone(),
            )
            .auto_create_user(config.auto_create_users)
            .auto_update_user(config.auto_update_users)
            .sync_avatar(config.sync_avatars);

        if let Some(domain) = &config.google_hosted_domain {
            builder = builder.hosted_domain(domain);
        }

        match builder.build() {
            Ok(provider) => {
                log::info!("Registered Google provider for realm '{}'", config.realm);
                registry.register(&config.realm, Arc::new(provider) as Arc<dyn IdProvider>);
            }
            Err(e) => log::warn!("Skipping Google provider: {e}"),
        }
    }

    if config.azure_client_id.is_some() || config.azure_client_secret.is_some() {
        let builder = EntraProvider::builder()
            .credentials_from(
                config.azure_client_id.clone(),
                config.azure_client_secret.clone(),
            )
            .tenant(&config.azure_tenant)
            .auto_create_user(config.auto_create_users)
            .auto_update_user(config.auto_update_users)
            .sync_avatar(config.sync_avatars);

        match builder.build() {
            Ok(provider) => {
                log::info!(
                    "Registered Microsoft Entra provider for realm '{}' (tenant '{}')",
                    config.realm,
                    config.azure_tenant,
                );
                registry.register(&config.realm, Arc::new(provider) as Arc<dyn IdProvider>);
            }
            Err(e) => log::warn!("Skipping Microsoft Entra provider: {e}"),
        }
    }

    Ok(registry)
}
