use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "fedlink")]
#[command(about = "Federated identity reconciliation server", long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Start the federation server
    Serve(ServeConfig),

    /// Run database migrations
    Migrate {
        /// Database connection URL
        #[arg(
            long,
            env = "DATABASE_URL",
            default_value = "sqlite://./fedlink.db?mode=rwc"
        )]
        database_url: String,
    },
}

#[derive(Debug, Clone, Parser)]
pub struct ServeConfig {
    /// Database connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://./fedlink.db?mode=rwc"
    )]
    pub database_url: String,

    /// Server bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:8080")]
    pub bind_address: String,

    /// Externally reachable base URL; OAuth callback URLs are derived from it
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Where the browser lands after a successful callback
    #[arg(long, env = "POST_LOGIN_URL", default_value = "/")]
    pub post_login_url: String,

    /// Realm the configured providers are registered under
    #[arg(long, env = "REALM", default_value = "web")]
    pub realm: String,

    /// Allowed CORS origins (comma-separated)
    #[arg(
        long,
        env = "CORS_ORIGINS",
        default_value = "http://localhost:3000,http://localhost:5173"
    )]
    pub cors_origins: String,

    /// Google OAuth Client ID
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    /// Google OAuth Client Secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    pub google_client_secret: Option<String>,

    /// Restrict Google sign-in to one Workspace domain
    #[arg(long, env = "GOOGLE_HOSTED_DOMAIN")]
    pub google_hosted_domain: Option<String>,

    /// Microsoft Entra ID OAuth Client ID
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub azure_client_id: Option<String>,

    /// Microsoft Entra ID OAuth Client Secret
    #[arg(long, env = "AZURE_CLIENT_SECRET")]
    pub azure_client_secret: Option<String>,

    /// Microsoft Entra tenant (common, organizations, consumers, or a tenant GUID)
    #[arg(long, env = "AZURE_TENANT", default_value = "common")]
    pub azure_tenant: String,

    /// Create a local user on first login when no email matches
    #[arg(long, env = "AUTO_CREATE_USERS", default_value = "true")]
    pub auto_create_users: bool,

    /// Keep local name/email in sync with the provider on every login
    #[arg(long, env = "AUTO_UPDATE_USERS", default_value = "true")]
    pub auto_update_users: bool,

    /// Download and store provider avatars
    #[arg(long, env = "SYNC_AVATARS", default_value = "true")]
    pub sync_avatars: bool,

    /// Directory avatars are written to
    #[arg(long, env = "AVATAR_DIR", default_value = "./avatars")]
    pub avatar_dir: String,

    /// Session lifetime in seconds
    #[arg(long, env = "SESSION_TTL", default_value = "86400")]
    pub session_ttl: u64,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl ServeConfig {
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
