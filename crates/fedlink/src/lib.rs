pub mod app_state;
pub mod avatar_store;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod record;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod users;

pub use engine::{ReconciliationEngine, ReconciledLogin};
pub use registry::ProviderRegistry;
