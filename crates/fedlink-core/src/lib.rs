pub mod avatar;
pub mod error;
pub mod mapping;
pub mod profile;
pub mod token;

pub use error::FederationError;
pub use profile::ExternalProfile;
