pub mod federated_identity;
pub mod user;

pub use federated_identity::Entity as FederatedIdentity;
pub use user::Entity as User;
