//! Firebase Authentication

#[allow(clippy::module_inception)]
pub mod auth;
pub mod data_source;
pub mod types;

pub use auth::Auth;
pub use data_source::{AuthDataSource, AuthProvider};
pub use types::{AuthResult, User, UserMetadata};
