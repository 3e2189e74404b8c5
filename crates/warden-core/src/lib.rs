//! Warden Core Library
//!
//! Shared settings, errors, and identity types for the Warden identity
//! federation stack.

pub mod error;
pub mod identity;
pub mod settings;

pub use error::{Error, Result};
pub use identity::{
    Authenticate, AuthenticationContext, AuthenticationResult, FetchUserDetails, ResolveGroups,
    UserDetails,
};
pub use settings::Settings;

/// Warden version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
