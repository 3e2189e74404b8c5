//! LDAP identity federation for Warden
//!
//! Verifies credentials, resolves group memberships, and fetches profile
//! attributes against one or several independently configured directory
//! servers:
//! - Dotted-key configuration parsed once into an immutable topology
//! - Deprecated DNS-SRV autodiscovery of servers and base DNs
//! - Named-placeholder filter templates compiled to positional requests
//! - Ordered, short-circuiting federation across servers

pub mod autodiscovery;
pub mod authenticator;
pub mod connection;
pub mod groups;
pub mod mapping;
pub mod realm;
pub mod sasl;
pub mod search;
pub mod settings;
pub mod users;

pub use authenticator::Authenticator;
pub use autodiscovery::{Autodiscovery, SrvRecord};
pub use connection::{AuthMethod, ContextFactory, ServerDescriptor, ServerInfo};
pub use groups::GroupsProvider;
pub use mapping::{CompiledTemplate, GroupMappingTemplate, UserMappingTemplate};
pub use realm::{Realm, RealmState};
pub use sasl::{CredentialsCallback, Prompt};
pub use search::{Entry, EntryCursor, SearchScope, SearchSpec};
pub use settings::{ResolvedServer, SettingsManager, DEFAULT_SERVER_KEY};
pub use users::UsersProvider;
