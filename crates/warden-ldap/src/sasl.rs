//! SASL credential callbacks.
//!
//! Challenge-response mechanisms ask the client for pieces of the identity
//! one prompt at a time. [`CredentialsCallback`] answers name, secret and
//! realm prompts from the credentials it was built with and rejects every
//! other prompt kind. [`cram_md5_response`] computes the CRAM-MD5 proof
//! (RFC 2195) for a server challenge.

use std::fmt;

use hmac::{Hmac, Mac};
use md5::Md5;
use warden_core::{Error, Result};

/// What a SASL mechanism is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Name,
    Secret,
    Realm,
    Other(String),
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::Name => f.write_str("name"),
            Prompt::Secret => f.write_str("secret"),
            Prompt::Realm => f.write_str("realm"),
            Prompt::Other(kind) => f.write_str(kind),
        }
    }
}

/// Answers SASL prompts from a fixed set of credentials.
#[derive(Clone)]
pub struct CredentialsCallback {
    name: String,
    secret: String,
    realm: Option<String>,
}

impl CredentialsCallback {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            realm: None,
        }
    }

    /// Attach the realm DIGEST-MD5 negotiates against.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Answer one prompt. Prompts outside name, secret and realm fail with
    /// [`Error::UnsupportedCallback`].
    pub fn handle(&self, prompt: &Prompt) -> Result<String> {
        match prompt {
            Prompt::Name => Ok(self.name.clone()),
            Prompt::Secret => Ok(self.secret.clone()),
            Prompt::Realm => Ok(self.realm.clone().unwrap_or_default()),
            Prompt::Other(kind) => Err(Error::unsupported_callback(kind)),
        }
    }
}

impl fmt::Debug for CredentialsCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsCallback")
            .field("name", &self.name)
            .field("secret", &"***")
            .field("realm", &self.realm)
            .finish()
    }
}

/// CRAM-MD5 response for a server challenge: the user name followed by the
/// hex HMAC-MD5 of the challenge keyed with the shared secret.
pub fn cram_md5_response(callback: &CredentialsCallback, challenge: &[u8]) -> Result<String> {
    type HmacMd5 = Hmac<Md5>;

    let name = callback.handle(&Prompt::Name)?;
    let secret = callback.handle(&Prompt::Secret)?;
    let mut mac =
        HmacMd5::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(challenge);
    Ok(format!("{} {}", name, hex::encode(mac.finalize().into_bytes())))
}
