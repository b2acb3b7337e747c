//! Registry credentials.
//!
//! Credentials travel through the engine as a base64-encoded JSON object,
//! the same blob both daemons accept in their `X-Registry-Auth` header:
//!
//! ```json
//! { "username": "ci", "password": "s3cret", "serveraddress": "ghcr.io" }
//! ```
//!
//! An empty blob decodes to empty credentials (anonymous access), not an
//! error. A non-empty blob must carry both `username` and `password`.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::{Deserialize, Serialize};

/// Decoded registry credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    #[serde(
        default,
        alias = "serverAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub serveraddress: Option<String>,
}

impl RegistryCredentials {
    /// Creates credentials for `username`/`password`.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            serveraddress: None,
        }
    }

    /// Decodes a base64 JSON blob. Standard and URL-safe alphabets are both
    /// accepted since clients disagree on which one to send.
    pub fn decode(blob: &str) -> Result<Self> {
        let blob = blob.trim();
        if blob.is_empty() {
            return Ok(Self::default());
        }

        let raw = STANDARD
            .decode(blob)
            .or_else(|_| URL_SAFE.decode(blob))
            .map_err(|e| Error::InvalidCredentials(format!("not base64: {}", e)))?;

        serde_json::from_slice(&raw)
            .map_err(|e| Error::InvalidCredentials(format!("not a credential object: {}", e)))
    }

    /// Encodes into the URL-safe base64 JSON form expected by daemons.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE.encode(json))
    }

    /// Returns true when neither username nor password is set.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("serveraddress", &self.serveraddress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = RegistryCredentials::new("ci", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("ci"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_empty_object_rejected() {
        // "{}"
        let err = RegistryCredentials::decode("e30=").unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(ref m) if m.contains("username")));

        // {"username":"ci"}
        let err = RegistryCredentials::decode("eyJ1c2VybmFtZSI6ImNpIn0=").unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(ref m) if m.contains("password")));
    }

    #[test]
    fn test_is_empty() {
        assert!(RegistryCredentials::default().is_empty());
        assert!(!RegistryCredentials::new("", "token").is_empty());
        assert!(!RegistryCredentials::new("ci", "").is_empty());
    }

    #[test]
    fn test_encode_decode() {
        let creds = RegistryCredentials::new("ci", "pw");
        let blob = creds.encode().unwrap();
        assert_eq!(RegistryCredentials::decode(&blob).unwrap(), creds);
    }
}
