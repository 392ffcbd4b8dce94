// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Key Registry Authenticator
//!
//! Authenticates SSH public keys against the keys an identity publishes on a
//! key registry (`<registry>/<identity>.keys`, newline-delimited
//! authorized_keys format).
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Fail-closed registry lookup and fingerprint comparison
//!
//! Every connection attempt performs a fresh lookup. Nothing is cached, so a
//! key added or removed on the registry takes effect on the next connection.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::auth::{AuthError, KeyFingerprint, PublicKeyAuthenticator};
use crate::domain::identity::Identity;

/// One parsed authorized_keys entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    pub key_type: String,
    pub blob: Vec<u8>,
    pub comment: Option<String>,
}

impl AuthorizedKey {
    pub fn fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::of_wire_bytes(&self.blob)
    }
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-") || token.starts_with("sk-")
}

/// Parse a single authorized_keys line
///
/// Leading option fields (`command="..."`, `no-pty`) are skipped. The
/// algorithm name embedded in the decoded blob must match the declared type.
pub fn parse_authorized_key(line: &str) -> Result<AuthorizedKey, AuthError> {
    let mut tokens = line.split_whitespace();
    let key_type = tokens
        .by_ref()
        .find(|t| is_key_type(t))
        .ok_or_else(|| AuthError::MalformedKey(format!("no key type in '{}'", line)))?;
    let encoded = tokens
        .next()
        .ok_or_else(|| AuthError::MalformedKey(format!("missing key data for {}", key_type)))?;
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| AuthError::MalformedKey(format!("invalid base64: {}", e)))?;

    let embedded = embedded_key_type(&blob)
        .ok_or_else(|| AuthError::MalformedKey("truncated key blob".to_string()))?;
    if embedded != key_type.as_bytes() {
        return Err(AuthError::MalformedKey(format!(
            "declared type {} does not match key data",
            key_type
        )));
    }

    let comment = tokens.collect::<Vec<_>>().join(" ");
    Ok(AuthorizedKey {
        key_type: key_type.to_string(),
        blob,
        comment: (!comment.is_empty()).then_some(comment),
    })
}

/// First SSH wire string in a key blob (the algorithm name)
fn embedded_key_type(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    blob.get(4..4usize.checked_add(len)?)
}

/// Parse a whole registry response; any malformed non-empty line fails the lot
pub fn parse_authorized_keys(body: &str) -> Result<Vec<AuthorizedKey>, AuthError> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_authorized_key)
        .collect()
}

pub struct KeyRegistryAuthenticator {
    client: Client,
    /// Registry base URL (e.g., "https://github.com")
    registry_url: String,
}

impl KeyRegistryAuthenticator {
    /// Create an authenticator bound to a registry
    ///
    /// # Arguments
    /// * `registry_url` - Base URL; keys are read from `<registry_url>/<identity>.keys`
    /// * `timeout` - Upper bound on a single lookup
    pub fn new(registry_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Registry(e.to_string()))?;

        Ok(Self {
            client,
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn keys_url(&self, identity: &Identity) -> String {
        format!("{}/{}.keys", self.registry_url, identity)
    }

    /// Fetch and parse the published keys of an identity
    pub async fn published_keys(&self, identity: &Identity) -> Result<Vec<AuthorizedKey>, AuthError> {
        let response = self
            .client
            .get(self.keys_url(identity))
            .send()
            .await
            .map_err(|e| AuthError::Registry(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::RegistryStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Registry(e.to_string()))?;
        parse_authorized_keys(&body)
    }

    async fn check(&self, identity: &str, key_blob: &[u8]) -> Result<bool, AuthError> {
        let identity = Identity::parse(identity)?;
        let presented = KeyFingerprint::of_wire_bytes(key_blob);

        for key in self.published_keys(&identity).await? {
            if key.fingerprint() == presented {
                debug!(identity = %identity, fingerprint = %presented, "Matched published key");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl PublicKeyAuthenticator for KeyRegistryAuthenticator {
    async fn authenticate(&self, identity: &str, key_blob: &[u8]) -> bool {
        let accepted = match self.check(identity, key_blob).await {
            Ok(true) => {
                info!(identity = %identity, "Public key accepted");
                true
            }
            Ok(false) => {
                info!(identity = %identity, "Public key not published by identity");
                false
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Key registry lookup failed, rejecting");
                false
            }
        };

        let result = if accepted { "accepted" } else { "rejected" };
        metrics::counter!("term_apply_auth_attempts_total", "result" => result).increment(1);
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn wire_key(key_type: &str, material: &[u8]) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&(key_type.len() as u32).to_be_bytes());
        blob.extend_from_slice(key_type.as_bytes());
        blob.extend_from_slice(&(material.len() as u32).to_be_bytes());
        blob.extend_from_slice(material);
        blob
    }

    fn line(key_type: &str, blob: &[u8], comment: &str) -> String {
        format!("{} {} {}", key_type, STANDARD.encode(blob), comment)
    }

    #[test]
    fn test_parse_line_with_options_and_comment() {
        let blob = wire_key("ssh-ed25519", &[1u8; 32]);
        let entry = format!("no-pty,command=\"x\" {}", line("ssh-ed25519", &blob, "alice@laptop"));

        let key = parse_authorized_key(&entry).unwrap();
        assert_eq!(key.key_type, "ssh-ed25519");
        assert_eq!(key.blob, blob);
        assert_eq!(key.comment.as_deref(), Some("alice@laptop"));
    }

    #[test]
    fn test_parse_rejects_type_mismatch_and_garbage() {
        let blob = wire_key("ssh-rsa", &[2u8; 16]);
        assert!(parse_authorized_key(&line("ssh-ed25519", &blob, "")).is_err());
        assert!(parse_authorized_key("ssh-ed25519 !!!notbase64").is_err());
        assert!(parse_authorized_key("hello world").is_err());
    }

    #[test]
    fn test_parse_body_skips_blank_lines() {
        let a = wire_key("ssh-ed25519", &[3u8; 32]);
        let b = wire_key("ssh-rsa", &[4u8; 64]);
        let body = format!("{}\n\n{}\n", line("ssh-ed25519", &a, ""), line("ssh-rsa", &b, ""));
        assert_eq!(parse_authorized_keys(&body).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_authenticates_published_key() {
        let mut server = Server::new_async().await;
        let published = wire_key("ssh-ed25519", &[5u8; 32]);
        let other = wire_key("ssh-ed25519", &[6u8; 32]);
        let body = format!("{}\n{}\n", line("ssh-ed25519", &other, ""), line("ssh-ed25519", &published, ""));

        let mock = server
            .mock("GET", "/alice.keys")
            .with_status(200)
            .with_body(body)
            .expect(2)
            .create_async()
            .await;

        let auth = KeyRegistryAuthenticator::new(server.url(), Duration::from_secs(5)).unwrap();
        assert!(auth.authenticate("alice", &published).await);
        assert!(!auth.authenticate("alice", &wire_key("ssh-ed25519", &[7u8; 32])).await);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fails_closed_on_registry_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/bob.keys")
            .with_status(500)
            .create_async()
            .await;

        let auth = KeyRegistryAuthenticator::new(server.url(), Duration::from_secs(5)).unwrap();
        assert!(!auth.authenticate("bob", &wire_key("ssh-ed25519", &[8u8; 32])).await);
    }

    #[tokio::test]
    async fn test_fails_closed_on_malformed_entry() {
        let mut server = Server::new_async().await;
        let published = wire_key("ssh-ed25519", &[9u8; 32]);
        let body = format!("{}\nnot a key\n", line("ssh-ed25519", &published, ""));
        let _mock = server
            .mock("GET", "/carol.keys")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let auth = KeyRegistryAuthenticator::new(server.url(), Duration::from_secs(5)).unwrap();
        assert!(!auth.authenticate("carol", &published).await);
    }

    #[tokio::test]
    async fn test_invalid_identity_never_reaches_registry() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", mockito::Matcher::Any).expect(0).create_async().await;

        let auth = KeyRegistryAuthenticator::new(server.url(), Duration::from_secs(5)).unwrap();
        assert!(!auth.authenticate("../admin", &wire_key("ssh-ed25519", &[1u8; 32])).await);

        mock.assert_async().await;
    }
}
