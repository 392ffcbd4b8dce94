// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Public Key Authentication
//!
//! Contract used by the SSH layer to decide whether a presented public key
//! belongs to the identity it claims. The concrete implementation checks a
//! third-party key registry (see `infrastructure::key_registry`).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Authenticator trait and SHA-256 key fingerprints

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// SHA-256 fingerprint of an SSH public key blob
///
/// Rendered the way OpenSSH prints it: `SHA256:<unpadded base64>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyFingerprint([u8; 32]);

impl KeyFingerprint {
    /// Fingerprint of a key in SSH wire encoding (the decoded base64 field of an authorized_keys line)
    pub fn of_wire_bytes(key_blob: &[u8]) -> Self {
        Self(Sha256::digest(key_blob).into())
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SHA256:{}", STANDARD_NO_PAD.encode(self.0))
    }
}

/// Decides whether a presented key authenticates a claimed identity
///
/// Implementations must fail closed: any lookup or parse error is `false`.
/// Results must not be cached across connections.
#[async_trait]
pub trait PublicKeyAuthenticator: Send + Sync {
    /// # Arguments
    /// * `identity` - Raw user name from the SSH handshake (unvalidated)
    /// * `key_blob` - Presented public key in SSH wire encoding
    async fn authenticate(&self, identity: &str, key_blob: &[u8]) -> bool;
}

/// Reasons a registry lookup produced no usable keys
///
/// Never surfaced to clients; logged and collapsed into a rejection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] super::identity::IdentityError),

    #[error("Key registry request failed: {0}")]
    Registry(String),

    #[error("Key registry returned HTTP {0}")]
    RegistryStatus(u16),

    #[error("Malformed authorized key entry: {0}")]
    MalformedKey(String),
}
