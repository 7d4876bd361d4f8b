// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signer, SigningKey};

/// A device identity used to sign the v2 connect-request payload (spec
/// §4.8/§6). Credentials are treated as immutable for the process lifetime
/// (spec §9 Open Question); rotation is out of scope.
pub struct DeviceIdentity {
    pub id: String,
    key: SigningKey,
}

/// The signed fields attached to a connect request's `device` object.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSignature {
    pub id: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub signature: String,
    #[serde(rename = "signedAt")]
    pub signed_at: i64,
    pub nonce: String,
}

impl DeviceIdentity {
    /// Build a device identity from a raw Ed25519 private key (32 bytes, as
    /// decoded from a PEM file by the caller — PEM parsing is a config-layer
    /// concern, out of scope here per spec §1).
    pub fn from_seed(id: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self {
            id: id.into(),
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Build the v2 sign payload and sign it, producing the `device` object
    /// the connect request attaches.
    ///
    /// Sign payload: `"v2|deviceId|clientId|backend|operator|<comma-joined
    /// scopes>|signedAtMs|token|nonce"`.
    pub fn sign_connect(
        &self,
        client_id: &str,
        scopes: &[String],
        token: Option<&str>,
        nonce: &str,
        signed_at_ms: i64,
    ) -> DeviceSignature {
        let payload = format!(
            "v2|{}|{}|backend|operator|{}|{}|{}|{}",
            self.id,
            client_id,
            scopes.join(","),
            signed_at_ms,
            token.unwrap_or(""),
            nonce,
        );
        let signature = self.key.sign(payload.as_bytes());

        DeviceSignature {
            id: self.id.clone(),
            public_key: URL_SAFE_NO_PAD.encode(self.key.verifying_key().to_bytes()),
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
            signed_at: signed_at_ms,
            nonce: nonce.to_string(),
        }
    }
}
