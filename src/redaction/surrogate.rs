//! Surrogate generation.
//!
//! Random surrogates come straight from the operating system CSPRNG.
//! Deterministic surrogates are HMAC-SHA256 over the salt, the kind tag and
//! the canonical address bytes, keyed with the server secret; the leading
//! digest bytes are then rendered as a literal of the same kind.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::patterns::Address;
use super::RedactError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Length of a freshly drawn per-request salt in bytes.
pub const SALT_LEN: usize = 16;

/// Opaque secret value that never appears in logs.
///
/// Debug output always shows `__REDACTED__`.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap a secret string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret bytes. Use only when keying the PRF.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Secret length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Where deterministic salts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltPolicy {
    /// Fresh CSPRNG salt per request: the same address maps to unrelated
    /// surrogates in different requests.
    #[default]
    PerRequest,
    /// Empty salt: the same address maps to the same surrogate for as long
    /// as the secret is unchanged.
    Stable,
}

impl SaltPolicy {
    /// Produce the salt for one request.
    pub fn salt(self) -> Salt {
        match self {
            Self::PerRequest => Salt::fresh(),
            Self::Stable => Salt::stable(),
        }
    }

    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerRequest => "per_request",
            Self::Stable => "stable",
        }
    }
}

impl std::str::FromStr for SaltPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_request" => Ok(Self::PerRequest),
            "stable" => Ok(Self::Stable),
            other => Err(format!("unknown salt policy: {other}")),
        }
    }
}

/// Salt mixed into deterministic derivation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Draw [`SALT_LEN`] bytes from the OS CSPRNG.
    pub fn fresh() -> Self {
        let mut bytes = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The empty salt used for cross-request consistency.
    pub fn stable() -> Self {
        Self(Vec::new())
    }

    /// Use caller-provided salt bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Server-held PRF key for deterministic mode.
#[derive(Clone)]
pub struct DeterministicKey {
    mac: HmacSha256,
}

impl DeterministicKey {
    /// Key the PRF with the configured secret.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::MissingSecret`] for an empty secret and
    /// [`RedactError::InvalidKey`] if the MAC rejects the key.
    pub fn new(secret: &SecretValue) -> Result<Self, RedactError> {
        if secret.is_empty() {
            return Err(RedactError::MissingSecret);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.expose())
            .map_err(|e| RedactError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Keyed digest of (salt, kind, canonical address bytes).
    ///
    /// Fields are length-prefixed so distinct inputs never share a byte stream.
    fn digest(&self, salt: &Salt, address: &Address) -> Vec<u8> {
        let mut mac = self.mac.clone();
        update_framed(&mut mac, salt.as_bytes());
        update_framed(&mut mac, address.kind().as_str().as_bytes());
        update_framed(&mut mac, &address.canonical_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for DeterministicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeterministicKey(__REDACTED__)")
    }
}

fn update_framed(mac: &mut HmacSha256, field: &[u8]) {
    let len = u32::try_from(field.len()).unwrap_or(u32::MAX);
    mac.update(&len.to_be_bytes());
    mac.update(field);
}

/// How one engine instance produces surrogates.
#[derive(Debug, Clone)]
pub enum SurrogateSource {
    /// Independent CSPRNG draw per occurrence.
    Random,
    /// Keyed derivation; identical addresses under one salt share a surrogate.
    Keyed {
        /// Server PRF key.
        key: Arc<DeterministicKey>,
        /// Salt for this request.
        salt: Salt,
    },
}

impl SurrogateSource {
    /// Produce a well-formed surrogate literal of the same kind as `address`.
    pub fn surrogate_for(&self, address: &Address) -> String {
        let bytes = match self {
            Self::Random => {
                let mut bytes = [0u8; 16];
                OsRng.fill_bytes(&mut bytes);
                bytes.to_vec()
            }
            Self::Keyed { key, salt } => key.digest(salt, address),
        };
        render(address, &bytes)
    }
}

/// Render the leading bytes of `bytes` as a literal shaped like `address`.
fn render(address: &Address, bytes: &[u8]) -> String {
    match address {
        Address::V4(_) => {
            let mut octets = [0u8; 4];
            fill(&mut octets, bytes);
            Ipv4Addr::from(octets).to_string()
        }
        Address::V6(_) => {
            let mut octets = [0u8; 16];
            fill(&mut octets, bytes);
            Ipv6Addr::from(octets)
                .segments()
                .iter()
                .map(|segment| format!("{segment:04x}"))
                .collect::<Vec<_>>()
                .join(":")
        }
        Address::Mac { style, .. } => {
            let mut octets = [0u8; 6];
            fill(&mut octets, bytes);
            style.render(&octets)
        }
    }
}

fn fill(dst: &mut [u8], src: &[u8]) {
    for (slot, byte) in dst.iter_mut().zip(src) {
        *slot = *byte;
    }
}
