// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the trust management core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TrustError};

/// Length of an uncompressed SEC1 NIST P-256 point (0x04 || x || y).
pub const PUBLIC_KEY_LEN: usize = 65;

/// An ECC public key on the NIST P-256 curve.
///
/// This is the immutable primary key of an application: every claimed
/// application row, certificate and policy peer is keyed by it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wrap an uncompressed SEC1 point, validating its shape.
    pub fn from_sec1(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN || bytes[0] != 0x04 {
            return Err(TrustError::InvalidArgument(format!(
                "expected a {PUBLIC_KEY_LEN}-byte uncompressed P-256 point, got {} bytes",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Parse the hex form produced by [`PublicKey::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| TrustError::InvalidArgument(format!("public key hex: {e}")))?;
        Self::from_sec1(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Short, log-friendly fingerprint (first 8 bytes of the x coordinate).
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[1..9])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl TryFrom<String> for PublicKey {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

/// 128-bit identifier of a security group or identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(pub Uuid);

impl Guid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Guid {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TrustError::InvalidArgument(format!("guid '{s}': {e}")))
    }
}

/// Live claim state reported by a peer's permission configurator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimState {
    /// Discovered, security state not queried yet.
    #[default]
    Unknown,
    /// The peer refuses to be claimed.
    NotClaimable,
    Claimable,
    Claimed,
    /// Claimed, but the peer asks for a fresh configuration.
    NeedUpdate,
}

impl ClaimState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::NotClaimable => "NOT_CLAIMABLE",
            Self::Claimable => "CLAIMABLE",
            Self::Claimed => "CLAIMED",
            Self::NeedUpdate => "NEED_UPDATE",
        }
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the configuration persisted for a claimed application has
/// reached the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// Not managed by this security manager.
    #[default]
    Unmanaged,
    /// A change was persisted but not yet confirmed by the peer.
    Pending,
    /// The peer runs the persisted configuration.
    Ok,
}

impl SyncState {
    /// Integer representation used in the persisted schema.
    pub fn to_db(self) -> i64 {
        match self {
            Self::Unmanaged => 0,
            Self::Pending => 1,
            Self::Ok => 2,
        }
    }

    pub fn from_db(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Unmanaged),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Ok),
            other => Err(TrustError::Io(format!("unknown sync state {other}"))),
        }
    }
}

/// A peer application on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub public_key: PublicKey,
    pub claim_state: ClaimState,
    pub sync_state: SyncState,
    /// Unique bus name of the peer. Volatile routing data.
    #[serde(skip)]
    pub bus_name: Option<String>,
    /// Session hint from the announcement. Volatile routing data.
    #[serde(skip)]
    pub session_id: Option<u32>,
}

impl Application {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            claim_state: ClaimState::Unknown,
            sync_state: SyncState::Unmanaged,
            bus_name: None,
            session_id: None,
        }
    }
}

/// Administrator-editable descriptive data of a claimed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetaData {
    pub app_name: String,
    pub device_name: String,
    pub user_defined_name: String,
}

/// A security group: peers sharing a common membership authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub guid: Guid,
    /// Public half of the authority key pair; the private half stays with
    /// the issuer.
    pub authority: PublicKey,
    pub name: String,
    pub description: String,
}

impl GroupInfo {
    pub fn new(authority: PublicKey, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            guid: Guid::new(),
            authority,
            name: name.into(),
            description: description.into(),
        }
    }
}

/// The principal a claimed application impersonates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub guid: Guid,
    pub authority: PublicKey,
    pub name: String,
}

impl IdentityInfo {
    pub fn new(authority: PublicKey, name: impl Into<String>) -> Self {
        Self {
            guid: Guid::new(),
            authority,
            name: name.into(),
        }
    }
}

/// A peer announcement from the discovery feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub public_key: PublicKey,
    pub bus_address: String,
    pub session_hint: Option<u32>,
}

/// Peers entering or leaving the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnouncementEvent {
    Appeared(Announcement),
    Disappeared(PublicKey),
}
