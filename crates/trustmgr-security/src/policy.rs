// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Permission policy model: ordered ACLs of peers and rules.
//
// The serialized shape is consumed by the remote peer's policy engine, which
// evaluates ACLs in order.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use trustmgr_core::error::Result;
use trustmgr_core::types::{Guid, PublicKey};

use crate::integrity;

/// Wildcard accepted in interface, object path and member names.
pub const WILDCARD: &str = "*";

/// Bitset over the actions a peer may perform on a member.
///
/// `0` is an explicit deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionMask(pub u8);

impl ActionMask {
    pub const DENY: Self = Self(0);
    pub const PROVIDE: Self = Self(1);
    pub const OBSERVE: Self = Self(2);
    pub const MODIFY: Self = Self(4);
    pub const FULL: Self = Self(1 | 2 | 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_deny(self) -> bool {
        self.0 == 0
    }

    /// Actions in `self` that `other` does not grant.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for ActionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ActionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    #[default]
    NotSpecified,
    MethodCall,
    Signal,
    Property,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub member_type: MemberType,
    pub action_mask: ActionMask,
}

impl Member {
    pub fn new(name: impl Into<String>, member_type: MemberType, action_mask: ActionMask) -> Self {
        Self {
            name: name.into(),
            member_type,
            action_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub interface_name: String,
    pub object_path: String,
    pub members: Vec<Member>,
}

impl Rule {
    pub fn new(interface_name: impl Into<String>, object_path: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            interface_name: interface_name.into(),
            object_path: object_path.into(),
            members,
        }
    }

    /// One rule matching every interface, object and member.
    pub fn wildcard(action_mask: ActionMask) -> Self {
        Self::new(
            WILDCARD,
            WILDCARD,
            vec![Member::new(WILDCARD, MemberType::NotSpecified, action_mask)],
        )
    }
}

/// Who an ACL applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Peer {
    /// Every peer, authenticated or not.
    All,
    /// Every authenticated peer.
    AnyTrusted,
    /// Peers holding a certificate issued by `authority`.
    FromCertificateAuthority { authority: PublicKey },
    WithPublicKey { key: PublicKey },
    /// Peers holding a membership certificate for `group`, issued by `authority`.
    WithMembership { group: Guid, authority: PublicKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub peers: Vec<Peer>,
    pub rules: Vec<Rule>,
}

/// A versioned, ordered list of ACLs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub version: u32,
    pub acls: Vec<Acl>,
}

impl PermissionPolicy {
    pub fn new(acls: Vec<Acl>) -> Self {
        Self { version: 0, acls }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// SHA-256 over the serialized policy. Equal policies share a digest.
    pub fn digest(&self) -> Result<[u8; 32]> {
        Ok(integrity::digest(&self.to_bytes()?))
    }
}
