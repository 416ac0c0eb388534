// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persisted records and their row decoding.

use rusqlite::Row;
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{ApplicationMetaData, GroupInfo, Guid, IdentityInfo, PublicKey, SyncState};
use trustmgr_security::{Manifest, PermissionPolicy};

/// A claimed application as stored by the trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedApplication {
    pub public_key: PublicKey,
    pub peer_id: String,
    pub meta: ApplicationMetaData,
    pub manifest: Manifest,
    /// `None` until a policy was installed.
    pub policy: Option<PermissionPolicy>,
    pub policy_version: u32,
    pub sync_state: SyncState,
}

pub(crate) const APPLICATION_COLUMNS: &str =
    "PUBKEY, PEER_ID, APP_NAME, DEV_NAME, USER_DEF_NAME, MANIFEST, POLICY, POLICY_VERSION, SYNC_STATE";

/// Raw column values of one `claimed_applications` row.
pub(crate) struct ApplicationRow {
    pubkey: Vec<u8>,
    peer_id: String,
    app_name: String,
    dev_name: String,
    user_def_name: String,
    manifest: Vec<u8>,
    policy: Option<Vec<u8>>,
    policy_version: i64,
    sync_state: i64,
}

impl ApplicationRow {
    /// Read a row selected with [`APPLICATION_COLUMNS`].
    pub(crate) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pubkey: row.get(0)?,
            peer_id: row.get(1)?,
            app_name: row.get(2)?,
            dev_name: row.get(3)?,
            user_def_name: row.get(4)?,
            manifest: row.get(5)?,
            policy: row.get(6)?,
            policy_version: row.get(7)?,
            sync_state: row.get(8)?,
        })
    }

    pub(crate) fn decode(self) -> Result<ClaimedApplication> {
        let policy_version = version_from_db(self.policy_version)?;
        let policy = self
            .policy
            .map(|bytes| {
                PermissionPolicy::from_bytes(&bytes).map(|mut policy| {
                    policy.version = policy_version;
                    policy
                })
            })
            .transpose()?;

        Ok(ClaimedApplication {
            public_key: PublicKey::from_sec1(&self.pubkey)?,
            peer_id: self.peer_id,
            meta: ApplicationMetaData {
                app_name: self.app_name,
                device_name: self.dev_name,
                user_defined_name: self.user_def_name,
            },
            manifest: Manifest::from_bytes(&self.manifest)?,
            policy,
            policy_version,
            sync_state: SyncState::from_db(self.sync_state)?,
        })
    }
}

pub(crate) fn version_from_db(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| TrustError::Io(format!("policy version {value} out of range")))
}

pub(crate) fn identity_from_row(id: String, authority: Vec<u8>, name: String) -> Result<IdentityInfo> {
    Ok(IdentityInfo {
        guid: id.parse::<Guid>()?,
        authority: PublicKey::from_sec1(&authority)?,
        name,
    })
}

pub(crate) fn group_from_row(
    id: String,
    authority: Vec<u8>,
    name: String,
    description: String,
) -> Result<GroupInfo> {
    Ok(GroupInfo {
        guid: id.parse::<Guid>()?,
        authority: PublicKey::from_sec1(&authority)?,
        name,
        description,
    })
}
