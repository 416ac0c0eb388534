// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Claimed-application operations of the trust store.
//
// Policy versions are owned by the store: every update increments the stored
// version by exactly one and marks the application pending until the peer
// confirms delivery through `mark_synchronized`.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{ApplicationMetaData, Guid, IdentityInfo, PublicKey, SyncState};
use trustmgr_security::{
    Certificate, IdentityCertificate, Manifest, MembershipCertificate, PermissionPolicy,
    UserEquivalenceCertificate,
};

use crate::events::StorageEvent;
use crate::records::{APPLICATION_COLUMNS, ApplicationRow, ClaimedApplication};
use crate::schema::DELETE_ORPHANED_CERTS_SQL;
use crate::store::{
    TrustStore, bump_pending, db_err, load_certificate, not_claimed, put_certificate,
};

impl TrustStore {
    /// Persist a freshly claimed application with its identity certificate.
    ///
    /// Called only after the peer confirmed installation. The application
    /// starts at policy version 0 and in sync.
    #[instrument(skip(self, cert, manifest), fields(app = %app, alias = %cert.alias))]
    pub fn finish_claim(
        &self,
        app: &PublicKey,
        peer_id: &str,
        cert: &IdentityCertificate,
        manifest: &Manifest,
    ) -> Result<ClaimedApplication> {
        if &cert.body.subject != app {
            return Err(TrustError::InvalidArgument(format!(
                "identity certificate subject {} does not match application {app}",
                cert.body.subject
            )));
        }
        let manifest_bytes = manifest.to_bytes()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("begin claim"))?;

        if read_application(&tx, app)?.is_some() {
            return Err(TrustError::AlreadyExists(format!("claimed application {app}")));
        }

        tx.execute(
            "INSERT INTO claimed_applications (PUBKEY, PEER_ID, MANIFEST, POLICY_VERSION, SYNC_STATE)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![app.as_bytes(), peer_id, manifest_bytes, SyncState::Ok.to_db()],
        )
        .map_err(db_err("insert claimed application"))?;
        put_identity_certificate(&tx, cert)?;

        let claimed = read_application(&tx, app)?.ok_or_else(|| not_claimed(app))?;
        tx.commit().map_err(db_err("commit claim"))?;

        info!("application claimed");
        Ok(claimed)
    }

    pub fn get_managed_application(&self, app: &PublicKey) -> Result<ClaimedApplication> {
        let conn = self.read()?;
        read_application(&conn, app)?.ok_or_else(|| not_claimed(app))
    }

    pub fn get_managed_applications(&self) -> Result<Vec<ClaimedApplication>> {
        let conn = self.read()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {APPLICATION_COLUMNS} FROM claimed_applications ORDER BY PUBKEY"
            ))
            .map_err(db_err("list applications"))?;
        let rows = stmt
            .query_map([], ApplicationRow::read)
            .map_err(db_err("list applications"))?;

        rows.map(|row| row.map_err(db_err("read application"))?.decode())
            .collect()
    }

    /// Keys of the applications claimed with `identity`.
    pub fn get_applications_for_identity(&self, identity: &Guid) -> Result<Vec<PublicKey>> {
        let conn = self.read()?;
        let mut stmt = conn
            .prepare("SELECT SUBJECT FROM identity_certificates WHERE ALIAS = ?1 ORDER BY SUBJECT")
            .map_err(db_err("list identity applications"))?;
        let rows = stmt
            .query_map(params![identity.to_string()], |row| row.get::<_, Vec<u8>>(0))
            .map_err(db_err("list identity applications"))?;

        rows.map(|row| PublicKey::from_sec1(&row.map_err(db_err("read key"))?))
            .collect()
    }

    #[instrument(skip(self, meta), fields(app = %app))]
    pub fn set_app_meta_data(&self, app: &PublicKey, meta: &ApplicationMetaData) -> Result<()> {
        let rows = self
            .lock()?
            .execute(
                "UPDATE claimed_applications SET APP_NAME = ?1, DEV_NAME = ?2, USER_DEF_NAME = ?3
                 WHERE PUBKEY = ?4",
                params![
                    meta.app_name,
                    meta.device_name,
                    meta.user_defined_name,
                    app.as_bytes()
                ],
            )
            .map_err(db_err("set metadata"))?;

        if rows == 0 {
            return Err(not_claimed(app));
        }
        Ok(())
    }

    pub fn get_app_meta_data(&self, app: &PublicKey) -> Result<ApplicationMetaData> {
        Ok(self.get_managed_application(app)?.meta)
    }

    /// Replace the policy of `app`.
    ///
    /// The version of `policy` is ignored: the stored version becomes the
    /// previous stored version plus one. Returns the policy as stored.
    #[instrument(skip(self, policy), fields(app = %app, acls = policy.acls.len()))]
    pub fn update_policy(&self, app: &PublicKey, policy: &PermissionPolicy) -> Result<PermissionPolicy> {
        let stored = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin update policy"))?;

            let version = bump_pending(&tx, app)?;
            let stored = PermissionPolicy {
                version,
                ..policy.clone()
            };
            tx.execute(
                "UPDATE claimed_applications SET POLICY = ?1 WHERE PUBKEY = ?2",
                params![stored.to_bytes()?, app.as_bytes()],
            )
            .map_err(db_err("store policy"))?;
            tx.commit().map_err(db_err("commit update policy"))?;
            stored
        };

        debug!(version = stored.version, "policy updated");
        self.notify(StorageEvent::PendingChanges(vec![app.clone()]));
        Ok(stored)
    }

    /// Rewrite the identity certificate and manifest of `app`.
    ///
    /// Changing identity is trust relevant, so the policy version is bumped
    /// as well. Returns the new version.
    #[instrument(skip(self, identity, cert, manifest), fields(app = %app, identity = %identity.guid))]
    pub fn update_identity(
        &self,
        app: &PublicKey,
        identity: &IdentityInfo,
        cert: &IdentityCertificate,
        manifest: &Manifest,
    ) -> Result<u32> {
        if cert.alias != identity.guid || &cert.body.subject != app {
            return Err(TrustError::InvalidArgument(
                "identity certificate does not match application and identity".into(),
            ));
        }
        let manifest_bytes = manifest.to_bytes()?;

        let version = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin update identity"))?;

            let version = bump_pending(&tx, app)?;
            put_identity_certificate(&tx, cert)?;
            tx.execute(
                "UPDATE claimed_applications SET MANIFEST = ?1 WHERE PUBKEY = ?2",
                params![manifest_bytes, app.as_bytes()],
            )
            .map_err(db_err("store manifest"))?;
            tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
                .map_err(db_err("remove orphaned certificates"))?;
            tx.commit().map_err(db_err("commit update identity"))?;
            version
        };

        info!(version, "identity updated");
        self.notify(StorageEvent::PendingChanges(vec![app.clone()]));
        Ok(version)
    }

    /// The stored policy, or `None` if no policy was installed yet.
    pub fn get_policy(&self, app: &PublicKey) -> Result<Option<PermissionPolicy>> {
        Ok(self.get_managed_application(app)?.policy)
    }

    pub fn get_manifest(&self, app: &PublicKey) -> Result<Manifest> {
        Ok(self.get_managed_application(app)?.manifest)
    }

    pub fn get_identity_certificate(&self, app: &PublicKey) -> Result<IdentityCertificate> {
        let conn = self.read()?;
        let data_id: String = conn
            .query_row(
                "SELECT DATA_ID FROM identity_certificates WHERE SUBJECT = ?1",
                params![app.as_bytes()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("get identity certificate"))?
            .ok_or_else(|| not_claimed(app))?;

        match load_certificate(&conn, &data_id)? {
            Certificate::Identity(cert) => Ok(cert),
            _ => Err(TrustError::Io(format!("certificate {data_id} is not an identity certificate"))),
        }
    }

    /// Persist a membership certificate for its subject. Bumps the policy
    /// version and returns it.
    #[instrument(skip(self, cert), fields(app = %cert.body.subject, group = %cert.guild))]
    pub fn store_membership_certificate(&self, cert: &MembershipCertificate) -> Result<u32> {
        let app = &cert.body.subject;
        let version = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin store membership"))?;

            let version = bump_pending(&tx, app)?;
            let data_id = put_certificate(&tx, &Certificate::from(cert.clone()))?;
            tx.execute(
                "INSERT INTO membership_certificates (SUBJECT, GUILD, SERIAL, ISSUER, DATA_ID)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (SUBJECT, GUILD) DO UPDATE SET SERIAL = excluded.SERIAL,
                     ISSUER = excluded.ISSUER, DATA_ID = excluded.DATA_ID",
                params![
                    app.as_bytes(),
                    cert.guild.to_string(),
                    cert.body.serial.as_str(),
                    cert.body.issuer.as_bytes(),
                    data_id
                ],
            )
            .map_err(db_err("store membership certificate"))?;
            tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
                .map_err(db_err("remove orphaned certificates"))?;
            tx.commit().map_err(db_err("commit store membership"))?;
            version
        };

        debug!(version, "membership certificate stored");
        self.notify(StorageEvent::PendingChanges(vec![app.clone()]));
        Ok(version)
    }

    /// Drop the membership of `app` in `guild`. Bumps the policy version
    /// and returns it.
    #[instrument(skip(self), fields(app = %app, group = %guild))]
    pub fn remove_membership_certificate(&self, app: &PublicKey, guild: &Guid) -> Result<u32> {
        let version = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin remove membership"))?;

            let rows = tx
                .execute(
                    "DELETE FROM membership_certificates WHERE SUBJECT = ?1 AND GUILD = ?2",
                    params![app.as_bytes(), guild.to_string()],
                )
                .map_err(db_err("remove membership certificate"))?;
            if rows == 0 {
                return Err(TrustError::NotFound(format!("membership of {app} in group {guild}")));
            }

            let version = bump_pending(&tx, app)?;
            tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
                .map_err(db_err("remove orphaned certificates"))?;
            tx.commit().map_err(db_err("commit remove membership"))?;
            version
        };

        debug!(version, "membership certificate removed");
        self.notify(StorageEvent::PendingChanges(vec![app.clone()]));
        Ok(version)
    }

    pub fn get_membership_certificates(&self, app: &PublicKey) -> Result<Vec<MembershipCertificate>> {
        let conn = self.read()?;
        let mut stmt = conn
            .prepare("SELECT DATA_ID FROM membership_certificates WHERE SUBJECT = ?1 ORDER BY GUILD")
            .map_err(db_err("list memberships"))?;
        let ids = stmt
            .query_map(params![app.as_bytes()], |row| row.get::<_, String>(0))
            .map_err(db_err("list memberships"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("read membership"))?;

        ids.iter()
            .map(|id| match load_certificate(&conn, id)? {
                Certificate::Membership(cert) => Ok(cert),
                _ => Err(TrustError::Io(format!("certificate {id} is not a membership certificate"))),
            })
            .collect()
    }

    #[instrument(skip(self, cert), fields(app = %cert.body.subject))]
    pub fn store_user_equivalence_certificate(&self, cert: &UserEquivalenceCertificate) -> Result<()> {
        let app = &cert.body.subject;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("begin store user equivalence"))?;

        if read_application(&tx, app)?.is_none() {
            return Err(not_claimed(app));
        }
        let data_id = put_certificate(&tx, &Certificate::from(cert.clone()))?;
        tx.execute(
            "INSERT INTO user_equivalence_certificates (SUBJECT, SERIAL, ISSUER, DATA_ID)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (SUBJECT) DO UPDATE SET SERIAL = excluded.SERIAL,
                 ISSUER = excluded.ISSUER, DATA_ID = excluded.DATA_ID",
            params![
                app.as_bytes(),
                cert.body.serial.as_str(),
                cert.body.issuer.as_bytes(),
                data_id
            ],
        )
        .map_err(db_err("store user equivalence certificate"))?;
        tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
            .map_err(db_err("remove orphaned certificates"))?;
        tx.commit().map_err(db_err("commit store user equivalence"))?;
        Ok(())
    }

    pub fn get_user_equivalence_certificate(
        &self,
        app: &PublicKey,
    ) -> Result<Option<UserEquivalenceCertificate>> {
        let conn = self.read()?;
        let data_id: Option<String> = conn
            .query_row(
                "SELECT DATA_ID FROM user_equivalence_certificates WHERE SUBJECT = ?1",
                params![app.as_bytes()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("get user equivalence certificate"))?;

        match data_id {
            None => Ok(None),
            Some(id) => match load_certificate(&conn, &id)? {
                Certificate::UserEquivalence(cert) => Ok(Some(cert)),
                _ => Err(TrustError::Io(format!(
                    "certificate {id} is not a user equivalence certificate"
                ))),
            },
        }
    }

    /// Delete a claimed application and, by cascade, its certificates.
    #[instrument(skip(self), fields(app = %app))]
    pub fn remove_application(&self, app: &PublicKey) -> Result<()> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin remove application"))?;
            let rows = tx
                .execute(
                    "DELETE FROM claimed_applications WHERE PUBKEY = ?1",
                    params![app.as_bytes()],
                )
                .map_err(db_err("remove application"))?;
            if rows == 0 {
                return Err(not_claimed(app));
            }
            tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
                .map_err(db_err("remove orphaned certificates"))?;
            tx.commit().map_err(db_err("commit remove application"))?;
        }

        info!("claimed application removed");
        self.notify(StorageEvent::ApplicationsRemoved(vec![app.clone()]));
        Ok(())
    }

    /// Record that the peer now runs policy `version`.
    ///
    /// Completes the pending delivery only if `app` is pending and `version`
    /// is the current stored version; returns whether it did. A stale
    /// confirmation leaves the application pending.
    #[instrument(skip(self), fields(app = %app))]
    pub fn mark_synchronized(&self, app: &PublicKey, version: u32) -> Result<bool> {
        let (completed, stored) = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin mark synchronized"))?;
            let claimed = read_application(&tx, app)?.ok_or_else(|| not_claimed(app))?;

            if claimed.sync_state == SyncState::Pending && claimed.policy_version == version {
                tx.execute(
                    "UPDATE claimed_applications SET SYNC_STATE = ?1 WHERE PUBKEY = ?2",
                    params![SyncState::Ok.to_db(), app.as_bytes()],
                )
                .map_err(db_err("mark synchronized"))?;
                tx.commit().map_err(db_err("commit mark synchronized"))?;
                (true, claimed.policy_version)
            } else {
                (false, claimed.policy_version)
            }
        };

        if completed {
            debug!(version, "pending changes completed");
            self.notify(StorageEvent::PendingChangesCompleted(vec![app.clone()]));
        } else if version < stored {
            warn!(version, stored, "peer confirmed an outdated configuration");
        }
        Ok(completed)
    }
}

fn read_application(conn: &Connection, app: &PublicKey) -> Result<Option<ClaimedApplication>> {
    conn.query_row(
        &format!("SELECT {APPLICATION_COLUMNS} FROM claimed_applications WHERE PUBKEY = ?1"),
        params![app.as_bytes()],
        ApplicationRow::read,
    )
    .optional()
    .map_err(db_err("read application"))?
    .map(ApplicationRow::decode)
    .transpose()
}

fn put_identity_certificate(conn: &Connection, cert: &IdentityCertificate) -> Result<()> {
    let data_id = put_certificate(conn, &Certificate::from(cert.clone()))?;
    conn.execute(
        "INSERT INTO identity_certificates (SUBJECT, ALIAS, SERIAL, ISSUER, DATA_ID)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (SUBJECT) DO UPDATE SET ALIAS = excluded.ALIAS, SERIAL = excluded.SERIAL,
             ISSUER = excluded.ISSUER, DATA_ID = excluded.DATA_ID",
        params![
            cert.body.subject.as_bytes(),
            cert.alias.to_string(),
            cert.body.serial.as_str(),
            cert.body.issuer.as_bytes(),
            data_id
        ],
    )
    .map_err(db_err("store identity certificate"))?;
    Ok(())
}
