// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable trust store backed by SQLite.
//
// The store owns identities, groups, claimed applications and their
// certificates, policies and manifests. Every mutation runs in one SQLite
// transaction under the writer lock, so a failed mutation leaves the
// previous state untouched. Listener events are sent after the lock is
// released.
//
// File-backed stores open a second, read-only connection for queries. With
// WAL, readers see the last committed state and never queue behind a
// writer. In-memory databases cannot be shared across connections, so there
// reads go through the writer connection.
//
// All methods are synchronous because `rusqlite` does not support async
// natively. Each call is a short local transaction; no network I/O ever
// happens under the lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, instrument};
use trustmgr_core::config::SecurityConfig;
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{GroupInfo, Guid, IdentityInfo, PublicKey, SyncState};
use trustmgr_security::{Certificate, SerialNumber, integrity};

use crate::events::{ListenerId, ListenerRegistry, StorageEvent, Subscription};
use crate::records::{group_from_row, identity_from_row, version_from_db};
use crate::schema::{CREATE_TABLES_SQL, DELETE_ORPHANED_CERTS_SQL};

/// Map a SQLite error, keeping constraint failures distinguishable.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> TrustError {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            TrustError::ConstraintViolation(format!("{context}: {e}"))
        }
        _ => TrustError::Io(format!("{context}: {e}")),
    }
}

pub(crate) fn not_claimed(key: &PublicKey) -> TrustError {
    TrustError::NotFound(format!("claimed application {key}"))
}

// ---------------------------------------------------------------------------
// Reset barrier
// ---------------------------------------------------------------------------

/// Counts claim/update operations in flight so that `reset` can refuse to
/// run underneath them.
#[derive(Debug, Default)]
struct OperationGate {
    in_flight: Mutex<usize>,
}

impl OperationGate {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held for the duration of a multi-step operation; see
/// [`TrustStore::begin_operation`].
#[derive(Debug)]
pub struct OperationPermit {
    gate: Arc<OperationGate>,
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        let mut in_flight = self.gate.lock();
        *in_flight = in_flight.saturating_sub(1);
    }
}

// ---------------------------------------------------------------------------
// TrustStore
// ---------------------------------------------------------------------------

/// SQLite-backed repository of trust state.
pub struct TrustStore {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    listeners: ListenerRegistry<StorageEvent>,
    gate: Arc<OperationGate>,
}

impl TrustStore {
    /// Open (or create) the trust store database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;

        // WAL lets readers proceed while a writer commits.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;

        let mut store = Self::init(conn)?;
        let reader = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
            .map_err(db_err("open reader"))?;
        store.reader = Some(Mutex::new(reader));
        info!("trust store database opened");
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        let store = Self::init(conn)?;
        debug!("in-memory trust store opened");
        Ok(store)
    }

    /// Open the database configured in `config`, in memory when unset.
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        match &config.storage_path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err("foreign keys pragma"))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(db_err("create tables"))?;

        Ok(Self {
            conn: Mutex::new(conn),
            reader: None,
            listeners: ListenerRegistry::new(),
            gate: Arc::new(OperationGate::default()),
        })
    }

    /// The writer connection.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TrustError::Io("trust store lock poisoned".into()))
    }

    /// Connection for queries: the read-only one when the store has it.
    pub(crate) fn read(&self) -> Result<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|_| TrustError::Io("trust store reader lock poisoned".into())),
            None => self.lock(),
        }
    }

    pub(crate) fn notify(&self, event: StorageEvent) {
        debug!(?event, "storage event");
        self.listeners.notify(event);
    }

    // -- Listeners ----------------------------------------------------------

    pub fn register_listener(&self) -> Subscription<StorageEvent> {
        self.listeners.register()
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    // -- Barrier ------------------------------------------------------------

    /// Mark the start of a claim or update. `reset` fails while any permit
    /// is alive.
    pub fn begin_operation(&self) -> OperationPermit {
        *self.gate.lock() += 1;
        OperationPermit {
            gate: Arc::clone(&self.gate),
        }
    }

    /// Wipe all claimed applications, certificates, manifests and policies.
    /// Identities and groups are kept.
    ///
    /// Fails with `InvalidState` while a claim or update is in flight.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        let in_flight = self.gate.lock();
        if *in_flight > 0 {
            return Err(TrustError::InvalidState(format!(
                "cannot reset with {} operation(s) in flight",
                *in_flight
            )));
        }

        {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin reset"))?;
            tx.execute("DELETE FROM claimed_applications", [])
                .map_err(db_err("reset applications"))?;
            tx.execute("DELETE FROM certs_data", [])
                .map_err(db_err("reset certificates"))?;
            tx.commit().map_err(db_err("commit reset"))?;
        }
        drop(in_flight);

        info!("trust store reset");
        self.notify(StorageEvent::StorageReset);
        Ok(())
    }

    /// Next value of the persisted certificate serial counter.
    pub fn next_serial_number(&self) -> Result<SerialNumber> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("begin serial"))?;
        let value: i64 = tx
            .query_row("SELECT VALUE FROM serial_number", [], |row| row.get(0))
            .map_err(db_err("read serial"))?;
        tx.execute("UPDATE serial_number SET VALUE = VALUE + 1", [])
            .map_err(db_err("advance serial"))?;
        tx.commit().map_err(db_err("commit serial"))?;

        let value = u64::try_from(value)
            .map_err(|_| TrustError::Io(format!("serial counter {value} out of range")))?;
        Ok(SerialNumber::from_counter(value))
    }

    // -- Identities ---------------------------------------------------------

    /// Insert or overwrite an identity (last write wins).
    #[instrument(skip(self, identity), fields(guid = %identity.guid))]
    pub fn store_identity(&self, identity: &IdentityInfo) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO identities (ID, AUTHORITY, NAME) VALUES (?1, ?2, ?3)
                 ON CONFLICT (ID) DO UPDATE SET AUTHORITY = excluded.AUTHORITY, NAME = excluded.NAME",
                params![
                    identity.guid.to_string(),
                    identity.authority.as_bytes(),
                    identity.name
                ],
            )
            .map_err(db_err("store identity"))?;
        debug!(name = %identity.name, "identity stored");
        Ok(())
    }

    pub fn get_identity(&self, guid: &Guid) -> Result<IdentityInfo> {
        let row = self
            .read()?
            .query_row(
                "SELECT ID, AUTHORITY, NAME FROM identities WHERE ID = ?1",
                params![guid.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err("get identity"))?;

        let (id, authority, name) =
            row.ok_or_else(|| TrustError::NotFound(format!("identity {guid}")))?;
        identity_from_row(id, authority, name)
    }

    pub fn get_identities(&self) -> Result<Vec<IdentityInfo>> {
        let conn = self.read()?;
        let mut stmt = conn
            .prepare("SELECT ID, AUTHORITY, NAME FROM identities ORDER BY NAME, ID")
            .map_err(db_err("list identities"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err("list identities"))?;

        rows.map(|row| {
            let (id, authority, name) = row.map_err(db_err("read identity"))?;
            identity_from_row(id, authority, name)
        })
        .collect()
    }

    /// Delete an identity together with every claimed application using it.
    ///
    /// Returns the public keys of the removed applications.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn remove_identity(&self, guid: &Guid) -> Result<Vec<PublicKey>> {
        let removed = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin remove identity"))?;

            let removed = select_keys(
                &tx,
                "SELECT SUBJECT FROM identity_certificates WHERE ALIAS = ?1 ORDER BY SUBJECT",
                &guid.to_string(),
            )?;
            for key in &removed {
                tx.execute(
                    "DELETE FROM claimed_applications WHERE PUBKEY = ?1",
                    params![key.as_bytes()],
                )
                .map_err(db_err("remove dependent application"))?;
            }

            let rows = tx
                .execute("DELETE FROM identities WHERE ID = ?1", params![guid.to_string()])
                .map_err(db_err("remove identity"))?;
            if rows == 0 {
                return Err(TrustError::NotFound(format!("identity {guid}")));
            }

            tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
                .map_err(db_err("remove orphaned certificates"))?;
            tx.commit().map_err(db_err("commit remove identity"))?;
            removed
        };

        info!(applications = removed.len(), "identity removed");
        if !removed.is_empty() {
            self.notify(StorageEvent::ApplicationsRemoved(removed.clone()));
        }
        Ok(removed)
    }

    // -- Groups -------------------------------------------------------------

    /// Insert or overwrite a group (last write wins).
    #[instrument(skip(self, group), fields(guid = %group.guid))]
    pub fn store_group(&self, group: &GroupInfo) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO groups (ID, AUTHORITY, NAME, DESC) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (ID) DO UPDATE SET AUTHORITY = excluded.AUTHORITY,
                     NAME = excluded.NAME, DESC = excluded.DESC",
                params![
                    group.guid.to_string(),
                    group.authority.as_bytes(),
                    group.name,
                    group.description
                ],
            )
            .map_err(db_err("store group"))?;
        debug!(name = %group.name, "group stored");
        Ok(())
    }

    pub fn get_group(&self, guid: &Guid) -> Result<GroupInfo> {
        let row = self
            .read()?
            .query_row(
                "SELECT ID, AUTHORITY, NAME, DESC FROM groups WHERE ID = ?1",
                params![guid.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err("get group"))?;

        let (id, authority, name, description) =
            row.ok_or_else(|| TrustError::NotFound(format!("group {guid}")))?;
        group_from_row(id, authority, name, description)
    }

    pub fn get_groups(&self) -> Result<Vec<GroupInfo>> {
        let conn = self.read()?;
        let mut stmt = conn
            .prepare("SELECT ID, AUTHORITY, NAME, DESC FROM groups ORDER BY NAME, ID")
            .map_err(db_err("list groups"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err("list groups"))?;

        rows.map(|row| {
            let (id, authority, name, description) = row.map_err(db_err("read group"))?;
            group_from_row(id, authority, name, description)
        })
        .collect()
    }

    /// Delete a group and strip its membership certificates.
    ///
    /// Applications that held a membership stay claimed; their policy
    /// version is bumped and they become pending. Returns their keys.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn remove_group(&self, guid: &Guid) -> Result<Vec<PublicKey>> {
        let affected = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err("begin remove group"))?;

            let affected = select_keys(
                &tx,
                "SELECT SUBJECT FROM membership_certificates WHERE GUILD = ?1 ORDER BY SUBJECT",
                &guid.to_string(),
            )?;
            tx.execute(
                "DELETE FROM membership_certificates WHERE GUILD = ?1",
                params![guid.to_string()],
            )
            .map_err(db_err("remove memberships"))?;

            let rows = tx
                .execute("DELETE FROM groups WHERE ID = ?1", params![guid.to_string()])
                .map_err(db_err("remove group"))?;
            if rows == 0 {
                return Err(TrustError::NotFound(format!("group {guid}")));
            }

            for key in &affected {
                bump_pending(&tx, key)?;
            }
            tx.execute_batch(DELETE_ORPHANED_CERTS_SQL)
                .map_err(db_err("remove orphaned certificates"))?;
            tx.commit().map_err(db_err("commit remove group"))?;
            affected
        };

        info!(applications = affected.len(), "group removed");
        if !affected.is_empty() {
            self.notify(StorageEvent::PendingChanges(affected.clone()));
        }
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

fn select_keys(conn: &Connection, sql: &str, param: &str) -> Result<Vec<PublicKey>> {
    let mut stmt = conn.prepare(sql).map_err(db_err("prepare key query"))?;
    let rows = stmt
        .query_map(params![param], |row| row.get::<_, Vec<u8>>(0))
        .map_err(db_err("query keys"))?;
    rows.map(|row| PublicKey::from_sec1(&row.map_err(db_err("read key"))?))
        .collect()
}

/// Increment the stored policy version of `key` and mark it pending.
pub(crate) fn bump_pending(conn: &Connection, key: &PublicKey) -> Result<u32> {
    let current: i64 = conn
        .query_row(
            "SELECT POLICY_VERSION FROM claimed_applications WHERE PUBKEY = ?1",
            params![key.as_bytes()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("read policy version"))?
        .ok_or_else(|| not_claimed(key))?;

    let next = version_from_db(current)?
        .checked_add(1)
        .ok_or_else(|| TrustError::InvalidState(format!("policy version of {key} exhausted")))?;

    conn.execute(
        "UPDATE claimed_applications SET POLICY_VERSION = ?1, SYNC_STATE = ?2 WHERE PUBKEY = ?3",
        params![next, SyncState::Pending.to_db(), key.as_bytes()],
    )
    .map_err(db_err("bump policy version"))?;
    Ok(next)
}

/// Store a certificate blob under its SHA-256 and return the id.
pub(crate) fn put_certificate(conn: &Connection, cert: &Certificate) -> Result<String> {
    let bytes = cert.to_bytes()?;
    let id = integrity::hash_hex(&bytes);
    conn.execute(
        "INSERT OR IGNORE INTO certs_data (ID, DATA) VALUES (?1, ?2)",
        params![id, bytes],
    )
    .map_err(db_err("store certificate data"))?;
    Ok(id)
}

/// Load a certificate blob, checking it against its content address.
pub(crate) fn load_certificate(conn: &Connection, data_id: &str) -> Result<Certificate> {
    let bytes: Vec<u8> = conn
        .query_row(
            "SELECT DATA FROM certs_data WHERE ID = ?1",
            params![data_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("load certificate data"))?
        .ok_or_else(|| TrustError::NotFound(format!("certificate data {data_id}")))?;

    integrity::verify_hash(&bytes, data_id)?;
    Certificate::from_bytes(&bytes)
}
