// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite schema of the trust store.
//
// Certificate tables reference `claimed_applications` with ON DELETE CASCADE,
// so deleting an application row removes all of its certificates. Foreign
// keys are only enforced with `PRAGMA foreign_keys = ON`, which the store sets
// on every connection it opens.

pub(crate) const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS groups (
        ID TEXT PRIMARY KEY,
        AUTHORITY BLOB NOT NULL,
        NAME TEXT NOT NULL,
        DESC TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS identities (
        ID TEXT PRIMARY KEY,
        AUTHORITY BLOB NOT NULL,
        NAME TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS claimed_applications (
        PUBKEY BLOB PRIMARY KEY,
        PEER_ID TEXT NOT NULL,
        APP_NAME TEXT NOT NULL DEFAULT '',
        DEV_NAME TEXT NOT NULL DEFAULT '',
        USER_DEF_NAME TEXT NOT NULL DEFAULT '',
        MANIFEST BLOB NOT NULL,
        POLICY BLOB,
        POLICY_VERSION INTEGER NOT NULL DEFAULT 0,
        SYNC_STATE INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS certs_data (
        ID TEXT PRIMARY KEY,
        DATA BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS identity_certificates (
        SUBJECT BLOB PRIMARY KEY
            REFERENCES claimed_applications (PUBKEY) ON DELETE CASCADE,
        ALIAS TEXT NOT NULL REFERENCES identities (ID),
        SERIAL TEXT NOT NULL,
        ISSUER BLOB NOT NULL,
        DATA_ID TEXT NOT NULL REFERENCES certs_data (ID)
    );

    CREATE TABLE IF NOT EXISTS membership_certificates (
        SUBJECT BLOB NOT NULL
            REFERENCES claimed_applications (PUBKEY) ON DELETE CASCADE,
        GUILD TEXT NOT NULL REFERENCES groups (ID),
        SERIAL TEXT NOT NULL,
        ISSUER BLOB NOT NULL,
        DATA_ID TEXT NOT NULL REFERENCES certs_data (ID),
        PRIMARY KEY (SUBJECT, GUILD)
    );

    CREATE TABLE IF NOT EXISTS user_equivalence_certificates (
        SUBJECT BLOB PRIMARY KEY
            REFERENCES claimed_applications (PUBKEY) ON DELETE CASCADE,
        SERIAL TEXT NOT NULL,
        ISSUER BLOB NOT NULL,
        DATA_ID TEXT NOT NULL REFERENCES certs_data (ID)
    );

    CREATE INDEX IF NOT EXISTS identity_certificates_alias
        ON identity_certificates (ALIAS);
    CREATE INDEX IF NOT EXISTS membership_certificates_guild
        ON membership_certificates (GUILD);

    CREATE TABLE IF NOT EXISTS serial_number (
        VALUE INTEGER NOT NULL
    );

    INSERT INTO serial_number (VALUE)
        SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM serial_number);
"#;

/// Blobs no certificate row points at any more.
pub(crate) const DELETE_ORPHANED_CERTS_SQL: &str = r#"
    DELETE FROM certs_data WHERE ID NOT IN (
        SELECT DATA_ID FROM identity_certificates
        UNION SELECT DATA_ID FROM membership_certificates
        UNION SELECT DATA_ID FROM user_equivalence_certificates
    )
"#;
