// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Live security state of discovered peers.
//
// The monitor keeps one `Application` per public key seen on the network and
// notifies subscribers whenever a peer's claim or sync state actually
// changes. Routing data (bus name, session hint) is refreshed silently.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use trustmgr_core::types::{Announcement, Application, ClaimState, PublicKey, SyncState};
use trustmgr_storage::{ListenerId, ListenerRegistry, Subscription};

/// A security state transition. `old` is `None` for a newly discovered peer,
/// `new` is `None` for a peer that left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityStateChange {
    pub old: Option<Application>,
    pub new: Option<Application>,
}

#[derive(Debug, Default)]
pub struct ApplicationMonitor {
    apps: RwLock<HashMap<PublicKey, Application>>,
    listeners: ListenerRegistry<SecurityStateChange>,
}

impl ApplicationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement. Returns `true` if the peer was not known.
    pub fn announce(&self, announcement: &Announcement) -> bool {
        let change = {
            let mut apps = self.write();
            match apps.get_mut(&announcement.public_key) {
                Some(app) => {
                    app.bus_name = Some(announcement.bus_address.clone());
                    app.session_id = announcement.session_hint;
                    None
                }
                None => {
                    let mut app = Application::new(announcement.public_key.clone());
                    app.bus_name = Some(announcement.bus_address.clone());
                    app.session_id = announcement.session_hint;
                    apps.insert(app.public_key.clone(), app.clone());
                    Some(SecurityStateChange {
                        old: None,
                        new: Some(app),
                    })
                }
            }
        };

        match change {
            Some(change) => {
                debug!(app = %announcement.public_key, bus = %announcement.bus_address, "peer discovered");
                self.listeners.notify(change);
                true
            }
            None => false,
        }
    }

    pub fn update_state(&self, key: &PublicKey, claim_state: ClaimState) -> bool {
        self.update(key, Some(claim_state), None)
    }

    pub fn set_sync_state(&self, key: &PublicKey, sync_state: SyncState) -> bool {
        self.update(key, None, Some(sync_state))
    }

    /// Apply a state change to a known peer. Returns `true` if anything
    /// changed; unknown peers are ignored.
    pub fn update(&self, key: &PublicKey, claim_state: Option<ClaimState>, sync_state: Option<SyncState>) -> bool {
        let change = {
            let mut apps = self.write();
            let Some(app) = apps.get_mut(key) else {
                return false;
            };

            let old = app.clone();
            if let Some(state) = claim_state {
                app.claim_state = state;
            }
            if let Some(state) = sync_state {
                app.sync_state = state;
            }

            if app.claim_state == old.claim_state && app.sync_state == old.sync_state {
                return false;
            }
            SecurityStateChange {
                old: Some(old),
                new: Some(app.clone()),
            }
        };

        if let (Some(old), Some(new)) = (&change.old, &change.new) {
            debug!(
                app = %key,
                from = %old.claim_state,
                to = %new.claim_state,
                sync = ?new.sync_state,
                "security state changed"
            );
        }
        self.listeners.notify(change);
        true
    }

    /// Forget a peer that left the network.
    pub fn remove(&self, key: &PublicKey) -> Option<Application> {
        let removed = self.write().remove(key)?;
        debug!(app = %key, "peer left");
        self.listeners.notify(SecurityStateChange {
            old: Some(removed.clone()),
            new: None,
        });
        Some(removed)
    }

    pub fn get_application(&self, key: &PublicKey) -> Option<Application> {
        self.read().get(key).cloned()
    }

    /// Snapshot of known peers, optionally restricted to one claim state.
    pub fn get_applications(&self, filter: Option<ClaimState>) -> Vec<Application> {
        let mut apps: Vec<_> = self
            .read()
            .values()
            .filter(|app| filter.is_none_or(|state| app.claim_state == state))
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        apps
    }

    pub fn subscribe(&self) -> Subscription<SecurityStateChange> {
        self.listeners.register()
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PublicKey, Application>> {
        self.apps.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PublicKey, Application>> {
        self.apps.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
