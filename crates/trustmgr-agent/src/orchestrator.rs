// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Claim orchestration: drives peers through UNKNOWN -> CLAIMABLE -> CLAIMED
// and keeps the trust store, the live monitor and the remote peers in step.
//
// A claim is persisted only after the peer confirmed installation. Updates
// take the opposite route: the version bump is persisted first, then the
// artifact is delivered and the store is told once the peer acknowledged it.
// A failed delivery leaves the application pending; `synchronize` retries it
// without bumping the version again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use trustmgr_core::config::SecurityConfig;
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{
    AnnouncementEvent, Application, ClaimState, GroupInfo, Guid, PublicKey, SyncState,
};
use trustmgr_security::{
    CertificateFactory, Clock, Manifest, PermissionPolicy, PolicyGenerator, SigningKey,
    X509Certificate,
};
use trustmgr_storage::{ClaimedApplication, StorageEvent, TrustStore};

use crate::approval::{AcceptAll, ManifestApprover};
use crate::monitor::ApplicationMonitor;
use crate::session::SessionProvider;

/// Coordinates claims and configuration updates of remote applications.
pub struct ClaimOrchestrator {
    store: Arc<TrustStore>,
    monitor: Arc<ApplicationMonitor>,
    sessions: Arc<dyn SessionProvider>,
    approver: Arc<dyn ManifestApprover>,
    /// Root of trust signing every issued certificate.
    ca: SigningKey,
    factory: CertificateFactory,
    config: SecurityConfig,
    /// Applications with a claim in flight.
    claiming: Mutex<HashSet<PublicKey>>,
}

impl ClaimOrchestrator {
    pub fn new(
        store: Arc<TrustStore>,
        monitor: Arc<ApplicationMonitor>,
        sessions: Arc<dyn SessionProvider>,
        ca: SigningKey,
        config: SecurityConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let factory = CertificateFactory::from_config(ca.public_key().clone(), &config, clock);
        Ok(Self {
            store,
            monitor,
            sessions,
            approver: Arc::new(AcceptAll),
            ca,
            factory,
            config,
            claiming: Mutex::new(HashSet::new()),
        })
    }

    /// Replace the default approver, which accepts every manifest.
    pub fn with_approver(mut self, approver: Arc<dyn ManifestApprover>) -> Self {
        self.approver = approver;
        self
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<ApplicationMonitor> {
        &self.monitor
    }

    /// Policy generator for this deployment, denying the configured peers.
    pub fn policy_generator(&self, admin_group: Option<GroupInfo>) -> PolicyGenerator {
        PolicyGenerator::new(admin_group, self.config.deny_list.clone())
    }

    // -- Claim ----------------------------------------------------------------

    /// Claim `app` on behalf of the stored identity `identity`.
    ///
    /// The application must be live and CLAIMABLE. Nothing is persisted
    /// unless the peer confirmed installation of the identity certificate.
    #[instrument(skip(self), fields(app = %app, identity = %identity))]
    pub async fn claim(&self, app: &PublicKey, identity: &Guid) -> Result<ClaimedApplication> {
        let _claiming = ClaimGuard::acquire(&self.claiming, app)?;

        let live = self.live_application(app)?;
        if live.claim_state != ClaimState::Claimable {
            return Err(TrustError::InvalidState(format!(
                "application {app} is {} and cannot be claimed",
                live.claim_state
            )));
        }
        let identity = self.store.get_identity(identity)?;
        let _permit = self.store.begin_operation();

        let mut cert = self.factory.to_identity_certificate(
            &live,
            &identity,
            self.config.identity_validity_seconds,
            self.store.next_serial_number()?,
        )?;
        cert.sign(&self.ca)?;

        let mut session = self.sessions.open_secure_session(&live).await?;
        let manifest = session.get_manifest_template().await?;
        if !self.approver.approve(&live, &manifest).await {
            info!("manifest rejected, claim aborted");
            return Err(TrustError::ManifestRejected);
        }
        session.install_identity(&cert, &manifest).await?;

        let claimed = match self.store.finish_claim(app, &session.peer_id(), &cert, &manifest) {
            Ok(claimed) => claimed,
            // A claim already on record is kept; the peer is not reset.
            Err(e @ TrustError::AlreadyExists(_)) => {
                warn!("application is already claimed in the trust store");
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "peer accepted the claim but it could not be persisted");
                if let Err(reset) = session.reset().await {
                    warn!(error = %reset, "could not roll back the peer");
                }
                return Err(e);
            }
        };

        self.monitor
            .update(app, Some(ClaimState::Claimed), Some(SyncState::Ok));
        info!("claim completed");
        Ok(claimed)
    }

    /// Reset the remote peer and forget the claimed application.
    #[instrument(skip(self), fields(app = %app))]
    pub async fn unclaim(&self, app: &PublicKey) -> Result<()> {
        let live = self.reachable(app)?;
        self.store.get_managed_application(app)?;
        let _permit = self.store.begin_operation();

        let mut session = self.sessions.open_secure_session(&live).await?;
        session.reset().await?;
        self.store.remove_application(app)?;

        self.monitor
            .update(app, Some(ClaimState::Claimable), Some(SyncState::Unmanaged));
        info!("application unclaimed");
        Ok(())
    }

    // -- Updates --------------------------------------------------------------

    /// Persist a new policy for `app` and deliver it.
    ///
    /// The stored version is bumped before delivery. On `NetworkFailure` the
    /// application stays pending and `synchronize` can finish the job.
    #[instrument(skip(self, policy), fields(app = %app))]
    pub async fn update_policy(&self, app: &PublicKey, policy: &PermissionPolicy) -> Result<PermissionPolicy> {
        let _permit = self.store.begin_operation();
        let stored = self.store.update_policy(app, policy)?;
        self.monitor.set_sync_state(app, SyncState::Pending);
        self.deliver(app).await?;
        Ok(stored)
    }

    /// Re-issue the identity certificate of `app` for `identity` and store
    /// `manifest` alongside it. Returns the bumped policy version.
    #[instrument(skip(self, manifest), fields(app = %app, identity = %identity))]
    pub async fn update_identity(&self, app: &PublicKey, identity: &Guid, manifest: &Manifest) -> Result<u32> {
        let identity = self.store.get_identity(identity)?;
        self.store.get_managed_application(app)?;
        let _permit = self.store.begin_operation();

        let subject = Application::new(app.clone());
        let mut cert = self.factory.to_identity_certificate(
            &subject,
            &identity,
            self.config.identity_validity_seconds,
            self.store.next_serial_number()?,
        )?;
        cert.sign(&self.ca)?;

        let version = self.store.update_identity(app, &identity, &cert, manifest)?;
        self.monitor.set_sync_state(app, SyncState::Pending);
        self.deliver(app).await?;
        Ok(version)
    }

    /// Issue a membership certificate of `group` for `app` and deliver it.
    /// Returns the bumped policy version.
    #[instrument(skip(self), fields(app = %app, group = %group))]
    pub async fn install_membership(&self, app: &PublicKey, group: &Guid) -> Result<u32> {
        let group = self.store.get_group(group)?;
        self.store.get_managed_application(app)?;
        let _permit = self.store.begin_operation();

        let subject = Application::new(app.clone());
        let mut cert = self.factory.to_membership_certificate(
            &subject,
            &group,
            self.config.membership_validity_seconds,
            self.store.next_serial_number()?,
        )?;
        cert.sign(&self.ca)?;

        let version = self.store.store_membership_certificate(&cert)?;
        self.monitor.set_sync_state(app, SyncState::Pending);
        self.deliver(app).await?;
        Ok(version)
    }

    /// Drop the membership of `app` in `group` and remove it from the peer.
    /// Returns the bumped policy version.
    #[instrument(skip(self), fields(app = %app, group = %group))]
    pub async fn remove_membership(&self, app: &PublicKey, group: &Guid) -> Result<u32> {
        let _permit = self.store.begin_operation();
        let version = self.store.remove_membership_certificate(app, group)?;
        self.monitor.set_sync_state(app, SyncState::Pending);
        self.deliver(app).await?;
        Ok(version)
    }

    /// Generate and install the default policy for `app`: full access for
    /// the admin group and for every group `app` is a member of.
    #[instrument(skip(self), fields(app = %app))]
    pub async fn apply_default_policy(&self, app: &PublicKey, admin_group: Option<&Guid>) -> Result<PermissionPolicy> {
        let admin = admin_group.map(|guid| self.store.get_group(guid)).transpose()?;

        let mut groups = Vec::new();
        for cert in self.store.get_membership_certificates(app)? {
            if admin.as_ref().is_some_and(|admin| admin.guid == cert.guild) {
                continue;
            }
            groups.push(self.store.get_group(&cert.guild)?);
        }

        let policy = self.policy_generator(admin).default_policy(&groups)?;
        self.update_policy(app, &policy).await
    }

    /// Deliver the stored configuration of a pending application.
    ///
    /// Returns `true` once the peer runs the current version, `false` if the
    /// peer is offline or a newer update overtook this delivery.
    #[instrument(skip(self), fields(app = %app))]
    pub async fn synchronize(&self, app: &PublicKey) -> Result<bool> {
        let Some(live) = self.monitor.get_application(app) else {
            debug!("peer offline, delivery deferred");
            return Ok(false);
        };
        let _permit = self.store.begin_operation();
        self.push(&live).await
    }

    // -- Definitions with live consequences ------------------------------------

    /// Remove a stored identity. Applications claimed with it are unclaimed:
    /// live peers are reset best-effort and return to CLAIMABLE.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn remove_identity(&self, identity: &Guid) -> Result<Vec<PublicKey>> {
        let removed = self.store.remove_identity(identity)?;

        for key in &removed {
            if let Some(live) = self.monitor.get_application(key) {
                if let Err(e) = self.reset_peer(&live).await {
                    warn!(app = %key, error = %e, "could not reset peer of removed identity");
                }
            }
            self.monitor
                .update(key, Some(ClaimState::Claimable), Some(SyncState::Unmanaged));
        }

        info!(applications = removed.len(), "identity removed");
        Ok(removed)
    }

    /// Remove a stored group. Members stay claimed but become pending; the
    /// reachable ones are synchronized right away.
    #[instrument(skip(self), fields(group = %group))]
    pub async fn remove_group(&self, group: &Guid) -> Result<Vec<PublicKey>> {
        let affected = self.store.remove_group(group)?;

        for key in &affected {
            self.monitor.set_sync_state(key, SyncState::Pending);
            if let Err(e) = self.synchronize(key).await {
                warn!(app = %key, error = %e, "synchronization after group removal failed");
            }
        }

        info!(applications = affected.len(), "group removed");
        Ok(affected)
    }

    // -- Discovery ------------------------------------------------------------

    /// React to a peer entering or leaving the network.
    ///
    /// A newly seen peer, or one whose claim state is still unknown, has its
    /// claim state queried; if it is a claimed application with undelivered
    /// changes, they are delivered now.
    pub async fn handle_announcement(&self, event: AnnouncementEvent) -> Result<()> {
        let announcement = match event {
            AnnouncementEvent::Appeared(announcement) => announcement,
            AnnouncementEvent::Disappeared(key) => {
                self.monitor.remove(&key);
                return Ok(());
            }
        };

        let key = &announcement.public_key;
        let first_seen = self.monitor.announce(&announcement);
        let live = self.live_application(key)?;
        if !first_seen && live.claim_state != ClaimState::Unknown {
            return Ok(());
        }

        let claim_state = {
            let mut session = self.sessions.open_secure_session(&live).await?;
            session.query_claim_state().await?
        };
        let sync_state = match self.store.get_managed_application(key) {
            Ok(claimed) => claimed.sync_state,
            Err(TrustError::NotFound(_)) => SyncState::Unmanaged,
            Err(e) => return Err(e),
        };
        self.monitor.update(key, Some(claim_state), Some(sync_state));

        if sync_state == SyncState::Pending {
            debug!(app = %key, "pending application rediscovered");
            self.synchronize(key).await?;
        }
        Ok(())
    }

    /// Consume a discovery feed until its sending side is dropped.
    pub async fn run_discovery(&self, mut feed: mpsc::Receiver<AnnouncementEvent>) {
        while let Some(event) = feed.recv().await {
            if let Err(e) = self.handle_announcement(event).await {
                warn!(error = %e, "announcement not processed");
            }
        }
        debug!("discovery feed closed");
    }

    // -- Storage events -------------------------------------------------------

    /// Mirror a storage event into the live sync state of known peers.
    pub fn handle_storage_event(&self, event: &StorageEvent) {
        match event {
            StorageEvent::PendingChanges(keys) => {
                for key in keys {
                    self.monitor.set_sync_state(key, SyncState::Pending);
                }
            }
            StorageEvent::PendingChangesCompleted(keys) => {
                for key in keys {
                    self.monitor.set_sync_state(key, SyncState::Ok);
                }
            }
            StorageEvent::StorageReset => {
                for app in self.monitor.get_applications(None) {
                    self.monitor.set_sync_state(&app.public_key, SyncState::Unmanaged);
                }
            }
            StorageEvent::ApplicationsRemoved(keys) => {
                for key in keys {
                    self.monitor.set_sync_state(key, SyncState::Unmanaged);
                }
            }
        }
    }

    /// Follow the trust store's events on a background task. The task runs
    /// until the returned handle is aborted.
    pub fn watch_storage(self: Arc<Self>) -> JoinHandle<()> {
        let mut subscription = self.store.register_listener();
        tokio::spawn(async move {
            while let Some(event) = subscription.events.recv().await {
                self.handle_storage_event(&event);
            }
        })
    }

    // -- Internals ------------------------------------------------------------

    fn live_application(&self, app: &PublicKey) -> Result<Application> {
        self.monitor
            .get_application(app)
            .ok_or_else(|| TrustError::NotFound(format!("application {app} has not been discovered")))
    }

    fn reachable(&self, app: &PublicKey) -> Result<Application> {
        self.monitor
            .get_application(app)
            .ok_or_else(|| TrustError::NetworkFailure(format!("application {app} is not reachable")))
    }

    async fn reset_peer(&self, live: &Application) -> Result<()> {
        let mut session = self.sessions.open_secure_session(live).await?;
        session.reset().await
    }

    /// Deliver a freshly persisted change. An unreachable peer is a
    /// `NetworkFailure`; the change stays pending.
    async fn deliver(&self, app: &PublicKey) -> Result<()> {
        let live = self.reachable(app)?;
        self.push(&live).await?;
        Ok(())
    }

    async fn push(&self, live: &Application) -> Result<bool> {
        let key = &live.public_key;
        let claimed = self.store.get_managed_application(key)?;
        if claimed.sync_state != SyncState::Pending {
            return Ok(true);
        }

        let cert = self.store.get_identity_certificate(key)?;
        let memberships = self.store.get_membership_certificates(key)?;

        let mut session = self.sessions.open_secure_session(live).await?;
        session.install_identity(&cert, &claimed.manifest).await?;
        for guild in session.installed_memberships().await? {
            if !memberships.iter().any(|cert| cert.guild == guild) {
                debug!(app = %key, group = %guild, "removing stale membership");
                session.remove_membership(&guild).await?;
            }
        }
        for membership in &memberships {
            session.install_membership(membership).await?;
        }
        if let Some(policy) = &claimed.policy {
            session.install_policy(policy).await?;
        }

        let completed = self.store.mark_synchronized(key, claimed.policy_version)?;
        if completed {
            self.monitor.set_sync_state(key, SyncState::Ok);
        }
        debug!(app = %key, version = claimed.policy_version, completed, "configuration delivered");
        Ok(completed)
    }
}

/// Marks an application as being claimed for the guard's lifetime.
struct ClaimGuard<'a> {
    claiming: &'a Mutex<HashSet<PublicKey>>,
    key: PublicKey,
}

impl<'a> ClaimGuard<'a> {
    fn acquire(claiming: &'a Mutex<HashSet<PublicKey>>, key: &PublicKey) -> Result<Self> {
        if !lock_claiming(claiming).insert(key.clone()) {
            return Err(TrustError::InvalidState(format!(
                "a claim of application {key} is already in progress"
            )));
        }
        Ok(Self {
            claiming,
            key: key.clone(),
        })
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        lock_claiming(self.claiming).remove(&self.key);
    }
}

fn lock_claiming(claiming: &Mutex<HashSet<PublicKey>>) -> MutexGuard<'_, HashSet<PublicKey>> {
    claiming.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
