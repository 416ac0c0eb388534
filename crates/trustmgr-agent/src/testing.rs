// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process fake bus and a wired-up orchestrator for the agent tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use trustmgr_core::config::SecurityConfig;
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{
    Announcement, AnnouncementEvent, Application, ClaimState, Guid, IdentityInfo, PublicKey,
};
use trustmgr_security::{
    ActionMask, IdentityCertificate, Manifest, MembershipCertificate, PermissionPolicy, Rule,
    SigningKey, SystemClock,
};
use trustmgr_storage::TrustStore;

use crate::approval::ManifestApprover;
use crate::monitor::ApplicationMonitor;
use crate::orchestrator::ClaimOrchestrator;
use crate::session::{Session, SessionProvider};

/// What the fake remote peer currently runs.
#[derive(Debug, Clone)]
pub(crate) struct PeerState {
    pub claim_state: ClaimState,
    /// Manifest template offered during claim.
    pub manifest: Manifest,
    pub identity: Option<IdentityCertificate>,
    pub installed_manifest: Option<Manifest>,
    pub memberships: Vec<MembershipCertificate>,
    pub policy: Option<PermissionPolicy>,
    pub resets: usize,
    reachable: bool,
    fail_installs: bool,
}

impl PeerState {
    pub fn with_claim_state(claim_state: ClaimState) -> Self {
        Self {
            claim_state,
            manifest: Manifest::new(vec![Rule::wildcard(ActionMask::PROVIDE)]),
            identity: None,
            installed_manifest: None,
            memberships: Vec::new(),
            policy: None,
            resets: 0,
            reachable: true,
            fail_installs: false,
        }
    }

    pub fn claimable() -> Self {
        Self::with_claim_state(ClaimState::Claimable)
    }
}

/// Pauses the next identity installation until released.
pub(crate) struct InstallGate {
    pub entered: Notify,
    pub release: Notify,
}

type Peers = HashMap<PublicKey, (u32, PeerState)>;

#[derive(Clone, Default)]
pub(crate) struct FakeBus {
    peers: Arc<Mutex<Peers>>,
    gate: Arc<Mutex<Option<Arc<InstallGate>>>>,
    next_address: Arc<AtomicU32>,
}

impl FakeBus {
    pub fn add_peer(&self, key: PublicKey, state: PeerState) {
        let address = self.next_address.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(key, (address, state));
    }

    pub fn peer(&self, key: &PublicKey) -> PeerState {
        self.lock()[key].1.clone()
    }

    pub fn announcement(&self, key: &PublicKey) -> Announcement {
        let address = self.lock()[key].0;
        Announcement {
            public_key: key.clone(),
            bus_address: format!(":1.{address}"),
            session_hint: Some(address),
        }
    }

    pub fn set_reachable(&self, key: &PublicKey, reachable: bool) {
        if let Some((_, peer)) = self.lock().get_mut(key) {
            peer.reachable = reachable;
        }
    }

    pub fn fail_installs(&self, key: &PublicKey, fail: bool) {
        if let Some((_, peer)) = self.lock().get_mut(key) {
            peer.fail_installs = fail;
        }
    }

    pub fn hold_installs(&self) -> Arc<InstallGate> {
        let gate = Arc::new(InstallGate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn lock(&self) -> MutexGuard<'_, Peers> {
        self.peers.lock().unwrap()
    }

    /// Run `f` against a reachable peer.
    fn with_peer<T>(&self, key: &PublicKey, f: impl FnOnce(&mut PeerState) -> Result<T>) -> Result<T> {
        let mut peers = self.lock();
        match peers.get_mut(key) {
            Some((_, peer)) if peer.reachable => f(peer),
            _ => Err(TrustError::NetworkFailure(format!("peer {key} unreachable"))),
        }
    }
}

#[async_trait]
impl SessionProvider for FakeBus {
    async fn open_secure_session(&self, app: &Application) -> Result<Box<dyn Session>> {
        let address = match self.lock().get(&app.public_key) {
            Some((address, peer)) if peer.reachable => *address,
            _ => {
                return Err(TrustError::NetworkFailure(format!(
                    "no route to {}",
                    app.public_key
                )));
            }
        };
        Ok(Box::new(FakeSession {
            bus: self.clone(),
            key: app.public_key.clone(),
            peer_id: format!(":1.{address}"),
        }))
    }
}

struct FakeSession {
    bus: FakeBus,
    key: PublicKey,
    peer_id: String,
}

fn installable(peer: &PeerState) -> Result<()> {
    if peer.fail_installs {
        return Err(TrustError::NetworkFailure("installation timed out".into()));
    }
    Ok(())
}

#[async_trait]
impl Session for FakeSession {
    fn peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn query_claim_state(&mut self) -> Result<ClaimState> {
        self.bus.with_peer(&self.key, |peer| Ok(peer.claim_state))
    }

    async fn get_manifest_template(&mut self) -> Result<Manifest> {
        self.bus.with_peer(&self.key, |peer| Ok(peer.manifest.clone()))
    }

    async fn install_identity(&mut self, cert: &IdentityCertificate, manifest: &Manifest) -> Result<()> {
        let gate = self.bus.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.bus.with_peer(&self.key, |peer| {
            installable(peer)?;
            peer.identity = Some(cert.clone());
            peer.installed_manifest = Some(manifest.clone());
            peer.claim_state = ClaimState::Claimed;
            Ok(())
        })
    }

    async fn install_membership(&mut self, cert: &MembershipCertificate) -> Result<()> {
        self.bus.with_peer(&self.key, |peer| {
            installable(peer)?;
            peer.memberships.retain(|existing| existing.guild != cert.guild);
            peer.memberships.push(cert.clone());
            Ok(())
        })
    }

    async fn installed_memberships(&mut self) -> Result<Vec<Guid>> {
        self.bus.with_peer(&self.key, |peer| {
            Ok(peer.memberships.iter().map(|cert| cert.guild).collect())
        })
    }

    async fn remove_membership(&mut self, guild: &Guid) -> Result<()> {
        self.bus.with_peer(&self.key, |peer| {
            installable(peer)?;
            peer.memberships.retain(|existing| &existing.guild != guild);
            Ok(())
        })
    }

    async fn install_policy(&mut self, policy: &PermissionPolicy) -> Result<()> {
        self.bus.with_peer(&self.key, |peer| {
            installable(peer)?;
            peer.policy = Some(policy.clone());
            Ok(())
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.bus.with_peer(&self.key, |peer| {
            peer.claim_state = ClaimState::Claimable;
            peer.identity = None;
            peer.installed_manifest = None;
            peer.memberships.clear();
            peer.policy = None;
            peer.resets += 1;
            Ok(())
        })
    }
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Store, monitor, fake bus and orchestrator wired together.
pub(crate) struct Harness {
    pub store: Arc<TrustStore>,
    pub monitor: Arc<ApplicationMonitor>,
    pub bus: FakeBus,
    pub orchestrator: Arc<ClaimOrchestrator>,
    ca_key: PublicKey,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_approver(approver: Arc<dyn ManifestApprover>) -> Self {
        Self::build(Some(approver))
    }

    fn build(approver: Option<Arc<dyn ManifestApprover>>) -> Self {
        init_tracing();
        let store = Arc::new(TrustStore::open_in_memory().unwrap());
        let monitor = Arc::new(ApplicationMonitor::new());
        let bus = FakeBus::default();
        let ca = SigningKey::generate().unwrap();
        let ca_key = ca.public_key().clone();

        let mut orchestrator = ClaimOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&monitor),
            Arc::new(bus.clone()),
            ca,
            SecurityConfig::default(),
            Arc::new(SystemClock),
        )
        .unwrap();
        if let Some(approver) = approver {
            orchestrator = orchestrator.with_approver(approver);
        }

        Self {
            store,
            monitor,
            bus,
            orchestrator: Arc::new(orchestrator),
            ca_key,
        }
    }

    pub fn ca_key(&self) -> PublicKey {
        self.ca_key.clone()
    }

    pub fn app_key() -> PublicKey {
        SigningKey::generate().unwrap().public_key().clone()
    }

    /// Put a new peer on the bus and let the orchestrator discover it.
    pub async fn discover(&self, state: PeerState) -> PublicKey {
        let key = Self::app_key();
        self.bus.add_peer(key.clone(), state);
        self.orchestrator
            .handle_announcement(AnnouncementEvent::Appeared(self.bus.announcement(&key)))
            .await
            .unwrap();
        key
    }

    /// A discovered application claimed with a fresh identity.
    pub async fn claimed_app(&self) -> PublicKey {
        let identity = IdentityInfo::new(self.ca_key(), "owner");
        self.store.store_identity(&identity).unwrap();
        let app = self.discover(PeerState::claimable()).await;
        self.orchestrator.claim(&app, &identity.guid).await.unwrap();
        app
    }
}
