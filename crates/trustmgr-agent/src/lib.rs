// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// trustmgr-agent — Claim orchestration, live application monitoring and the
// session seam towards remote peers.

pub mod approval;
pub mod monitor;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
mod testing;

pub use approval::{AcceptAll, ManifestApprover, RejectAll};
pub use monitor::{ApplicationMonitor, SecurityStateChange};
pub use orchestrator::ClaimOrchestrator;
pub use session::{OfflineSessions, Session, SessionProvider};
