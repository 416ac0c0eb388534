// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// trustmgr-storage — Durable, listener-observable trust store.

mod applications;
pub mod events;
mod records;
mod schema;
pub mod store;

#[cfg(test)]
mod test_support;

pub use events::{ListenerId, ListenerRegistry, StorageEvent, Subscription};
pub use records::ClaimedApplication;
pub use store::{OperationPermit, TrustStore};
