//! Marina core: the hosting lifecycle coordinator.
//!
//! Responsibilities:
//! - validating account credentials (structure, embedded identity, liveness)
//! - enforcing authorization, blacklist, and per-requester quota policy
//! - keeping the settings store, ownership ledger, and worker registry
//!   consistent through host / unhost / revalidate transitions
//! - throttling operations per requester
//!
//! Storage backends, the liveness oracle, and the worker launcher are
//! injected behind traits; `marina-harbor` supplies the production
//! implementations.

pub mod coordinator;
pub mod credential;
pub mod error;
pub mod ledger;
pub mod policy;
pub mod ratelimit;
pub mod settings;
pub mod worker;

pub use coordinator::{
    Cooldowns, CoordinatorConfig, CredentialReveal, HostReceipt, HostedAccount, HostedListing,
    HostingCoordinator, RemovedAccount, RevalidationReport, UnhostReceipt,
};
pub use credential::{DecodeError, Identity, LivenessOracle, OracleError};
pub use error::{HostError, StoreError};
pub use ledger::{MemoryOwnershipLedger, OwnershipLedger, OwnershipRecord};
pub use policy::{AccessPolicy, MemoryAccessPolicy, PolicyGate, RosterEntry, DEFAULT_HOSTING_LIMIT};
pub use ratelimit::{Decision, RateLimiter};
pub use settings::{AccountSettings, AutoDeletePolicy, MemorySettingsStore, SettingsStore};
pub use worker::{LaunchError, WorkerLauncher, WorkerProcess, WorkerRegistry, WorkerState, WorkerStatus};
