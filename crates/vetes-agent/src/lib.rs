//! # vetes-agent
//!
//! A cluster agent that executes task-execution-service (TES) workloads.
//!
//! The agent pulls queued tasks from a remote control plane and turns each
//! declarative task description into concrete cluster objects: a local
//! record, a scratch volume claim, input/output staging jobs, and one batch
//! job per executor. It drives that collection through a per-task state
//! machine, reports state and executor timing back to the control plane, and
//! cleans everything up on success, failure, or cancellation.
//!
//! ## Components
//!
//! - [`store`]: durable per-task record (task body + stage counter
//!   annotations) kept in a namespaced config object
//! - [`offload`]: spills oversized inputs/outputs manifests to a shared
//!   volume and wires the mount into stager pods
//! - [`accelerate`]: optionally replaces object-storage downloads with
//!   shared, ref-counted bucket mounts
//! - [`cron`]: leader-gated periodic jobs (capacity heartbeat, syncer tick,
//!   log sweep)
//! - [`syncer`]: materializes newly queued tasks locally and propagates
//!   cancellations
//! - [`reconciler`]: the event-driven stage machine plus the pod observer
//! - [`tes`]: the control-plane client seam
//! - [`cluster`]: the cluster API seam the agent composes everything from
//!
//! ## Guarantees
//!
//! - Stage counters never decrease; each stage's side effect is performed
//!   before its counter is persisted, so crash re-entry is idempotent.
//! - At most one reconciliation progresses a given task at any moment.
//! - Shared-mount backing objects exist exactly while some live task
//!   references them.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod accelerate;
pub mod capacity;
pub mod cluster;
pub mod config;
pub mod cron;
pub mod error;
pub mod filelog;
pub mod metrics;
pub mod offload;
pub mod reconciler;
pub mod record;
pub mod store;
pub mod syncer;
pub mod tes;

pub use error::{Error, Reconcile, Result};
