//! # vetes-core
//!
//! Shared foundation for the veTES cluster agent.
//!
//! This crate carries the pieces every other crate in the workspace needs:
//!
//! - **Typed identifiers**: [`TaskId`] wraps the control-plane task id
//! - **Task lifecycle vocabulary**: [`TaskState`] and [`TaskView`]
//! - **Stable names**: label, annotation, and environment-variable keys the
//!   agent stamps onto cluster objects ([`names`])
//! - **Observability bootstrap**: [`observability::init_logging`]
//!
//! Nothing here talks to the network or the cluster; it is vocabulary only.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod id;
pub mod names;
pub mod observability;
pub mod state;

pub use error::{Error, Result};
pub use id::TaskId;
pub use state::{TaskState, TaskView};
