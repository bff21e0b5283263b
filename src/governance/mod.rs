//! Governance engine.
//!
//! Each submodule owns one set of rules over the store:
//! - [`hierarchy`] - parent/child ownership and sibling dependency chains
//! - [`rollup`] - weighted progress of parents and parent auto-completion
//! - [`requirements`] - which specialist reviews a phase needs and whether they ran
//! - [`handoff`] - the gated phase state machine
//! - [`contracts`] - inherited data/UX contracts and validation against them
//! - [`remediation`] - grouping violations and spawning remediation directives
//!
//! Every operation is a short-lived unit of work over a [`Storage`](crate::storage::Storage)
//! handle. Preconditions are read from the store at the point of use, never
//! carried over from an earlier call.

pub mod contracts;
pub mod handoff;
pub mod hierarchy;
pub mod remediation;
pub mod requirements;
pub mod rollup;
