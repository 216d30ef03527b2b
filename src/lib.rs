//! Detection, double-check arbitration and coverage monitoring for an HA
//! control plane.
//!
//! Agents probe their partition of the inventory and publish reports, the
//! GM re-verifies escalated failures before authorizing a switch, and the
//! monitor checks that every instance in the inventory is actually watched.

pub mod agent;
pub mod alert;
pub mod arbiter;
pub mod circuit;
pub mod config;
pub mod coverage;
pub mod failover;
pub mod metadata;
pub mod metrics;
pub mod model;
pub mod probe;
pub mod store;
