//! Shared data model for detection, arbitration and coverage
//!
//! Instances and their metadata are owned by the metadata system and are
//! read-only here. Reports and heartbeats are snapshots written to the
//! status store; switch checks live for one decision episode.

mod check;
mod component;
mod instance;
mod report;

pub use check::{CheckId, Decision, SwitchCheck};
pub use component::{ComponentHeartbeat, ComponentKind, Scope};
pub use instance::{Instance, InstanceKey, InstanceRole, InstanceStatus, ReplicaInfo, ReplicationHint};
pub use report::{DetectionReport, Outcome};
