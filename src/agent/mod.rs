//! Periodic detection of one partition of instances

mod detector;
mod reporter;
mod state;

pub use detector::{DetectionAgent, SweepSummary};
pub use reporter::ReportPolicy;
pub use state::{DetectionState, Transition};
