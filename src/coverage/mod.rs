//! Coverage reconciliation and control-plane liveness
//!
//! Compares what the metadata system says must be watched with what the
//! status store shows is being watched, and checks that agents and GMs keep
//! reporting on time.

mod monitor;
mod reconciler;
mod rules;

pub use monitor::{CoverageMonitor, CycleSummary};
pub use reconciler::{reconcile, CoverageInputs, CoveragePolicy, CoverageSet, InventoryReconciler, ReconcileError};
pub use rules::ExclusionRule;
