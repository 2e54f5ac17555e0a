//! Test-run orchestration
//!
//! The coordinator owns one runner handle and decides, per request,
//! whether it can be reused or must be rebuilt. Reconciliation policy
//! lives in `reconcile`; orchestration in `coordinator`.

pub mod coordinator;
pub mod reconcile;

pub use coordinator::{
    name_pattern, CoordinatorOptions, RunCoordinator, RunObserver, RunRequest, RunState,
};
pub use reconcile::{reconcile, ReconcilePlan};
