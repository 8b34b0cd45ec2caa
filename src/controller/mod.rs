//! Controller module for ytsaurus-operator.
//!
//! Contains the reconcile driver, the cluster and update state machines, the
//! update coordinator that combines them, error handling and condition
//! storage.

// Shared modules
pub mod context;
pub mod error;
pub mod status;

// State machines
pub mod cluster_state_machine;
pub mod update_coordinator;
pub mod update_state_machine;

// Ytsaurus controller
pub mod cluster_reconciler;
