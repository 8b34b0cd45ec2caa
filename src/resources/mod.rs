//! Resource generation module.
//!
//! Contains utilities for generating Kubernetes resources owned by a Ytsaurus
//! cluster.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | One per server role (masters, each data node group) |
//! | Headless Service | Stable pod DNS names (publishNotReadyAddresses) |
//! | Job | Init jobs (cluster bootstrap, master read-only exit) |
//! | ConfigMap | Script of each init job |

pub mod common;
pub mod job;
pub mod services;
pub mod statefulset;

// Re-export commonly used items from common
pub use common::{Labeller, owner_reference};
