//! Custom Resource Definitions (CRDs) for ytsaurus-operator.
//!
//! - `Ytsaurus`: desired state of a cluster and its update progress

mod ytsaurus;

pub use ytsaurus::*;
