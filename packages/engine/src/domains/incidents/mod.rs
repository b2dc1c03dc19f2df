//! The incident clustering and severity domain: deciding whether a new
//! complaint belongs to an already-active incident, keeping a live
//! severity score for every active incident, and sweeping expired ones.

pub mod clustering;
pub mod dto;
pub mod lifecycle;
pub mod severity;

pub use clustering::ClusteringUseCase;
pub use dto::{ClusterInput, ClusterResult};
pub use lifecycle::LifecycleScheduler;
pub use severity::SeverityUseCase;
