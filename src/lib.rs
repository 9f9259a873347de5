//! Joint offloading, routing, and two-dimensional resource-allocation
//! scheduling core for a vehicular edge computing simulator.
//!
//! The crate is driven by a host discrete-event loop: vehicles enroll
//! real-time applications, roadside units (RSUs) publish radio and compute
//! capacity plus their backhaul reachability, and radio feedback streams in
//! between ticks. Each scheduling epoch snapshots that state, enumerates
//! feasible service instances `(app, offload RSU, processing RSU, RBs, CUs)`
//! whose end-to-end delay meets the application deadline, selects a subset
//! under per-app exclusivity and per-RSU capacity with one of the
//! interchangeable policies (greedy, LP-based graph matching, or the
//! categorical local-ratio approximations), and emits grants for the
//! control plane to ferry out.

pub mod catalog;
pub mod config;
pub mod error;
pub mod grants;
pub mod registry;
pub mod scheduler;


/// Application identifier; uniqueness is the enrolling host's contract.
pub type AppId = u32;

/// MAC-layer node identifier; vehicles and RSUs share the id space.
pub type NodeId = u16;

pub use catalog::{QualityTier, ServiceCatalog};
pub use config::{Policy, SchedulerConfig, UtilityModel};
pub use error::{CommitError, ConfigError};
pub use grants::{Grant, Revocation};
pub use registry::apps::{AppRegistry, Application};
pub use registry::links::LinkObservatory;
pub use registry::resources::{ResourceRegistry, RsuProfile};
pub use scheduler::Engine;
