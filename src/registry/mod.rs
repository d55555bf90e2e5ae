//! # Executor Registry
//!
//! Liveness tracking for executor and admin nodes.
//!
//! ```text
//! RegistrationGateway ──► RegistryStore ◄── LivenessMonitor
//!   (register/deregister)      │              (sweep every beat)
//!                              ▼
//!                        ExecutorGroup.address_list
//! ```
//!
//! The gateway and the monitor write concurrently; the store is responsible
//! for atomic upsert and delete.

pub mod gateway;
pub mod memory_store;
pub mod monitor;
pub mod store;

pub use gateway::{GatewayStats, RegistrationGateway};
pub use memory_store::InMemoryRegistryStore;
pub use monitor::{LivenessMonitor, SweepReport};
pub use store::RegistryStore;
