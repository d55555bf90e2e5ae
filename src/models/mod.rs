//! Value types shared by the registry, dispatcher and workflow layers.

pub mod executor_group;
pub mod job;
pub mod registry_entry;
pub mod trigger;

pub use executor_group::{AddressMode, ExecutorGroup, NewExecutorGroup};
pub use job::{BlockStrategy, GlueSource, GlueType, JobDefinition, RouteStrategy};
pub use registry_entry::{LoadSnapshot, RegistryEntry, RegistryKind, RegistryParam, UpsertOutcome};
pub use trigger::{CompletionEvent, CompletionReport, DispatchOutcome, RunHandle, TriggerEnvelope};
