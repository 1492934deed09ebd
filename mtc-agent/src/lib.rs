//! Agent side of SHDR: connects to adapters, decodes their stream against a
//! device model, and forwards the result to an [`AgentSink`].

pub mod client;
pub mod config;
pub mod memory;
pub mod sink;

pub use client::{AdapterClient, ClientError, ClientEvent, ClientSettings};
pub use config::{AdapterConfig, Config, ConfigError, DeviceModel};
pub use memory::{InMemoryAgent, InMemoryError, StoredObservation};
pub use sink::{AgentSink, DeviceLookup, ObservationOptions};
