pub mod adapter;
pub mod clients;
pub mod config;
pub mod events;
pub mod heartbeat;
pub mod listener;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod source;
pub mod store;

pub use adapter::{AdapterOptions, ShdrAdapter};
pub use clients::{ClientRegistry, ClientWriteError, SendError};
pub use config::{AdapterMode, Config, ConfigError};
pub use events::{AdapterEvent, ClientId, EventBus};
pub use listener::AdapterServer;
pub use runtime::AdapterRuntime;
