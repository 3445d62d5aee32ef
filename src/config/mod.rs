//! Configuration schema and persistence

mod schema;
mod store;

pub use schema::{AppConfig, OutputConfig, ProbeConfig, RateConfig, RelayConfig};
pub use store::ConfigStore;
