//! Dispatcher configuration: TOML file, then `OFFLOAD_*` env overrides, then validation.

mod loading;
mod types;
mod validation;


pub use types::{DispatchConfig, JobsConfig, PoolConfig, UnitLossPolicy};
pub use validation::MAX_CAPACITY;
