//! Configuration models for pools and the engine.

pub mod pool;

pub use pool::{AutoScaleConfig, EngineConfig, PoolConfig};
