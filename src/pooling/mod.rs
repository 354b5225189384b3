/// Pooling: slicing an evaluation into time windows and supplying the
/// left, right and baseline data of each window.

pub mod generator;
pub mod runner;
pub mod supplier;
pub mod windows;

pub use generator::PoolsGenerator;
pub use runner::{PoolRunner, PoolSummary};
pub use supplier::{Pool, PoolRetriever, PoolSupplier, SharedRetriever};
pub use windows::{lead_bounds, PoolBoundaries, TimePools};
