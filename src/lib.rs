/// Hydrologic time-series retrieval, pooling and caching.
///
/// Reads observations, simulations, single-valued forecasts, ensemble
/// forecasts and analyses from a relational store, converts them to a
/// desired unit and splits an evaluation into time-window pools.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pooling;
pub mod retrieval;
pub mod store;
pub mod time_window;
pub mod units;
