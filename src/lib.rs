pub mod client;
pub mod collector;
pub mod config;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod percentiles;
pub mod phase_trace;
pub mod template;
pub mod utils;
pub mod worker;
