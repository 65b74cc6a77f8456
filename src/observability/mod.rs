//! Observability: structured logging setup and communicator counters

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{CommunicatorStats, StatsSnapshot};

pub use logging::{mqtt_span, network_span};
