//! # TansuDB Core
//!
//! Foundation types shared by every TansuDB crate: the vector value type,
//! distance metrics, configuration, errors, the clock and randomness
//! abstractions, and advisory metrics counters.

pub mod clock;
pub mod config;
pub mod distance;
pub mod error;
pub mod metrics;
pub mod random;
pub mod vector;

pub use clock::{Clock, SystemClock};
pub use config::{DatabaseConfig, HnswConfig, IndexAlgorithm, LshConfig, PersistenceConfig};
pub use distance::DistanceKind;
pub use error::{Error, Result};
pub use metrics::{DatabaseMetrics, MetricsSnapshot};
pub use random::RandomSource;
pub use vector::Vector;
