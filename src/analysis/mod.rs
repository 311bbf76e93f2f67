pub mod metrics;
pub mod profile;
pub mod timeseries;

pub use metrics::*;
pub use profile::*;
pub use timeseries::*;
