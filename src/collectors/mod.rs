pub mod counters;
pub mod host;

use crate::state::MetricSample;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("interface {0} is no longer present")]
    InterfaceMissing(String),
    #[error("malformed counters for {iface}: {detail}")]
    Parse { iface: String, detail: String },
}

/// Source of one raw reading per tick.
pub trait Sampler: Send {
    fn sample(&mut self, now_unix: i64) -> Result<MetricSample, SampleError>;
}
