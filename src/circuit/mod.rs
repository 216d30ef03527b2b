//! Local admission control for probes and store writes

mod backoff;
mod limiter;

pub use backoff::JitterPolicy;
pub use limiter::{LimitConfig, LimitError, LimitPermit, LimitStats, ProbeLimiter};
