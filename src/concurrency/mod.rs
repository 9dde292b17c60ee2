//! Generation concurrency control.
//!
//! - [`GenerationLimiter`]: process-wide permit pool bounding how many
//!   generations run at once
//! - [`InFlightRegistry`]: at most one generation per cache key; concurrent
//!   callers for the same key share its outcome

mod inflight;
mod limiter;

pub use inflight::{
    InFlightLeader, InFlightRegistry, InFlightWaiter, LeaderTicket, Outcome, Registration,
};
pub use limiter::{GenerationLimiter, LimiterPermit, DEFAULT_GENERATION_CONCURRENCY};
