//! Request pacing and scheduling
//!
//! Spreads remaining quota evenly over the remaining window, scaled by a
//! health multiplier, and executes work items through a priority-ordered,
//! bounded-concurrency scheduler with retry/backoff.

mod batch;
mod pacer;
mod progress;
mod scheduler;

pub use batch::*;
pub use pacer::*;
pub use progress::*;
pub use scheduler::*;
