//! Adaptive scheduling: claims, backoff, the driver loop, supervision.

mod claims;
mod scheduler;
mod supervisor;

pub use claims::{BackoffConfig, BackoffEntry, ClaimToken, SchedulerState};
pub use scheduler::{Scheduler, SchedulerConfig, TickError};
pub use supervisor::Supervisor;
