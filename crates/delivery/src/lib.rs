//! Delivery layer — quota-aware, delayed job queue feeding the channel
//! connection through a bounded worker pool.

pub mod clock;
pub mod job;
pub mod queue;
pub mod quota;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{EnqueueJob, Job, JobStatus};
pub use queue::{DeliveryHooks, DeliveryQueue, StageCheck};
pub use quota::QuotaTracker;
