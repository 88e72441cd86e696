//! Follow-up lifecycle: scheduling and the due-entry processor.

pub mod processor;
pub mod scheduler;

pub use processor::{FollowUpProcessor, ProcessSummary};
pub use scheduler::{FollowUpScheduler, ScheduleError, ScheduleOptions};
