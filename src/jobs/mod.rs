pub mod activator;
pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod reschedule;
pub mod store;
pub mod tasks;
pub mod types;

pub use activator::{HandlerRegistry, JobActivator};
pub use backoff::Backoff;
pub use dispatcher::{CycleReport, Dispatcher, DispatcherExit, SchedulerEvent};
pub use error::{JobError, JobResult};
pub use reschedule::RescheduleProtocol;
pub use store::{JobStore, MemoryJobStore, PgJobStore, SharedJobStore};
pub use types::{
    Clock, JobContext, JobHandler, JobId, JobOutcome, JobPayload, JobRecord, JobState, NewJob,
    SystemClock, TokioClock,
};
