//! Service layer: the scheduler service and its process host.

mod host;
mod lifecycle;
pub mod runtime;
mod scheduler;

pub use host::{ServiceHost, shutdown_signal};
pub use lifecycle::RunnableService;
pub use runtime::{TenantRuntime, build_activator, open_tenants};
pub use scheduler::SchedulerService;
