//! Periodic background tasks: descriptors, latest results, execution bookkeeping.

pub mod handlers;
pub mod models;
pub mod scheduler;

pub use handlers::{TaskHandler, TaskHandlerRegistry};
pub use models::{TaskDescriptor, TaskResult, MIN_TASK_INTERVAL_MS};
pub use scheduler::TaskScheduler;
