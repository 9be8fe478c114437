//! A work-stealing task scheduler with a cooperative yield-until primitive:
//! a task body can delegate a blocking native call to its worker's
//! auxiliary thread and keep making progress on other tasks while it waits.

mod queue;
mod scheduler;
mod task;
mod worker;

pub use queue::{BlockingQueue, BlockingQueueGuard};
pub use scheduler::{Scheduler, SchedulerConfig, TaskSystemStats};
pub use task::{TaskContext, TaskDesc, TaskFlags, TaskHandle, TaskKind, TaskState, TaskSync, UserData};
pub use worker::{local_worker, WorkerId};

pub use task_core::{TaskError, Result};
