/// Programming-error conditions the scheduler and its client adapters
/// surface as `Result` instead of asserting away, since a safe Rust API
/// cannot assume a caller only ever passes handles it allocated itself.
///
/// Conditions the original treats as silent, ignorable no-ops (freeing an
/// unknown handle, stopping a system that never started) stay silent here
/// too -- they are not represented in this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task handle does not exist in the task table")]
    UnknownTask,

    #[error("scheduler was already started; call signal_stop() and join() before restarting")]
    AlreadyStarted,

    #[error("clean_task_tree/clean_finished_tasks cannot be called from inside a worker thread")]
    CleanupFromWorker,

    #[error("scheduler has been stopped and can no longer accept work")]
    SchedulerStopped,
}

pub type Result<T> = std::result::Result<T, TaskError>;
