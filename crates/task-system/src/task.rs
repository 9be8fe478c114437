//! Task handles, descriptors, and the context passed into every task body.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use task_core::Handle;

use crate::scheduler::Scheduler;

/// Zero-sized tag distinguishing task handles from file or shader handles.
pub enum TaskKind {}

/// An opaque, copyable handle identifying a task in the scheduler's task
/// table. The default value is the sentinel invalid handle.
pub type TaskHandle = Handle<TaskKind>;

bitflags::bitflags! {
    /// Flags accepted by [`create_task`](crate::Scheduler::create_task).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Creation implicitly posts the task for execution.
        const AUTO_START = 1 << 0;
    }
}

impl Default for TaskFlags {
    fn default() -> Self {
        TaskFlags::empty()
    }
}

/// A task body. Invoked at most once, off the caller's thread, on whichever
/// worker the scheduler assigns.
pub type TaskBody = Box<dyn FnOnce(&mut TaskContext<'_>) + Send>;

/// Describes a task at creation time: its name (for diagnostics), its
/// flags, and its body.
pub struct TaskDesc {
    pub name: String,
    pub flags: TaskFlags,
    pub body: TaskBody,
}

impl TaskDesc {
    pub fn new(name: impl Into<String>, body: TaskBody) -> Self {
        Self {
            name: name.into(),
            flags: TaskFlags::empty(),
            body,
        }
    }

    pub fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// The opaque payload a task carries, shared between its creator (who may
/// read it after the task finishes) and its body (which may mutate it while
/// running). An `Arc<Mutex<_>>` rather than a raw pointer: a task body runs
/// on whichever worker thread the scheduler assigns, so the payload must be
/// `Send` and independently lockable rather than borrowed for a lifetime
/// that would have to span across threads.
pub type UserData = Arc<Mutex<Option<Box<dyn Any + Send>>>>;

/// Passed into every running task body.
pub struct TaskContext<'a> {
    pub task: TaskHandle,
    /// The opaque payload supplied at `create_task` time.
    pub data: &'a UserData,
    /// A cheap, cloneable handle back into the owning scheduler -- lets a
    /// task body call `yield_until`, `depends`, or spawn further tasks.
    pub scheduler: Scheduler,
}

impl TaskContext<'_> {
    /// Runs `f` with the task's user data downcast to `T`, panicking if it
    /// is missing or of the wrong type. Convenience for the common case
    /// where a task's creator and its body agree on the payload type.
    pub fn with_data_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.data.lock();
        let data = guard
            .as_mut()
            .expect("task has no user_data")
            .downcast_mut::<T>()
            .expect("user_data is not of the requested type");
        f(data)
    }

    /// Delegates a blocking native call to this task's worker's auxiliary
    /// thread and keeps that worker busy on other tasks until it returns.
    pub fn yield_until(&self, f: impl FnOnce() + Send + 'static) {
        self.scheduler.yield_until(f);
    }
}

/// `Unscheduled -> InWorker -> Finished`, monotonic forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unscheduled,
    InWorker,
    Finished,
}

/// The per-task control block used to wait for and observe completion.
/// Owned by the task table; external waiters borrow an `Arc` clone under
/// the table's shared lock and may safely outlive the table's own
/// borrow of it, but must drop their clone before `clean_task_tree` can
/// actually free the slot (enforced by `Arc` reference counting rather
/// than by a borrow-checker discipline, per the accepted alternative in
/// the design notes).
pub struct TaskSync {
    state: Mutex<TaskState>,
    cv: Condvar,
    worker_id: Mutex<Option<usize>>,
}

impl TaskSync {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TaskState::Unscheduled),
            cv: Condvar::new(),
            worker_id: Mutex::new(None),
        })
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_worker_id(&self, id: usize) {
        *self.worker_id.lock() = Some(id);
    }

    pub fn worker_id(&self) -> Option<usize> {
        *self.worker_id.lock()
    }

    /// Transitions to `InWorker`. Caller must already hold the scheduler's
    /// state lock (the transition must be observed atomically alongside
    /// the dependency-empty check that guards it).
    pub fn mark_in_worker(&self) {
        *self.state.lock() = TaskState::InWorker;
    }

    /// Transitions to `Finished` and wakes every external waiter blocked in
    /// `wait_blocking`.
    pub fn mark_finished(&self) {
        *self.state.lock() = TaskState::Finished;
        self.cv.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Blocks the calling thread until the task is `Finished`. Only called
    /// from outside a worker (see `Scheduler::wait`).
    pub fn wait_blocking(&self) {
        let mut state = self.state.lock();
        while *state != TaskState::Finished {
            self.cv.wait(&mut state);
        }
    }
}
