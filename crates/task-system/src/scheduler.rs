//! The scheduler: task table, dependency graph, central command queue, and
//! the scheduling thread that turns newly-ready tasks into worker dispatch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use task_core::{HandleTable, Result, TaskError};
use tracing::{debug, instrument, warn};

use crate::queue::BlockingQueue;
use crate::task::{TaskBody, TaskDesc, TaskFlags, TaskHandle, TaskKind, TaskState, TaskSync, UserData};
use crate::worker::{local_worker, run_job, Worker};

/// Tunable knobs for a [`Scheduler`]. Mirrors the original's single
/// `TaskSystemDesc`: the programmatic struct is authoritative, environment
/// loading is additive sugar.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub thread_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: num_cpus::get(),
        }
    }
}

impl SchedulerConfig {
    /// Reads `TASKS_THREAD_POOL_SIZE`, falling back to [`Default`] on
    /// anything absent or unparseable.
    pub fn from_env() -> Self {
        let thread_pool_size = std::env::var("TASKS_THREAD_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| Self::default().thread_pool_size);
        Self { thread_pool_size }
    }
}

/// A snapshot of the task table's occupancy, returned by [`Scheduler::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSystemStats {
    pub num_elements: usize,
}

struct TaskRecord {
    name: String,
    flags: TaskFlags,
    body: Option<TaskBody>,
    data: UserData,
    sync: Arc<TaskSync>,
    initial_dependencies: FxHashSet<TaskHandle>,
    dependencies: FxHashSet<TaskHandle>,
    parents: FxHashSet<TaskHandle>,
}

enum Command {
    RunJob(TaskHandle),
    RunJobs(Vec<TaskHandle>),
    Exit,
}

struct Inner {
    state: RwLock<HandleTable<TaskKind, TaskRecord>>,
    finished: Mutex<FxHashSet<TaskHandle>>,
    workers: Vec<Worker>,
    central_queue: Arc<BlockingQueue<Command>>,
    scheduler_thread: Mutex<Option<JoinHandle<()>>>,
    cursor: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
    config: SchedulerConfig,
}

/// A cheap, `Clone`-able handle onto the task scheduler. Every `Scheduler`
/// value refers to the same underlying worker pool and task table; cloning
/// is just an `Arc` bump, which is what lets a task body carry one around in
/// its [`TaskContext`].
#[derive(Clone)]
pub struct Scheduler(Arc<Inner>);

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let workers = (0..config.thread_pool_size.max(1)).map(Worker::new).collect();
        Self(Arc::new(Inner {
            state: RwLock::new(HandleTable::new()),
            finished: Mutex::new(FxHashSet::default()),
            workers,
            central_queue: Arc::new(BlockingQueue::new()),
            scheduler_thread: Mutex::new(None),
            cursor: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            config,
        }))
    }

    /// Spawns the worker pool and the scheduling thread. Rejects a second
    /// call with [`TaskError::AlreadyStarted`].
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        if self.0.started.swap(true, Ordering::AcqRel) {
            return Err(TaskError::AlreadyStarted);
        }

        for worker in &self.0.workers {
            // Weak, not a `Scheduler` clone: a worker lives inside
            // `Inner.workers`, so a strong back-reference here would keep
            // `Inner` alive forever (a reference cycle). The upgrade fails
            // only once `Inner` is already being dropped, in which case
            // there is nothing left to mark complete anyway.
            let inner = Arc::downgrade(&self.0);
            worker.start(Arc::new(move |task| {
                if let Some(inner) = inner.upgrade() {
                    Scheduler(inner).on_task_complete(task);
                }
            }));
        }

        let central_queue = self.0.central_queue.clone();
        let sched = self.clone();
        *self.0.scheduler_thread.lock() = Some(
            std::thread::Builder::new()
                .name("task-scheduler".to_string())
                .spawn(move || scheduling_loop(&sched, &central_queue))
                .expect("failed to spawn scheduling thread"),
        );

        debug!(workers = self.0.workers.len(), "scheduler started");
        Ok(())
    }

    /// Posts `Exit` on the central queue; the scheduling thread then posts
    /// `Exit` to every worker. Idempotent -- calling it before `start` or
    /// more than once is a silent no-op, per the "ignorable" error tier.
    pub fn signal_stop(&self) {
        if !self.0.started.load(Ordering::Acquire) {
            return;
        }
        if self.0.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.0.central_queue.push(Command::Exit);
    }

    /// Joins the scheduling thread, then each worker's two threads. Safe to
    /// call even if `start` was never called.
    pub fn join(&self) {
        if let Some(t) = self.0.scheduler_thread.lock().take() {
            t.join().expect("scheduling thread panicked");
        }
        for worker in &self.0.workers {
            worker.join();
        }
    }

    /// Allocates a task record in state `Unscheduled`. If
    /// [`TaskFlags::AUTO_START`] is set, immediately posts it for execution.
    /// Fails with [`TaskError::SchedulerStopped`] once `signal_stop` has
    /// been called: a task created afterwards would sit in the table (or,
    /// with `AUTO_START`, on the central queue) forever, since the
    /// scheduling thread and every worker have already been told to exit.
    pub fn create_task(&self, desc: TaskDesc, user_data: Option<Box<dyn std::any::Any + Send>>) -> Result<TaskHandle> {
        if self.0.stopped.load(Ordering::Acquire) {
            return Err(TaskError::SchedulerStopped);
        }
        let flags = desc.flags;
        let record = TaskRecord {
            name: desc.name,
            flags,
            body: Some(desc.body),
            data: Arc::new(Mutex::new(user_data)),
            sync: TaskSync::new(),
            initial_dependencies: FxHashSet::default(),
            dependencies: FxHashSet::default(),
            parents: FxHashSet::default(),
        };
        let handle = self.0.state.write().allocate(record);
        if flags.contains(TaskFlags::AUTO_START) {
            self.0.central_queue.push(Command::RunJob(handle));
        }
        Ok(handle)
    }

    /// Posts `task` for execution. Idempotent: a task already `InWorker` or
    /// `Finished` is left alone. Fails with [`TaskError::SchedulerStopped`]
    /// once `signal_stop` has been called, rather than silently queuing a
    /// command the scheduling thread will never drain.
    pub fn execute(&self, task: TaskHandle) -> Result<()> {
        if self.0.stopped.load(Ordering::Acquire) {
            return Err(TaskError::SchedulerStopped);
        }
        if !self.0.state.read().contains(task) {
            return Err(TaskError::UnknownTask);
        }
        self.0.central_queue.push(Command::RunJob(task));
        Ok(())
    }

    pub fn execute_many(&self, tasks: &[TaskHandle]) -> Result<()> {
        if self.0.stopped.load(Ordering::Acquire) {
            return Err(TaskError::SchedulerStopped);
        }
        for &t in tasks {
            if !self.0.state.read().contains(t) {
                return Err(TaskError::UnknownTask);
            }
        }
        self.0.central_queue.push(Command::RunJobs(tasks.to_vec()));
        Ok(())
    }

    /// Declares that `src` depends on every handle in `deps`: `src` will not
    /// become eligible to run until each of them has finished. Missing
    /// handles are a decided programming error (see design notes): debug-
    /// fatal in debug builds, logged and skipped in release.
    pub fn depends(&self, src: TaskHandle, dep: TaskHandle) {
        self.depends_many(src, &[dep]);
    }

    pub fn depends_many(&self, src: TaskHandle, deps: &[TaskHandle]) {
        let mut table = self.0.state.write();
        if !table.contains(src) {
            debug_assert!(false, "depends: unknown src task handle");
            tracing::error!(?src, "depends called with unknown src handle; ignored");
            return;
        }
        for &dep in deps {
            if !table.contains(dep) {
                debug_assert!(false, "depends: unknown dependency task handle");
                tracing::error!(?src, ?dep, "depends called with unknown dependency handle; edge skipped");
                continue;
            }
            if self.0.finished.lock().contains(&dep) {
                continue;
            }
            table.get_mut(src).unwrap().initial_dependencies.insert(dep);
            table.get_mut(src).unwrap().dependencies.insert(dep);
            table.get_mut(dep).unwrap().parents.insert(src);
        }
    }

    /// Blocks until `task` is `Finished`. Inside a worker this spins,
    /// stealing and running other ready jobs to make progress; outside a
    /// worker it blocks on the task's own condition variable.
    pub fn wait(&self, task: TaskHandle) {
        let Some(sync) = self.sync_of(task) else {
            return;
        };
        if local_worker().is_some() {
            while !sync.is_finished() {
                if !self.yield_() {
                    std::thread::yield_now();
                }
            }
        } else {
            sync.wait_blocking();
        }
    }

    /// Delegates a blocking native call to the current task's own worker
    /// auxiliary thread, then re-enters that worker's dispatch loop so it
    /// keeps making progress on other tasks until `f` completes. Must be
    /// called from within a running task body.
    pub fn yield_until(&self, f: impl FnOnce() + Send + 'static) {
        let id = local_worker().expect("yield_until called outside of a running task");
        self.0.workers[id].wait_until(f);
    }

    /// Cooperative yield: finds the first peer worker with a stealable job
    /// and runs it in the current thread. Returns whether it found one.
    pub fn yield_(&self) -> bool {
        for worker in &self.0.workers {
            if let Some((task, data, body, scheduler)) = worker.steal() {
                run_job(task, data, body, scheduler);
                self.on_task_complete(task);
                return true;
            }
        }
        false
    }

    /// Performs a DFS over `root`'s `initial_dependencies`, deleting every
    /// visited record exactly once. Safe only when the whole subtree has
    /// finished (typically called right after `wait(root)`). Refuses to run
    /// from inside a worker.
    pub fn clean_task_tree(&self, root: TaskHandle) -> Result<()> {
        if local_worker().is_some() {
            return Err(TaskError::CleanupFromWorker);
        }
        let mut table = self.0.state.write();
        let mut finished = self.0.finished.lock();
        let mut stack = vec![root];
        let mut visited = FxHashSet::default();
        while let Some(h) = stack.pop() {
            if !visited.insert(h) {
                continue;
            }
            let Some(record) = table.get(h) else { continue };
            stack.extend(record.initial_dependencies.iter().copied());
            table.free(h);
            finished.remove(&h);
        }
        Ok(())
    }

    /// Deletes every task currently in the finished set, together with its
    /// back-references from any surviving parents. Refuses to run from
    /// inside a worker.
    pub fn clean_finished_tasks(&self) -> Result<()> {
        if local_worker().is_some() {
            return Err(TaskError::CleanupFromWorker);
        }
        let mut table = self.0.state.write();
        let mut finished = self.0.finished.lock();
        for h in finished.drain() {
            if let Some(record) = table.free(h) {
                for parent in record.parents {
                    if let Some(parent_record) = table.get_mut(parent) {
                        parent_record.dependencies.remove(&h);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> TaskSystemStats {
        TaskSystemStats {
            num_elements: self.0.state.read().len(),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.0.config
    }

    fn sync_of(&self, task: TaskHandle) -> Option<Arc<TaskSync>> {
        self.0.state.read().get(task).map(|r| r.sync.clone())
    }

    fn next_worker(&self) -> usize {
        let n = self.0.workers.len();
        self.0.cursor.fetch_add(1, Ordering::Relaxed) % n
    }

    /// The worker completion callback: marks `task` finished, frees its
    /// parents of the now-satisfied dependency, and reposts any parent whose
    /// dependencies are now empty. The state transition, the finished-set
    /// insert, and the completion notify all happen under one hold of the
    /// state lock (finished's own mutex nested inside, notify last) so an
    /// external waiter woken by the notify can never observe `task` as
    /// `Finished` but absent from the finished set -- which would otherwise
    /// let a `clean_finished_tasks()` sweep racing the waiter skip it.
    fn on_task_complete(&self, task: TaskHandle) {
        let mut ready = Vec::new();
        {
            let mut table = self.0.state.write();
            let parents: Vec<TaskHandle> = match table.get(task) {
                Some(record) => record.parents.iter().copied().collect(),
                None => {
                    warn!(?task, "on_task_complete for a task missing from the table");
                    return;
                }
            };
            for parent in parents {
                let Some(parent_record) = table.get_mut(parent) else { continue };
                parent_record.dependencies.remove(&task);
                if parent_record.dependencies.is_empty() && parent_record.sync.state() == TaskState::Unscheduled {
                    ready.push(parent);
                }
            }
            self.0.finished.lock().insert(task);
            if let Some(record) = table.get(task) {
                record.sync.mark_finished();
            }
        }
        if !ready.is_empty() {
            self.0.central_queue.push(Command::RunJobs(ready));
        }
    }

    /// Dispatches every task in `tasks` that is ready (`Unscheduled` with no
    /// remaining dependencies) to the next worker in round-robin order;
    /// tasks that still have unresolved dependencies have those
    /// dependencies' own `Unscheduled` members reposted, lazily activating
    /// the rest of the subgraph on demand.
    fn on_schedule(&self, tasks: &[TaskHandle]) {
        let mut to_repost = Vec::new();
        let mut to_dispatch = Vec::new();
        {
            let mut table = self.0.state.write();
            for &t in tasks {
                let Some(record) = table.get_mut(t) else { continue };
                if record.sync.state() != TaskState::Unscheduled {
                    continue;
                }
                if record.dependencies.is_empty() {
                    let body = record.body.take().expect("ready task already dispatched once");
                    let data = record.data.clone();
                    let worker_idx = self.next_worker();
                    record.sync.set_worker_id(worker_idx);
                    record.sync.mark_in_worker();
                    debug!(task = ?t, name = %record.name, worker = worker_idx, "dispatching task");
                    to_dispatch.push((worker_idx, t, data, body));
                } else {
                    for dep in record.dependencies.iter() {
                        if let Some(dep_record) = table.get(*dep) {
                            if dep_record.sync.state() == TaskState::Unscheduled {
                                to_repost.push(*dep);
                            }
                        }
                    }
                }
            }
        }
        for (worker_idx, task, data, body) in to_dispatch {
            self.0.workers[worker_idx].schedule(task, data, body, self.clone());
        }
        if !to_repost.is_empty() {
            self.0.central_queue.push(Command::RunJobs(to_repost));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let leaked = self.state.read().len();
        if leaked > 0 {
            warn!(leaked, "scheduler dropped with live task records");
        }
    }
}

#[instrument(skip_all)]
fn scheduling_loop(scheduler: &Scheduler, central_queue: &BlockingQueue<Command>) {
    loop {
        match central_queue.wait_pop() {
            Command::RunJob(t) => scheduler.on_schedule(&[t]),
            Command::RunJobs(ts) => scheduler.on_schedule(&ts),
            Command::Exit => break,
        }
    }
    for worker in &scheduler.0.workers {
        worker.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, TaskFlags};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    fn scheduler(pool: usize) -> Scheduler {
        let s = Scheduler::new(SchedulerConfig { thread_pool_size: pool });
        s.start().unwrap();
        s
    }

    #[test]
    fn single_task_writes_user_data_and_finishes() {
        let s = scheduler(2);
        let handle = s.create_task(
            TaskDesc::new(
                "write42",
                Box::new(|ctx: &mut TaskContext<'_>| {
                    ctx.with_data_mut::<u32, ()>(|v| *v = 42);
                }),
            ),
            Some(Box::new(0u32)),
        )
        .unwrap();
        s.execute(handle).unwrap();
        s.wait(handle);

        let table = s.0.state.read();
        let record = table.get(handle).unwrap();
        assert!(record.sync.is_finished());
        let data = record.data.clone();
        drop(table);
        assert_eq!(*data.lock().as_ref().unwrap().downcast_ref::<u32>().unwrap(), 42);

        s.signal_stop();
        s.join();
    }

    #[test]
    fn diamond_dependency_orders_correctly() {
        let s = scheduler(4);
        let log: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let mk = |name: &'static str, log: Arc<StdMutex<Vec<&'static str>>>| {
            TaskDesc::new(
                name,
                Box::new(move |_: &mut TaskContext<'_>| {
                    log.lock().unwrap().push(name);
                }),
            )
        };

        let a = s.create_task(mk("A", log.clone()), None).unwrap();
        let b = s.create_task(mk("B", log.clone()), None).unwrap();
        let c = s.create_task(mk("C", log.clone()), None).unwrap();
        let d = s.create_task(mk("D", log.clone()), None).unwrap();

        s.depends(b, a);
        s.depends(c, a);
        s.depends_many(d, &[b, c]);

        s.execute(d).unwrap();
        s.wait(d);

        let order = log.lock().unwrap().clone();
        let pos = |n: &str| order.iter().position(|&x| x == n).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(pos("A") < pos("C"));
        assert!(pos("B") < pos("D"));
        assert!(pos("C") < pos("D"));

        s.signal_stop();
        s.join();
    }

    #[test]
    fn cleanup_after_wait_empties_table() {
        let s = scheduler(2);
        let a = s.create_task(TaskDesc::new("a", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap();
        let b = s.create_task(TaskDesc::new("b", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap();
        s.depends(b, a);
        s.execute(b).unwrap();
        s.wait(b);
        s.clean_task_tree(b).unwrap();
        assert_eq!(s.stats().num_elements, 0);
        s.signal_stop();
        s.join();
    }

    #[test]
    fn unresolved_cycle_stays_unscheduled_forever() {
        let s = scheduler(2);
        let a = s.create_task(TaskDesc::new("a", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap();
        let b = s.create_task(TaskDesc::new("b", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap();
        s.depends(a, b);
        s.depends(b, a);
        s.execute(a).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let table = s.0.state.read();
        assert_eq!(table.get(a).unwrap().sync.state(), TaskState::Unscheduled);
        assert_eq!(table.get(b).unwrap().sync.state(), TaskState::Unscheduled);
        drop(table);
        s.signal_stop();
        s.join();
    }

    #[test]
    fn execute_is_idempotent_after_first_schedule() {
        let s = scheduler(1);
        let counter = Arc::new(AtomicU32::new(0));
        let c2 = counter.clone();
        let handle = s.create_task(
            TaskDesc::new(
                "count",
                Box::new(move |_: &mut TaskContext<'_>| {
                    c2.fetch_add(1, Ordering::SeqCst);
                }),
            ),
            None,
        )
        .unwrap();
        s.execute(handle).unwrap();
        s.wait(handle);
        s.execute(handle).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        s.signal_stop();
        s.join();
    }

    #[test]
    fn auto_start_runs_without_explicit_execute() {
        let s = scheduler(1);
        let counter = Arc::new(AtomicU32::new(0));
        let c2 = counter.clone();
        let handle = s.create_task(
            TaskDesc::new(
                "auto",
                Box::new(move |_: &mut TaskContext<'_>| {
                    c2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .with_flags(TaskFlags::AUTO_START),
            None,
        )
        .unwrap();
        s.wait(handle);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        s.signal_stop();
        s.join();
    }

    #[test]
    fn create_and_execute_rejected_after_signal_stop() {
        let s = scheduler(1);
        let pre_stop = s.create_task(TaskDesc::new("pre-stop", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap();

        s.signal_stop();

        assert_eq!(
            s.create_task(TaskDesc::new("late", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap_err(),
            TaskError::SchedulerStopped
        );
        assert_eq!(s.execute(pre_stop).unwrap_err(), TaskError::SchedulerStopped);

        s.join();
    }

    #[test]
    fn clean_finished_tasks_sees_a_task_woken_by_external_wait() {
        // Regression test for a race where `wait`'s waiter could observe a
        // task as `Finished` and run `clean_finished_tasks` before that
        // task had actually been inserted into the finished set, leaving it
        // stuck in the table forever.
        let s = scheduler(2);
        let handle = s.create_task(TaskDesc::new("a", Box::new(|_: &mut TaskContext<'_>| {})), None).unwrap();
        s.execute(handle).unwrap();
        s.wait(handle);
        s.clean_finished_tasks().unwrap();
        assert_eq!(s.stats().num_elements, 0);
        s.signal_stop();
        s.join();
    }
}
