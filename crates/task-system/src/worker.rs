//! The worker: two OS threads (main + auxiliary), two private queues, and
//! the cooperative `wait_until` primitive that lets a task body delegate a
//! blocking call to the auxiliary thread while its own worker keeps making
//! progress on other tasks.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::queue::BlockingQueue;
use crate::scheduler::Scheduler;
use crate::task::{TaskBody, TaskContext, TaskHandle, UserData};

pub type WorkerId = usize;
pub type OnTaskComplete = Arc<dyn Fn(TaskHandle) + Send + Sync>;

/// One runnable unit of work, as it travels through a worker's queues.
enum Message {
    RunJob {
        task: TaskHandle,
        data: UserData,
        body: TaskBody,
        scheduler: Scheduler,
    },
    RunAux(Box<dyn FnOnce() + Send>),
    Exit,
}

thread_local! {
    /// Stack of worker ids this OS thread has entered, innermost last.
    /// A stack rather than a single cell so a reentrant dispatch loop
    /// invocation (see `wait_until`) never loses the identity the outer
    /// invocation already established.
    static WORKER_STACK: RefCell<Vec<WorkerId>> = const { RefCell::new(Vec::new()) };
}

struct WorkerStackGuard;

impl WorkerStackGuard {
    fn enter(id: WorkerId) -> Self {
        WORKER_STACK.with(|s| s.borrow_mut().push(id));
        Self
    }
}

impl Drop for WorkerStackGuard {
    fn drop(&mut self) {
        WORKER_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Returns the id of the worker the calling thread is currently executing a
/// task body for, or `None` if the caller is not inside a worker at all.
/// This is what lets `Scheduler::wait` pick between cooperative spinning and
/// blocking on a condition variable, and what lets cleanup paths refuse to
/// run from inside a worker.
pub fn local_worker() -> Option<WorkerId> {
    WORKER_STACK.with(|s| s.borrow().last().copied())
}

/// Owns a worker's two threads and two queues. `Worker` itself is not
/// `Clone`; the scheduler holds one per slot in its pool and reaches into it
/// by `&self` as appropriate.
pub struct Worker {
    id: WorkerId,
    main_queue: Arc<BlockingQueue<Message>>,
    aux_queue: Arc<BlockingQueue<Message>>,
    main_thread: Mutex<Option<JoinHandle<()>>>,
    aux_thread: Mutex<Option<JoinHandle<()>>>,
    on_task_complete: Mutex<Option<OnTaskComplete>>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            main_queue: Arc::new(BlockingQueue::new()),
            aux_queue: Arc::new(BlockingQueue::new()),
            main_thread: Mutex::new(None),
            aux_thread: Mutex::new(None),
            on_task_complete: Mutex::new(None),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Spawns the main and auxiliary threads. Each worker is started
    /// exactly once by its owning scheduler.
    #[instrument(skip(self, on_task_complete), fields(worker = self.id))]
    pub fn start(&self, on_task_complete: OnTaskComplete) {
        let mut main_thread = self.main_thread.lock();
        assert!(main_thread.is_none(), "worker already started");

        let id = self.id;
        let main_queue = self.main_queue.clone();
        let aux_queue = self.aux_queue.clone();
        let main_queue_for_aux = self.main_queue.clone();
        let complete_for_thread = on_task_complete.clone();
        *self.on_task_complete.lock() = Some(on_task_complete);

        *main_thread = Some(
            std::thread::Builder::new()
                .name(format!("task-worker-{id}-main"))
                .spawn(move || {
                    let _guard = WorkerStackGuard::enter(id);
                    dispatch_loop(&main_queue, &complete_for_thread);
                })
                .expect("failed to spawn worker main thread"),
        );
        drop(main_thread);

        *self.aux_thread.lock() = Some(
            std::thread::Builder::new()
                .name(format!("task-worker-{id}-aux"))
                .spawn(move || {
                    let _guard = WorkerStackGuard::enter(id);
                    run_aux_loop(&aux_queue, &main_queue_for_aux);
                })
                .expect("failed to spawn worker aux thread"),
        );
    }

    /// Enqueues a task body for execution on this worker's main thread.
    pub fn schedule(&self, task: TaskHandle, data: UserData, body: TaskBody, scheduler: Scheduler) {
        self.main_queue.push(Message::RunJob {
            task,
            data,
            body,
            scheduler,
        });
    }

    /// Non-blocking: removes one pending job from this worker's main queue
    /// if one is waiting, without running it. Used by a peer worker (or the
    /// scheduler's `yield`) to rebalance load.
    pub fn steal(&self) -> Option<(TaskHandle, UserData, TaskBody, Scheduler)> {
        match self.main_queue.try_pop() {
            Some(Message::RunJob {
                task,
                data,
                body,
                scheduler,
            }) => Some((task, data, body, scheduler)),
            Some(other) => {
                // RunAux/Exit never live on a main queue; put it back if we
                // somehow popped one (defensive, should not happen).
                self.main_queue.push(other);
                None
            }
            None => None,
        }
    }

    /// The cooperative yield-until primitive. Posts `block_fn` to the
    /// auxiliary thread and re-enters the main dispatch loop on the calling
    /// (main) thread so it can keep processing other tasks; returns once
    /// `block_fn` has run to completion exactly once.
    ///
    /// Must be called from this worker's own main thread (i.e. from within
    /// a task body this worker is executing).
    pub fn wait_until(&self, block_fn: impl FnOnce() + Send + 'static) {
        let on_task_complete = self
            .on_task_complete
            .lock()
            .clone()
            .expect("wait_until called before worker was started");
        self.aux_queue.push(Message::RunAux(Box::new(block_fn)));
        // Reentrant: dispatches further RunJob messages, invoking the same
        // completion callback as the outer loop, until the aux thread's
        // sentinel Exit unwinds this nested invocation.
        dispatch_loop(&self.main_queue, &on_task_complete);
    }

    pub fn signal_stop(&self) {
        self.main_queue.push(Message::Exit);
        self.aux_queue.push(Message::Exit);
    }

    pub fn join(&self) {
        if let Some(t) = self.main_thread.lock().take() {
            t.join().expect("worker main thread panicked");
        }
        if let Some(t) = self.aux_thread.lock().take() {
            t.join().expect("worker aux thread panicked");
        }
    }
}

/// Runs a task body to completion on the calling thread. Shared by the
/// worker dispatch loop and by the scheduler's inline `wait`/`yield_` paths,
/// which execute a stolen job directly on the caller's thread rather than
/// posting it to a queue.
pub(crate) fn run_job(task: TaskHandle, data: UserData, body: TaskBody, scheduler: Scheduler) {
    let mut ctx = TaskContext {
        task,
        data: &data,
        scheduler,
    };
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&mut ctx)));
    if let Err(panic) = result {
        tracing::error!(?task, "task body panicked; worker continues");
        drop(panic);
    }
}

/// Shared by the top-level worker thread entry point and by `wait_until`'s
/// reentrant invocation -- see the design notes on the re-entrant main loop.
/// Returns when it consumes an `Exit` message, which may be either a real
/// shutdown signal or the sentinel the auxiliary thread posts when its
/// block function completes.
fn dispatch_loop(queue: &BlockingQueue<Message>, on_task_complete: &OnTaskComplete) {
    loop {
        match queue.wait_pop() {
            Message::RunJob {
                task,
                data,
                body,
                scheduler,
            } => {
                run_job(task, data, body, scheduler);
                on_task_complete(task);
            }
            Message::RunAux(_) => unreachable!("RunAux is only ever posted to an aux queue"),
            Message::Exit => break,
        }
    }
}

fn run_aux_loop(queue: &BlockingQueue<Message>, main_queue: &BlockingQueue<Message>) {
    loop {
        match queue.wait_pop() {
            Message::RunAux(f) => {
                trace!("auxiliary thread running block_fn");
                f();
                main_queue.push(Message::Exit);
            }
            Message::RunJob { .. } => unreachable!("RunJob is only ever posted to a main queue"),
            Message::Exit => break,
        }
    }
}
