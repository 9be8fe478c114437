//! The asynchronous file system: every read/write is one task whose body
//! drives a [`FileBackend`] through `yield_until`, so the task's worker
//! keeps making progress on unrelated work while the native I/O call runs
//! on that worker's auxiliary thread.

use std::sync::Arc;

use parking_lot::Mutex;
use task_core::HandleTable;
use task_system::{Result, Scheduler, TaskContext, TaskDesc, TaskFlags, TaskHandle};
use tracing::instrument;

use crate::backend::{FileBackend, ReadChunk, ReadSession, WriteSession};
use crate::defs::{AsyncFileHandle, FileAttributes, FileKind, FileReadRequest, FileReadResponse, FileStatus, FileWriteRequest, FileWriteResponse};

pub struct FileSystem {
    scheduler: Scheduler,
    backend: Arc<dyn FileBackend>,
    requests: Mutex<HandleTable<FileKind, TaskHandle>>,
}

impl FileSystem {
    pub fn new(scheduler: Scheduler, backend: Arc<dyn FileBackend>) -> Self {
        Self {
            scheduler,
            backend,
            requests: Mutex::new(HandleTable::new()),
        }
    }

    /// Issues an asynchronous read. `request.on_progress` is invoked once
    /// for `Opening`, once per chunk read (`Reading`), and exactly once
    /// with a terminal status (`OpenFail`, `ReadingFail`, or
    /// `ReadingSuccessEof`). Fails with [`task_system::TaskError::SchedulerStopped`]
    /// if the backing scheduler has already been stopped.
    #[instrument(skip(self, request), fields(path = %request.path))]
    pub fn read(&self, request: FileReadRequest) -> Result<AsyncFileHandle> {
        let FileReadRequest { path, mut on_progress } = request;
        let name = format!("fs-read:{path}");
        let backend = self.backend.clone();

        let body = Box::new(move |ctx: &mut TaskContext<'_>| {
            on_progress(&FileReadResponse { status: FileStatus::Opening, chunk: Vec::new() });

            let Some(session) = backend.open_read(&path) else {
                on_progress(&FileReadResponse { status: FileStatus::OpenFail, chunk: Vec::new() });
                return;
            };
            let session = Arc::new(Mutex::new(session));

            loop {
                let result: Arc<Mutex<Option<ReadChunk>>> = Arc::new(Mutex::new(None));
                let session_for_aux = session.clone();
                let result_for_aux = result.clone();
                ctx.yield_until(move || {
                    let chunk = session_for_aux.lock().next_chunk();
                    *result_for_aux.lock() = chunk;
                });

                match result.lock().take() {
                    None => {
                        on_progress(&FileReadResponse { status: FileStatus::ReadingFail, chunk: Vec::new() });
                        return;
                    }
                    Some(chunk) if chunk.eof => {
                        on_progress(&FileReadResponse { status: FileStatus::ReadingSuccessEof, chunk: chunk.data });
                        return;
                    }
                    Some(chunk) => {
                        on_progress(&FileReadResponse { status: FileStatus::Reading, chunk: chunk.data });
                    }
                }
            }
        });

        let task = self
            .scheduler
            .create_task(TaskDesc::new(name, body).with_flags(TaskFlags::AUTO_START), None)?;
        Ok(self.requests.lock().allocate(task))
    }

    /// Issues an asynchronous write of the whole buffer in one
    /// `yield_until` call, matching the original (writes are not chunked).
    /// Fails with [`task_system::TaskError::SchedulerStopped`] if the
    /// backing scheduler has already been stopped.
    #[instrument(skip(self, request), fields(path = %request.path))]
    pub fn write(&self, request: FileWriteRequest) -> Result<AsyncFileHandle> {
        let FileWriteRequest { path, data, mut on_progress } = request;
        let name = format!("fs-write:{path}");
        let backend = self.backend.clone();

        let body = Box::new(move |ctx: &mut TaskContext<'_>| {
            on_progress(&FileWriteResponse { status: FileStatus::Opening });

            let Some(session) = backend.open_write(&path) else {
                on_progress(&FileWriteResponse { status: FileStatus::OpenFail });
                return;
            };
            let session = Arc::new(Mutex::new(session));
            let ok: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));

            let session_for_aux = session.clone();
            let ok_for_aux = ok.clone();
            ctx.yield_until(move || {
                let success = session_for_aux.lock().write_all(&data);
                *ok_for_aux.lock() = success;
            });

            if *ok.lock() {
                on_progress(&FileWriteResponse { status: FileStatus::WriteSuccess });
            } else {
                on_progress(&FileWriteResponse { status: FileStatus::WriteFail });
            }
        });

        let task = self
            .scheduler
            .create_task(TaskDesc::new(name, body).with_flags(TaskFlags::AUTO_START), None)?;
        Ok(self.requests.lock().allocate(task))
    }

    /// Blocks until `handle`'s task has finished. A no-op on an unknown
    /// handle, matching the original's silent-ignore tier.
    pub fn wait(&self, handle: AsyncFileHandle) {
        if let Some(task) = self.task_of(handle) {
            self.scheduler.wait(task);
        }
    }

    /// Waits for the request, then tears down its task record. A no-op on
    /// an unknown handle.
    pub fn close_handle(&self, handle: AsyncFileHandle) -> Result<()> {
        let Some(task) = self.task_of(handle) else {
            return Ok(());
        };
        self.scheduler.wait(task);
        self.scheduler.clean_task_tree(task)?;
        self.requests.lock().free(handle);
        Ok(())
    }

    /// The task backing `handle`, for composing into a larger dependency
    /// graph (the shader database's include-resolution path does this).
    pub fn as_task(&self, handle: AsyncFileHandle) -> Option<TaskHandle> {
        self.task_of(handle)
    }

    fn task_of(&self, handle: AsyncFileHandle) -> Option<TaskHandle> {
        self.requests.lock().get(handle).copied()
    }

    // -- Synchronous directory/attribute utilities: these never go through
    // the task graph, matching the original `IFileSystem` contract.

    pub fn carve_directory_path(&self, directory: &str) -> bool {
        std::fs::create_dir_all(directory).is_ok()
    }

    pub fn enumerate_files(&self, directory: &str) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(directory) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.path().to_str().map(String::from))
            .collect()
    }

    pub fn delete_directory(&self, directory: &str) -> bool {
        std::fs::remove_dir_all(directory).is_ok()
    }

    pub fn delete_file(&self, path: &str) -> bool {
        std::fs::remove_file(path).is_ok()
    }

    pub fn file_attributes(&self, path: &str) -> Option<FileAttributes> {
        let meta = std::fs::metadata(path).ok()?;
        Some(FileAttributes {
            size: meta.len(),
            is_directory: meta.is_dir(),
        })
    }
}
