//! Composes an async read task and a compile task per shader via the
//! scheduler's dependency graph: `depends(compile, read); execute(compile)`.

use std::sync::Arc;

use parking_lot::Mutex;
use task_core::HandleTable;
use task_fs::{FileReadRequest, FileReadResponse, FileSystem};
use task_system::{Result, Scheduler, TaskContext, TaskDesc, TaskHandle};
use tracing::instrument;

use crate::compiler::ShaderCompiler;
use crate::defs::{ShaderCompileStatus, ShaderDesc, ShaderHandle, ShaderKind, ShaderType};

struct ShaderRecord {
    ty: ShaderType,
    debug_name: String,
    status: ShaderCompileStatus,
    bytecode: Option<Vec<u8>>,
    compile_task: Option<TaskHandle>,
}

struct Inner {
    scheduler: Scheduler,
    fs: Arc<FileSystem>,
    compiler: Arc<dyn ShaderCompiler>,
    shaders: Mutex<HandleTable<ShaderKind, ShaderRecord>>,
}

/// A cheap, `Clone`-able handle onto the shader database.
#[derive(Clone)]
pub struct ShaderDb(Arc<Inner>);

impl ShaderDb {
    pub fn new(scheduler: Scheduler, fs: Arc<FileSystem>, compiler: Arc<dyn ShaderCompiler>) -> Self {
        Self(Arc::new(Inner {
            scheduler,
            fs,
            compiler,
            shaders: Mutex::new(HandleTable::new()),
        }))
    }

    /// Registers a shader and immediately composes its read+compile tasks.
    /// Returns a handle usable with [`ShaderDb::wait`], [`ShaderDb::status`]
    /// and [`ShaderDb::bytecode`] once compilation finishes. Fails with
    /// [`task_system::TaskError::SchedulerStopped`] if the backing
    /// scheduler has already been stopped, in which case no shader record
    /// is left behind.
    #[instrument(skip(self), fields(name = %desc.debug_name))]
    pub fn compile_shader(&self, desc: ShaderDesc) -> Result<ShaderHandle> {
        let handle = self.0.shaders.lock().allocate(ShaderRecord {
            ty: desc.ty,
            debug_name: desc.debug_name.clone(),
            status: ShaderCompileStatus::Compiling,
            bytecode: None,
            compile_task: None,
        });

        let source = Arc::new(Mutex::new(Vec::new()));
        let source_for_read = source.clone();
        let read_handle = match self.0.fs.read(FileReadRequest {
            path: desc.path.clone(),
            on_progress: Box::new(move |resp: &FileReadResponse| {
                source_for_read.lock().extend_from_slice(&resp.chunk);
            }),
        }) {
            Ok(h) => h,
            Err(err) => {
                self.0.shaders.lock().free(handle);
                return Err(err);
            }
        };
        let read_task = self
            .0
            .fs
            .as_task(read_handle)
            .expect("FileSystem::read always creates a backing task");

        let db = self.clone();
        let compile_body = Box::new(move |_ctx: &mut TaskContext<'_>| {
            let source = source.lock().clone();
            let mut resolve_include = |include_path: &str| -> Option<Vec<u8>> { db.read_include(include_path) };
            let result = db.0.compiler.compile(&source, &mut resolve_include);

            let mut shaders = db.0.shaders.lock();
            if let Some(record) = shaders.get_mut(handle) {
                match result {
                    Ok(bytecode) => {
                        record.status = ShaderCompileStatus::Success;
                        record.bytecode = Some(bytecode);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "shader compile failed");
                        record.status = ShaderCompileStatus::Fail;
                    }
                }
            }
        });

        let compile_task = match self
            .0
            .scheduler
            .create_task(TaskDesc::new(format!("shader-compile:{}", desc.debug_name), compile_body), None)
        {
            Ok(h) => h,
            Err(err) => {
                self.0.shaders.lock().free(handle);
                return Err(err);
            }
        };
        self.0.scheduler.depends(compile_task, read_task);
        self.0
            .scheduler
            .execute(compile_task)
            .expect("compile_task was just created");

        if let Some(record) = self.0.shaders.lock().get_mut(handle) {
            record.compile_task = Some(compile_task);
        }

        Ok(handle)
    }

    /// Performs a nested synchronous read for an `#include` reference: a
    /// fresh read request, a blocking `wait`, then `close_handle`. Safe to
    /// call from inside the compile task's own worker because the read
    /// task's `yield_until` calls let that worker keep servicing other work
    /// while this wait is outstanding.
    fn read_include(&self, path: &str) -> Option<Vec<u8>> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let buf_for_read = buf.clone();
        let handle = self
            .0
            .fs
            .read(FileReadRequest {
                path: path.to_string(),
                on_progress: Box::new(move |resp: &FileReadResponse| {
                    buf_for_read.lock().extend_from_slice(&resp.chunk);
                }),
            })
            .ok()?;
        self.0.fs.wait(handle);
        let _ = self.0.fs.close_handle(handle);
        Some(Arc::try_unwrap(buf).map(Mutex::into_inner).unwrap_or_default())
    }

    pub fn wait(&self, handle: ShaderHandle) {
        let task = self.0.shaders.lock().get(handle).and_then(|r| r.compile_task);
        if let Some(task) = task {
            self.0.scheduler.wait(task);
        }
    }

    pub fn status(&self, handle: ShaderHandle) -> Option<ShaderCompileStatus> {
        self.0.shaders.lock().get(handle).map(|r| r.status)
    }

    pub fn bytecode(&self, handle: ShaderHandle) -> Option<Vec<u8>> {
        self.0.shaders.lock().get(handle).and_then(|r| r.bytecode.clone())
    }

    pub fn debug_name(&self, handle: ShaderHandle) -> Option<String> {
        self.0.shaders.lock().get(handle).map(|r| r.debug_name.clone())
    }

    pub fn shader_type(&self, handle: ShaderHandle) -> Option<ShaderType> {
        self.0.shaders.lock().get(handle).map(|r| r.ty)
    }
}
