use std::sync::Arc;

use task_fs::{FakeFileBackend, FileSystem};
use task_shaderdb::{ShaderCompiler, ShaderDb, ShaderDesc, ShaderType, ShaderCompileStatus, IncludeResolver};
use task_system::{Scheduler, SchedulerConfig};

struct UppercaseCompiler;

impl ShaderCompiler for UppercaseCompiler {
    fn compile(&self, source: &[u8], _resolve_include: &mut IncludeResolver<'_>) -> Result<Vec<u8>, String> {
        Ok(source.to_ascii_uppercase())
    }
}

struct AlwaysFailCompiler;

impl ShaderCompiler for AlwaysFailCompiler {
    fn compile(&self, _source: &[u8], _resolve_include: &mut IncludeResolver<'_>) -> Result<Vec<u8>, String> {
        Err("syntax error".to_string())
    }
}

fn scheduler() -> Scheduler {
    let s = Scheduler::new(SchedulerConfig { thread_pool_size: 2 });
    s.start().unwrap();
    s
}

#[test]
fn compile_reads_source_then_compiles() {
    let s = scheduler();
    let fs = Arc::new(FileSystem::new(s.clone(), Arc::new(FakeFileBackend::new(vec!["void main() {}", ""]))));
    let db = ShaderDb::new(s.clone(), fs, Arc::new(UppercaseCompiler));

    let handle = db
        .compile_shader(ShaderDesc {
            ty: ShaderType::Compute,
            debug_name: "test.comp".to_string(),
            path: "shaders/test.comp".to_string(),
        })
        .unwrap();
    db.wait(handle);

    assert_eq!(db.status(handle), Some(ShaderCompileStatus::Success));
    assert_eq!(db.bytecode(handle).unwrap(), b"VOID MAIN() {}");

    s.signal_stop();
    s.join();
}

#[test]
fn failed_compile_reports_fail_status() {
    let s = scheduler();
    let fs = Arc::new(FileSystem::new(s.clone(), Arc::new(FakeFileBackend::new(vec!["garbage", ""]))));
    let db = ShaderDb::new(s.clone(), fs, Arc::new(AlwaysFailCompiler));

    let handle = db
        .compile_shader(ShaderDesc {
            ty: ShaderType::Compute,
            debug_name: "bad.comp".to_string(),
            path: "shaders/bad.comp".to_string(),
        })
        .unwrap();
    db.wait(handle);

    assert_eq!(db.status(handle), Some(ShaderCompileStatus::Fail));
    assert!(db.bytecode(handle).is_none());

    s.signal_stop();
    s.join();
}
