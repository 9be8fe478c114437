//! Shader compilation orchestration: a thin layer over `task-system` and
//! `task-fs` that expresses "read this source, then compile it" as a
//! two-task dependency edge and leaves the compiler itself to the caller.

mod compiler;
mod db;
mod defs;

pub use compiler::{IncludeResolver, ShaderCompiler};
pub use db::ShaderDb;
pub use defs::{ShaderCompileResponse, ShaderCompileStatus, ShaderDesc, ShaderHandle, ShaderKind, ShaderType};
