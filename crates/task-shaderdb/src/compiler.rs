//! The compiler seam. The actual shader-source preprocessor and compiler
//! driver invocation are out of scope (see the crate's module docs) --
//! callers inject whatever real compiler they have as a [`ShaderCompiler`].

/// Resolves one `#include`-style reference to its bytes, or `None` if it
/// cannot be found. Implementations are expected to perform a nested
/// synchronous file read (`FileSystem::read` + `wait` + `close_handle`)
/// when invoked from within a compile task -- safe to do because the read
/// task's own `yield_until` calls keep the worker making progress on other
/// work while this nested wait runs.
pub type IncludeResolver<'a> = dyn FnMut(&str) -> Option<Vec<u8>> + 'a;

/// Compiles one shader's source to whatever bytecode representation the
/// caller's backend produces. Only the task-graph composition around this
/// call is this crate's concern, not the compiler itself.
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, source: &[u8], resolve_include: &mut IncludeResolver<'_>) -> Result<Vec<u8>, String>;
}
