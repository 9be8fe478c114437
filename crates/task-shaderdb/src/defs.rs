//! Shader database types.

use task_core::Handle;

/// Zero-sized tag distinguishing shader handles from task or file handles.
pub enum ShaderKind {}

pub type ShaderHandle = Handle<ShaderKind>;

/// Only `Compute` from the original's `ShaderType` survives -- the graphics
/// pipeline stages it enumerated alongside it belong to the GPU device
/// abstractions this crate treats as an out-of-scope collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderType {
    Compute,
}

/// Describes a shader to compile: its source path and a debug name used in
/// task naming and logs.
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub ty: ShaderType,
    pub debug_name: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCompileStatus {
    Pending,
    Compiling,
    Success,
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderCompileResponse {
    pub handle: ShaderHandle,
    pub status: ShaderCompileStatus,
}
