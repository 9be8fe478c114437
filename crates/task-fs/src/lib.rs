//! Asynchronous file I/O and directory-change watching, expressed purely as
//! consumers of the task-system API: every read or write is one task that
//! drives native I/O through `yield_until`.

mod backend;
mod defs;
mod filesystem;
mod watcher;

pub use backend::{FakeFileBackend, FileBackend, ReadChunk, ReadSession, StdFileBackend, WriteSession};
pub use defs::{AsyncFileHandle, FileAttributes, FileKind, FileReadRequest, FileReadResponse, FileStatus, FileWriteRequest, FileWriteResponse};
pub use filesystem::FileSystem;
pub use watcher::{FileWatcher, OnFilesChanged};
