//! The native I/O seam. `FileSystem` never touches `std::fs` directly --
//! every read/write task drives a [`FileBackend`], which keeps the task
//! bodies testable without touching disk (see [`FakeFileBackend`]).

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};

/// One chunk of a read, or the end-of-file marker.
pub struct ReadChunk {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// A single open read; `next_chunk` is called repeatedly from inside
/// `yield_until` until it reports `eof` or returns `None` (read failure).
pub trait ReadSession: Send {
    fn next_chunk(&mut self) -> Option<ReadChunk>;
}

/// A single open write.
pub trait WriteSession: Send {
    fn write_all(&mut self, data: &[u8]) -> bool;
}

/// Opens read and write sessions. `open_read`/`open_write` return `None` on
/// failure (mirrors the original's `InternalFileSystem::valid(handle)`
/// check after `openFile`).
pub trait FileBackend: Send + Sync {
    fn open_read(&self, path: &str) -> Option<Box<dyn ReadSession>>;
    fn open_write(&self, path: &str) -> Option<Box<dyn WriteSession>>;
}

const CHUNK_SIZE: usize = 64 * 1024;

/// The production backend: plain buffered `std::fs` reads and writes.
pub struct StdFileBackend;

impl FileBackend for StdFileBackend {
    fn open_read(&self, path: &str) -> Option<Box<dyn ReadSession>> {
        let file = File::open(path).ok()?;
        Some(Box::new(StdReadSession { file }))
    }

    fn open_write(&self, path: &str) -> Option<Box<dyn WriteSession>> {
        let file = File::create(path).ok()?;
        Some(Box::new(StdWriteSession { file }))
    }
}

struct StdReadSession {
    file: File,
}

impl ReadSession for StdReadSession {
    fn next_chunk(&mut self) -> Option<ReadChunk> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        match self.file.read(&mut buf) {
            Ok(0) => Some(ReadChunk { data: Vec::new(), eof: true }),
            Ok(n) => {
                buf.truncate(n);
                Some(ReadChunk { data: buf, eof: false })
            }
            Err(_) => None,
        }
    }
}

struct StdWriteSession {
    file: File,
}

impl WriteSession for StdWriteSession {
    fn write_all(&mut self, data: &[u8]) -> bool {
        self.file.write_all(data).is_ok()
    }
}

/// A scripted backend for tests: every `open_read` call returns a session
/// that yields the same pre-recorded chunk sequence, one chunk per
/// `next_chunk` call. An empty chunk signals eof, matching the convention
/// the production backend uses for a zero-byte `read`.
pub struct FakeFileBackend {
    chunks: Vec<Vec<u8>>,
}

impl FakeFileBackend {
    pub fn new(chunks: Vec<&str>) -> Self {
        Self {
            chunks: chunks.into_iter().map(|s| s.as_bytes().to_vec()).collect(),
        }
    }
}

impl FileBackend for FakeFileBackend {
    fn open_read(&self, _path: &str) -> Option<Box<dyn ReadSession>> {
        Some(Box::new(FakeReadSession {
            remaining: self.chunks.clone().into(),
        }))
    }

    fn open_write(&self, _path: &str) -> Option<Box<dyn WriteSession>> {
        Some(Box::new(FakeWriteSession))
    }
}

struct FakeReadSession {
    remaining: VecDeque<Vec<u8>>,
}

impl ReadSession for FakeReadSession {
    fn next_chunk(&mut self) -> Option<ReadChunk> {
        match self.remaining.pop_front() {
            Some(data) if data.is_empty() => Some(ReadChunk { data, eof: true }),
            Some(data) => Some(ReadChunk { data, eof: false }),
            None => Some(ReadChunk { data: Vec::new(), eof: true }),
        }
    }
}

struct FakeWriteSession;

impl WriteSession for FakeWriteSession {
    fn write_all(&mut self, _data: &[u8]) -> bool {
        true
    }
}
