//! The file-change watcher: runs on its own thread (never a scheduler
//! worker), mixing a blocking native watch with a cooperative control
//! channel the way the original `FileWatcher` mixes `WaitForSingleObject`
//! with its `ThreadQueue`'s acquire/release handoff.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{instrument, warn};

use task_system::BlockingQueue;

enum Control {
    Stop,
}

pub type OnFilesChanged = Box<dyn Fn(HashSet<String>) + Send + Sync>;

/// Watches one directory tree and invokes a callback with the set of
/// changed paths observed since the last wake. `start`/`stop` may each be
/// called at most once per instance (mirrors the original's single-shot
/// lifetime; a fresh `FileWatcher` is cheap to construct for a new watch).
pub struct FileWatcher {
    control: Arc<BlockingQueue<Control>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWatcher {
    pub fn new() -> Self {
        Self {
            control: Arc::new(BlockingQueue::new()),
            thread: Mutex::new(None),
        }
    }

    #[instrument(skip(self, on_changed), fields(directory = %directory.as_ref().display()))]
    pub fn start(&self, directory: impl AsRef<std::path::Path>, on_changed: OnFilesChanged, polling_rate_ms: u64) {
        let mut thread = self.thread.lock();
        assert!(thread.is_none(), "file watcher already started");

        let dir = directory.as_ref().to_path_buf();
        let control = self.control.clone();
        *thread = Some(
            std::thread::Builder::new()
                .name("task-fs-watcher".to_string())
                .spawn(move || watch_loop(dir, on_changed, polling_rate_ms, &control))
                .expect("failed to spawn file watcher thread"),
        );
    }

    pub fn stop(&self) {
        self.control.push(Control::Stop);
        if let Some(t) = self.thread.lock().take() {
            t.join().expect("file watcher thread panicked");
        }
    }
}

fn watch_loop(dir: PathBuf, on_changed: OnFilesChanged, polling_rate_ms: u64, control: &BlockingQueue<Control>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(err) => {
            warn!(?err, "failed to create native file watcher");
            return;
        }
    };

    if let Err(err) = watcher.watch(&dir, RecursiveMode::Recursive) {
        warn!(?err, directory = %dir.display(), "failed watching directory");
        return;
    }

    let timeout = Duration::from_millis(polling_rate_ms.max(1));
    loop {
        match rx.recv_timeout(timeout) {
            Ok(event) => {
                let paths: HashSet<String> = event
                    .paths
                    .iter()
                    .filter_map(|p| p.to_str().map(String::from))
                    .collect();
                if !paths.is_empty() {
                    on_changed(paths);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut guard = control.acquire();
                if matches!(guard.try_pop(), Some(Control::Stop)) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
