use std::sync::{Arc, Mutex};

use task_fs::{FakeFileBackend, FileReadRequest, FileReadResponse, FileStatus, FileSystem};
use task_system::{Scheduler, SchedulerConfig};

fn scheduler() -> Scheduler {
    let s = Scheduler::new(SchedulerConfig { thread_pool_size: 2 });
    s.start().unwrap();
    s
}

#[test]
fn read_composes_scripted_chunks_to_eof() {
    let s = scheduler();
    let backend = Arc::new(FakeFileBackend::new(vec!["ab", "cd", ""]));
    let fs = FileSystem::new(s.clone(), backend);

    let payload = Arc::new(Mutex::new(Vec::<u8>::new()));
    let final_status = Arc::new(Mutex::new(None));
    let payload2 = payload.clone();
    let final_status2 = final_status.clone();

    let handle = fs
        .read(FileReadRequest {
            path: "fake.txt".to_string(),
            on_progress: Box::new(move |resp: &FileReadResponse| {
                payload2.lock().unwrap().extend_from_slice(&resp.chunk);
                if resp.status.is_terminal() {
                    *final_status2.lock().unwrap() = Some(resp.status);
                }
            }),
        })
        .unwrap();

    fs.wait(handle);

    assert_eq!(payload.lock().unwrap().as_slice(), b"abcd");
    assert_eq!(final_status.lock().unwrap(), Some(FileStatus::ReadingSuccessEof));

    fs.close_handle(handle).unwrap();
    s.signal_stop();
    s.join();
}

#[test]
fn read_of_unopenable_path_reports_open_fail() {
    let s = scheduler();
    let backend = Arc::new(ShortFailBackend);
    let fs = FileSystem::new(s.clone(), backend);

    let final_status = Arc::new(Mutex::new(None));
    let final_status2 = final_status.clone();
    let handle = fs
        .read(FileReadRequest {
            path: "does-not-exist".to_string(),
            on_progress: Box::new(move |resp: &FileReadResponse| {
                if resp.status.is_terminal() {
                    *final_status2.lock().unwrap() = Some(resp.status);
                }
            }),
        })
        .unwrap();
    fs.wait(handle);
    assert_eq!(final_status.lock().unwrap(), Some(FileStatus::OpenFail));

    s.signal_stop();
    s.join();
}

struct ShortFailBackend;

impl task_fs::FileBackend for ShortFailBackend {
    fn open_read(&self, _path: &str) -> Option<Box<dyn task_fs::ReadSession>> {
        None
    }
    fn open_write(&self, _path: &str) -> Option<Box<dyn task_fs::WriteSession>> {
        None
    }
}
