//! Thread enumeration and agent thread spawning

use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use hpt_core::{HptError, HptResult, ThreadLister, ThreadRegistry, Tid};

/// Kernel id of the calling thread
pub fn current_tid() -> Tid {
    nix::unistd::gettid().as_raw()
}

/// Spawn an agent thread that blacklists itself before `body` runs.
///
/// Returns once the new thread's id is in the blacklist, so the next
/// enumeration can never claim it.
pub fn spawn_agent_thread<F, T>(
    name: String,
    registry: &Arc<ThreadRegistry>,
    body: F,
) -> HptResult<(Tid, JoinHandle<T>)>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<Tid>(1);
    let registry = Arc::clone(registry);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let me = current_tid();
            registry.blacklist(me);
            let _ = tx.send(me);
            body()
        })
        .map_err(|_| HptError::SpawnFailed)?;
    let tid = rx.recv().map_err(|_| HptError::SpawnFailed)?;
    Ok((tid, handle))
}

/// Lists threads from a `/proc/<pid>/task` directory.
#[derive(Debug, Clone)]
pub struct ProcTaskLister {
    dir: PathBuf,
}

impl ProcTaskLister {
    /// Threads of the calling process
    pub fn new() -> Self {
        Self::with_dir("/proc/self/task")
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for ProcTaskLister {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadLister for ProcTaskLister {
    fn list_threads(&self) -> HptResult<Vec<Tid>> {
        let errno = |e: std::io::Error| HptError::ThreadList(e.raw_os_error().unwrap_or(0));
        let mut tids = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(errno)? {
            // Threads may exit mid-listing; skip what vanished.
            let Ok(entry) = entry else { continue };
            if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<Tid>().ok()) {
                tids.push(tid);
            }
        }
        Ok(tids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_self() {
        let tids = ProcTaskLister::new().list_threads().unwrap();
        assert!(tids.contains(&current_tid()));
        assert!(tids.contains(&(std::process::id() as Tid)));
    }

    #[test]
    fn test_sees_new_thread() {
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let h = thread::spawn(move || {
            tx.send(current_tid()).unwrap();
            let _ = done_rx.recv();
        });
        let tid = rx.recv().unwrap();
        assert!(ProcTaskLister::new().list_threads().unwrap().contains(&tid));
        done_tx.send(()).unwrap();
        h.join().unwrap();
    }

    #[test]
    fn test_agent_thread_blacklisted_before_return() {
        let registry = Arc::new(ThreadRegistry::new());
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (tid, handle) = spawn_agent_thread("hpt-test".into(), &registry, move || {
            let _ = go_rx.recv();
            current_tid()
        })
        .unwrap();

        assert!(registry.is_blacklisted(tid));
        assert!(!registry.try_claim(tid));
        assert!(ProcTaskLister::new().list_threads().unwrap().contains(&tid));

        go_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), tid);
    }

    #[test]
    fn test_missing_dir() {
        let lister = ProcTaskLister::with_dir("/proc/self/no-such-task-dir");
        assert!(matches!(lister.list_threads(), Err(HptError::ThreadList(_))));
    }
}
