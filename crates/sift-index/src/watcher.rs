//! Debounced filesystem watching.
//!
//! Raw OS events are admission-filtered, content-hashed to drop
//! save-without-change noise, and buffered per path (last write wins). A
//! single debounce timer restarts on every buffered event and flushes the
//! whole buffer as one batch when it fires. Deletions skip the buffer
//! entirely and flush immediately, clearing any buffered event and tracked
//! hash for that path — so a delete always lands after whatever was
//! buffered for it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::Watcher;
use notify::event::{EventKind, ModifyKind, RenameMode};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use sift_core::config::WatchConfig;
use sift_core::{ChangeEvent, ChangeKind};

use crate::error::Result;

/// Which paths are worth watching at all.
#[derive(Debug, Clone)]
pub struct Admission {
    allow_extensions: HashSet<String>,
    ignore_globs: Vec<glob::Pattern>,
    max_file_size_bytes: u64,
}

impl Admission {
    /// Build from configuration. Glob syntax was validated at config load;
    /// a failure here still surfaces as an error rather than a panic.
    ///
    /// # Errors
    ///
    /// Returns an error if an ignore glob fails to compile.
    pub fn from_config(config: &WatchConfig) -> Result<Self> {
        let mut ignore_globs = Vec::with_capacity(config.ignore_globs.len());
        for pattern in &config.ignore_globs {
            ignore_globs.push(glob::Pattern::new(pattern).map_err(|e| {
                crate::error::IndexError::Glob {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }
            })?);
        }
        Ok(Self {
            allow_extensions: config.allow_extensions.iter().cloned().collect(),
            ignore_globs,
            max_file_size_bytes: config.max_file_size_bytes(),
        })
    }

    /// Admit everything of any size. Used by tests and full scans over
    /// pre-filtered trees.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allow_extensions: HashSet::new(),
            ignore_globs: Vec::new(),
            max_file_size_bytes: u64::MAX,
        }
    }

    /// Extension allow-list and ignore globs. An empty allow-list admits
    /// every extension.
    #[must_use]
    pub fn admits(&self, path: &Path) -> bool {
        if !self.allow_extensions.is_empty() {
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                return false;
            };
            if !self.allow_extensions.contains(ext) {
                return false;
            }
        }
        let path_str = path.to_string_lossy();
        !self
            .ignore_globs
            .iter()
            .any(|g| g.matches(path_str.as_ref()))
    }

    #[must_use]
    pub fn admits_size(&self, len: u64) -> bool {
        len <= self.max_file_size_bytes
    }
}

/// Per-path event buffer, last write wins.
#[derive(Debug, Default)]
pub struct DebounceBuffer {
    events: HashMap<PathBuf, ChangeEvent>,
}

impl DebounceBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `event`, replacing any earlier event for the same path.
    pub fn note(&mut self, event: ChangeEvent) {
        self.events.insert(event.path.clone(), event);
    }

    /// Drop the buffered event for `path`, if any.
    pub fn remove(&mut self, path: &Path) {
        self.events.remove(path);
    }

    /// Take everything buffered, in path order for determinism.
    pub fn flush(&mut self) -> Vec<ChangeEvent> {
        let mut batch: Vec<ChangeEvent> = self.events.drain().map(|(_, e)| e).collect();
        batch.sort_by(|a, b| a.path.cmp(&b.path));
        batch
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Map one raw notify event to change events. Access and metadata-only
/// events produce nothing.
fn map_event(event: &notify::Event) -> Vec<ChangeEvent> {
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Created, p.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Deleted, p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![ChangeEvent::moved(
                event.paths[0].clone(),
                event.paths[1].clone(),
            )]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Deleted, p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Created, p.clone()))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| ChangeEvent::new(ChangeKind::Modified, p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Watcher tunables beyond admission.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub directories: Vec<PathBuf>,
    pub debounce: Duration,
}

impl WatcherOptions {
    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            directories: config.directories.clone(),
            debounce: Duration::from_secs(config.debounce_seconds),
        }
    }
}

/// Running watcher handle: `Stopped → Running → Stopped`.
pub struct FileWatcher {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching. Batches of change events are delivered on `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS watcher cannot be initialized or a
    /// configured directory cannot be watched.
    pub fn start(
        options: &WatcherOptions,
        admission: Admission,
        sink: mpsc::Sender<Vec<ChangeEvent>>,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Event>(256);

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let _ = raw_tx.blocking_send(event);
                    }
                    Err(e) => tracing::warn!("watcher error: {e}"),
                }
            })?;

        for dir in &options.directories {
            watcher.watch(dir, notify::RecursiveMode::Recursive)?;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let debounce = options.debounce;
        let handle = tokio::spawn(pump(watcher, raw_rx, shutdown_rx, admission, debounce, sink));

        Ok(Self { shutdown, handle })
    }

    /// Stop watching and wait for the event loop to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn sleep_or_pend(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn pump(
    watcher: impl Watcher + Send + 'static,
    mut raw_rx: mpsc::Receiver<notify::Event>,
    mut shutdown_rx: watch::Receiver<bool>,
    admission: Admission,
    debounce: Duration,
    sink: mpsc::Sender<Vec<ChangeEvent>>,
) {
    // owns the OS watcher for the lifetime of the loop
    let _watcher = watcher;
    let mut buffer = DebounceBuffer::new();
    let mut hashes: HashMap<PathBuf, String> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { break };
                for event in map_event(&raw) {
                    let buffered =
                        handle_change(&admission, &mut buffer, &mut hashes, &sink, event).await;
                    if buffered {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
            }
            () = sleep_or_pend(deadline) => {
                deadline = None;
                let batch = buffer.flush();
                if !batch.is_empty() {
                    tracing::debug!(events = batch.len(), "debounce flush");
                    if sink.send(batch).await.is_err() {
                        break;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let batch = buffer.flush();
                    if !batch.is_empty() {
                        let _ = sink.send(batch).await;
                    }
                    break;
                }
            }
        }
    }
}

/// Returns true when the event was buffered (and the debounce timer
/// should restart).
async fn handle_change(
    admission: &Admission,
    buffer: &mut DebounceBuffer,
    hashes: &mut HashMap<PathBuf, String>,
    sink: &mpsc::Sender<Vec<ChangeEvent>>,
    event: ChangeEvent,
) -> bool {
    if !admission.admits(&event.path) {
        return false;
    }

    match event.kind {
        ChangeKind::Deleted => {
            // bypass the buffer entirely; the delete supersedes anything
            // buffered for this path
            buffer.remove(&event.path);
            hashes.remove(&event.path);
            let _ = sink.send(vec![event]).await;
            false
        }
        ChangeKind::Created | ChangeKind::Modified | ChangeKind::Moved => {
            if let Some(old) = &event.old_path {
                hashes.remove(old);
            }
            match hash_if_admissible(admission, &event.path).await {
                Some(hash) => {
                    if hashes.get(&event.path) == Some(&hash) {
                        tracing::trace!(path = %event.path.display(), "content unchanged, suppressed");
                        return false;
                    }
                    hashes.insert(event.path.clone(), hash);
                    buffer.note(event);
                    true
                }
                None => {
                    tracing::trace!(path = %event.path.display(), "unreadable or oversized, ignored");
                    false
                }
            }
        }
    }
}

async fn hash_if_admissible(admission: &Admission, path: &Path) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() || !admission.admits_size(meta.len()) {
        return None;
    }
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admission(exts: &[&str], globs: &[&str]) -> Admission {
        Admission::from_config(&WatchConfig {
            directories: Vec::new(),
            debounce_seconds: 5,
            max_file_size_mb: 1.0,
            allow_extensions: exts.iter().map(|s| (*s).to_owned()).collect(),
            ignore_globs: globs.iter().map(|s| (*s).to_owned()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn admission_filters_extensions() {
        let a = admission(&["rs", "md"], &[]);
        assert!(a.admits(Path::new("src/lib.rs")));
        assert!(a.admits(Path::new("README.md")));
        assert!(!a.admits(Path::new("image.png")));
        assert!(!a.admits(Path::new("no_extension")));
    }

    #[test]
    fn admission_empty_allowlist_admits_all() {
        let a = Admission::permissive();
        assert!(a.admits(Path::new("anything.xyz")));
        assert!(a.admits(Path::new("no_extension")));
    }

    #[test]
    fn admission_ignore_globs() {
        let a = admission(&["rs"], &["**/target/**"]);
        assert!(a.admits(Path::new("src/lib.rs")));
        assert!(!a.admits(Path::new("project/target/debug/build.rs")));
    }

    #[test]
    fn admission_size_ceiling() {
        let a = admission(&["rs"], &[]);
        assert!(a.admits_size(1024));
        assert!(!a.admits_size(2 * 1024 * 1024));
    }

    #[test]
    fn admission_invalid_glob_is_error() {
        let result = Admission::from_config(&WatchConfig {
            ignore_globs: vec!["[".into()],
            ..WatchConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn debounce_buffer_coalesces_same_path() {
        let mut buffer = DebounceBuffer::new();
        for _ in 0..10 {
            buffer.note(ChangeEvent::new(ChangeKind::Modified, "a.rs"));
        }
        assert_eq!(buffer.len(), 1);
        let batch = buffer.flush();
        assert_eq!(batch.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn debounce_buffer_last_write_wins() {
        let mut buffer = DebounceBuffer::new();
        buffer.note(ChangeEvent::new(ChangeKind::Created, "a.rs"));
        buffer.note(ChangeEvent::new(ChangeKind::Modified, "a.rs"));
        let batch = buffer.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn debounce_buffer_remove_clears_path() {
        let mut buffer = DebounceBuffer::new();
        buffer.note(ChangeEvent::new(ChangeKind::Modified, "a.rs"));
        buffer.note(ChangeEvent::new(ChangeKind::Modified, "b.rs"));
        buffer.remove(Path::new("a.rs"));
        let batch = buffer.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].path, PathBuf::from("b.rs"));
    }

    #[test]
    fn map_event_create_and_remove() {
        let create = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec!["a.rs".into()],
            attrs: notify::event::EventAttributes::new(),
        };
        let mapped = map_event(&create);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].kind, ChangeKind::Created);

        let remove = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec!["a.rs".into()],
            attrs: notify::event::EventAttributes::new(),
        };
        assert_eq!(map_event(&remove)[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn map_event_rename_both_becomes_moved() {
        let rename = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec!["old.rs".into(), "new.rs".into()],
            attrs: notify::event::EventAttributes::new(),
        };
        let mapped = map_event(&rename);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].kind, ChangeKind::Moved);
        assert_eq!(mapped[0].path, PathBuf::from("new.rs"));
        assert_eq!(mapped[0].old_path, Some(PathBuf::from("old.rs")));
    }

    #[test]
    fn map_event_access_ignored() {
        let access = notify::Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec!["a.rs".into()],
            attrs: notify::event::EventAttributes::new(),
        };
        assert!(map_event(&access).is_empty());
    }

    #[tokio::test]
    async fn start_with_valid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let options = WatcherOptions {
            directories: vec![dir.path().to_path_buf()],
            debounce: Duration::from_millis(100),
        };
        let watcher = FileWatcher::start(&options, Admission::permissive(), tx);
        assert!(watcher.is_ok());
        watcher.unwrap().stop().await;
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let (tx, _rx) = mpsc::channel(8);
        let options = WatcherOptions {
            directories: vec![PathBuf::from("/nonexistent/path/xyz")],
            debounce: Duration::from_millis(100),
        };
        assert!(FileWatcher::start(&options, Admission::permissive(), tx).is_err());
    }

    #[tokio::test]
    async fn write_then_delete_produces_batches() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let options = WatcherOptions {
            directories: vec![dir.path().to_path_buf()],
            debounce: Duration::from_millis(200),
        };
        let watcher = FileWatcher::start(&options, Admission::permissive(), tx).unwrap();

        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn a() {}").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected a debounced batch")
            .expect("channel open");
        assert!(batch.iter().any(|e| e.path == path));
        assert!(
            batch
                .iter()
                .all(|e| matches!(e.kind, ChangeKind::Created | ChangeKind::Modified))
        );

        std::fs::remove_file(&path).unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected a delete batch")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ChangeKind::Deleted);

        watcher.stop().await;
    }
}
