//! Change detection: a recursive directory watch with per-path debounce.
//!
//! notify delivers raw notifications on its own thread. A pump task turns
//! them into [`ChangeEvent`]s:
//!
//! - removals (and the old half of a rename) are emitted immediately;
//! - a new directory is added to the watch set, and the files already inside
//!   it are scheduled as creations; the directory itself is never emitted;
//! - everything else goes through [`Debouncer`], which emits one event per
//!   path once the path has been quiet for the debounce window.
//!
//! The watch is non-recursive per directory so that new subtrees are picked up
//! the same way on every platform.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use docksync_core::{ChangeEvent, ChangeOp};

use crate::error::{io_err, DaemonError};

// ---------------------------------------------------------------------------
// ChangeDetector
// ---------------------------------------------------------------------------

pub struct ChangeDetector {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    errors: mpsc::UnboundedReceiver<DaemonError>,
    debouncer: Arc<Debouncer>,
    pump: JoinHandle<()>,
}

impl ChangeDetector {
    /// Watch `root` and every directory below it.
    ///
    /// Must be called from inside a tokio runtime. Watch registration for the
    /// initial tree happens before this returns.
    pub fn start(root: &Path, window: Duration) -> Result<Self, DaemonError> {
        let (debouncer, events, errors) = Debouncer::new(window);

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = raw_tx.send(event);
        })?;
        let mut watched = HashSet::new();
        register_tree(&mut watcher, &mut watched, root)?;
        tracing::info!(
            root = %root.display(),
            directories = watched.len(),
            "watching source tree",
        );

        let pump = tokio::spawn(pump(watcher, watched, raw_rx, debouncer.clone()));
        Ok(Self {
            events,
            errors,
            debouncer,
            pump,
        })
    }

    /// The next change, or the next error reported while watching.
    ///
    /// Returns `None` once the detector is closed.
    pub async fn recv(&mut self) -> Option<Result<ChangeEvent, DaemonError>> {
        tokio::select! {
            biased;
            Some(event) = self.events.recv() => Some(Ok(event)),
            Some(err) = self.errors.recv() => Some(Err(err)),
            else => None,
        }
    }

    /// Stop the watch and unblock [`recv`](Self::recv). Pending debounced
    /// events are dropped.
    pub fn close(&mut self) {
        self.pump.abort();
        self.debouncer.cancel_all();
        self.events.close();
        self.errors.close();
        tracing::debug!("change detector closed");
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        self.pump.abort();
        self.debouncer.cancel_all();
    }
}

/// Owns the notify watcher; dropping this task stops the watch.
async fn pump(
    mut watcher: RecommendedWatcher,
    mut watched: HashSet<PathBuf>,
    mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
    debouncer: Arc<Debouncer>,
) {
    while let Some(event) = raw.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                debouncer.report(DaemonError::Notify(err));
                continue;
            }
        };

        for (path, op) in classify(&event) {
            match op {
                ChangeOp::Remove => {
                    watched.retain(|dir| !dir.starts_with(&path));
                    debouncer.emit_now(path, op);
                }
                ChangeOp::Create | ChangeOp::Rename if is_dir(&path) => {
                    if let Err(err) = adopt_dir(&mut watcher, &mut watched, &path, &debouncer) {
                        debouncer.report(err);
                    }
                }
                _ => debouncer.schedule(path, op),
            }
        }
    }
}

/// Map one notify event to the changes it stands for.
fn classify(event: &Event) -> Vec<(PathBuf, ChangeOp)> {
    let op = match event.kind {
        EventKind::Create(_) => ChangeOp::Create,
        EventKind::Remove(_) => ChangeOp::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeOp::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            let mut paths = event.paths.iter().cloned();
            let from = paths.next().map(|p| (p, ChangeOp::Remove));
            let to = paths.next().map(|p| (p, ChangeOp::Rename));
            return from.into_iter().chain(to).collect();
        }
        EventKind::Modify(ModifyKind::Name(_)) => ChangeOp::Rename,
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => ChangeOp::Write,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event.paths.iter().map(|path| (path.clone(), op)).collect()
}

fn is_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Watch a directory that appeared after startup and schedule what it holds.
fn adopt_dir(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    dir: &Path,
    debouncer: &Arc<Debouncer>,
) -> Result<(), DaemonError> {
    register_tree(watcher, watched, dir)?;
    let (_, files) = walk(dir)?;
    tracing::debug!(path = %dir.display(), files = files.len(), "new directory");
    for file in files {
        debouncer.schedule(file, ChangeOp::Create);
    }
    Ok(())
}

fn register_tree(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    root: &Path,
) -> Result<(), DaemonError> {
    let (dirs, _) = walk(root)?;
    for dir in dirs {
        if watched.insert(dir.clone()) {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            tracing::debug!(path = %dir.display(), "watching directory");
        }
    }
    Ok(())
}

/// Directories (including `root`) and non-directory entries below `root`.
/// Symlinked directories are not followed.
fn walk(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), DaemonError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut files = Vec::new();
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    dirs.sort();
    files.sort();
    Ok((dirs, files))
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

struct Pending {
    generation: u64,
    timer: JoinHandle<()>,
}

/// Per-path quiet-window timers.
///
/// Every notification for a path replaces that path's timer. The map is only
/// touched under its mutex, both when a timer is armed and when it fires; a
/// timer that finds a newer generation in the map does nothing.
pub(crate) struct Debouncer {
    window: Duration,
    pending: Mutex<HashMap<PathBuf, Pending>>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<ChangeEvent>,
    errors: mpsc::UnboundedSender<DaemonError>,
}

impl Debouncer {
    pub(crate) fn new(
        window: Duration,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<ChangeEvent>,
        mpsc::UnboundedReceiver<DaemonError>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let debouncer = Arc::new(Self {
            window,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            events,
            errors,
        });
        (debouncer, events_rx, errors_rx)
    }

    /// (Re)arm the timer for `path`. The last `op` seen in a burst wins.
    pub(crate) fn schedule(self: &Arc<Self>, path: PathBuf, op: ChangeOp) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.lock();

        let this = Arc::clone(self);
        let key = path.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            this.fire(key, generation, op);
        });

        if let Some(previous) = pending.insert(path, Pending { generation, timer }) {
            previous.timer.abort();
        }
    }

    /// Emit without waiting, dropping any timer pending for the same path.
    pub(crate) fn emit_now(&self, path: PathBuf, op: ChangeOp) {
        if let Some(previous) = self.lock().remove(&path) {
            previous.timer.abort();
        }
        let _ = self.events.send(ChangeEvent::new(path, op));
    }

    pub(crate) fn report(&self, err: DaemonError) {
        let _ = self.errors.send(err);
    }

    pub(crate) fn cancel_all(&self) {
        for (_, pending) in self.lock().drain() {
            pending.timer.abort();
        }
    }

    fn fire(&self, path: PathBuf, generation: u64, op: ChangeOp) {
        {
            let mut pending = self.lock();
            match pending.get(&path) {
                Some(current) if current.generation == generation => {
                    pending.remove(&path);
                }
                _ => return,
            }
        }

        match fs::symlink_metadata(&path) {
            Err(source) => self.report(io_err(path, source)),
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                let _ = self.events.send(ChangeEvent::new(path, op));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
