use anyhow::{Result, bail};
use async_trait::async_trait;
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::{
    sync::mpsc::{UnboundedReceiver, unbounded_channel},
    task::JoinHandle,
    time::{Duration, sleep},
};
use tracing::{error, info, warn};

use crate::plugin::PluginLoader;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_RETRIES: usize = 10;

/// Something that reacts to files appearing, changing or vanishing.
#[async_trait]
pub trait WatchedType: Send + Sync + 'static {
    fn is_relevant(&self, path: &Path) -> bool;

    async fn on_create_or_modify(&self, path: &Path) -> Result<()>;

    async fn on_remove(&self, path: &Path) -> Result<()>;

    async fn reload(&self, path: &Path) -> Result<()> {
        self.on_create_or_modify(path).await
    }
}

/// Poll and dispatch tasks of one directory, aborted when dropped.
struct WatchTasks(Mutex<Vec<JoinHandle<()>>>);

impl WatchTasks {
    fn abort_all(&self) {
        let mut handles = self.0.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WatchTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Watches one directory. `shutdown`, or dropping the last clone, stops the
/// poll and dispatch tasks.
#[derive(Clone)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    tasks: Arc<WatchTasks>,
}

impl DirectoryWatcher {
    /// Starts watching `dir`. With `initial_scan`, every relevant file already
    /// present is reloaded first. With `enable_retry`, failed reloads are
    /// retried a few times, both during that scan and for later events.
    pub async fn new(
        dir: PathBuf,
        watched: Arc<dyn WatchedType>,
        initial_scan: bool,
        enable_retry: bool,
    ) -> Result<DirectoryWatcher> {
        if !dir.is_dir() {
            let msg = format!("Directory {} does not exist", dir.display());
            warn!(%msg);
            bail!(msg);
        }

        // 1) existing files
        if initial_scan {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| watched.is_relevant(path))
                .collect();
            paths.sort();
            for path in paths {
                try_reload(&watched, &path, enable_retry).await;
            }
        }

        // 2) notify -> channel
        let (tx, rx) = unbounded_channel::<notify::Result<Event>>();
        let mut poller = PollWatcher::new(
            move |res| {
                // receiver gone means nobody listens any more
                let _ = tx.send(res);
            },
            Config::default()
                .with_poll_interval(POLL_INTERVAL)
                .with_compare_contents(true),
        )?;
        poller.watch(&dir, RecursiveMode::NonRecursive)?;

        // 3) keep the poller alive in its own task
        let handle_watcher = tokio::spawn(async move {
            let _poller = poller;
            futures::future::pending::<()>().await;
        });

        // 4) dispatch events
        let handle_dispatch = tokio::spawn(dispatch_events(rx, watched, enable_retry));

        info!(dir = %dir.display(), "watching directory");
        Ok(DirectoryWatcher {
            dir,
            tasks: Arc::new(WatchTasks(Mutex::new(vec![handle_watcher, handle_dispatch]))),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Aborts the spawned tasks. No events are dispatched afterwards.
    pub fn shutdown(&self) {
        self.tasks.abort_all();
    }
}

/// Handles events one at a time, so a removal never overtakes the reload
/// queued before it for the same file.
async fn dispatch_events(
    mut rx: UnboundedReceiver<notify::Result<Event>>,
    watched: Arc<dyn WatchedType>,
    retry: bool,
) {
    while let Some(res) = rx.recv().await {
        match res {
            Ok(Event {
                kind: EventKind::Create(_) | EventKind::Modify(_),
                paths,
                ..
            }) => {
                for path in paths.into_iter().filter(|p| watched.is_relevant(p)) {
                    // renamed away
                    if !path.exists() {
                        remove(&watched, &path).await;
                        continue;
                    }
                    try_reload(&watched, &path, retry).await;
                }
            }
            Ok(Event {
                kind: EventKind::Remove(_),
                paths,
                ..
            }) => {
                for path in paths.into_iter().filter(|p| watched.is_relevant(p)) {
                    remove(&watched, &path).await;
                }
            }
            Err(e) => warn!(?e, "Watcher error"),
            _ => {}
        }
    }
}

async fn remove(watched: &Arc<dyn WatchedType>, path: &Path) {
    if let Err(e) = watched.on_remove(path).await {
        warn!(?path, ?e, "Failed to handle removal");
    }
}

async fn try_reload(watched: &Arc<dyn WatchedType>, path: &Path, retry: bool) {
    for attempt in 1..=MAX_RETRIES {
        match watched.reload(path).await {
            Ok(()) => return,
            Err(e) if retry && attempt < MAX_RETRIES => {
                warn!("Retrying reload {:?} (attempt {attempt}): {e:?}", path);
                sleep(Duration::from_millis(100)).await;
            }
            Err(e) => {
                error!("Failed to reload {:?}: {e:?}", path);
                return;
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Plugin directory
// -----------------------------------------------------------------------------

/// Hot reload for the plugin directory: changed modules are loaded again,
/// deleted ones are unregistered along with their hooks.
pub struct PluginWatcher {
    loader: PluginLoader,
}

impl PluginWatcher {
    pub fn new(loader: PluginLoader) -> Self {
        Self { loader }
    }

    /// Watches the loader's directory. Discovery is expected to have run
    /// already, so there is no initial scan.
    pub async fn start(loader: PluginLoader) -> Result<DirectoryWatcher> {
        let dir = loader.dir().to_path_buf();
        DirectoryWatcher::new(dir, Arc::new(Self::new(loader)), false, true).await
    }
}

#[async_trait]
impl WatchedType for PluginWatcher {
    fn is_relevant(&self, path: &Path) -> bool {
        self.loader.importer().accepts(path)
    }

    async fn on_create_or_modify(&self, path: &Path) -> Result<()> {
        match self.loader.load_one(path).await {
            Some(key) => {
                info!(key, "plugin reloaded");
                Ok(())
            }
            None => bail!("could not load plugin module {}", path.display()),
        }
    }

    async fn on_remove(&self, path: &Path) -> Result<()> {
        if let Some(key) = self.loader.unload(path) {
            info!(key, "plugin module removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hooks::HookRegistry,
        plugin::{ManifestImporter, PluginRegistry},
    };
    use flowdeck_plugin::{AppContext, FlowContextHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingWatcher {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WatchedType for CountingWatcher {
        fn is_relevant(&self, path: &Path) -> bool {
            path.extension().is_some_and(|e| e == "txt")
        }

        async fn on_create_or_modify(&self, _path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                bail!("not ready yet");
            }
            Ok(())
        }

        async fn on_remove(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let watched: Arc<dyn WatchedType> = Arc::new(CountingWatcher {
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        assert!(DirectoryWatcher::new(tmp.path().join("nope"), watched, true, false).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_initial_scan_retries_failed_reloads() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();

        let counting = Arc::new(CountingWatcher {
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let watcher = DirectoryWatcher::new(tmp.path().to_path_buf(), counting.clone(), true, true)
            .await
            .unwrap();

        // two failures then a success, all for a.txt
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
        watcher.shutdown();
    }

    async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..40 {
            sleep(Duration::from_millis(250)).await;
            if done() {
                return true;
            }
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_file_reload_is_retried() {
        let tmp = TempDir::new().unwrap();
        let counting = Arc::new(CountingWatcher {
            failures_left: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        });
        let watcher = DirectoryWatcher::new(tmp.path().to_path_buf(), counting.clone(), false, true)
            .await
            .unwrap();

        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        let reloaded = wait_until(|| {
            counting.failures_left.load(Ordering::SeqCst) == 0
                && counting.calls.load(Ordering::SeqCst) >= 2
        })
        .await;
        assert!(reloaded, "failed reload was not attempted again");
        watcher.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_watcher_stops_dispatching() {
        let tmp = TempDir::new().unwrap();
        let counting = Arc::new(CountingWatcher {
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let watcher = DirectoryWatcher::new(tmp.path().to_path_buf(), counting.clone(), false, false)
            .await
            .unwrap();
        let copy = watcher.clone();
        drop(watcher);
        drop(copy);

        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        sleep(POLL_INTERVAL * 2).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_edited_module_is_reloaded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.yaml");
        std::fs::write(&path, "default:\n  render:\n    text: v1\n").unwrap();

        let plugins = Arc::new(PluginRegistry::in_memory());
        let loader = PluginLoader::new(
            plugins.clone(),
            Arc::new(HookRegistry::new()),
            Arc::new(ManifestImporter::default()),
            tmp.path(),
        );
        assert_eq!(loader.discover_and_load().await, vec!["note"]);
        let watcher = PluginWatcher::start(loader).await.unwrap();

        let rendered = || {
            let mut handler = FlowContextHandler::default();
            let mut ctx = AppContext::new(&mut handler);
            plugins.get("note").and_then(|c| c.render(&mut ctx).ok())
        };
        assert_eq!(rendered().as_deref(), Some("v1"));

        sleep(Duration::from_millis(500)).await;
        std::fs::write(&path, "default:\n  render:\n    text: v2\n").unwrap();
        let updated = wait_until(|| rendered().as_deref() == Some("v2")).await;
        assert!(updated, "edited module was not reloaded");
        watcher.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_plugin_watcher_reacts_to_changes() {
        let tmp = TempDir::new().unwrap();
        let plugins = Arc::new(PluginRegistry::in_memory());
        let loader = PluginLoader::new(
            plugins.clone(),
            Arc::new(HookRegistry::new()),
            Arc::new(ManifestImporter::default()),
            tmp.path(),
        );
        let watcher = PluginWatcher::start(loader).await.unwrap();

        let path = tmp.path().join("late.yaml");
        std::fs::write(&path, "default:\n  render:\n    text: late\n").unwrap();
        let mut loaded = false;
        for _ in 0..40 {
            sleep(Duration::from_millis(250)).await;
            if plugins.contains("late") {
                loaded = true;
                break;
            }
        }
        assert!(loaded, "new module was not picked up");

        std::fs::remove_file(&path).unwrap();
        let mut removed = false;
        for _ in 0..40 {
            sleep(Duration::from_millis(250)).await;
            if !plugins.contains("late") {
                removed = true;
                break;
            }
        }
        assert!(removed, "removed module is still registered");
        watcher.shutdown();
    }
}
