//! Poll-based file watching.
//!
//! A `notify` poll watcher scans the watched roots on a fixed interval and
//! feeds `(path, kind)` pairs through a channel; the watch loop drains it
//! with [`ScriptWatcher::poll_events`]. Delivery is at-least-once per
//! observed transition at poll granularity: repeated changes inside one
//! interval coalesce to a single `Changed`, and a change reverted within the
//! interval may go unseen. Paths under ignored directories and files with
//! foreign extensions are filtered before delivery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::error::ReloadResult;
use crate::reload::dispatcher::ChangeKind;

pub struct ScriptWatcher {
    watcher: PollWatcher,
    rx: Receiver<(PathBuf, ChangeKind)>,
    roots: Vec<PathBuf>,
}

impl ScriptWatcher {
    pub fn new(config: &RuntimeConfig) -> ReloadResult<Self> {
        let (tx, rx) = unbounded();
        let extension = config.script_extension.clone();
        let ignored = config.ignored_dirs.clone();
        let window = config.poll_interval();
        // Shared with the notify callback thread; coalesces the duplicate
        // events one content change can produce within a poll window.
        let recent: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let seen = Arc::clone(&recent);

        let notify_config = NotifyConfig::default()
            .with_poll_interval(config.poll_interval())
            .with_compare_contents(true);
        let watcher = PollWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        log::error!("file watch error: {}", err);
                        return;
                    }
                };
                let kind = match event.kind {
                    EventKind::Create(_) => ChangeKind::Added,
                    EventKind::Modify(_) => ChangeKind::Changed,
                    EventKind::Remove(_) => ChangeKind::Deleted,
                    _ => return,
                };
                let now = Instant::now();
                for path in event.paths {
                    if !watchable(&path, &extension, &ignored) {
                        continue;
                    }
                    let mut seen = seen.lock();
                    if kind == ChangeKind::Changed {
                        if let Some(last) = seen.get(&path) {
                            if now.duration_since(*last) < window {
                                continue;
                            }
                        }
                    }
                    seen.insert(path.clone(), now);
                    let _ = tx.send((path, kind));
                }
            },
            notify_config,
        )?;

        Ok(ScriptWatcher {
            watcher,
            rx,
            roots: Vec::new(),
        })
    }

    pub fn watch(&mut self, root: &Path) -> ReloadResult<()> {
        self.watcher.watch(root, RecursiveMode::Recursive)?;
        self.roots.push(root.to_path_buf());
        log::info!("watching {}", root.display());
        Ok(())
    }

    pub fn unwatch(&mut self, root: &Path) -> ReloadResult<()> {
        self.watcher.unwatch(root)?;
        self.roots.retain(|p| p != root);
        Ok(())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Drain every event delivered since the last call, non-blocking.
    pub fn poll_events(&self) -> Vec<(PathBuf, ChangeKind)> {
        self.rx.try_iter().collect()
    }

    /// Block for up to `timeout` waiting for one event.
    pub fn next_event(&self, timeout: Duration) -> Option<(PathBuf, ChangeKind)> {
        self.rx.recv_timeout(timeout).ok()
    }
}

fn watchable(path: &Path, extension: &str, ignored: &[String]) -> bool {
    let under_ignored = path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        ignored.iter().any(|dir| dir.eq_ignore_ascii_case(&name))
    });
    if under_ignored {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchable_filters_extension_and_ignored_dirs() {
        let ignored = vec![".git".to_string()];

        assert!(watchable(
            Path::new("/scripts/logic/bot.ember"),
            "ember",
            &ignored
        ));
        assert!(watchable(
            Path::new("/scripts/logic/BOT.EMBER"),
            "ember",
            &ignored
        ));
        assert!(!watchable(Path::new("/scripts/readme.txt"), "ember", &ignored));
        assert!(!watchable(Path::new("/scripts/noext"), "ember", &ignored));
        assert!(!watchable(
            Path::new("/scripts/.git/hook.ember"),
            "ember",
            &ignored
        ));
    }
}
