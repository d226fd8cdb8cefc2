//! Bulk loading of a script directory and per-file reloads.
//!
//! A loader owns one root directory and the units loaded from it. Namespace
//! paths come from directory position: every file in `<root>/logic/ai/`
//! contributes to `<base>.logic.ai`. Initial load executes units in shuffled
//! order over bounded retry passes so hidden load-order dependencies surface
//! during development instead of silently relying on crawl order.

use std::cell::RefCell;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;

use crate::config::RuntimeConfig;
use crate::error::{ReloadError, ReloadResult};
use crate::namespace::NamespaceRegistry;
use crate::reload::reconciler::Reconciler;
use crate::script::{Interp, ScriptUnit};

pub struct DirectoryLoader {
    root: PathBuf,
    base_namespace: String,
    registry: Rc<NamespaceRegistry>,
    reconciler: Rc<Reconciler>,
    interp: Interp,
    extension: String,
    ignored_dirs: Vec<String>,
    dependency_passes: u32,
    units: RefCell<FxHashMap<PathBuf, Rc<ScriptUnit>>>,
}

impl DirectoryLoader {
    pub fn new(
        root: impl Into<PathBuf>,
        base_namespace: impl Into<String>,
        registry: Rc<NamespaceRegistry>,
        reconciler: Rc<Reconciler>,
        config: &RuntimeConfig,
    ) -> Self {
        let interp = Interp::new(Rc::clone(&registry));
        DirectoryLoader {
            root: root.into(),
            base_namespace: base_namespace.into(),
            registry,
            reconciler,
            interp,
            extension: config.script_extension.clone(),
            ignored_dirs: config.ignored_dirs.clone(),
            dependency_passes: config.dependency_passes,
            units: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_namespace(&self) -> &str {
        &self.base_namespace
    }

    /// The currently registered unit for `path`, if this loader knows it.
    pub fn unit_for(&self, path: &Path) -> Option<Rc<ScriptUnit>> {
        self.units.borrow().get(path).cloned()
    }

    pub fn unit_count(&self) -> usize {
        self.units.borrow().len()
    }

    /// Number of root components matched if `path` falls under this loader's
    /// root. Case-insensitive; the dispatcher picks the deepest match.
    pub fn match_depth(&self, path: &Path) -> Option<usize> {
        let root = lowered_components(&self.root);
        let target = lowered_components(path);
        if target.len() >= root.len() && root.iter().zip(&target).all(|(a, b)| a == b) {
            Some(root.len())
        } else {
            None
        }
    }

    /// Discover, compile and execute every script under the root. Execution
    /// failures keep a unit in the candidate set across passes; if the retry
    /// budget runs out with candidates left, every remaining diagnostic is
    /// logged and the load reports failure. Failures never abort processing
    /// of other files.
    pub fn load(&self) -> ReloadResult<()> {
        let files = self.discover()?;
        log::info!(
            "loading {} script file(s) from {} into '{}'",
            files.len(),
            self.root.display(),
            self.base_namespace
        );

        let mut hard_failures = 0usize;
        let mut candidates: Vec<Rc<ScriptUnit>> = Vec::new();
        for path in files {
            let namespace_path = self.namespace_path_for(&path);
            match ScriptUnit::load(&path, namespace_path) {
                Ok(unit) => candidates.push(unit),
                Err(err) => {
                    log::error!("{}", err);
                    hard_failures += 1;
                }
            }
        }

        // Shuffled on purpose: a load that only works in crawl order is a
        // hidden dependency bug waiting for a rename.
        candidates.shuffle(&mut rand::thread_rng());

        let mut passes = 0u32;
        while !candidates.is_empty() && passes < self.dependency_passes {
            passes += 1;
            let round = std::mem::take(&mut candidates);
            let round_size = round.len();
            for unit in round {
                match unit.run(&self.interp) {
                    Ok(()) => {
                        if self.install(&unit) {
                            log::info!(
                                "loaded {} into '{}'",
                                unit.path().display(),
                                unit.namespace_path()
                            );
                        } else {
                            hard_failures += 1;
                        }
                    }
                    Err(err) => {
                        log::debug!("pass {}: deferring {}: {}", passes, unit.path().display(), err);
                        candidates.push(unit);
                    }
                }
            }
            if candidates.len() == round_size {
                // Nothing resolved this pass; more passes cannot help.
                break;
            }
        }

        if !candidates.is_empty() || hard_failures > 0 {
            for unit in &candidates {
                unit.log_last_error();
            }
            return Err(ReloadError::DependencyResolution {
                passes,
                failures: candidates.len() + hard_failures,
            });
        }
        Ok(())
    }

    fn install(&self, unit: &Rc<ScriptUnit>) -> bool {
        let node = match self.registry.create_namespace(unit.namespace_path()) {
            Ok(node) => node,
            Err(err) => {
                // Fatal to this file only.
                log::error!("cannot install {}: {}", unit.path().display(), err);
                return false;
            }
        };
        self.reconciler.reconcile(None, unit, &node);
        self.units
            .borrow_mut()
            .insert(unit.path().to_path_buf(), Rc::clone(unit));
        true
    }

    /// Recompile, re-execute and reconcile one already-loaded file. On any
    /// failure the old unit stays fully installed and current.
    pub fn reload_script(&self, path: &Path) -> ReloadResult<()> {
        let Some(old) = self.unit_for(path) else {
            log::warn!("{} is not a loaded script; ignoring reload", path.display());
            return Ok(());
        };

        let new = match ScriptUnit::load(path, old.namespace_path()) {
            Ok(unit) => unit,
            Err(err) => {
                log::error!(
                    "reload of {} aborted, keeping version {}: {}",
                    path.display(),
                    old.version(),
                    err
                );
                return Err(err);
            }
        };

        if new.source() == old.source() {
            log::debug!("{} content unchanged; nothing to reload", path.display());
            return Ok(());
        }

        if let Err(err) = new.run(&self.interp) {
            new.log_last_error();
            log::error!(
                "reload of {} aborted, keeping version {}",
                path.display(),
                old.version()
            );
            return Err(err);
        }

        if !self.reconciler.check_compatibility(&old, &new) {
            log::warn!(
                "reload of {} rejected by the compatibility policy; keeping version {}",
                path.display(),
                old.version()
            );
            return Ok(());
        }

        let node = match self.registry.create_namespace(old.namespace_path()) {
            Ok(node) => node,
            Err(err) => {
                log::error!("reload of {} aborted: {}", path.display(), err);
                return Err(err);
            }
        };

        self.reconciler.reconcile(Some(&old), &new, &node);
        self.units
            .borrow_mut()
            .insert(path.to_path_buf(), Rc::clone(&new));
        log::info!(
            "reloaded {} (now version {})",
            path.display(),
            new.version()
        );
        Ok(())
    }

    /// Drop every unit's contributions and destroy namespaces that become
    /// empty, deepest path first.
    pub fn unload(&self) {
        let units: Vec<Rc<ScriptUnit>> = self
            .units
            .borrow_mut()
            .drain()
            .map(|(_, unit)| unit)
            .collect();
        let mut touched: Vec<String> = Vec::new();
        for unit in &units {
            let Some(node) = self.registry.get(unit.namespace_path()) else {
                continue;
            };
            for name in unit.contributed_names() {
                node.remove_attribute(&name);
            }
            node.detach_file(unit.path());
            touched.push(unit.namespace_path().to_string());
        }

        touched.sort_by(|a, b| {
            let depth = |p: &String| p.matches('.').count();
            depth(b).cmp(&depth(a)).then_with(|| b.cmp(a))
        });
        touched.dedup();
        for path in touched {
            self.registry.destroy_namespace(&path);
        }
        log::info!(
            "unloaded {} script file(s) from {}",
            units.len(),
            self.root.display()
        );
    }

    fn discover(&self) -> ReloadResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = fs::read_dir(&dir).map_err(|source| ReloadError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| ReloadError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                if path.is_dir() {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if self
                        .ignored_dirs
                        .iter()
                        .any(|dir| dir.eq_ignore_ascii_case(&name))
                    {
                        continue;
                    }
                    stack.push(path);
                } else if self.is_script(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn is_script(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Dotted namespace path from directory position relative to the root.
    fn namespace_path_for(&self, path: &Path) -> String {
        let mut namespace = self.base_namespace.clone();
        if let Some(parent) = path.parent() {
            if let Ok(relative) = parent.strip_prefix(&self.root) {
                for component in relative.components() {
                    if let Component::Normal(segment) = component {
                        namespace.push('.');
                        namespace.push_str(&segment.to_string_lossy());
                    }
                }
            }
        }
        namespace
    }
}

fn lowered_components(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect()
}
