//! Watch-and-reload entry point.
//!
//! Loads a script directory into a namespace, then sits in a poll loop
//! feeding file-change events to the dispatcher until interrupted.

use std::env;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::thread;

use anyhow::{bail, Context, Result};

use emberscript::{
    ChangeDispatcher, DirectoryLoader, NamespaceRegistry, Reconciler, RuntimeConfig,
    ScriptWatcher,
};

struct Args {
    root: PathBuf,
    namespace: String,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut root = None;
    let mut namespace = None;
    let mut config = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("usage: emberscript <script-dir> [namespace] [--config <file>]");
                process::exit(0);
            }
            _ if root.is_none() => root = Some(PathBuf::from(arg)),
            _ if namespace.is_none() => namespace = Some(arg),
            _ => bail!("unexpected argument '{}'", arg),
        }
    }

    let Some(root) = root else {
        bail!("usage: emberscript <script-dir> [namespace] [--config <file>]");
    };
    // Default namespace: the directory's own name.
    let namespace = match namespace {
        Some(ns) => ns,
        None => root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("script directory has no name to derive a namespace from")?,
    };
    Ok(Args {
        root,
        namespace,
        config,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let registry = Rc::new(NamespaceRegistry::new());
    let reconciler = Rc::new(Reconciler::new(Rc::clone(&registry)));
    let loader = Rc::new(DirectoryLoader::new(
        &args.root,
        &args.namespace,
        Rc::clone(&registry),
        Rc::clone(&reconciler),
        &config,
    ));

    loader
        .load()
        .with_context(|| format!("initial load of {}", args.root.display()))?;
    log::info!(
        "{} namespace(s) live under '{}'",
        registry.namespace_count(),
        args.namespace
    );

    let dispatcher = ChangeDispatcher::new();
    dispatcher.add_directory(Rc::clone(&loader));

    let mut watcher = ScriptWatcher::new(&config)?;
    watcher.watch(&args.root)?;

    loop {
        for (path, kind) in watcher.poll_events() {
            dispatcher.dispatch(&path, kind);
        }
        thread::sleep(config.poll_interval());
    }
}
