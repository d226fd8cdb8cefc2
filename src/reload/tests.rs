//! Reload scenario tests: whole files on disk, loaded and edited the way a
//! live session would see them.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;

use crate::config::RuntimeConfig;
use crate::error::ReloadError;
use crate::namespace::NamespaceRegistry;
use crate::reload::{
    ChangeDispatcher, ChangeKind, DirectoryLoader, Reconciler, ReloadPolicy,
};
use crate::script::{Interp, ScriptUnit, Value};

struct Fixture {
    dir: TempDir,
    registry: Rc<NamespaceRegistry>,
    reconciler: Rc<Reconciler>,
    loader: Rc<DirectoryLoader>,
    interp: Interp,
}

impl Fixture {
    fn new(base: &str) -> Fixture {
        Fixture::build(base, None)
    }

    fn with_policy(base: &str, policy: Box<dyn ReloadPolicy>) -> Fixture {
        Fixture::build(base, Some(policy))
    }

    fn build(base: &str, policy: Option<Box<dyn ReloadPolicy>>) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let registry = Rc::new(NamespaceRegistry::new());
        let reconciler = Rc::new(match policy {
            Some(policy) => Reconciler::with_policy(Rc::clone(&registry), policy),
            None => Reconciler::new(Rc::clone(&registry)),
        });
        let loader = Rc::new(DirectoryLoader::new(
            dir.path(),
            base,
            Rc::clone(&registry),
            Rc::clone(&reconciler),
            &RuntimeConfig::default(),
        ));
        let interp = Interp::new(Rc::clone(&registry));
        Fixture {
            dir,
            registry,
            reconciler,
            loader,
            interp,
        }
    }

    fn write(&self, relative: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create script dirs");
        }
        fs::write(&path, source).expect("write script");
        path
    }

    fn load(&self) {
        self.loader.load().expect("bulk load");
    }

    fn reload(&self, path: &Path) {
        self.loader.reload_script(path).expect("reload");
    }

    fn attr(&self, namespace: &str, name: &str) -> Option<Value> {
        self.registry
            .get(namespace)
            .and_then(|node| node.get_attribute(name))
    }

    fn call(&self, value: &Value, args: &[Value]) -> Value {
        match value {
            Value::Function(func) => self.interp.call_function(func, args).expect("call"),
            Value::Class(_) | Value::Native(_) => panic!("use call_method or call functions"),
            other => panic!("not callable: {:?}", other),
        }
    }

    fn call_method(&self, receiver: &Value, name: &str, args: &[Value]) -> Value {
        self.interp
            .call_method(receiver, name, args)
            .expect("method call")
    }

    fn unit(&self, path: &Path) -> Rc<ScriptUnit> {
        self.loader.unit_for(path).expect("unit registered")
    }
}

fn as_str(value: &Value) -> &str {
    match value {
        Value::Str(s) => s,
        other => panic!("expected string, got {:?}", other),
    }
}

fn as_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected int, got {:?}", other),
    }
}

// ----------------------------------------------------------------------
// Initial install

#[test]
fn test_initial_load_installs_exports() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "X = 41\nfn f() {\n  return X + 1\n}\n");
    fix.load();

    assert_eq!(as_int(&fix.attr("game", "X").expect("X installed")), 41);
    let f = fix.attr("game", "f").expect("f installed");
    assert_eq!(as_int(&fix.call(&f, &[])), 42);

    let unit = fix.unit(&path);
    assert_eq!(unit.version(), 1);
    assert_eq!(unit.contributed_names(), vec!["X".to_string(), "f".to_string()]);
}

// ----------------------------------------------------------------------
// Byte-identical reload is a no-op

#[test]
fn test_identical_reload_is_a_noop() {
    let fix = Fixture::new("game");
    let source = "X = 1\nfn f() {\n  return X\n}\nclass A {\n  fn m(self) {\n    return 2\n  }\n}\n";
    let path = fix.write("a.ember", source);
    fix.load();

    let unit_before = fix.unit(&path);
    let node = fix.registry.get("game").expect("namespace");
    let names_before = node.attribute_names();
    let values_before: Vec<Value> = names_before
        .iter()
        .map(|name| node.get_attribute(name).expect("attribute"))
        .collect();

    fs::write(&path, source).expect("rewrite");
    fix.reload(&path);

    assert_eq!(node.attribute_names(), names_before);
    for (name, before) in names_before.iter().zip(&values_before) {
        let after = node.get_attribute(name).expect("attribute survives");
        assert!(
            before.identity_eq(&after),
            "attribute '{}' changed identity on a no-op reload",
            name
        );
    }
    assert!(Rc::ptr_eq(&unit_before, &fix.unit(&path)));
    assert_eq!(fix.unit(&path).version(), 1);
    assert!(!fix.reconciler.is_attribute_leaked("X"));
}

// ----------------------------------------------------------------------
// Method body updates preserve class identity for live instances

#[test]
fn test_method_update_reaches_existing_instances() {
    let fix = Fixture::new("game");
    let path = fix.write(
        "a.ember",
        "class Alpha {\n  fn describe(self) {\n    return \"v1\"\n  }\n}\nfn make() {\n  return Alpha()\n}\n",
    );
    fix.load();

    let class_before = fix.attr("game", "Alpha").expect("class installed");
    let make = fix.attr("game", "make").expect("factory installed");
    let instance = fix.call(&make, &[]);
    assert_eq!(as_str(&fix.call_method(&instance, "describe", &[])), "v1");

    fix.write(
        "a.ember",
        "class Alpha {\n  fn describe(self) {\n    return \"v2\"\n  }\n}\nfn make() {\n  return Alpha()\n}\n",
    );
    fix.reload(&path);

    // The instance constructed before the reload sees the new body.
    assert_eq!(as_str(&fix.call_method(&instance, "describe", &[])), "v2");
    let class_after = fix.attr("game", "Alpha").expect("class survives");
    assert!(class_before.identity_eq(&class_after));
    assert_eq!(fix.unit(&path).version(), 2);
}

#[test]
fn test_member_removal_propagates_to_live_class() {
    let fix = Fixture::new("game");
    let path = fix.write(
        "a.ember",
        "class Alpha {\n  fn keep(self) {\n    return 1\n  }\n  fn drop(self) {\n    return 2\n  }\n}\nfn make() {\n  return Alpha()\n}\n",
    );
    fix.load();
    let make = fix.attr("game", "make").expect("factory");
    let instance = fix.call(&make, &[]);

    fix.write(
        "a.ember",
        "class Alpha {\n  fn keep(self) {\n    return 1\n  }\n}\nfn make() {\n  return Alpha()\n}\n",
    );
    fix.reload(&path);

    assert_eq!(as_int(&fix.call_method(&instance, "keep", &[])), 1);
    let err = fix
        .interp
        .call_method(&instance, "drop", &[])
        .unwrap_err();
    assert!(err.message.contains("no method 'drop'"));
}

// ----------------------------------------------------------------------
// Base-class updates reach subclasses defined in another file

#[test]
fn test_base_class_update_reaches_cross_file_subclass_instances() {
    let fix = Fixture::new("game");
    fix.write(
        "a.ember",
        "class ClassA {\n  fn function_a(self) {\n    return \"a1\"\n  }\n}\n",
    );
    let path_a = fix.dir.path().join("a.ember");
    fix.write(
        "b.ember",
        "from game import ClassA\nclass ClassB(ClassA) {\n}\nfn make_b() {\n  return ClassB()\n}\n",
    );
    fix.load();

    let make_b = fix.attr("game", "make_b").expect("factory");
    let instance = fix.call(&make_b, &[]);
    assert_eq!(as_str(&fix.call_method(&instance, "function_a", &[])), "a1");

    fix.write(
        "a.ember",
        "class ClassA {\n  fn function_a(self) {\n    return \"a2\"\n  }\n}\n",
    );
    fix.reload(&path_a);

    // ClassB still points at the surviving ClassA identity; the inherited
    // member was merged in place.
    assert_eq!(as_str(&fix.call_method(&instance, "function_a", &[])), "a2");
}

// ----------------------------------------------------------------------
// Removal leaks instead of deleting; re-contribution clears the leak

#[test]
fn test_removed_export_leaks_and_recontribution_clears_it() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "Y = 1\nW = 2\n");
    fix.load();

    fix.write("a.ember", "W = 2\n");
    fix.reload(&path);

    // Old value retained under the old identity.
    assert_eq!(as_int(&fix.attr("game", "Y").expect("Y retained")), 1);
    assert!(fix.reconciler.is_attribute_leaked("Y"));
    assert_eq!(fix.reconciler.leaked_attribute_version("Y"), Some(1));
    assert_eq!(
        fix.reconciler.leaked_attribute_file("Y").expect("leak file"),
        path
    );
    assert!(fix.unit(&path).has_leaked("Y"));

    fix.write("a.ember", "W = 2\nY = 9\n");
    fix.reload(&path);

    assert_eq!(as_int(&fix.attr("game", "Y").expect("Y reinstalled")), 9);
    assert!(!fix.reconciler.is_attribute_leaked("Y"));
    assert!(!fix.unit(&path).has_leaked("Y"));
}

#[test]
fn test_leaks_carry_forward_across_reloads() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "Y = 1\nW = 2\n");
    fix.load();

    fix.write("a.ember", "W = 2\n");
    fix.reload(&path);
    fix.write("a.ember", "W = 3\n");
    fix.reload(&path);

    // Still attributed to the version that last produced it.
    assert!(fix.reconciler.is_attribute_leaked("Y"));
    assert_eq!(fix.reconciler.leaked_attribute_version("Y"), Some(1));
    assert!(fix.unit(&path).has_leaked("Y"));
    assert_eq!(as_int(&fix.attr("game", "Y").expect("Y retained")), 1);
}

// ----------------------------------------------------------------------
// Duplicate contribution is rejected, first writer wins

#[test]
fn test_duplicate_contribution_keeps_first_value() {
    let fix = Fixture::new("game");
    fix.write("a.ember", "Z = \"one\"\nA = 1\n");
    fix.write("b.ember", "Z = \"two\"\nB = 2\n");
    fix.load();

    // Load order is shuffled, so either file may win; there is exactly one
    // surviving value and the loser's other export still lands.
    let z = fix.attr("game", "Z").expect("Z installed");
    assert!(matches!(as_str(&z), "one" | "two"));
    assert_eq!(as_int(&fix.attr("game", "A").expect("A installed")), 1);
    assert_eq!(as_int(&fix.attr("game", "B").expect("B installed")), 2);
}

// ----------------------------------------------------------------------
// Bulk load converges despite shuffled order; true cycles fail

#[test]
fn test_bulk_load_resolves_cross_file_dependencies() {
    let fix = Fixture::new("game");
    fix.write("a.ember", "A = 1\n");
    fix.write("b.ember", "B = 5\n");
    fix.write("c.ember", "from game import B\nC = B + 1\n");
    fix.load();

    assert_eq!(as_int(&fix.attr("game", "C").expect("C installed")), 6);
    assert_eq!(fix.loader.unit_count(), 3);
}

#[test]
fn test_bulk_load_fails_on_import_cycle() {
    let fix = Fixture::new("game");
    fix.write("x.ember", "from game import Y\nX = 1\n");
    fix.write("y.ember", "from game import X\nY = 1\n");

    let err = fix.loader.load().unwrap_err();
    match err {
        ReloadError::DependencyResolution { failures, .. } => assert_eq!(failures, 2),
        other => panic!("expected dependency failure, got {}", other),
    }
    assert_eq!(fix.loader.unit_count(), 0);
}

#[test]
fn test_dependent_files_load_in_nested_namespaces() {
    let fix = Fixture::new("game");
    fix.write("data/limits.ember", "MAX = 3\n");
    fix.write(
        "logic/bot.ember",
        "from game.data import MAX\nfn cap() {\n  return MAX\n}\n",
    );
    fix.load();

    let cap = fix.attr("game.logic", "cap").expect("cap installed");
    assert_eq!(as_int(&fix.call(&cap, &[])), 3);
}

// ----------------------------------------------------------------------
// Reload mechanics

#[test]
fn test_function_update_is_visible_through_namespace() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "fn greet() {\n  return \"hi\"\n}\n");
    fix.load();

    fix.write("a.ember", "fn greet() {\n  return \"hello\"\n}\n");
    fix.reload(&path);

    let greet = fix.attr("game", "greet").expect("greet installed");
    assert_eq!(as_str(&fix.call(&greet, &[])), "hello");
}

#[test]
fn test_rebound_function_sees_old_module_bindings() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "LIMIT = 10\nfn get_limit() {\n  return LIMIT\n}\n");
    fix.load();

    // The new version drops LIMIT entirely; the rebound function resolves it
    // against the surviving scope, where the old binding still lives.
    fix.write("a.ember", "fn get_limit() {\n  return LIMIT\n}\n");
    fix.reload(&path);

    let get_limit = fix.attr("game", "get_limit").expect("function installed");
    assert_eq!(as_int(&fix.call(&get_limit, &[])), 10);
    assert!(fix.reconciler.is_attribute_leaked("LIMIT"));
    assert_eq!(as_int(&fix.attr("game", "LIMIT").expect("leaked value")), 10);
}

#[test]
fn test_plain_value_change_is_visible_through_namespace() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "COUNT = 1\n");
    fix.load();

    fix.write("a.ember", "COUNT = 2\n");
    fix.reload(&path);
    assert_eq!(as_int(&fix.attr("game", "COUNT").expect("COUNT")), 2);
}

#[test]
fn test_type_change_installs_new_value() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "T = 1\n");
    fix.load();

    fix.write("a.ember", "fn T() {\n  return 3\n}\n");
    fix.reload(&path);

    let t = fix.attr("game", "T").expect("T installed");
    assert_eq!(as_int(&fix.call(&t, &[])), 3);
}

#[test]
fn test_failed_reload_keeps_old_unit_installed() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "X = 1\n");
    fix.load();

    // Compile failure.
    fs::write(&path, "fn broken( {\n").expect("write");
    assert!(matches!(
        fix.loader.reload_script(&path),
        Err(ReloadError::Compile { .. })
    ));
    assert_eq!(as_int(&fix.attr("game", "X").expect("X survives")), 1);
    assert_eq!(fix.unit(&path).version(), 1);

    // Execution failure.
    fs::write(&path, "X = 1 / 0\n").expect("write");
    assert!(matches!(
        fix.loader.reload_script(&path),
        Err(ReloadError::Execution { .. })
    ));
    assert_eq!(as_int(&fix.attr("game", "X").expect("X survives")), 1);
    assert_eq!(fix.unit(&path).version(), 1);

    // And the path still reloads once the file is fixed.
    fs::write(&path, "X = 7\n").expect("write");
    fix.reload(&path);
    assert_eq!(as_int(&fix.attr("game", "X").expect("X updated")), 7);
    assert_eq!(fix.unit(&path).version(), 2);
}

struct RejectEverything;

impl ReloadPolicy for RejectEverything {
    fn is_compatible(&self, _old: &ScriptUnit, _new: &ScriptUnit) -> bool {
        false
    }
}

#[test]
fn test_compatibility_policy_can_block_a_reload() {
    let fix = Fixture::with_policy("game", Box::new(RejectEverything));
    let path = fix.write("a.ember", "X = 1\n");
    fix.load();

    fix.write("a.ember", "X = 2\n");
    fix.reload(&path);

    assert_eq!(as_int(&fix.attr("game", "X").expect("X kept")), 1);
    assert_eq!(fix.unit(&path).version(), 1);
}

// ----------------------------------------------------------------------
// Unload tears contributions and empty namespaces down

#[test]
fn test_unload_destroys_contributed_namespaces() {
    let fix = Fixture::new("game");
    fix.write("a.ember", "A = 1\n");
    fix.write("logic/b.ember", "B = 2\n");
    fix.load();
    assert!(fix.registry.get("game.logic").is_some());

    fix.loader.unload();

    assert!(fix.registry.get("game").is_none());
    assert!(fix.registry.get("game.logic").is_none());
    assert_eq!(fix.loader.unit_count(), 0);
    assert_eq!(fix.registry.namespace_count(), 0);
}

#[test]
fn test_unload_spares_namespaces_with_other_contributors() {
    let dir_a = TempDir::new().expect("temp dir");
    let dir_b = TempDir::new().expect("temp dir");
    let registry = Rc::new(NamespaceRegistry::new());
    let reconciler = Rc::new(Reconciler::new(Rc::clone(&registry)));
    let config = RuntimeConfig::default();
    let loader_a = DirectoryLoader::new(
        dir_a.path(),
        "shared",
        Rc::clone(&registry),
        Rc::clone(&reconciler),
        &config,
    );
    let loader_b = DirectoryLoader::new(
        dir_b.path(),
        "shared",
        Rc::clone(&registry),
        Rc::clone(&reconciler),
        &config,
    );
    fs::write(dir_a.path().join("a.ember"), "A = 1\n").expect("write");
    fs::write(dir_b.path().join("b.ember"), "B = 2\n").expect("write");
    loader_a.load().expect("load a");
    loader_b.load().expect("load b");

    loader_a.unload();

    let node = registry.get("shared").expect("shared namespace survives");
    assert!(node.get_attribute("A").is_none());
    assert!(node.get_attribute("B").is_some());
}

// ----------------------------------------------------------------------
// Dispatcher routing

#[test]
fn test_dispatcher_routes_changed_to_owning_loader() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "X = 1\n");
    fix.load();

    let dispatcher = ChangeDispatcher::new();
    dispatcher.add_directory(Rc::clone(&fix.loader));

    fix.write("a.ember", "X = 2\n");
    dispatcher.dispatch(&path, ChangeKind::Changed);
    assert_eq!(as_int(&fix.attr("game", "X").expect("X updated")), 2);
}

#[test]
fn test_dispatcher_prefers_longest_root_prefix() {
    let fix = Fixture::new("outer");
    fix.write("a.ember", "A = 1\n");
    let inner_path = fix.write("inner/b.ember", "B = 1\n");
    fix.load();

    // A second loader rooted at the subdirectory, loading the same file
    // into its own namespace.
    let inner_loader = Rc::new(DirectoryLoader::new(
        fix.dir.path().join("inner"),
        "inner",
        Rc::clone(&fix.registry),
        Rc::clone(&fix.reconciler),
        &RuntimeConfig::default(),
    ));
    inner_loader.load().expect("inner load");

    let dispatcher = ChangeDispatcher::new();
    dispatcher.add_directory(Rc::clone(&fix.loader));
    dispatcher.add_directory(Rc::clone(&inner_loader));

    fix.write("inner/b.ember", "B = 2\n");
    dispatcher.dispatch(&inner_path, ChangeKind::Changed);

    // The deeper root won the routing; the outer loader's copy is stale.
    assert_eq!(as_int(&fix.attr("inner", "B").expect("inner B")), 2);
    assert_eq!(as_int(&fix.attr("outer.inner", "B").expect("outer B")), 1);
}

#[test]
fn test_dispatcher_drops_events_outside_every_root() {
    let fix = Fixture::new("game");
    fix.write("a.ember", "X = 1\n");
    fix.load();

    let dispatcher = ChangeDispatcher::new();
    dispatcher.add_directory(Rc::clone(&fix.loader));
    // Logged and dropped, never a panic.
    dispatcher.dispatch(Path::new("/nowhere/else.ember"), ChangeKind::Changed);
}

#[test]
fn test_dispatcher_ignores_unknown_files_and_add_delete_events() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "X = 1\n");
    fix.load();

    let dispatcher = ChangeDispatcher::new();
    dispatcher.add_directory(Rc::clone(&fix.loader));

    // A file created after the bulk load cannot join the session.
    let newcomer = fix.write("new.ember", "N = 1\n");
    dispatcher.dispatch(&newcomer, ChangeKind::Changed);
    assert!(fix.loader.unit_for(&newcomer).is_none());
    assert!(fix.attr("game", "N").is_none());

    // Added and Deleted are accepted but no-ops at this level.
    dispatcher.dispatch(&newcomer, ChangeKind::Added);
    dispatcher.dispatch(&path, ChangeKind::Deleted);
    assert_eq!(as_int(&fix.attr("game", "X").expect("X survives")), 1);
}

#[test]
fn test_remove_directory_unloads_and_stops_routing() {
    let fix = Fixture::new("game");
    let path = fix.write("a.ember", "X = 1\n");
    fix.load();

    let dispatcher = ChangeDispatcher::new();
    dispatcher.add_directory(Rc::clone(&fix.loader));
    assert!(dispatcher.remove_directory(fix.dir.path()));
    assert!(fix.registry.get("game").is_none());

    // Subsequent events for the removed root are dropped.
    dispatcher.dispatch(&path, ChangeKind::Changed);
    assert!(!dispatcher.remove_directory(fix.dir.path()));
}
