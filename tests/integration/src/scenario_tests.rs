//! End-to-end scenarios over manifest files on disk
//!
//! Each test writes a small manifest tree into a temporary directory and
//! drives an engine through [`FsSourceLoader`](manifest_core::FsSourceLoader).

use std::sync::Arc;

use manifest_core::{Engine, EngineConfig, Error, ProblemKind, ReloadOutcome, path_key};
use manifest_test_utils::{RecordingListener, TestDocs};
use pretty_assertions::assert_eq;
use serde_json::json;

fn engine(docs: &TestDocs, config: EngineConfig) -> (Engine, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::new());
    let engine = Engine::new(config, Arc::new(docs.loader())).with_listener(listener.clone());
    (engine, listener)
}

#[tokio::test]
async fn leaf_change_updates_only_what_it_contributes() {
    let docs = TestDocs::new();
    docs.write("root.yaml", "imports: [a.yaml]\n");
    docs.write("a.yaml", "title: A\nimports: [b.yaml]\n");
    docs.write("b.yaml", "title: B\ntags: [x]\n");
    let (engine, _) = engine(&docs, EngineConfig::default().with_root("root.yaml"));

    engine.full_reload().await.unwrap();
    let first = engine.published();
    assert_eq!(first.get("/title"), Some(&json!("A")));
    assert_eq!(first.get("/tags"), Some(&json!(["x"])));
    let a = engine.layer("a.yaml").await.unwrap();

    docs.write("b.yaml", "title: B\ntags: [x, y]\n");
    assert_eq!(
        engine.on_change(["b.yaml"]).await.unwrap(),
        ReloadOutcome::Published(2)
    );

    let second = engine.published();
    assert_eq!(second.get("/tags"), Some(&json!(["x", "y"])));
    assert_eq!(second.get("/title"), Some(&json!("A")));
    assert_ne!(first.hash, second.hash);

    let a_after = engine.layer("a.yaml").await.unwrap();
    assert_eq!(a_after.id, a.id);
    assert_eq!(a_after.loads, 1);
    assert_eq!(engine.layer("b.yaml").await.unwrap().loads, 2);
}

#[tokio::test]
async fn metamodel_and_plugin_packages() {
    let docs = TestDocs::new();
    docs.write(
        "metamodel/root.yaml",
        "$package:\n  dochub.metamodel:\n    version: 1.4.0\nimports: [entities.yaml]\n",
    );
    docs.write(
        "metamodel/entities.yaml",
        "entities:\n  components:\n    title: Components\n",
    );
    docs.write(
        "root.yaml",
        "imports: [docs/overview.yaml]\ncomponents:\n  portal: {title: Portal}\n",
    );
    docs.write("docs/overview.yaml", "docs:\n  overview: {type: markdown}\n");
    docs.write(
        "plugins/seaf/manifest.yaml",
        concat!(
            "$package:\n",
            "  seaf.core:\n",
            "    version: 0.3.0\n",
            "    dependencies:\n",
            "      dochub.metamodel: '>=1.2 <2'\n",
            "components:\n",
            "  seaf.base: {kind: system, owner: seaf}\n",
            "  seaf.app: {$prototype: seaf.base, title: App}\n",
        ),
    );
    let config = EngineConfig::default()
        .with_root("metamodel/root.yaml")
        .with_root("root.yaml");
    let (engine, listener) = engine(&docs, config);

    engine.full_reload().await.unwrap();
    engine.import("plugins/seaf/manifest.yaml").await.unwrap();
    assert!(listener.errors().is_empty(), "{:?}", listener.errors());

    let snapshot = engine.published();
    assert_eq!(
        snapshot.stack,
        vec![
            "metamodel/entities.yaml",
            "metamodel/root.yaml",
            "docs/overview.yaml",
            "root.yaml",
            "plugins/seaf/manifest.yaml",
        ]
    );
    assert_eq!(snapshot.packages.len(), 2);
    assert_eq!(
        snapshot.get("/components/seaf.app"),
        Some(&json!({"$prototype": "seaf.base", "title": "App", "kind": "system", "owner": "seaf"}))
    );
    assert_eq!(snapshot.get("/components/portal/title"), Some(&json!("Portal")));
    assert_eq!(snapshot.source_of("/docs/overview/type"), Some("docs/overview.yaml"));
    assert_eq!(
        snapshot.merge_map.public_location("/docs/overview"),
        Some(format!("backend://{}/", path_key("/docs/overview")))
    );
    assert_eq!(
        snapshot.merge_map.resolve_key(&path_key("/components/seaf.app")),
        Some("plugins/seaf/manifest.yaml")
    );

    engine.unmount("plugins/seaf/manifest.yaml").await.unwrap();
    let snapshot = engine.published();
    assert!(snapshot.get("/components/seaf.app").is_none());
    assert_eq!(snapshot.packages.len(), 1);
}

#[tokio::test]
async fn plugin_waits_for_a_matching_metamodel() {
    let docs = TestDocs::new();
    docs.write("root.yaml", "$package:\n  dochub.metamodel:\n    version: 2.0.0\n");
    docs.write(
        "plugin.yaml",
        "$package:\n  plugin:\n    version: 1.0.0\n    dependencies:\n      dochub.metamodel: ^1.0\nplugin: true\n",
    );
    let (engine, listener) = engine(&docs, EngineConfig::default().with_root("root.yaml"));
    engine.full_reload().await.unwrap();
    engine.import("plugin.yaml").await.unwrap();

    assert!(engine.published().get("/plugin").is_none());
    let errors = listener.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ProblemKind::Package);

    docs.write("root.yaml", "$package:\n  dochub.metamodel:\n    version: 1.9.0\n");
    engine.on_change(["root.yaml"]).await.unwrap();
    assert_eq!(engine.published().get("/plugin"), Some(&json!(true)));
    assert!(engine.published().problems.is_empty());
}

#[tokio::test]
async fn missing_and_unreadable_imports_are_classified() {
    let docs = TestDocs::new();
    docs.write("root.yaml", "imports: [missing.yaml, folder]\ntitle: root\n");
    docs.write("folder/inner.yaml", "x: 1\n");
    let (engine, listener) = engine(&docs, EngineConfig::default().with_root("root.yaml"));

    engine.full_reload().await.unwrap();
    assert_eq!(engine.published().get("/title"), Some(&json!("root")));
    let kinds: Vec<ProblemKind> = listener.errors().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec![ProblemKind::Network, ProblemKind::FileSystem]);

    docs.write("missing.yaml", "late: true\n");
    engine.on_change(["missing.yaml"]).await.unwrap();
    assert_eq!(engine.published().get("/late"), Some(&json!(true)));
}

#[tokio::test]
async fn deleted_import_is_reported_until_restored() {
    let docs = TestDocs::new();
    docs.write("root.yaml", "imports: [parts/a.yaml]\ntitle: root\n");
    docs.write("parts/a.yaml", "owner: platform\n");
    let (engine, listener) = engine(&docs, EngineConfig::default().with_root("root.yaml"));
    engine.full_reload().await.unwrap();
    assert_eq!(engine.published().get("/owner"), Some(&json!("platform")));

    docs.remove("parts/a.yaml");
    engine.on_change(["parts/a.yaml"]).await.unwrap();
    assert!(engine.published().get("/owner").is_none());
    assert_eq!(engine.published().get("/title"), Some(&json!("root")));
    assert_eq!(listener.errors().len(), 1);
    assert_eq!(listener.errors()[0].0, ProblemKind::Network);

    docs.write("parts/a.yaml", "owner: web\n");
    engine.on_change(["parts/a.yaml"]).await.unwrap();
    assert_eq!(engine.published().get("/owner"), Some(&json!("web")));
    assert!(engine.published().problems.is_empty());
}

#[tokio::test]
async fn missing_root_is_escalated_and_recovers() {
    let docs = TestDocs::new();
    let (engine, _) = engine(&docs, EngineConfig::default().with_root("root.yaml"));

    let err = engine.full_reload().await.unwrap_err();
    assert!(matches!(err, Error::RootUnavailable { .. }));
    assert_eq!(engine.generation(), 0);

    docs.write("root.yaml", "title: late\n");
    engine.full_reload().await.unwrap();
    assert_eq!(engine.published().get("/title"), Some(&json!("late")));
}

#[tokio::test]
async fn hash_is_stable_across_engines_and_formats() {
    let yaml = TestDocs::new();
    yaml.write("root.yaml", "imports: [data.yaml]\n");
    yaml.write("data.yaml", "b: [1, 2]\na: {y: true, x: null}\n");

    let json_docs = TestDocs::new();
    json_docs.write("root.yaml", "imports: [data.yaml]\n");
    json_docs.write("data.yaml", r#"{"a": {"x": null, "y": true}, "b": [1, 2]}"#);

    let (first, _) = engine(&yaml, EngineConfig::default().with_root("root.yaml"));
    let (second, _) = engine(&json_docs, EngineConfig::default().with_root("root.yaml"));
    first.full_reload().await.unwrap();
    second.full_reload().await.unwrap();

    assert_eq!(first.published().hash, second.published().hash);
}

#[tokio::test]
async fn reserved_keys_follow_configuration() {
    let docs = TestDocs::new();
    docs.write(
        "engine.toml",
        "roots = [\"root.yaml\"]\nimports_key = \"include\"\nprototype_key = \"$base\"\n",
    );
    docs.write("root.yaml", "include: [types.yaml]\nimports: [ignored.yaml]\n");
    docs.write(
        "types.yaml",
        "entities:\n  a: {x: 1, y: 1}\n  b: {$base: a, y: 2}\n",
    );
    let config = EngineConfig::from_file(&docs.root().join("engine.toml")).unwrap();
    let (engine, listener) = engine(&docs, config);

    engine.full_reload().await.unwrap();
    assert!(listener.errors().is_empty());
    assert!(engine.layer("ignored.yaml").await.is_none());
    assert_eq!(
        engine.published().get("/entities/b"),
        Some(&json!({"$base": "a", "y": 2, "x": 1}))
    );
}
