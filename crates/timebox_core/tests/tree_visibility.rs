use timebox_core::db::open_db;
use timebox_core::engine::visibility::{all_descendant_ids, DEFAULT_EXPANDED_KEYS_STORAGE_KEY};
use timebox_core::repo::kv_repo::{KeyValueStore, SqliteKvStore};
use timebox_core::service::project_service::NewProject;
use timebox_core::service::task_service::NewTask;
use timebox_core::{build_forest, CoreConfig, ExpandedKeys, LocalBackend, ManualClock};

#[test]
fn expanded_keys_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timebox.db");
    let clock = ManualClock::new(0);
    let config = CoreConfig::default();

    let (root_id, child_id, leaf_id) = {
        let conn = open_db(&path).unwrap();
        let backend = LocalBackend::new(&conn, &clock, &config);
        let project = backend
            .projects()
            .create_project(NewProject::named("Tree"))
            .unwrap();
        let root = backend
            .tasks()
            .create_task(NewTask::new(project.id, "root"))
            .unwrap();
        let child = backend
            .tasks()
            .create_task(NewTask::new(project.id, "child").under(root.id))
            .unwrap();
        let leaf = backend
            .tasks()
            .create_task(NewTask::new(project.id, "leaf").under(child.id))
            .unwrap();

        let store = backend.load_store(Some(project.id)).unwrap();
        let mut expanded = ExpandedKeys::load(
            SqliteKvStore::new(&conn),
            config.expanded_keys_storage_key.as_str(),
        );
        assert!(expanded.is_empty());
        expanded.reveal(&store, leaf.id);
        assert!(expanded.is_visible(&store, leaf.id));
        (root.id, child.id, leaf.id)
    };

    let conn = open_db(&path).unwrap();
    let backend = LocalBackend::new(&conn, &clock, &config);
    let store = backend.load_store(None).unwrap();
    let mut expanded = ExpandedKeys::load(
        SqliteKvStore::new(&conn),
        DEFAULT_EXPANDED_KEYS_STORAGE_KEY,
    );

    assert!(expanded.contains(root_id));
    assert!(expanded.contains(child_id));
    assert!(expanded.is_visible(&store, leaf_id));

    expanded.collapse(root_id);
    assert!(!expanded.is_visible(&store, leaf_id));
    assert_eq!(expanded.nearest_visible_ancestor(&store, leaf_id), Some(root_id));

    let persisted = SqliteKvStore::new(&conn)
        .get(DEFAULT_EXPANDED_KEYS_STORAGE_KEY)
        .unwrap()
        .unwrap();
    let ids: Vec<uuid::Uuid> = serde_json::from_str(&persisted).unwrap();
    assert_eq!(ids, vec![child_id]);
}

#[test]
fn malformed_persisted_keys_load_empty() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("timebox.db")).unwrap();
    let kv = SqliteKvStore::new(&conn);
    kv.set(DEFAULT_EXPANDED_KEYS_STORAGE_KEY, "{not json").unwrap();

    let expanded = ExpandedKeys::load(kv, DEFAULT_EXPANDED_KEYS_STORAGE_KEY);

    assert!(expanded.is_empty());
}

#[test]
fn forest_nests_loaded_tasks_in_position_order() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("timebox.db")).unwrap();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project = backend
        .projects()
        .get_or_create_default_project()
        .unwrap();
    let first = backend
        .tasks()
        .create_task(NewTask::new(project.id, "first"))
        .unwrap();
    let second = backend
        .tasks()
        .create_task(NewTask::new(project.id, "second"))
        .unwrap();
    let nested = backend
        .tasks()
        .create_task(NewTask::new(project.id, "nested").under(second.id))
        .unwrap();
    backend.tasks().reposition(first.id, 7).unwrap();

    let store = backend.load_store(Some(project.id)).unwrap();
    let forest = build_forest(&store);

    let titles: Vec<&str> = forest.iter().map(|node| node.task.title.as_str()).collect();
    assert_eq!(titles, vec!["second", "first"]);
    assert_eq!(forest[0].children.len(), 1);
    assert_eq!(forest[0].children[0].task.id, nested.id);
    assert!(forest[1].is_leaf());

    let descendants = all_descendant_ids(&store, second.id);
    assert!(descendants.contains(&nested.id));
    assert!(!descendants.contains(&second.id));
}
