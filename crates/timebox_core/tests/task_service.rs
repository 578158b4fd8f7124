use rusqlite::Connection;
use timebox_core::db::open_db_in_memory;
use timebox_core::service::project_service::NewProject;
use timebox_core::service::task_service::{NewTask, TaskServiceError, TaskUpdate};
use timebox_core::{
    CoreConfig, ExecutionState, LocalBackend, ManualClock, ProjectId, TaskId, TaskStatus,
};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn project(backend: &LocalBackend<'_, &ManualClock>, name: &str) -> ProjectId {
    backend
        .projects()
        .create_project(NewProject::named(name))
        .unwrap()
        .id
}

fn status(backend: &LocalBackend<'_, &ManualClock>, id: TaskId) -> TaskStatus {
    backend.tasks().get_task(id).unwrap().status
}

fn set_status(backend: &LocalBackend<'_, &ManualClock>, id: TaskId, status: TaskStatus) {
    backend
        .tasks()
        .update_task(
            id,
            TaskUpdate {
                status: Some(status),
                ..TaskUpdate::default()
            },
        )
        .unwrap();
}

#[test]
fn create_task_normalizes_title_and_appends_position() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");

    let first = backend
        .tasks()
        .create_task(NewTask::new(project_id, "  write   draft "))
        .unwrap();
    let second = backend
        .tasks()
        .create_task(NewTask::new(project_id, "review"))
        .unwrap();

    assert_eq!(first.title, "write draft");
    assert_eq!(first.status, TaskStatus::Todo);
    assert_eq!(first.execution_state, ExecutionState::Idle);
    assert_eq!(first.position, 0);
    assert_eq!(second.position, 1);

    let err = backend
        .tasks()
        .create_task(NewTask::new(project_id, "   "))
        .unwrap_err();
    assert!(matches!(err, TaskServiceError::Validation(_)));
}

#[test]
fn create_task_checks_project_and_parent() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let a = project(&backend, "A");
    let b = project(&backend, "B");
    let parent = backend
        .tasks()
        .create_task(NewTask::new(a, "parent"))
        .unwrap();

    let missing = uuid::Uuid::new_v4();
    let err = backend
        .tasks()
        .create_task(NewTask::new(missing, "orphan"))
        .unwrap_err();
    assert!(matches!(err, TaskServiceError::ProjectNotFound(id) if id == missing));

    let err = backend
        .tasks()
        .create_task(NewTask::new(b, "cross").under(parent.id))
        .unwrap_err();
    assert!(matches!(err, TaskServiceError::ParentProjectMismatch { .. }));
}

#[test]
fn parent_status_rolls_up_from_children() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");
    let parent = backend
        .tasks()
        .create_task(NewTask::new(project_id, "parent"))
        .unwrap();
    let a = backend
        .tasks()
        .create_task(NewTask::new(project_id, "a").under(parent.id))
        .unwrap();
    let b = backend
        .tasks()
        .create_task(NewTask::new(project_id, "b").under(parent.id))
        .unwrap();

    set_status(&backend, a.id, TaskStatus::InProgress);
    assert_eq!(status(&backend, parent.id), TaskStatus::InProgress);

    set_status(&backend, a.id, TaskStatus::Completed);
    assert_eq!(status(&backend, parent.id), TaskStatus::Todo);

    set_status(&backend, b.id, TaskStatus::Completed);
    assert_eq!(status(&backend, parent.id), TaskStatus::Completed);
}

#[test]
fn parent_status_cascades_to_children() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");
    let parent = backend
        .tasks()
        .create_task(NewTask::new(project_id, "parent"))
        .unwrap();
    let a = backend
        .tasks()
        .create_task(NewTask::new(project_id, "a").under(parent.id))
        .unwrap();
    let b = backend
        .tasks()
        .create_task(NewTask::new(project_id, "b").under(parent.id))
        .unwrap();

    set_status(&backend, parent.id, TaskStatus::Completed);

    assert_eq!(status(&backend, a.id), TaskStatus::Completed);
    assert_eq!(status(&backend, b.id), TaskStatus::Completed);
}

#[test]
fn reparenting_rejects_cycles() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");
    let root = backend
        .tasks()
        .create_task(NewTask::new(project_id, "root"))
        .unwrap();
    let child = backend
        .tasks()
        .create_task(NewTask::new(project_id, "child").under(root.id))
        .unwrap();
    let grandchild = backend
        .tasks()
        .create_task(NewTask::new(project_id, "grandchild").under(child.id))
        .unwrap();

    let err = backend
        .tasks()
        .update_task(
            root.id,
            TaskUpdate {
                parent_id: Some(Some(grandchild.id)),
                ..TaskUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TaskServiceError::CycleDetected { task_id, .. } if task_id == root.id));

    let err = backend
        .tasks()
        .update_task(
            root.id,
            TaskUpdate {
                parent_id: Some(Some(root.id)),
                ..TaskUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TaskServiceError::CycleDetected { .. }));

    let moved = backend
        .tasks()
        .update_task(
            grandchild.id,
            TaskUpdate {
                parent_id: Some(None),
                ..TaskUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(moved.parent_id, None);
    assert_eq!(moved.position, 1);
}

#[test]
fn expired_hard_deadline_locks_the_subtree() {
    let conn = setup();
    let clock = ManualClock::new(1_000);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");
    let parent = backend
        .tasks()
        .create_task(NewTask {
            due_at: Some(5_000),
            is_ddl: true,
            ..NewTask::new(project_id, "deadline")
        })
        .unwrap();
    let child = backend
        .tasks()
        .create_task(NewTask::new(project_id, "inherits").under(parent.id))
        .unwrap();

    let rename = || TaskUpdate {
        title: Some("renamed".to_string()),
        ..TaskUpdate::default()
    };
    backend.tasks().update_task(child.id, rename()).unwrap();

    clock.set(6_000);
    let err = backend.tasks().update_task(child.id, rename()).unwrap_err();
    assert!(matches!(err, TaskServiceError::TaskLocked(id) if id == child.id));
    let err = backend.tasks().reposition(parent.id, 9).unwrap_err();
    assert!(matches!(err, TaskServiceError::TaskLocked(_)));
    let err = backend.tasks().delete_task(child.id).unwrap_err();
    assert!(matches!(err, TaskServiceError::TaskLocked(_)));

    // Unlocking the child alone is not enough: the parent still enforces.
    backend.tasks().unlock(child.id).unwrap();
    assert!(backend.tasks().update_task(child.id, rename()).is_err());

    backend.tasks().unlock(parent.id).unwrap();
    backend.tasks().update_task(child.id, rename()).unwrap();
    assert!(!backend.tasks().get_task(parent.id).unwrap().is_ddl);
}

#[test]
fn only_one_task_may_work_and_only_in_progress() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");
    let todo = backend
        .tasks()
        .create_task(NewTask::new(project_id, "todo"))
        .unwrap();
    let a = backend
        .tasks()
        .create_task(NewTask {
            status: Some(TaskStatus::InProgress),
            ..NewTask::new(project_id, "a")
        })
        .unwrap();
    let b = backend
        .tasks()
        .create_task(NewTask {
            status: Some(TaskStatus::InProgress),
            ..NewTask::new(project_id, "b")
        })
        .unwrap();

    let err = backend
        .tasks()
        .set_execution_state(todo.id, ExecutionState::Working)
        .unwrap_err();
    assert!(matches!(err, TaskServiceError::ExecutionRequiresInProgress(_)));

    backend
        .tasks()
        .set_execution_state(a.id, ExecutionState::Working)
        .unwrap();
    let err = backend
        .tasks()
        .set_execution_state(b.id, ExecutionState::Working)
        .unwrap_err();
    assert!(
        matches!(err, TaskServiceError::AnotherTaskWorking { working_task_id } if working_task_id == a.id)
    );

    backend
        .tasks()
        .set_execution_state(a.id, ExecutionState::Idle)
        .unwrap();
    backend
        .tasks()
        .set_execution_state(b.id, ExecutionState::Working)
        .unwrap();
}

#[test]
fn siblings_and_reposition_follow_parent() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project_id = project(&backend, "P");
    let root = backend
        .tasks()
        .create_task(NewTask::new(project_id, "root"))
        .unwrap();
    let first = backend
        .tasks()
        .create_task(NewTask::new(project_id, "first").under(root.id))
        .unwrap();
    let second = backend
        .tasks()
        .create_task(NewTask::new(project_id, "second").under(root.id))
        .unwrap();

    backend.tasks().reposition(first.id, 5).unwrap();

    let siblings: Vec<TaskId> = backend
        .tasks()
        .siblings(second.id)
        .unwrap()
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(siblings, vec![second.id, first.id]);

    let roots = backend.tasks().siblings(root.id).unwrap();
    assert_eq!(roots.len(), 1);
}

#[test]
fn list_tasks_filters_by_project() {
    let conn = setup();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let a = project(&backend, "A");
    let b = project(&backend, "B");
    backend.tasks().create_task(NewTask::new(a, "a1")).unwrap();
    backend.tasks().create_task(NewTask::new(a, "a2")).unwrap();
    backend.tasks().create_task(NewTask::new(b, "b1")).unwrap();

    assert_eq!(backend.tasks().list_tasks(Some(a)).unwrap().len(), 2);
    assert_eq!(backend.tasks().list_tasks(None).unwrap().len(), 3);
    assert_eq!(backend.load_store(Some(b)).unwrap().len(), 1);
}
