use timebox_core::db::open_db_in_memory;
use timebox_core::engine::metrics::project_utilization;
use timebox_core::service::project_service::{NewProject, ProjectServiceError, ProjectUpdate};
use timebox_core::service::task_service::NewTask;
use timebox_core::service::time_slice_service::NewTimeSlice;
use timebox_core::{CoreConfig, LocalBackend, ManualClock};

#[test]
fn default_project_is_created_once() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());

    let first = backend.projects().get_or_create_default_project().unwrap();
    let second = backend.projects().get_or_create_default_project().unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.name, "Default Project");
    assert_eq!(backend.projects().list_projects().unwrap().len(), 1);
}

#[test]
fn project_names_are_trimmed_and_unique() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let projects = backend.projects();

    let created = projects
        .create_project(NewProject::named("  Thesis  "))
        .unwrap();
    assert_eq!(created.name, "Thesis");

    let err = projects
        .create_project(NewProject::named("Thesis"))
        .unwrap_err();
    assert!(matches!(err, ProjectServiceError::DuplicateName(name) if name == "Thesis"));

    let err = projects.create_project(NewProject::named("   ")).unwrap_err();
    assert!(matches!(err, ProjectServiceError::InvalidName));
}

#[test]
fn project_plan_is_validated_on_update() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let projects = backend.projects();
    let project = projects.create_project(NewProject::named("Plan")).unwrap();

    let err = projects
        .update_project(
            project.id,
            ProjectUpdate {
                planned_time_ms: Some(-1),
                ..ProjectUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ProjectServiceError::NegativePlannedTime(-1)));

    let err = projects
        .update_project(
            project.id,
            ProjectUpdate {
                start_at: Some(Some(2_000)),
                end_at: Some(Some(1_000)),
                ..ProjectUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ProjectServiceError::InvalidSchedule { .. }));

    let updated = projects
        .update_project(
            project.id,
            ProjectUpdate {
                planned_time_ms: Some(3_600_000),
                description: Some(Some("spring term".to_string())),
                ..ProjectUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.planned_time_ms, 3_600_000);
    assert_eq!(updated.description.as_deref(), Some("spring term"));
}

#[test]
fn deleting_project_removes_its_tasks() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project = backend
        .projects()
        .create_project(NewProject::named("Doomed"))
        .unwrap();
    let task = backend
        .tasks()
        .create_task(NewTask::new(project.id, "Task"))
        .unwrap();

    backend.projects().delete_project(project.id).unwrap();

    assert!(backend.tasks().get_task(task.id).is_err());
    assert!(backend.projects().get_project(project.id).is_err());
}

#[test]
fn project_utilization_uses_logged_time() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(0);
    let backend = LocalBackend::new(&conn, &clock, &CoreConfig::default());
    let project = backend
        .projects()
        .create_project(NewProject {
            planned_time_ms: Some(4_000),
            ..NewProject::named("Budget")
        })
        .unwrap();
    let parent = backend
        .tasks()
        .create_task(NewTask::new(project.id, "Parent"))
        .unwrap();
    let child = backend
        .tasks()
        .create_task(NewTask::new(project.id, "Child").under(parent.id))
        .unwrap();
    backend
        .time_slices()
        .create_time_slice(NewTimeSlice::closed(parent.id, 0, 1_000, 3))
        .unwrap();
    backend
        .time_slices()
        .create_time_slice(NewTimeSlice::closed(child.id, 0, 2_000, 4))
        .unwrap();

    let logged = backend.tasks().project_logged_ms(project.id).unwrap();
    assert_eq!(logged, 3_000);
    assert!((project_utilization(logged, project.planned_time_ms) - 0.75).abs() < 1e-9);
    assert_eq!(project_utilization(10_000, 4_000), 1.0);
    assert_eq!(project_utilization(1_000, 0), 0.0);
}
