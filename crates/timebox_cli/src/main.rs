//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `timebox_core` linkage.
//! - Print the task forest of the default project with its usage bands.
//!
//! Usage: `timebox_cli [db_path] [log_dir]`. Without `db_path` an in-memory
//! database is used.

use log::info;
use std::env;
use std::process::ExitCode;
use timebox_core::engine::metrics::{usage_rate, usage_status};
use timebox_core::{
    build_forest, default_log_level, init_logging, open_db, open_db_in_memory, CoreConfig,
    LocalBackend, SystemClock, TaskNode, TaskStore, UsageStatus,
};

fn main() -> ExitCode {
    println!("timebox_core ping={}", timebox_core::ping());
    println!("timebox_core version={}", timebox_core::core_version());

    let mut args = env::args().skip(1);
    let db_path = args.next();
    if let Some(log_dir) = args.next() {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    match run(db_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(db_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let conn = match db_path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let config = CoreConfig::default();
    let backend = LocalBackend::new(&conn, SystemClock, &config);

    let project = backend.projects().get_or_create_default_project()?;
    let store = backend.load_store(Some(project.id))?;
    info!(
        "event=cli_probe module=cli status=ok project_id={} tasks={}",
        project.id,
        store.len()
    );

    println!("project={} tasks={}", project.name, store.len());
    for node in build_forest(&store) {
        print_node(&store, &node, 0);
    }
    Ok(())
}

fn print_node(store: &TaskStore, node: &TaskNode<'_>, depth: usize) {
    let task = node.task;
    let usage = match usage_status(store, task) {
        UsageStatus::NotStarted => "not_started".to_string(),
        UsageStatus::NoEstimate => "no_estimate".to_string(),
        UsageStatus::Band(band) => format!("{:.0}% {}", usage_rate(store, task), band.as_str()),
    };
    println!(
        "{:indent$}- [{}] {} ({usage})",
        "",
        task.status.as_str(),
        task.title,
        indent = depth * 2
    );
    for child in &node.children {
        print_node(store, child, depth + 1);
    }
}
