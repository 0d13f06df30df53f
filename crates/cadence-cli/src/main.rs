use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cadence_core::app::{AppliedMigration, ServiceBuilder, TaskService};
use cadence_core::domain::{ServiceConfig, Task, TaskFilter};
use cadence_core::impls::{KvDirectory, RedbStore};
use cadence_core::ports::Context;

const USAGE: &str = "usage: cadence <db-path> [config.json]";

#[derive(Serialize)]
struct Summary {
    applied: Vec<AppliedMigration>,
    tasks: Vec<Task>,
}

fn load_config(path: Option<PathBuf>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(ServiceConfig::from_json(&raw)?)
        }
        None => Ok(ServiceConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let db_path = args.next().ok_or(USAGE)?;
    let config = load_config(args.next())?;

    // (A) store を開き、directory と service で共有する
    let store = Arc::new(RedbStore::open(&db_path)?);
    let directory = Arc::new(KvDirectory::new(Arc::clone(&store)));
    directory.initialize()?;

    let service = ServiceBuilder::new(Arc::clone(&store))
        .directory(directory)
        .config(config)
        .build()?;

    // (B) 未適用の migration を実行
    let applied = service.initialize().await?;
    info!(path = %db_path.display(), applied = applied.len(), "store ready");

    // (C) 全 task を page 単位で読む
    let ctx = Context::system();
    let mut filter = TaskFilter::default();
    let mut tasks = Vec::new();
    loop {
        let page = service.find_tasks(&ctx, &filter).await?;
        tasks.extend(page.tasks);
        match page.next_after {
            Some(after) => filter.after = Some(after),
            None => break,
        }
    }

    println!("{}", serde_json::to_string_pretty(&Summary { applied, tasks })?);
    Ok(())
}
