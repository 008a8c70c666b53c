use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::OnceCell;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::model::project::{PROJECT_COLUMNS, Project, ProjectRow};

/// Project geofences are read on every check-in and task start, written rarely.
static PROJECT_CACHE: OnceCell<Cache<u64, Project>> = OnceCell::new();

const DEFAULT_TTL_SECS: u64 = 300;

/// Set the TTL once at startup; later calls are ignored.
pub fn init(ttl_secs: u64) {
    let _ = PROJECT_CACHE.set(build(ttl_secs));
}

fn build(ttl_secs: u64) -> Cache<u64, Project> {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(Duration::from_secs(ttl_secs))
        .build()
}

fn cache() -> &'static Cache<u64, Project> {
    PROJECT_CACHE.get_or_init(|| build(DEFAULT_TTL_SECS))
}

/// Cached project lookup, falling back to the database.
pub async fn get_project(pool: &MySqlPool, project_id: u64) -> Result<Option<Project>, sqlx::Error> {
    if let Some(project) = cache().get(&project_id).await {
        return Ok(Some(project));
    }

    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
    let row = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(project_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let project = Project::from(row);
            cache().insert(project_id, project.clone()).await;
            Ok(Some(project))
        }
        None => Ok(None),
    }
}

pub async fn invalidate(project_id: u64) {
    cache().invalidate(&project_id).await;
}

/// Load every project into the cache, streaming in batches.
pub async fn warmup_project_cache(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects");
    let mut stream = sqlx::query_as::<_, ProjectRow>(&sql).fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        batch.push(Project::from(row?));
        total += 1;

        if batch.len() >= batch_size {
            insert_batch(&mut batch).await;
        }
    }

    if !batch.is_empty() {
        insert_batch(&mut batch).await;
    }

    tracing::info!(total, "Project cache warmup complete");
    Ok(())
}

async fn insert_batch(batch: &mut Vec<Project>) {
    let inserts: Vec<_> = batch
        .drain(..)
        .map(|p| async move { cache().insert(p.id, p).await })
        .collect();

    futures::future::join_all(inserts).await;
}
