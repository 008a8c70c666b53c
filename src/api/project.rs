use crate::{
    auth::auth::AuthUser,
    error::ApiError,
    model::project::Project,
    utils::{
        geofence::{Coordinate, Geofence},
        project_cache,
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct CreateProject {
    #[schema(example = "Harbour Tower Block B")]
    pub name: String,
    pub geofence: Geofence,
}

/// Every field is optional; omitted fields keep their stored value.
#[derive(Deserialize, ToSchema)]
pub struct UpdateProject {
    #[schema(example = "Harbour Tower Block B")]
    pub name: Option<String>,
    pub center: Option<Coordinate>,
    #[schema(example = 200.0)]
    pub radius: Option<f64>,
    pub strict_mode: Option<bool>,
    #[schema(example = 25.0)]
    pub allowed_variance: Option<f64>,
}

pub(crate) async fn load_project(pool: &MySqlPool, project_id: u64) -> Result<Project, ApiError> {
    project_cache::get_project(pool, project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))
}

/// Create a project with its geofence (admin only)
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProject,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid geofence"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Project"
)]
pub async fn create_project(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateProject>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let CreateProject { name, geofence } = payload.into_inner();
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Project name is required"));
    }
    geofence.validate()?;

    let result = sqlx::query(
        r#"
        INSERT INTO projects
            (name, center_latitude, center_longitude, radius_m, allowed_variance_m, strict_mode)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(geofence.center.latitude)
    .bind(geofence.center.longitude)
    .bind(geofence.radius)
    .bind(geofence.allowed_variance)
    .bind(geofence.strict_mode)
    .execute(pool.get_ref())
    .await?;

    let project = Project {
        id: result.last_insert_id(),
        name,
        geofence,
    };
    info!(project_id = project.id, "Project created");

    Ok(HttpResponse::Created().json(project))
}

/// Fetch a project and its geofence
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}",
    params(("project_id" = u64, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Project found", body = Project),
        (status = 404, description = "Project not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Project"
)]
pub async fn get_project(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    let project = load_project(pool.get_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(project))
}

/// Update a project's name or geofence (admin only)
#[utoipa::path(
    put,
    path = "/api/projects/{project_id}",
    params(("project_id" = u64, Path, description = "Project ID")),
    request_body = UpdateProject,
    responses(
        (status = 200, description = "Project updated", body = Project),
        (status = 400, description = "Invalid geofence"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Project not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Project"
)]
pub async fn update_project(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateProject>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let project_id = path.into_inner();

    // read through the database, not the cache, before a write
    project_cache::invalidate(project_id).await;
    let mut project = load_project(pool.get_ref(), project_id).await?;

    let patch = payload.into_inner();
    if let Some(name) = patch.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::bad_request("Project name is required"));
        }
        project.name = name;
    }
    let fence = &mut project.geofence;
    if let Some(center) = patch.center {
        fence.center = center;
    }
    if let Some(radius) = patch.radius {
        fence.radius = radius;
    }
    if let Some(strict) = patch.strict_mode {
        fence.strict_mode = strict;
    }
    if let Some(variance) = patch.allowed_variance {
        fence.allowed_variance = variance;
    }
    project.geofence.validate()?;

    sqlx::query(
        r#"
        UPDATE projects
        SET name = ?, center_latitude = ?, center_longitude = ?,
            radius_m = ?, allowed_variance_m = ?, strict_mode = ?
        WHERE id = ?
        "#,
    )
    .bind(&project.name)
    .bind(project.geofence.center.latitude)
    .bind(project.geofence.center.longitude)
    .bind(project.geofence.radius)
    .bind(project.geofence.allowed_variance)
    .bind(project.geofence.strict_mode)
    .bind(project_id)
    .execute(pool.get_ref())
    .await?;

    project_cache::invalidate(project_id).await;
    info!(project_id, "Project geofence updated");

    Ok(HttpResponse::Ok().json(project))
}
