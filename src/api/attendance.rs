use crate::{
    api::project::load_project,
    auth::auth::AuthUser,
    db::is_duplicate_key,
    error::ApiError,
    model::attendance::{Attendance, attendance_day},
    utils::geofence::{Coordinate, GeofenceValidation},
};
use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct LocationRequest {
    #[schema(example = 7)]
    pub project_id: u64,
    #[schema(example = 1.2836)]
    pub latitude: f64,
    #[schema(example = 103.8604)]
    pub longitude: f64,
}

impl LocationRequest {
    fn coordinate(&self) -> Result<Coordinate, ApiError> {
        Ok(Coordinate::new(self.latitude, self.longitude)?)
    }
}

/// Runs the project geofence check and rejects blocked locations.
pub(crate) async fn require_on_site(
    pool: &MySqlPool,
    project_id: u64,
    point: Coordinate,
) -> Result<GeofenceValidation, ApiError> {
    let project = load_project(pool, project_id).await?;
    let validation = project.geofence.check_point(point)?;

    if !validation.can_proceed {
        return Err(ApiError::OutsideGeofence {
            distance: validation.distance,
            allowed: validation.allowed_radius,
        });
    }
    if !validation.inside_geofence {
        warn!(project_id, distance = validation.distance, "Action recorded outside geofence");
    }
    Ok(validation)
}

/// Check a location against a project geofence without recording anything
#[utoipa::path(
    post,
    path = "/api/attendance/validate-geofence",
    request_body = LocationRequest,
    responses(
        (status = 200, description = "Geofence evaluation", body = GeofenceValidation),
        (status = 400, description = "Invalid coordinates"),
        (status = 404, description = "Project not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn validate_geofence(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<LocationRequest>,
) -> Result<HttpResponse, ApiError> {
    let project = load_project(pool.get_ref(), payload.project_id).await?;
    let validation = project.geofence.check_point(payload.coordinate()?)?;
    Ok(HttpResponse::Ok().json(validation))
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body = LocationRequest,
    responses(
        (status = 200, description = "Checked in successfully", body = Object, example = json!({
            "message": "Checked in successfully",
            "geofence": {
                "inside_geofence": true,
                "can_proceed": true,
                "strict_mode": true,
                "distance": 12.5,
                "allowed_radius": 120.0,
                "message": "Location is within the project site"
            }
        })),
        (status = 400, description = "Already checked in today", body = Object, example = json!({
            "message": "Already checked in today"
        })),
        (status = 403, description = "No employee profile"),
        (status = 422, description = "Outside the project geofence")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<LocationRequest>,
) -> Result<HttpResponse, ApiError> {
    let employee_id = auth.employee_id()?;
    let point = payload.coordinate()?;
    let validation = require_on_site(pool.get_ref(), payload.project_id, point).await?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO attendance
            (employee_id, project_id, date, check_in,
             check_in_latitude, check_in_longitude, check_in_distance_m)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(payload.project_id)
    .bind(attendance_day(now))
    .bind(now)
    .bind(point.latitude)
    .bind(point.longitude)
    .bind(validation.distance)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(_) => {
            info!(employee_id, project_id = payload.project_id, "Checked in");
            Ok(HttpResponse::Ok().json(json!({
                "message": "Checked in successfully",
                "geofence": validation
            })))
        }
        Err(e) if is_duplicate_key(&e) => Err(ApiError::bad_request("Already checked in today")),
        Err(e) => {
            tracing::error!(error = %e, employee_id, "Check-in failed");
            Err(ApiError::Internal)
        }
    }
}

/// Check-out endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-out",
    request_body = LocationRequest,
    responses(
        (status = 200, description = "Checked out successfully", body = Object, example = json!({
            "message": "Checked out successfully"
        })),
        (status = 400, description = "No active check-in found for today", body = Object, example = json!({
            "message": "No active check-in found for today"
        })),
        (status = 403, description = "No employee profile"),
        (status = 422, description = "Outside the project geofence")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<LocationRequest>,
) -> Result<HttpResponse, ApiError> {
    let employee_id = auth.employee_id()?;
    let point = payload.coordinate()?;
    let validation = require_on_site(pool.get_ref(), payload.project_id, point).await?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE attendance
        SET check_out = ?
        WHERE employee_id = ?
        AND project_id = ?
        AND date = ?
        AND check_out IS NULL
        "#,
    )
    .bind(now)
    .bind(employee_id)
    .bind(payload.project_id)
    .bind(attendance_day(now))
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("No active check-in found for today"));
    }

    info!(employee_id, project_id = payload.project_id, "Checked out");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Checked out successfully",
        "geofence": validation
    })))
}

/// Today's attendance record for the caller, or `null`
#[utoipa::path(
    get,
    path = "/api/attendance/today",
    responses(
        (status = 200, description = "Today's attendance, or null before check-in", body = Attendance),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn today(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, ApiError> {
    let employee_id = auth.employee_id()?;

    let record = sqlx::query_as::<_, Attendance>(
        r#"
        SELECT id, employee_id, project_id, date, check_in, check_out,
               check_in_latitude, check_in_longitude, check_in_distance_m
        FROM attendance
        WHERE employee_id = ? AND date = ?
        "#,
    )
    .bind(employee_id)
    .bind(attendance_day(Utc::now()))
    .fetch_optional(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(record))
}
