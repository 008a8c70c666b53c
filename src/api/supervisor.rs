use crate::{
    api::{employee::require_employee, project::load_project},
    auth::auth::AuthUser,
    db::is_missing_reference,
    error::ApiError,
    model::{
        attendance::attendance_day,
        task_assignment::{ASSIGNMENT_COLUMNS, AssignmentRow, DailyTarget, WorkerTaskAssignment},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct CreateAssignment {
    #[schema(example = 42)]
    pub employee_id: u64,
    #[schema(example = 7)]
    pub project_id: u64,
    #[schema(example = 3101)]
    pub task_id: u64,
    #[schema(example = "Plastering level 3")]
    pub task_name: String,
    /// Defaults to today (UTC)
    #[schema(example = "2026-03-02", value_type = Option<String>, format = "date")]
    pub work_date: Option<NaiveDate>,
    #[serde(default)]
    pub daily_target: DailyTarget,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveTaskRow {
    #[sqlx(flatten)]
    assignment: AssignmentRow,
    employee_name: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ActiveTask {
    #[schema(example = "Ravi Kumar")]
    pub employee_name: Option<String>,
    #[serde(flatten)]
    pub assignment: WorkerTaskAssignment,
}

// employee or project removed between the existence checks and the insert
fn map_insert_error(e: sqlx::Error) -> ApiError {
    if is_missing_reference(&e) {
        ApiError::not_found("Employee or project not found")
    } else {
        e.into()
    }
}

/// Assign a task to a worker for a day
#[utoipa::path(
    post,
    path = "/api/supervisor/tasks",
    request_body = CreateAssignment,
    responses(
        (status = 201, description = "Assignment created", body = Object, example = json!({
            "message": "Task assigned", "id": 55, "status": "queued"
        })),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Supervisor/Admin only"),
        (status = 404, description = "Employee or project not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Supervisor"
)]
pub async fn create_assignment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateAssignment>,
) -> Result<HttpResponse, ApiError> {
    auth.require_supervisor_or_admin()?;

    let task_name = payload.task_name.trim();
    if task_name.is_empty() {
        return Err(ApiError::bad_request("task_name is required"));
    }
    if payload.daily_target.quantity.is_some_and(|q| !q.is_finite() || q < 0.0) {
        return Err(ApiError::bad_request("daily_target.quantity must be a non-negative number"));
    }
    require_employee(pool.get_ref(), payload.employee_id).await?;
    load_project(pool.get_ref(), payload.project_id).await?;

    let work_date = payload.work_date.unwrap_or_else(|| attendance_day(Utc::now()));
    let target = &payload.daily_target;

    let result = sqlx::query(
        r#"
        INSERT INTO worker_task_assignments
            (employee_id, project_id, task_id, task_name, work_date, status,
             target_quantity, target_unit, target_description, pause_history, supervisor_id)
        VALUES (?, ?, ?, ?, ?, 'queued', ?, ?, ?, JSON_ARRAY(), ?)
        "#,
    )
    .bind(payload.employee_id)
    .bind(payload.project_id)
    .bind(payload.task_id)
    .bind(task_name)
    .bind(work_date)
    .bind(target.quantity)
    .bind(target.unit.as_deref())
    .bind(target.description.as_deref())
    .bind(auth.employee_id)
    .execute(pool.get_ref())
    .await
    .map_err(map_insert_error)?;

    let id = result.last_insert_id();
    info!(
        assignment_id = id,
        employee_id = payload.employee_id,
        project_id = payload.project_id,
        "Task assigned"
    );

    Ok(HttpResponse::Created().json(json!({
        "message": "Task assigned",
        "id": id,
        "status": "queued"
    })))
}

/// Everyone currently working on a project
#[utoipa::path(
    get,
    path = "/api/supervisor/active-tasks/{project_id}",
    params(("project_id" = u64, Path, description = "Project ID")),
    responses(
        (status = 200, description = "In-progress assignments on the project", body = [ActiveTask]),
        (status = 403, description = "Supervisor/Admin only"),
        (status = 404, description = "Project not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Supervisor"
)]
pub async fn active_tasks(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    auth.require_supervisor_or_admin()?;
    let project_id = path.into_inner();
    load_project(pool.get_ref(), project_id).await?;

    let sql = format!(
        r#"
        SELECT {ASSIGNMENT_COLUMNS},
            (SELECT e.full_name FROM employees e WHERE e.id = a.employee_id) AS employee_name
        FROM worker_task_assignments a
        WHERE project_id = ? AND status = 'in_progress'
        ORDER BY start_time
        "#
    );
    let rows = sqlx::query_as::<_, ActiveTaskRow>(&sql)
        .bind(project_id)
        .fetch_all(pool.get_ref())
        .await?;

    let tasks = rows
        .into_iter()
        .map(|row| {
            Ok(ActiveTask {
                employee_name: row.employee_name,
                assignment: WorkerTaskAssignment::try_from(row.assignment)?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(HttpResponse::Ok().json(tasks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::db_error;
    use sqlx::error::ErrorKind;

    #[test]
    fn unknown_employee_on_insert_is_not_found() {
        let err = map_insert_error(db_error("23000", || ErrorKind::ForeignKeyViolation));
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = map_insert_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ApiError::Internal));
    }

    #[test]
    fn daily_target_is_optional() {
        let payload: CreateAssignment = serde_json::from_value(json!({
            "employee_id": 42,
            "project_id": 7,
            "task_id": 3101,
            "task_name": "Plastering level 3"
        }))
        .unwrap();

        assert_eq!(payload.work_date, None);
        assert_eq!(payload.daily_target.quantity, None);
    }
}
