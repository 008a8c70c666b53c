use crate::{
    api::attendance::require_on_site,
    auth::auth::AuthUser,
    db::{is_duplicate_key, is_lock_conflict},
    error::ApiError,
    model::{
        attendance::attendance_day,
        task_assignment::{
            ASSIGNMENT_COLUMNS, AssignmentRow, LifecycleError, TaskAction, WorkerTaskAssignment,
            activate,
        },
    },
    utils::geofence::{Coordinate, GeofenceValidation},
};
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlConnection, MySqlPool, Transaction, types::Json};
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct ProgressUpdate {
    #[schema(example = 60)]
    pub progress_percent: i64,
}

#[derive(Serialize, ToSchema)]
pub struct TaskActionResponse {
    #[schema(example = "Task started")]
    pub message: String,
    pub task: WorkerTaskAssignment,
    /// Other assignments of the same employee paused by this action
    pub paused_task_ids: Vec<u64>,
    pub geofence: Option<GeofenceValidation>,
}

async fn lock_assignment(
    conn: &mut MySqlConnection,
    assignment_id: u64,
) -> Result<WorkerTaskAssignment, ApiError> {
    let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM worker_task_assignments WHERE id = ? FOR UPDATE");
    let row = sqlx::query_as::<_, AssignmentRow>(&sql)
        .bind(assignment_id)
        .fetch_optional(conn)
        .await
        .map_err(map_conflict)?
        .ok_or_else(|| ApiError::not_found("Task assignment not found"))?;

    Ok(WorkerTaskAssignment::try_from(row)?)
}

async fn find_assignment(
    pool: &MySqlPool,
    assignment_id: u64,
) -> Result<WorkerTaskAssignment, ApiError> {
    let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM worker_task_assignments WHERE id = ?");
    let row = sqlx::query_as::<_, AssignmentRow>(&sql)
        .bind(assignment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Task assignment not found"))?;

    Ok(WorkerTaskAssignment::try_from(row)?)
}

/// Lock the target and every in-progress assignment of the employee in one
/// statement, in id order, so concurrent activations queue instead of
/// deadlocking.
async fn lock_for_activation(
    conn: &mut MySqlConnection,
    employee_id: u64,
    assignment_id: u64,
) -> Result<Vec<WorkerTaskAssignment>, ApiError> {
    let sql = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM worker_task_assignments \
         WHERE employee_id = ? AND (id = ? OR status = 'in_progress') \
         ORDER BY id FOR UPDATE"
    );
    let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
        .bind(employee_id)
        .bind(assignment_id)
        .fetch_all(conn)
        .await
        .map_err(map_conflict)?;

    Ok(rows
        .into_iter()
        .map(WorkerTaskAssignment::try_from)
        .collect::<Result<_, _>>()?)
}

/// Separate the target from the employee's other active assignments. The
/// target must still belong to the same project it was checked against.
fn split_locked(
    locked: Vec<WorkerTaskAssignment>,
    assignment_id: u64,
    project_id: u64,
) -> Result<(WorkerTaskAssignment, Vec<WorkerTaskAssignment>), ApiError> {
    let (mut target, others): (Vec<_>, Vec<_>) =
        locked.into_iter().partition(|a| a.id == assignment_id);

    let target = target
        .pop()
        .ok_or_else(|| ApiError::not_found("Task assignment not found"))?;
    if target.project_id != project_id {
        return Err(ApiError::conflict("Task assignment changed, please retry"));
    }

    let others = others.into_iter().filter(|a| a.status.is_active()).collect();
    Ok((target, others))
}

/// Write back the mutable lifecycle fields of an assignment.
pub(crate) async fn persist(
    conn: &mut MySqlConnection,
    a: &WorkerTaskAssignment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE worker_task_assignments
        SET status = ?, progress_percent = ?, start_time = ?, completed_at = ?, pause_history = ?
        WHERE id = ?
        "#,
    )
    .bind(a.status.as_ref())
    .bind(a.progress_percent)
    .bind(a.start_time)
    .bind(a.completed_at)
    .bind(Json(&a.pause_history))
    .bind(a.id)
    .execute(conn)
    .await?;
    Ok(())
}

fn owned_by(a: &WorkerTaskAssignment, employee_id: u64) -> Result<(), ApiError> {
    if a.employee_id == employee_id {
        Ok(())
    } else {
        Err(ApiError::forbidden(LifecycleError::ForeignAssignment(a.id).to_string()))
    }
}

fn map_conflict(e: sqlx::Error) -> ApiError {
    if is_duplicate_key(&e) {
        ApiError::conflict("Another task is already in progress for this employee")
    } else if is_lock_conflict(&e) {
        ApiError::conflict("Task is being updated by another request, please retry")
    } else {
        e.into()
    }
}

async fn require_checked_in(
    conn: &mut MySqlConnection,
    employee_id: u64,
    project_id: u64,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let checked_in = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM attendance
            WHERE employee_id = ? AND project_id = ? AND date = ? AND check_out IS NULL
        )
        "#,
    )
    .bind(employee_id)
    .bind(project_id)
    .bind(attendance_day(now))
    .fetch_one(conn)
    .await?;

    if checked_in != 0 {
        Ok(())
    } else {
        Err(ApiError::bad_request("Check in at the project before starting tasks"))
    }
}

/// Start or resume: on-site checks, then pause the employee's other active
/// task and activate this one in a single transaction.
async fn activate_task(
    auth: &AuthUser,
    pool: &MySqlPool,
    assignment_id: u64,
    point: Coordinate,
    action: TaskAction,
) -> Result<TaskActionResponse, ApiError> {
    let employee_id = auth.employee_id()?;
    let now = Utc::now();

    // checks that may need their own connection run before any row is locked
    let snapshot = find_assignment(pool, assignment_id).await?;
    owned_by(&snapshot, employee_id)?;
    snapshot.status.apply(action)?;
    let geofence = require_on_site(pool, snapshot.project_id, point).await?;

    let mut tx: Transaction<'_, MySql> = pool.begin().await?;
    let locked = lock_for_activation(&mut tx, employee_id, assignment_id).await?;
    let (mut target, mut others) = split_locked(locked, assignment_id, snapshot.project_id)?;
    target.status.apply(action)?;
    require_checked_in(&mut tx, employee_id, target.project_id, now).await?;

    let paused_task_ids = activate(&mut target, &mut others, action, now)?;

    // pause first so the unique active-task key never sees two rows
    for other in others.iter().filter(|o| paused_task_ids.contains(&o.id)) {
        persist(&mut tx, other).await.map_err(map_conflict)?;
    }
    persist(&mut tx, &target).await.map_err(map_conflict)?;
    tx.commit().await.map_err(map_conflict)?;

    info!(
        employee_id,
        task_id = target.id,
        action = %action,
        paused = ?paused_task_ids,
        "Task activated"
    );

    let message = match action {
        TaskAction::Resume => "Task resumed",
        _ => "Task started",
    };
    Ok(TaskActionResponse {
        message: message.to_string(),
        task: target,
        paused_task_ids,
        geofence: Some(geofence),
    })
}

/// Pause or complete the caller's own task.
async fn settle_task(
    auth: &AuthUser,
    pool: &MySqlPool,
    assignment_id: u64,
    action: TaskAction,
) -> Result<TaskActionResponse, ApiError> {
    let employee_id = auth.employee_id()?;
    let mut tx = pool.begin().await?;

    let mut target = lock_assignment(&mut tx, assignment_id).await?;
    owned_by(&target, employee_id)?;
    target.transition(action, Utc::now())?;

    persist(&mut tx, &target).await.map_err(map_conflict)?;
    tx.commit().await.map_err(map_conflict)?;

    info!(employee_id, task_id = target.id, action = %action, "Task updated");

    let message = match action {
        TaskAction::Complete => "Task completed",
        _ => "Task paused",
    };
    Ok(TaskActionResponse {
        message: message.to_string(),
        task: target,
        paused_task_ids: Vec::new(),
        geofence: None,
    })
}

/// The caller's assignments for today plus any unfinished ones carried over
#[utoipa::path(
    get,
    path = "/api/worker/tasks/today",
    responses(
        (status = 200, description = "Today's assignments", body = [WorkerTaskAssignment]),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Worker Tasks"
)]
pub async fn today_tasks(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, ApiError> {
    let employee_id = auth.employee_id()?;

    let sql = format!(
        r#"
        SELECT {ASSIGNMENT_COLUMNS}
        FROM worker_task_assignments
        WHERE employee_id = ?
        AND (work_date = ? OR status IN ('in_progress', 'paused'))
        ORDER BY FIELD(status, 'in_progress', 'paused', 'queued', 'completed'), id
        "#
    );
    let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
        .bind(employee_id)
        .bind(attendance_day(Utc::now()))
        .fetch_all(pool.get_ref())
        .await?;

    let tasks = rows
        .into_iter()
        .map(WorkerTaskAssignment::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(tasks))
}

/// Start a queued task; any other in-progress task of the caller is paused
#[utoipa::path(
    post,
    path = "/api/worker/tasks/{assignment_id}/start",
    params(("assignment_id" = u64, Path, description = "Task assignment ID")),
    request_body = Coordinate,
    responses(
        (status = 200, description = "Task started", body = TaskActionResponse),
        (status = 400, description = "Not checked in or invalid coordinates"),
        (status = 403, description = "Not the caller's task"),
        (status = 404, description = "Task assignment not found"),
        (status = 409, description = "Task is not queued"),
        (status = 422, description = "Outside the project geofence")
    ),
    security(("bearer_auth" = [])),
    tag = "Worker Tasks"
)]
#[instrument(name = "task_start", skip(auth, pool, location))]
pub async fn start_task(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    location: web::Json<Coordinate>,
) -> Result<HttpResponse, ApiError> {
    let resp = activate_task(
        &auth,
        pool.get_ref(),
        path.into_inner(),
        location.into_inner(),
        TaskAction::Start,
    )
    .await?;
    Ok(HttpResponse::Ok().json(resp))
}

/// Resume a paused task; any other in-progress task of the caller is paused
#[utoipa::path(
    post,
    path = "/api/worker/tasks/{assignment_id}/resume",
    params(("assignment_id" = u64, Path, description = "Task assignment ID")),
    request_body = Coordinate,
    responses(
        (status = 200, description = "Task resumed", body = TaskActionResponse),
        (status = 400, description = "Not checked in or invalid coordinates"),
        (status = 403, description = "Not the caller's task"),
        (status = 404, description = "Task assignment not found"),
        (status = 409, description = "Task is not paused"),
        (status = 422, description = "Outside the project geofence")
    ),
    security(("bearer_auth" = [])),
    tag = "Worker Tasks"
)]
#[instrument(name = "task_resume", skip(auth, pool, location))]
pub async fn resume_task(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    location: web::Json<Coordinate>,
) -> Result<HttpResponse, ApiError> {
    let resp = activate_task(
        &auth,
        pool.get_ref(),
        path.into_inner(),
        location.into_inner(),
        TaskAction::Resume,
    )
    .await?;
    Ok(HttpResponse::Ok().json(resp))
}

/// Pause an in-progress task
#[utoipa::path(
    post,
    path = "/api/worker/tasks/{assignment_id}/pause",
    params(("assignment_id" = u64, Path, description = "Task assignment ID")),
    responses(
        (status = 200, description = "Task paused", body = TaskActionResponse),
        (status = 403, description = "Not the caller's task"),
        (status = 404, description = "Task assignment not found"),
        (status = 409, description = "Task is not in progress")
    ),
    security(("bearer_auth" = [])),
    tag = "Worker Tasks"
)]
pub async fn pause_task(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    let resp = settle_task(&auth, pool.get_ref(), path.into_inner(), TaskAction::Pause).await?;
    Ok(HttpResponse::Ok().json(resp))
}

/// Complete an in-progress task
#[utoipa::path(
    post,
    path = "/api/worker/tasks/{assignment_id}/complete",
    params(("assignment_id" = u64, Path, description = "Task assignment ID")),
    responses(
        (status = 200, description = "Task completed", body = TaskActionResponse),
        (status = 403, description = "Not the caller's task"),
        (status = 404, description = "Task assignment not found"),
        (status = 409, description = "Task is not in progress")
    ),
    security(("bearer_auth" = [])),
    tag = "Worker Tasks"
)]
pub async fn complete_task(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    let resp = settle_task(&auth, pool.get_ref(), path.into_inner(), TaskAction::Complete).await?;
    Ok(HttpResponse::Ok().json(resp))
}

/// Report progress on an in-progress task
#[utoipa::path(
    put,
    path = "/api/worker/tasks/{assignment_id}/progress",
    params(("assignment_id" = u64, Path, description = "Task assignment ID")),
    request_body = ProgressUpdate,
    responses(
        (status = 200, description = "Progress recorded", body = WorkerTaskAssignment),
        (status = 403, description = "Not the caller's task"),
        (status = 404, description = "Task assignment not found"),
        (status = 409, description = "Task not in progress or progress out of range")
    ),
    security(("bearer_auth" = [])),
    tag = "Worker Tasks"
)]
pub async fn update_progress(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ProgressUpdate>,
) -> Result<HttpResponse, ApiError> {
    let employee_id = auth.employee_id()?;
    let mut tx = pool.begin().await?;

    let mut target = lock_assignment(&mut tx, path.into_inner()).await?;
    owned_by(&target, employee_id)?;
    target.set_progress(payload.progress_percent)?;

    persist(&mut tx, &target).await.map_err(map_conflict)?;
    tx.commit().await.map_err(map_conflict)?;

    info!(employee_id, task_id = target.id, progress = target.progress_percent, "Progress updated");
    Ok(HttpResponse::Ok().json(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::db_error;
    use crate::model::task_assignment::{TaskStatus, tests::assignment};
    use sqlx::error::ErrorKind;

    #[test]
    fn split_separates_target_from_active_siblings() {
        let locked = vec![
            assignment(3, 1, TaskStatus::InProgress),
            assignment(5, 1, TaskStatus::Paused),
            assignment(8, 1, TaskStatus::InProgress),
        ];

        let (target, others) = split_locked(locked, 5, 7).unwrap();

        assert_eq!(target.id, 5);
        assert_eq!(others.iter().map(|a| a.id).collect::<Vec<_>>(), vec![3, 8]);
    }

    #[test]
    fn split_reports_missing_or_moved_target() {
        let locked = vec![assignment(3, 1, TaskStatus::InProgress)];
        assert!(matches!(split_locked(locked, 5, 7), Err(ApiError::NotFound(_))));

        let mut moved = assignment(5, 1, TaskStatus::Queued);
        moved.project_id = 8;
        assert!(matches!(split_locked(vec![moved], 5, 7), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn lock_contention_maps_to_conflict() {
        let deadlock = map_conflict(db_error("40001", || ErrorKind::Other));
        assert!(matches!(deadlock, ApiError::Conflict(_)));

        let second_active = map_conflict(db_error("23000", || ErrorKind::UniqueViolation));
        assert!(matches!(second_active, ApiError::Conflict(_)));

        assert!(matches!(map_conflict(sqlx::Error::RowNotFound), ApiError::Internal));
    }

    #[test]
    fn foreign_assignment_is_forbidden() {
        let a = assignment(5, 2, TaskStatus::Queued);
        assert!(matches!(owned_by(&a, 1), Err(ApiError::Forbidden(_))));
        assert!(owned_by(&a, 2).is_ok());
    }
}
