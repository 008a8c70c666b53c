//! Detection and repair of data that violates the attendance and
//! task-assignment rules, for databases populated before those rules were
//! enforced.

use crate::{
    api::worker_task::persist,
    auth::auth::AuthUser,
    db::is_duplicate_key,
    error::ApiError,
    model::{
        attendance::{
            AttendanceDateRow, AttendanceRepair, RepairSchedule, plan_attendance_repairs,
            schedule_attendance_repairs,
        },
        task_assignment::{
            ASSIGNMENT_COLUMNS, ActiveTaskConflict, AssignmentRow, TaskAction,
            WorkerTaskAssignment, find_active_conflicts,
        },
    },
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use std::collections::HashSet;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct RepairQuery {
    /// Report what would change without writing
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ActiveTaskReport {
    pub dry_run: bool,
    pub conflicts: Vec<ActiveTaskConflict>,
    /// Assignments paused by the repair
    pub paused: usize,
}

#[derive(Serialize, ToSchema)]
pub struct AttendanceReport {
    pub dry_run: bool,
    pub repairs: Vec<AttendanceRepair>,
    pub redated: usize,
    pub deleted: usize,
    /// Planned repairs that could not be applied (circular date swaps)
    pub skipped: Vec<u64>,
}

impl AttendanceReport {
    /// Report of a plan before anything is written.
    fn planned(dry_run: bool, repairs: Vec<AttendanceRepair>, schedule: &RepairSchedule) -> Self {
        AttendanceReport {
            dry_run,
            repairs,
            redated: 0,
            deleted: 0,
            skipped: schedule.skipped.clone(),
        }
    }
}

async fn active_assignments(
    conn: &mut MySqlConnection,
    lock: bool,
) -> Result<Vec<WorkerTaskAssignment>, ApiError> {
    let sql = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM worker_task_assignments WHERE status = 'in_progress'{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let rows = sqlx::query_as::<_, AssignmentRow>(&sql).fetch_all(conn).await?;

    Ok(rows
        .into_iter()
        .map(WorkerTaskAssignment::try_from)
        .collect::<Result<_, _>>()?)
}

async fn attendance_drift(
    conn: &mut MySqlConnection,
    lock: bool,
) -> Result<(Vec<AttendanceDateRow>, HashSet<(u64, NaiveDate)>), ApiError> {
    let sql = format!(
        "SELECT id, employee_id, date, check_in FROM attendance WHERE date <> DATE(check_in){}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let drifted = sqlx::query_as::<_, AttendanceDateRow>(&sql)
        .fetch_all(&mut *conn)
        .await?;

    let occupied = sqlx::query_as::<_, (u64, NaiveDate)>(
        r#"
        SELECT employee_id, date FROM attendance
        WHERE date = DATE(check_in)
        AND employee_id IN (
            SELECT employee_id FROM attendance WHERE date <> DATE(check_in)
        )
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok((drifted, occupied.into_iter().collect()))
}

/// Employees with more than one in-progress task
#[utoipa::path(
    get,
    path = "/api/admin/integrity/active-tasks",
    responses(
        (status = 200, description = "Single-active-task violations", body = ActiveTaskReport),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Integrity"
)]
pub async fn active_task_conflicts(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let mut conn = pool.acquire().await?;
    let conflicts = find_active_conflicts(&active_assignments(&mut conn, false).await?);

    Ok(HttpResponse::Ok().json(ActiveTaskReport {
        dry_run: true,
        conflicts,
        paused: 0,
    }))
}

/// Keep each employee's most recently started task and pause the rest
#[utoipa::path(
    post,
    path = "/api/admin/integrity/active-tasks/repair",
    params(RepairQuery),
    responses(
        (status = 200, description = "Repair result", body = ActiveTaskReport),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Integrity"
)]
pub async fn repair_active_tasks(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<RepairQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let mut tx = pool.begin().await?;
    let mut active = active_assignments(&mut tx, true).await?;
    let conflicts = find_active_conflicts(&active);

    let to_pause: HashSet<u64> = conflicts
        .iter()
        .flat_map(|c| c.pause_assignment_ids.iter().copied())
        .collect();

    let mut paused = 0;
    if !query.dry_run {
        let now = Utc::now();
        for a in active.iter_mut().filter(|a| to_pause.contains(&a.id)) {
            a.transition(TaskAction::Pause, now)?;
            persist(&mut tx, a).await?;
            paused += 1;
        }
        tx.commit().await?;
        info!(paused, employees = conflicts.len(), "Active task conflicts repaired");
    }

    Ok(HttpResponse::Ok().json(ActiveTaskReport {
        dry_run: query.dry_run,
        conflicts,
        paused,
    }))
}

/// Attendance rows whose date is not the UTC day of their check-in
#[utoipa::path(
    get,
    path = "/api/admin/integrity/attendance-dates",
    responses(
        (status = 200, description = "Planned attendance repairs", body = AttendanceReport),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Integrity"
)]
pub async fn attendance_date_drift(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let mut conn = pool.acquire().await?;
    let (drifted, occupied) = attendance_drift(&mut conn, false).await?;
    let repairs = plan_attendance_repairs(&drifted, &occupied);
    let schedule = schedule_attendance_repairs(&repairs);

    Ok(HttpResponse::Ok().json(AttendanceReport::planned(true, repairs, &schedule)))
}

/// Re-date drifted attendance rows, deleting ones that duplicate an existing day
#[utoipa::path(
    post,
    path = "/api/admin/integrity/attendance-dates/repair",
    params(RepairQuery),
    responses(
        (status = 200, description = "Repair result", body = AttendanceReport),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Attendance changed during the repair")
    ),
    security(("bearer_auth" = [])),
    tag = "Integrity"
)]
pub async fn repair_attendance_dates(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<RepairQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    if query.dry_run {
        let mut conn = pool.acquire().await?;
        let (drifted, occupied) = attendance_drift(&mut conn, false).await?;
        let repairs = plan_attendance_repairs(&drifted, &occupied);
        let schedule = schedule_attendance_repairs(&repairs);
        return Ok(HttpResponse::Ok().json(AttendanceReport::planned(true, repairs, &schedule)));
    }

    let mut tx = pool.begin().await?;
    let (drifted, occupied) = attendance_drift(&mut tx, true).await?;
    let repairs = plan_attendance_repairs(&drifted, &occupied);
    let schedule = schedule_attendance_repairs(&repairs);

    for id in &schedule.deletes {
        sqlx::query("DELETE FROM attendance WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    for (id, to) in &schedule.redates {
        sqlx::query("UPDATE attendance SET date = ? WHERE id = ?")
            .bind(to)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    ApiError::conflict("Attendance changed during the repair, please retry")
                } else {
                    e.into()
                }
            })?;
    }
    tx.commit().await?;

    if !schedule.skipped.is_empty() {
        warn!(rows = ?schedule.skipped, "Attendance rows left unrepaired");
    }
    let mut report = AttendanceReport::planned(false, repairs, &schedule);
    report.deleted = schedule.deletes.len();
    report.redated = schedule.redates.len();
    info!(
        redated = report.redated,
        deleted = report.deleted,
        skipped = report.skipped.len(),
        "Attendance dates repaired"
    );

    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    #[test]
    fn planned_report_counts_nothing_as_applied() {
        let drifted = vec![
            AttendanceDateRow {
                id: 1,
                employee_id: 10,
                date: day(6),
                check_in: Utc.with_ymd_and_hms(2026, 5, 5, 9, 0, 0).unwrap(),
            },
            AttendanceDateRow {
                id: 2,
                employee_id: 10,
                date: day(8),
                check_in: Utc.with_ymd_and_hms(2026, 5, 5, 18, 0, 0).unwrap(),
            },
        ];
        let repairs = plan_attendance_repairs(&drifted, &HashSet::new());
        let schedule = schedule_attendance_repairs(&repairs);

        let report = AttendanceReport::planned(true, repairs, &schedule);

        assert!(report.dry_run);
        assert_eq!(report.repairs.len(), 2);
        assert_eq!((report.redated, report.deleted), (0, 0));
        assert!(report.skipped.is_empty());
        assert_eq!(schedule.deletes, vec![2]);
        assert_eq!(schedule.redates, vec![(1, day(5))]);
    }

    #[test]
    fn dry_run_defaults_to_false() {
        let query: RepairQuery = serde_json::from_str("{}").unwrap();
        assert!(!query.dry_run);
    }
}
