use crate::api::attendance::LocationRequest;
use crate::api::employee::{CreateEmployee, EmployeeListResponse, EmployeeQuery};
use crate::api::integrity::{ActiveTaskReport, AttendanceReport, RepairQuery};
use crate::api::project::{CreateProject, UpdateProject};
use crate::api::supervisor::{ActiveTask, CreateAssignment};
use crate::api::worker_task::{ProgressUpdate, TaskActionResponse};
use crate::model::attendance::{Attendance, AttendanceRepair};
use crate::model::employee::Employee;
use crate::model::project::Project;
use crate::model::task_assignment::{
    ActiveTaskConflict, DailyTarget, PauseEntry, TaskStatus, WorkerTaskAssignment,
};
use crate::model::user::CreateUser;
use crate::models::{LoginReqDto, TokenPair};
use crate::utils::geofence::{Coordinate, Geofence, GeofenceCheck, GeofenceValidation};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sitecrew Field Operations API",
        version = "1.0.0",
        description = r#"
## Construction field operations

Backend for the worker, driver and supervisor mobile apps.

### Key Features
- **Attendance**
  - Geofenced check-in and check-out against the project site
- **Worker tasks**
  - Daily assignments with a `queued → in_progress → paused → completed` lifecycle
  - Starting or resuming a task pauses any other task the worker has in progress
- **Supervision**
  - Assign tasks and see who is working on a project right now
- **Integrity**
  - Detect and repair legacy rows that break the attendance or single-active-task rules

### Security
All `/api` endpoints need an access token from `/auth/login`
in the `Authorization: Bearer` header.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::create_user,

        crate::api::attendance::validate_geofence,
        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::today,

        crate::api::worker_task::today_tasks,
        crate::api::worker_task::start_task,
        crate::api::worker_task::pause_task,
        crate::api::worker_task::resume_task,
        crate::api::worker_task::complete_task,
        crate::api::worker_task::update_progress,

        crate::api::supervisor::create_assignment,
        crate::api::supervisor::active_tasks,

        crate::api::project::create_project,
        crate::api::project::get_project,
        crate::api::project::update_project,

        crate::api::employee::create_employee,
        crate::api::employee::list_employees,
        crate::api::employee::get_employee,
        crate::api::employee::update_employee,

        crate::api::integrity::active_task_conflicts,
        crate::api::integrity::repair_active_tasks,
        crate::api::integrity::attendance_date_drift,
        crate::api::integrity::repair_attendance_dates
    ),
    components(
        schemas(
            LoginReqDto,
            TokenPair,
            CreateUser,
            LocationRequest,
            Attendance,
            AttendanceRepair,
            Coordinate,
            Geofence,
            GeofenceCheck,
            GeofenceValidation,
            TaskStatus,
            DailyTarget,
            PauseEntry,
            WorkerTaskAssignment,
            TaskActionResponse,
            ProgressUpdate,
            CreateAssignment,
            ActiveTask,
            Project,
            CreateProject,
            UpdateProject,
            Employee,
            CreateEmployee,
            EmployeeQuery,
            EmployeeListResponse,
            ActiveTaskConflict,
            ActiveTaskReport,
            AttendanceReport,
            RepairQuery
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Auth", description = "Login and token management"),
        (name = "Attendance", description = "Geofenced attendance"),
        (name = "Worker Tasks", description = "Task lifecycle for field staff"),
        (name = "Supervisor", description = "Assignment and site overview"),
        (name = "Project", description = "Projects and their geofences"),
        (name = "Employee", description = "Employee records"),
        (name = "Integrity", description = "Detect and repair inconsistent data"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_lifecycle_paths_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;

        assert!(paths.contains_key("/api/worker/tasks/{assignment_id}/resume"));
        assert!(paths.contains_key("/api/attendance/validate-geofence"));
        assert!(paths.contains_key("/api/supervisor/active-tasks/{project_id}"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
