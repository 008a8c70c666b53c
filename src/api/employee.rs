use crate::{
    auth::auth::AuthUser,
    db::is_duplicate_key,
    error::ApiError,
    model::employee::Employee,
    utils::db_utils::{build_update_sql, execute_update},
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

const UPDATABLE_COLUMNS: &[&str] = &["employee_code", "full_name", "trade", "status"];

#[derive(Deserialize, Serialize, ToSchema)]
pub struct CreateEmployee {
    #[schema(example = "W-0042")]
    pub employee_code: String,
    #[schema(example = "Ravi Kumar")]
    pub full_name: String,
    #[schema(example = "mason", nullable = true)]
    pub trade: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<String>,
    /// Matches name or employee code
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct EmployeeListResponse {
    pub data: Vec<Employee>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 57)]
    pub total: i64,
}

pub(crate) async fn require_employee(pool: &MySqlPool, employee_id: u64) -> Result<(), ApiError> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT EXISTS(SELECT 1 FROM employees WHERE id = ?)")
        .bind(employee_id)
        .fetch_one(pool)
        .await?;

    if exists != 0 {
        Ok(())
    } else {
        Err(ApiError::not_found("Employee not found"))
    }
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Object, example = json!({
            "message": "Employee created", "id": 42
        })),
        (status = 403, description = "Supervisor/Admin only"),
        (status = 409, description = "Employee code already exists")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> Result<HttpResponse, ApiError> {
    auth.require_supervisor_or_admin()?;

    if payload.employee_code.trim().is_empty() || payload.full_name.trim().is_empty() {
        return Err(ApiError::bad_request("employee_code and full_name are required"));
    }

    let result = sqlx::query(
        "INSERT INTO employees (employee_code, full_name, trade) VALUES (?, ?, ?)",
    )
    .bind(payload.employee_code.trim())
    .bind(payload.full_name.trim())
    .bind(payload.trade.as_deref())
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(done) => {
            info!(employee_id = done.last_insert_id(), "Employee created");
            Ok(HttpResponse::Created().json(json!({
                "message": "Employee created",
                "id": done.last_insert_id()
            })))
        }
        Err(e) if is_duplicate_key(&e) => Err(ApiError::conflict("Employee code already exists")),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee list", body = EmployeeListResponse)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.require_supervisor_or_admin()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    // ---------- build WHERE clause dynamically ----------
    let mut conditions = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(status) = &query.status {
        conditions.push("status = ?");
        bindings.push(status.clone());
    }

    if let Some(search) = &query.search {
        conditions.push("(full_name LIKE ? OR employee_code LIKE ?)");
        let like = format!("%{}%", search);
        bindings.push(like.clone());
        bindings.push(like);
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM employees {}", where_clause);
    debug!(sql = %count_sql, bindings = ?bindings, "Counting employees");

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for b in &bindings {
        count_query = count_query.bind(b);
    }
    let total = count_query.fetch_one(pool.get_ref()).await?;

    let data_sql = format!(
        "SELECT id, employee_code, full_name, trade, status FROM employees {} \
         ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut data_query = sqlx::query_as::<_, Employee>(&data_sql);
    for b in &bindings {
        data_query = data_query.bind(b);
    }
    let employees = data_query
        .bind(per_page as i64)
        .bind(offset as i64)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(EmployeeListResponse {
        data: employees,
        page,
        per_page,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    let employee_id = path.into_inner();
    // field staff may read their own profile
    if auth.employee_id != Some(employee_id) {
        auth.require_supervisor_or_admin()?;
    }

    let employee = sqlx::query_as::<_, Employee>(
        "SELECT id, employee_code, full_name, trade, status FROM employees WHERE id = ?",
    )
    .bind(employee_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("Employee not found"))?;

    Ok(HttpResponse::Ok().json(employee))
}

/// Partially update an employee; only `employee_code`, `full_name`, `trade`
/// and `status` may be sent
#[utoipa::path(
    put,
    path = "/api/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    request_body(content = Object, example = json!({"trade": "carpenter", "status": "inactive"})),
    responses(
        (status = 200, description = "Employee updated"),
        (status = 400, description = "Unknown or invalid fields"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    auth.require_supervisor_or_admin()?;
    let employee_id = path.into_inner();

    let update = build_update_sql("employees", &payload, UPDATABLE_COLUMNS, "id", employee_id)?;
    let affected = match execute_update(pool.get_ref(), update).await {
        Ok(n) => n,
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::conflict("Employee code already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    if affected == 0 {
        // MySQL reports 0 for unchanged rows too; distinguish missing rows
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM employees WHERE id = ?")
            .bind(employee_id)
            .fetch_one(pool.get_ref())
            .await?;
        if exists == 0 {
            return Err(ApiError::not_found("Employee not found"));
        }
    }

    info!(employee_id, "Employee updated");
    Ok(HttpResponse::Ok().json(json!({ "message": "Employee updated" })))
}
