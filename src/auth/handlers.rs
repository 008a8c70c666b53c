use crate::{
    auth::{
        auth::{AuthUser, bearer_token},
        jwt::{Subject, generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    db::is_duplicate_key,
    error::ApiError,
    model::{
        role::Role,
        user::{CreateUser, User},
    },
    models::{LoginReqDto, TokenPair, TokenType},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde_json::json;
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{debug, error, info, instrument};

fn token_error(e: jsonwebtoken::errors::Error) -> ApiError {
    error!(error = %e, "Failed to sign token");
    ApiError::Internal
}

/// Issue a fresh access/refresh pair and persist the refresh jti.
async fn issue_pair(
    tx: &mut Transaction<'_, MySql>,
    subject: &Subject,
    config: &Config,
) -> Result<TokenPair, ApiError> {
    let access_token =
        generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)
            .map_err(token_error)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl)
            .map_err(token_error)?;

    debug!(user_id = subject.user_id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(subject.user_id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(&mut **tx)
    .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Login and receive an access/refresh token pair
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Logged in", body = TokenPair),
        (status = 400, description = "Username or password missing"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        return Err(ApiError::bad_request("Username or password required"));
    }

    let db_user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, role_id, employee_id, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(user.username.trim())
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(db_user) = db_user.filter(|u| u.is_active) else {
        info!("Invalid credentials: user not found or inactive");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let subject = Subject {
        user_id: db_user.id,
        username: db_user.username,
        role: db_user.role_id,
        employee_id: db_user.employee_id,
    };

    let mut tx = pool.begin().await?;
    let pair = issue_pair(&mut tx, &subject, &config).await?;

    // last_login_at is informational; a failure here must not block login
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = UTC_TIMESTAMP() WHERE id = ?")
        .bind(subject.user_id)
        .execute(&mut *tx)
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }
    tx.commit().await?;

    info!(user_id = subject.user_id, "Login successful");
    Ok(HttpResponse::Ok().json(pair))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair; the old refresh token is revoked", body = TokenPair),
        (status = 401, description = "Missing, invalid or revoked refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let unauthorized = || ApiError::Unauthorized("Invalid refresh token".into());

    let token = bearer_token(&req).ok_or_else(unauthorized)?;
    let claims = verify_token(token, &config.jwt_secret).map_err(|_| unauthorized())?;
    if claims.token_type != TokenType::Refresh {
        return Err(unauthorized());
    }

    let mut tx = pool.begin().await?;

    // the row lock serializes concurrent rotations of the same token
    let record = sqlx::query_as::<_, (u64, bool)>(
        "SELECT id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE",
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let record_id = match record {
        Some((id, false)) => id,
        _ => return Err(unauthorized()),
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    let pair = issue_pair(&mut tx, &Subject::from(&claims), &config).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(pair))
}

/// Revoke a refresh token. Always answers 204.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let claims = bearer_token(&req).and_then(|t| verify_token(t, &config.jwt_secret).ok());

    // only refresh tokens can logout
    if let Some(claims) = claims.filter(|c| c.token_type == TokenType::Refresh) {
        if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
            .bind(&claims.jti)
            .execute(pool.get_ref())
            .await
        {
            error!(error = %e, "Failed to revoke refresh token");
        }
    }

    HttpResponse::NoContent().finish()
}

/// Create a login (admin only)
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = Object, example = json!({
            "message": "User created", "id": 12
        })),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Username already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let username = payload.username.trim().to_lowercase();
    if username.is_empty() || payload.password.len() < 8 {
        return Err(ApiError::bad_request(
            "Username is required and password must be at least 8 characters",
        ));
    }
    let role = Role::from_id(payload.role_id)
        .ok_or_else(|| ApiError::bad_request("Unknown role_id"))?;
    if role.is_field_staff() && payload.employee_id.is_none() {
        return Err(ApiError::bad_request("Field staff logins need an employee_id"));
    }

    let hashed = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::Internal
    })?;

    let result = sqlx::query(
        "INSERT INTO users (username, password, role_id, employee_id) VALUES (?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(hashed)
    .bind(role.id())
    .bind(payload.employee_id)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(done) => {
            info!(username = %username, role = %role, "User created");
            Ok(HttpResponse::Created().json(json!({
                "message": "User created",
                "id": done.last_insert_id()
            })))
        }
        Err(e) if is_duplicate_key(&e) => Err(ApiError::conflict("Username already exists")),
        Err(e) => Err(e.into()),
    }
}
