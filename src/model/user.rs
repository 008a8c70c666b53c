use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Debug, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password: String,
    pub role_id: u8,
    pub employee_id: Option<u64>,
    pub is_active: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "ravi.k")]
    pub username: String,
    #[schema(example = "correct horse battery staple")]
    pub password: String,
    /// 1 admin, 2 supervisor, 3 worker, 4 driver
    #[schema(example = 3)]
    pub role_id: u8,
    #[schema(example = 1, nullable = true)]
    pub employee_id: Option<u64>,
}
