use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "employee_code": "W-0042",
        "full_name": "Ravi Kumar",
        "trade": "mason",
        "status": "active"
    })
)]
pub struct Employee {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = "W-0042")]
    pub employee_code: String,

    #[schema(example = "Ravi Kumar")]
    pub full_name: String,

    #[schema(example = "mason", nullable = true)]
    pub trade: Option<String>,

    #[schema(example = "active")]
    pub status: String,
}
