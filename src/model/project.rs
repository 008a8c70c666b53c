use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::utils::geofence::{Coordinate, Geofence};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: u64,
    pub name: String,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_m: f64,
    pub allowed_variance_m: f64,
    pub strict_mode: bool,
}

pub const PROJECT_COLUMNS: &str =
    "id, name, center_latitude, center_longitude, radius_m, allowed_variance_m, strict_mode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 7,
    "name": "Harbour Tower Block B",
    "geofence": {
        "center": { "latitude": 1.2834, "longitude": 103.8607 },
        "radius": 150.0,
        "strict_mode": true,
        "allowed_variance": 20.0
    }
}))]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub geofence: Geofence,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            geofence: Geofence {
                center: Coordinate {
                    latitude: row.center_latitude,
                    longitude: row.center_longitude,
                },
                radius: row.radius_m,
                strict_mode: row.strict_mode,
                allowed_variance: row.allowed_variance_m,
            },
        }
    }
}
