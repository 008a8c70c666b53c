pub mod db_utils;
pub mod geofence;
pub mod project_cache;
