//! Circular site geofence checks.
//!
//! Distances are great-circle (haversine) distances in metres on a sphere of
//! radius [`EARTH_RADIUS_M`]. A point is inside a project geofence when
//! `distance <= radius + allowed_variance`.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Display, PartialEq)]
pub enum GeofenceError {
    #[display(fmt = "latitude must be between -90 and 90, got {}", _0)]
    InvalidLatitude(f64),
    #[display(fmt = "longitude must be between -180 and 180, got {}", _0)]
    InvalidLongitude(f64),
    #[display(fmt = "geofence radius must be positive, got {}", _0)]
    InvalidRadius(f64),
    #[display(fmt = "allowed variance must not be negative, got {}", _0)]
    InvalidVariance(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    #[schema(example = 23.8103)]
    pub latitude: f64,
    #[schema(example = 90.4125)]
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeofenceError> {
        let c = Coordinate { latitude, longitude };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), GeofenceError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(GeofenceError::InvalidLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(GeofenceError::InvalidLongitude(self.longitude));
        }
        Ok(())
    }
}

/// Great-circle distance between two coordinates in metres.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // clamp guards against h drifting past 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Geofence {
    pub center: Coordinate,
    /// Metres
    #[schema(example = 100.0)]
    pub radius: f64,
    /// When false, actions outside the fence are allowed but flagged.
    #[schema(example = true)]
    pub strict_mode: bool,
    /// Extra metres tolerated on top of `radius` (GPS drift)
    #[serde(default)]
    #[schema(example = 20.0)]
    pub allowed_variance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct GeofenceCheck {
    pub inside: bool,
    /// Metres from the project center, rounded to centimetres
    pub distance: f64,
    /// `radius + allowed_variance`
    pub allowed_radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GeofenceValidation {
    pub inside_geofence: bool,
    pub can_proceed: bool,
    pub strict_mode: bool,
    pub distance: f64,
    pub allowed_radius: f64,
    pub message: String,
}

impl Geofence {
    pub fn validate(&self) -> Result<(), GeofenceError> {
        self.center.validate()?;
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(GeofenceError::InvalidRadius(self.radius));
        }
        if !self.allowed_variance.is_finite() || self.allowed_variance < 0.0 {
            return Err(GeofenceError::InvalidVariance(self.allowed_variance));
        }
        Ok(())
    }

    pub fn allowed_radius(&self) -> f64 {
        self.radius + self.allowed_variance
    }

    pub fn contains(&self, point: Coordinate) -> GeofenceCheck {
        let distance = haversine_distance(self.center, point);
        let allowed_radius = self.allowed_radius();

        GeofenceCheck {
            inside: distance <= allowed_radius,
            distance: (distance * 100.0).round() / 100.0,
            allowed_radius,
        }
    }

    /// Classify `point` for an attendance or task action.
    pub fn check_point(&self, point: Coordinate) -> Result<GeofenceValidation, GeofenceError> {
        point.validate()?;
        let check = self.contains(point);

        let can_proceed = check.inside || !self.strict_mode;
        let message = if check.inside {
            "Location is within the project site".to_string()
        } else if can_proceed {
            format!(
                "Location is {:.1} m from the project site (allowed {:.1} m); recorded as outside",
                check.distance, check.allowed_radius
            )
        } else {
            format!(
                "Location is {:.1} m from the project site (allowed {:.1} m)",
                check.distance, check.allowed_radius
            )
        };

        Ok(GeofenceValidation {
            inside_geofence: check.inside,
            can_proceed,
            strict_mode: self.strict_mode,
            distance: check.distance,
            allowed_radius: check.allowed_radius,
            message,
        })
    }
}
