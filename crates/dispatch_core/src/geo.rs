//! Geographic value types: coordinates, pickup/dropoff locations and
//! distance calculations.
//!
//! Locations enter the system either as free-text addresses or as a
//! `"lat,lng"` string; [`Location::parse`] accepts both and callers use
//! the `geocode` module to resolve the textual form.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres, used by the haversine formula.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Haversine great-circle distance to another coordinate, in km.
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let (lat1, lon1) = (self.lat.to_radians(), self.lng.to_radians());
        let (lat2, lon2) = (other.lat.to_radians(), other.lng.to_radians());
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let sin_dlat = (dlat * 0.5).sin();
        let sin_dlon = (dlon * 0.5).sin();
        let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
        let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
        EARTH_RADIUS_KM * c
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// A pickup or dropoff location: raw address text until resolved, a
/// coordinate pair afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Location {
    /// Free-text address, not yet geocoded.
    Text(String),
    /// Resolved coordinate pair.
    Resolved(Coordinate),
}

impl Location {
    /// Parse client input: `"lat,lng"` becomes [`Location::Resolved`],
    /// anything else is kept as address text.
    pub fn parse(input: &str) -> Self {
        if let Some(coord) = parse_coordinate_text(input) {
            Location::Resolved(coord)
        } else {
            Location::Text(input.trim().to_string())
        }
    }

    /// The resolved coordinate, if this location has one.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Location::Resolved(coord) => Some(*coord),
            Location::Text(_) => None,
        }
    }

    /// Human-readable form: the address text or the `"lat,lng"` rendering.
    pub fn display_text(&self) -> String {
        match self {
            Location::Text(text) => text.clone(),
            Location::Resolved(coord) => coord.to_string(),
        }
    }
}

/// Parse a `"lat,lng"` string into a coordinate. Returns `None` for
/// anything that is not two finite floats in valid ranges.
pub fn parse_coordinate_text(input: &str) -> Option<Coordinate> {
    let mut parts = input.split(',');
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let lng: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some(Coordinate::new(lat, lng))
}
