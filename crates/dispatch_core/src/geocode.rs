//! Address resolution: free text in, coordinates out.
//!
//! [`Geocoder`] is the external-capability seam; [`GeoResolver`] wraps it
//! with the engine's rules: already-resolved coordinates pass through
//! unchanged, forward failures surface as `ResolutionFailed` (never a
//! default coordinate), reverse failures degrade to a sentinel string.
//!
//! The Google Maps client lives behind the `google` feature, keeping
//! `reqwest` optional.

use crate::error::DispatchError;
use crate::geo::{Coordinate, Location};

/// Returned by [`GeoResolver::reverse_resolve`] when the provider cannot
/// name the coordinate. Display-only; never written back to a ride.
pub const ADDRESS_NOT_FOUND: &str = "address not found";

/// External geocoding capability. Implementations must be `Send + Sync`
/// so the resolver can be shared across request threads.
pub trait Geocoder: Send + Sync {
    /// Resolve address text to a coordinate. `None` on provider error or
    /// an empty result set.
    fn forward_geocode(&self, address: &str) -> Option<Coordinate>;

    /// Best-effort human-readable address for a coordinate.
    fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String>;
}

/// Resolver used by dispatch and lifecycle for pickup/dropoff fields.
pub struct GeoResolver {
    geocoder: Box<dyn Geocoder>,
}

impl GeoResolver {
    pub fn new(geocoder: Box<dyn Geocoder>) -> Self {
        Self { geocoder }
    }

    /// Resolve a location to a coordinate.
    ///
    /// Idempotent for already-resolved input: the coordinate is returned
    /// unchanged without touching the provider. Textual input that fails
    /// to geocode yields `ResolutionFailed`; callers must leave the raw
    /// text in place rather than substituting a default.
    pub fn resolve(&self, location: &Location) -> Result<Coordinate, DispatchError> {
        match location {
            Location::Resolved(coordinate) => Ok(*coordinate),
            Location::Text(address) => self
                .geocoder
                .forward_geocode(address)
                .ok_or_else(|| DispatchError::ResolutionFailed(address.clone())),
        }
    }

    /// Human-readable address for display. Never fails: provider errors
    /// collapse to the [`ADDRESS_NOT_FOUND`] sentinel.
    pub fn reverse_resolve(&self, coordinate: Coordinate) -> String {
        match self.geocoder.reverse_geocode(coordinate) {
            Some(address) => address,
            None => {
                tracing::debug!(%coordinate, "reverse geocode failed, using sentinel");
                ADDRESS_NOT_FOUND.to_string()
            }
        }
    }
}

#[cfg(feature = "google")]
pub mod google {
    //! Google Geocoding API client (blocking, bounded timeout).

    use std::time::Duration;

    use reqwest::blocking::Client;
    use serde::Deserialize;

    use super::Geocoder;
    use crate::geo::Coordinate;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
    const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

    pub struct GoogleGeocoder {
        client: Client,
        api_key: String,
    }

    impl GoogleGeocoder {
        pub fn new(api_key: &str) -> Self {
            let client = Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build geocoding HTTP client");
            Self {
                client,
                api_key: api_key.to_string(),
            }
        }

        fn query(&self, params: &[(&str, &str)]) -> Option<GeocodeResponse> {
            let mut request = self.client.get(GEOCODE_URL).query(&[("key", &self.api_key)]);
            for (name, value) in params {
                request = request.query(&[(name, value)]);
            }
            let response = match request.send() {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "geocoding request failed");
                    return None;
                }
            };
            match response.json::<GeocodeResponse>() {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    tracing::warn!(error = %err, "geocoding response parse failed");
                    None
                }
            }
        }
    }

    /// Minimal Geocoding API response structures.
    #[derive(Deserialize)]
    struct GeocodeResponse {
        status: String,
        results: Vec<GeocodeResult>,
    }

    #[derive(Deserialize)]
    struct GeocodeResult {
        formatted_address: String,
        geometry: Geometry,
    }

    #[derive(Deserialize)]
    struct Geometry {
        location: LatLngJson,
    }

    #[derive(Deserialize)]
    struct LatLngJson {
        lat: f64,
        lng: f64,
    }

    impl Geocoder for GoogleGeocoder {
        fn forward_geocode(&self, address: &str) -> Option<Coordinate> {
            let response = self.query(&[("address", address)])?;
            if response.status != "OK" {
                return None;
            }
            let result = response.results.into_iter().next()?;
            Some(Coordinate::new(
                result.geometry.location.lat,
                result.geometry.location.lng,
            ))
        }

        fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String> {
            let latlng = format!("{:.6},{:.6}", coordinate.lat, coordinate.lng);
            let response = self.query(&[("latlng", latlng.as_str())])?;
            if response.status != "OK" {
                return None;
            }
            response
                .results
                .into_iter()
                .next()
                .map(|result| result.formatted_address)
        }
    }
}
