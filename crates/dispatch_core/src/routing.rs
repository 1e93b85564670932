//! Pluggable route providers: trait abstraction for routing backends.
//!
//! Two implementations, selectable via [`RouteProviderKind`]:
//!
//! - **`HaversineRouteProvider`**: straight-line estimate at city speed.
//!   Zero dependencies; the default and the fallback.
//! - **`GoogleRouteProvider`** (feature `google`): Google Directions API.
//!
//! Providers return `Option` on failure; the tracking loop maps `None` to
//! `RouteUnavailable` without touching ride state. [`CachedRouteProvider`]
//! wraps any provider with an LRU cache to bound external calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// Average city driving speed used for duration estimates (km/h).
const ESTIMATE_SPEED_KMH: f64 = 40.0;

/// Result of a route query between two coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Lat/lng waypoints along the road. Two points (origin, destination)
    /// for the straight-line provider.
    pub polyline: Vec<Coordinate>,
    /// Road-network distance in kilometres.
    pub distance_km: f64,
    /// Travel time in seconds.
    pub duration_secs: f64,
    /// Human-readable duration for display (e.g. `"12 mins"`).
    pub duration_text: String,
}

impl RoutePlan {
    pub fn eta(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }
}

/// Which routing backend to use. Serializable so deployments can pick the
/// backend from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum RouteProviderKind {
    /// Straight-line estimate, zero external dependencies.
    #[default]
    Haversine,
    /// Google Directions API.
    #[cfg(feature = "google")]
    Google { api_key: String },
}

/// Trait for routing backends. Implementations must be `Send + Sync` so
/// the provider can be shared across request threads.
pub trait RouteProvider: Send + Sync {
    /// Compute a route between two coordinates. `None` when the backend
    /// cannot produce one.
    fn route(&self, origin: Coordinate, destination: Coordinate) -> Option<RoutePlan>;
}

/// Render seconds the way navigation UIs do: `"1 hour 5 mins"`.
pub fn format_duration_text(duration_secs: f64) -> String {
    let total_mins = (duration_secs / 60.0).round().max(0.0) as u64;
    let hours = total_mins / 60;
    let mins = total_mins % 60;
    match (hours, mins) {
        (0, 1) => "1 min".to_string(),
        (0, m) => format!("{m} mins"),
        (1, 0) => "1 hour".to_string(),
        (h, 0) => format!("{h} hours"),
        (1, m) => format!("1 hour {m} mins"),
        (h, m) => format!("{h} hours {m} mins"),
    }
}

// ---------------------------------------------------------------------------
// Haversine provider (always available)
// ---------------------------------------------------------------------------

/// Straight-line route with a duration estimate at city speed.
pub struct HaversineRouteProvider;

impl RouteProvider for HaversineRouteProvider {
    fn route(&self, origin: Coordinate, destination: Coordinate) -> Option<RoutePlan> {
        let distance_km = origin.distance_km(&destination);
        let duration_secs = if distance_km > 0.0 {
            (distance_km / ESTIMATE_SPEED_KMH) * 3600.0
        } else {
            0.0
        };
        Some(RoutePlan {
            polyline: vec![origin, destination],
            distance_km,
            duration_secs,
            duration_text: format_duration_text(duration_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Google Directions provider (behind `google` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "google")]
pub mod google {
    use super::*;
    use reqwest::blocking::Client;
    use serde::Deserialize;
    use std::time::Duration;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

    /// Routes via the Google Directions API.
    pub struct GoogleRouteProvider {
        client: Client,
        api_key: String,
    }

    impl GoogleRouteProvider {
        pub fn new(api_key: &str) -> Self {
            let client = Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build directions HTTP client");
            Self {
                client,
                api_key: api_key.to_string(),
            }
        }
    }

    /// Minimal Directions API response structures.
    #[derive(Deserialize)]
    struct DirectionsResponse {
        status: String,
        routes: Vec<DirectionsRoute>,
    }

    #[derive(Deserialize)]
    struct DirectionsRoute {
        legs: Vec<DirectionsLeg>,
        overview_polyline: OverviewPolyline,
    }

    #[derive(Deserialize)]
    struct DirectionsLeg {
        distance: ValueText,
        duration: ValueText,
    }

    #[derive(Deserialize)]
    struct ValueText {
        value: f64,
        text: String,
    }

    #[derive(Deserialize)]
    struct OverviewPolyline {
        points: String,
    }

    /// Decode an encoded polyline string into coordinates.
    fn decode_polyline(encoded: &str) -> Vec<Coordinate> {
        let mut coords = Vec::new();
        let mut chars = encoded.bytes();
        let (mut lat, mut lng) = (0i64, 0i64);

        let mut next_value = |chars: &mut std::str::Bytes<'_>| -> Option<i64> {
            let mut result: i64 = 0;
            let mut shift = 0u32;
            loop {
                let byte = chars.next()? as i64 - 63;
                result |= (byte & 0x1f) << shift;
                shift += 5;
                if byte < 0x20 {
                    break;
                }
            }
            Some(if result & 1 != 0 {
                !(result >> 1)
            } else {
                result >> 1
            })
        };

        while let (Some(dlat), Some(dlng)) = (next_value(&mut chars), next_value(&mut chars)) {
            lat += dlat;
            lng += dlng;
            coords.push(Coordinate::new(lat as f64 * 1e-5, lng as f64 * 1e-5));
        }
        coords
    }

    impl RouteProvider for GoogleRouteProvider {
        fn route(&self, origin: Coordinate, destination: Coordinate) -> Option<RoutePlan> {
            let response = self
                .client
                .get(DIRECTIONS_URL)
                .query(&[
                    ("origin", origin.to_string()),
                    ("destination", destination.to_string()),
                    ("mode", "driving".to_string()),
                    ("key", self.api_key.clone()),
                ])
                .send();

            let parsed: DirectionsResponse = match response {
                Ok(r) => match r.json() {
                    Ok(j) => j,
                    Err(err) => {
                        tracing::warn!(error = %err, "directions response parse failed");
                        return None;
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "directions request failed");
                    return None;
                }
            };

            if parsed.status != "OK" {
                tracing::warn!(status = %parsed.status, "directions API returned non-OK status");
                return None;
            }

            let route = parsed.routes.into_iter().next()?;
            let leg = route.legs.into_iter().next()?;

            Some(RoutePlan {
                polyline: decode_polyline(&route.overview_polyline.points),
                distance_km: leg.distance.value / 1000.0,
                duration_secs: leg.duration.value,
                duration_text: leg.duration.text,
            })
        }
    }

}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default route cache capacity.
const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 20_000;

/// Quantize a coordinate to ~1m so it can key the cache.
fn cache_key(coord: Coordinate) -> (i64, i64) {
    ((coord.lat * 1e5).round() as i64, (coord.lng * 1e5).round() as i64)
}

/// LRU-cached wrapper around any [`RouteProvider`].
///
/// Cache key is the quantized (origin, destination) pair (directional).
/// On cache miss the inner provider is queried; on inner failure the
/// optional haversine fallback is tried before returning `None`.
pub struct CachedRouteProvider {
    inner: Box<dyn RouteProvider>,
    cache: Mutex<LruCache<((i64, i64), (i64, i64)), RoutePlan>>,
    fallback_to_haversine: bool,
}

impl CachedRouteProvider {
    pub fn new(inner: Box<dyn RouteProvider>, capacity: usize, fallback_to_haversine: bool) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("cache capacity must be > 0"),
            )),
            fallback_to_haversine,
        }
    }
}

impl RouteProvider for CachedRouteProvider {
    fn route(&self, origin: Coordinate, destination: Coordinate) -> Option<RoutePlan> {
        let key = (cache_key(origin), cache_key(destination));

        // Fast path: cache hit
        {
            let mut cache = self.cache.lock().ok()?;
            if let Some(cached) = cache.get(&key) {
                return Some(cached.clone());
            }
        }

        // Slow path: query inner provider
        let result = self.inner.route(origin, destination).or_else(|| {
            if self.fallback_to_haversine {
                HaversineRouteProvider.route(origin, destination)
            } else {
                None
            }
        });

        // Store in cache
        if let Some(ref plan) = result {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(key, plan.clone());
            }
        }

        result
    }
}

// ---------------------------------------------------------------------------
// Factory: build a provider from RouteProviderKind
// ---------------------------------------------------------------------------

/// Construct a boxed [`RouteProvider`] from a [`RouteProviderKind`]
/// descriptor. External backends are wrapped in a cache with haversine
/// fallback on failure.
pub fn build_route_provider(kind: &RouteProviderKind) -> Box<dyn RouteProvider> {
    match kind {
        RouteProviderKind::Haversine => Box::new(HaversineRouteProvider),

        #[cfg(feature = "google")]
        RouteProviderKind::Google { api_key } => {
            let inner = Box::new(google::GoogleRouteProvider::new(api_key));
            Box::new(CachedRouteProvider::new(
                inner,
                DEFAULT_ROUTE_CACHE_CAPACITY,
                true,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn haversine_provider_estimates_duration() {
        let a = Coordinate::new(25.078, -77.338);
        let b = Coordinate::new(25.072, -77.407);
        let plan = HaversineRouteProvider.route(a, b).expect("route");
        assert_eq!(plan.polyline, vec![a, b]);
        assert!(plan.distance_km > 0.0);
        // 40 km/h estimate: duration consistent with distance
        let expected = (plan.distance_km / 40.0) * 3600.0;
        assert!((plan.duration_secs - expected).abs() < 1e-9);
        assert!(!plan.duration_text.is_empty());
    }

    #[test]
    fn duration_text_formats_hours_and_minutes() {
        assert_eq!(format_duration_text(45.0), "1 min");
        assert_eq!(format_duration_text(12.0 * 60.0), "12 mins");
        assert_eq!(format_duration_text(3600.0), "1 hour");
        assert_eq!(format_duration_text(3900.0), "1 hour 5 mins");
        assert_eq!(format_duration_text(2.0 * 3600.0), "2 hours");
    }

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl RouteProvider for CountingProvider {
        fn route(&self, origin: Coordinate, destination: Coordinate) -> Option<RoutePlan> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                None
            } else {
                HaversineRouteProvider.route(origin, destination)
            }
        }
    }

    #[test]
    fn cached_provider_queries_inner_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Box::new(CountingProvider {
            calls: Arc::clone(&calls),
            fail: false,
        });
        let cached = CachedRouteProvider::new(inner, 16, false);

        let a = Coordinate::new(25.078, -77.338);
        let b = Coordinate::new(25.072, -77.407);
        assert!(cached.route(a, b).is_some());
        assert!(cached.route(a, b).is_some());

        // One miss, one hit.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cached_provider_falls_back_on_inner_failure() {
        let inner = Box::new(CountingProvider {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
        });
        let cached = CachedRouteProvider::new(inner, 16, true);
        let a = Coordinate::new(25.078, -77.338);
        let b = Coordinate::new(25.072, -77.407);
        let plan = cached.route(a, b).expect("fallback route");
        assert!(plan.distance_km > 0.0);
    }
}
