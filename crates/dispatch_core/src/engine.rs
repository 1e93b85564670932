//! Engine facade: wires the components together and exposes the outward
//! API consumed by the UI/API layer.
//!
//! Construction injects every external capability (store, clock,
//! geocoder, route provider, notification gateway), so deployments and
//! tests differ only in what they pass in.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::DispatchError;
use crate::geo::Coordinate;
use crate::geocode::{GeoResolver, Geocoder};
use crate::lifecycle::LifecycleController;
use crate::matching::{DispatchMatcher, UnclaimedRide};
use crate::notify::NotificationGateway;
use crate::ride::{CancelActor, DriverId, DriverProfile, Ride, RideId};
use crate::routing::RouteProvider;
use crate::routing::RoutePlan;
use crate::store::RideStore;
use crate::telemetry::{DispatchTelemetry, TelemetrySnapshot};
use crate::tracking::{TrackPoint, TrackingLoop};
use crate::wait::{WaitStatus, WaitTimer};

/// Engine-level settings with no behavioral surprises in the defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Base URL for the ride-details link embedded in the passenger
    /// confirmation message; omitted when `None`.
    pub details_base_url: Option<String>,
}

/// The ride dispatch and lifecycle engine.
pub struct DispatchEngine {
    store: Arc<dyn RideStore>,
    resolver: Arc<GeoResolver>,
    telemetry: Arc<DispatchTelemetry>,
    matcher: DispatchMatcher,
    lifecycle: LifecycleController,
    wait: Arc<WaitTimer>,
    tracking: Arc<TrackingLoop>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn RideStore>,
        clock: SharedClock,
        geocoder: Box<dyn Geocoder>,
        route_provider: Arc<dyn RouteProvider>,
        gateway: Arc<dyn NotificationGateway>,
        config: EngineConfig,
    ) -> Self {
        let telemetry = Arc::new(DispatchTelemetry::default());
        let resolver = Arc::new(GeoResolver::new(geocoder));

        let tracking = Arc::new(TrackingLoop::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            route_provider,
            Arc::clone(&telemetry),
        ));
        let wait = Arc::new(WaitTimer::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&gateway),
            Arc::clone(&telemetry),
        ));
        let matcher = DispatchMatcher::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&resolver),
            Arc::clone(&gateway),
            Arc::clone(&telemetry),
            config.details_base_url,
        );
        let lifecycle = LifecycleController::new(
            Arc::clone(&store),
            clock,
            Arc::clone(&resolver),
            Arc::clone(&tracking),
            Arc::clone(&wait),
            gateway,
            Arc::clone(&telemetry),
        );

        Self {
            store,
            resolver,
            telemetry,
            matcher,
            lifecycle,
            wait,
            tracking,
        }
    }

    // -- ride intake -------------------------------------------------------

    /// Register a ride created by the surrounding application. Id
    /// allocation belongs to the caller.
    pub fn submit_ride(&self, ride: Ride) {
        self.store.insert(ride);
    }

    pub fn ride(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        self.store
            .get(ride_id)
            .ok_or(DispatchError::NotFound(ride_id))
    }

    // -- dispatch ----------------------------------------------------------

    pub fn list_unclaimed(&self) -> Vec<UnclaimedRide> {
        self.matcher.list_unclaimed()
    }

    pub fn claim(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        driver_profile: Option<&DriverProfile>,
    ) -> Result<Ride, DispatchError> {
        self.matcher.claim(ride_id, driver_id, driver_profile)
    }

    // -- lifecycle ---------------------------------------------------------

    pub fn mark_picked_up(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        self.lifecycle.mark_picked_up(ride_id)
    }

    pub fn mark_completed(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        self.lifecycle.mark_completed(ride_id)
    }

    pub fn cancel(&self, ride_id: RideId, actor: CancelActor) -> Result<Ride, DispatchError> {
        self.lifecycle.cancel(ride_id, actor)
    }

    // -- tracking ----------------------------------------------------------

    pub fn update_position(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        location: Coordinate,
    ) -> Result<(), DispatchError> {
        self.tracking.update_position(ride_id, driver_id, location)
    }

    pub fn current_route(&self, ride_id: RideId) -> Result<RoutePlan, DispatchError> {
        self.tracking.current_route(ride_id)
    }

    pub fn track_point(&self, ride_id: RideId) -> Option<TrackPoint> {
        self.tracking.track_point(ride_id)
    }

    // -- waiting -----------------------------------------------------------

    pub fn start_wait(&self, ride_id: RideId) -> Result<WaitStatus, DispatchError> {
        self.wait.start(ride_id)
    }

    pub fn stop_wait(&self, ride_id: RideId) -> Result<WaitStatus, DispatchError> {
        self.wait.stop(ride_id)
    }

    pub fn current_charge(&self, ride_id: RideId) -> Result<u64, DispatchError> {
        self.wait.current_charge(ride_id)
    }

    // -- support -----------------------------------------------------------

    pub fn resolver(&self) -> &GeoResolver {
        &self.resolver
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}
