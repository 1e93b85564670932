//! Live position tracking and route recomputation.
//!
//! One session per active ride, owned by [`TrackingLoop`] and keyed by
//! ride id. A position update from the bound driver records the location
//! and recomputes the route to the active leg's destination: the pickup
//! coordinate while the ride is Accepted, the dropoff coordinate once it
//! is InProgress.
//!
//! Recomputation is rate-limited and sequence-numbered: every recompute
//! takes a fresh sequence number before calling the provider, and its
//! result is stored only if no newer number has been issued since. A leg
//! switch also takes a number, so an in-flight result for the old leg can
//! never land after the switch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::SharedClock;
use crate::error::DispatchError;
use crate::geo::Coordinate;
use crate::ride::{LifecycleAction, RideId, DriverId, RideStatus};
use crate::routing::{RoutePlan, RouteProvider};
use crate::store::RideStore;
use crate::telemetry::DispatchTelemetry;

/// Minimum interval between route recomputations per ride.
pub const ROUTE_RECOMPUTE_MIN_INTERVAL_SECS: i64 = 5;

/// The active navigation destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Pickup,
    Dropoff,
}

#[derive(Debug)]
struct TrackSession {
    leg: Leg,
    destination: Option<Coordinate>,
    driver_location: Option<Coordinate>,
    captured_at: Option<DateTime<Utc>>,
    route: Option<RoutePlan>,
    route_computed_at: Option<DateTime<Utc>>,
    /// Latest sequence number handed out for a recompute or leg switch.
    issued_seq: u64,
}

impl TrackSession {
    fn new(leg: Leg, destination: Option<Coordinate>) -> Self {
        Self {
            leg,
            destination,
            driver_location: None,
            captured_at: None,
            route: None,
            route_computed_at: None,
            issued_seq: 0,
        }
    }
}

/// Read-only view of a tracking session for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub driver_location: Coordinate,
    pub destination: Option<Coordinate>,
    pub leg: Leg,
    pub captured_at: DateTime<Utc>,
}

/// Consumes a driver's position stream and exposes the latest route.
pub struct TrackingLoop {
    store: Arc<dyn RideStore>,
    clock: SharedClock,
    provider: Arc<dyn RouteProvider>,
    telemetry: Arc<DispatchTelemetry>,
    sessions: Mutex<HashMap<RideId, TrackSession>>,
}

impl TrackingLoop {
    pub fn new(
        store: Arc<dyn RideStore>,
        clock: SharedClock,
        provider: Arc<dyn RouteProvider>,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            store,
            clock,
            provider,
            telemetry,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record the bound driver's position and recompute the route to the
    /// active leg, subject to the rate limit.
    ///
    /// The provider call happens with no session lock held; its result is
    /// applied only if it is still the newest issued recompute.
    pub fn update_position(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        location: Coordinate,
    ) -> Result<(), DispatchError> {
        let ride = self
            .store
            .get(ride_id)
            .ok_or(DispatchError::NotFound(ride_id))?;
        if ride.driver_id != Some(driver_id) {
            return Err(DispatchError::Unauthorized { ride_id, driver_id });
        }
        let leg = match ride.status {
            RideStatus::Accepted => Leg::Pickup,
            RideStatus::InProgress => Leg::Dropoff,
            from => {
                return Err(DispatchError::InvalidTransition {
                    from,
                    action: LifecycleAction::Track,
                })
            }
        };
        let now = self.clock.now();

        // Destination for a fresh session, resolved from the ride row
        // before any lock is taken. May be absent if geocoding has not
        // produced a coordinate for this leg yet.
        let fallback_destination = match leg {
            Leg::Pickup => ride.pickup_location.coordinate(),
            Leg::Dropoff => ride.dropoff_location.coordinate(),
        };

        // Record the position and decide whether to recompute.
        let recompute = {
            let mut sessions = self.sessions.lock().expect("track sessions lock poisoned");
            let session = sessions
                .entry(ride_id)
                .or_insert_with(|| TrackSession::new(leg, fallback_destination));
            session.driver_location = Some(location);
            session.captured_at = Some(now);
            if session.destination.is_none() {
                session.destination = fallback_destination;
            }

            let rate_limited = session.route_computed_at.is_some_and(|at| {
                now - at < Duration::seconds(ROUTE_RECOMPUTE_MIN_INTERVAL_SECS)
            });
            match session.destination {
                Some(destination) if !rate_limited => {
                    session.issued_seq += 1;
                    Some((session.issued_seq, destination))
                }
                _ => None,
            }
        };

        let Some((seq, destination)) = recompute else {
            return Ok(());
        };

        // External routing call: no lock held.
        let plan = self.provider.route(location, destination);
        DispatchTelemetry::bump(&self.telemetry.route_recomputes);

        let mut sessions = self.sessions.lock().expect("track sessions lock poisoned");
        let Some(session) = sessions.get_mut(&ride_id) else {
            return Ok(()); // session ended while we were routing
        };
        if session.issued_seq != seq {
            // A newer recompute or a leg switch superseded this result.
            DispatchTelemetry::bump(&self.telemetry.stale_route_results_discarded);
            return Ok(());
        }
        session.route = plan;
        session.route_computed_at = Some(now);
        Ok(())
    }

    /// Most recently computed route for the ride's active leg.
    pub fn current_route(&self, ride_id: RideId) -> Result<RoutePlan, DispatchError> {
        let sessions = self.sessions.lock().expect("track sessions lock poisoned");
        match sessions.get(&ride_id) {
            Some(session) => session
                .route
                .clone()
                .ok_or(DispatchError::RouteUnavailable(ride_id)),
            None => {
                drop(sessions);
                if self.store.get(ride_id).is_none() {
                    Err(DispatchError::NotFound(ride_id))
                } else {
                    Err(DispatchError::RouteUnavailable(ride_id))
                }
            }
        }
    }

    /// Latest recorded position, for observers.
    pub fn track_point(&self, ride_id: RideId) -> Option<TrackPoint> {
        let sessions = self.sessions.lock().expect("track sessions lock poisoned");
        let session = sessions.get(&ride_id)?;
        Some(TrackPoint {
            driver_location: session.driver_location?,
            destination: session.destination,
            leg: session.leg,
            captured_at: session.captured_at?,
        })
    }

    /// Atomically switch the active leg to dropoff. Called by the
    /// lifecycle controller inside `mark_picked_up`. Any in-flight
    /// pickup-leg route result is invalidated by the sequence bump.
    pub fn switch_to_dropoff(&self, ride_id: RideId, destination: Option<Coordinate>) {
        let mut sessions = self.sessions.lock().expect("track sessions lock poisoned");
        let session = sessions
            .entry(ride_id)
            .or_insert_with(|| TrackSession::new(Leg::Dropoff, destination));
        session.leg = Leg::Dropoff;
        session.destination = destination;
        session.route = None;
        session.route_computed_at = None;
        session.issued_seq += 1;
    }

    /// Drop the session when the ride reaches a terminal state.
    pub fn end_session(&self, ride_id: RideId) {
        let mut sessions = self.sessions.lock().expect("track sessions lock poisoned");
        sessions.remove(&ride_id);
    }
}
