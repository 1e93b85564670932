//! Lifecycle controller: advances a ride through its state machine.
//!
//! Every transition is one conditional update against the store, so the
//! legality check, the status change and the timestamp stamp commit as a
//! unit. Cancel-vs-advance races resolve by whichever update lands first;
//! the loser observes `InvalidTransition` and treats it as a no-op.
//!
//! Geocoding happens before the update with no lock held; notification
//! and session cleanup happen after it and never roll it back.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::DispatchError;
use crate::geo::{Coordinate, Location};
use crate::geocode::GeoResolver;
use crate::notify::{cancellation_message, notify_best_effort, NotificationGateway};
use crate::ride::{CancelActor, LifecycleAction, Ride, RideId, RideStatus};
use crate::store::{RideStore, UpdateOutcome};
use crate::telemetry::DispatchTelemetry;
use crate::tracking::TrackingLoop;
use crate::wait::WaitTimer;

pub struct LifecycleController {
    store: Arc<dyn RideStore>,
    clock: SharedClock,
    resolver: Arc<GeoResolver>,
    tracking: Arc<TrackingLoop>,
    wait: Arc<WaitTimer>,
    gateway: Arc<dyn NotificationGateway>,
    telemetry: Arc<DispatchTelemetry>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn RideStore>,
        clock: SharedClock,
        resolver: Arc<GeoResolver>,
        tracking: Arc<TrackingLoop>,
        wait: Arc<WaitTimer>,
        gateway: Arc<dyn NotificationGateway>,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            store,
            clock,
            resolver,
            tracking,
            wait,
            gateway,
            telemetry,
        }
    }

    fn transition_error(ride: &Ride, action: LifecycleAction) -> DispatchError {
        DispatchError::InvalidTransition {
            from: ride.status,
            action,
        }
    }

    /// Driver confirms the passenger is on board: Accepted → InProgress.
    ///
    /// Stamps `pickup_time`, resolves the dropoff address to a coordinate
    /// if it is still text, and atomically switches the tracking leg so a
    /// position update mid-transition routes against exactly one leg.
    /// A dropoff that cannot be geocoded keeps its raw text; the ride
    /// proceeds and routing reports `Unavailable` until resolution
    /// succeeds on a later attempt.
    pub fn mark_picked_up(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        let ride = self
            .store
            .get(ride_id)
            .ok_or(DispatchError::NotFound(ride_id))?;
        if ride.status.next_for(LifecycleAction::PickUp).is_none() {
            return Err(Self::transition_error(&ride, LifecycleAction::PickUp));
        }

        // Resolve before taking any lock; failure is non-blocking.
        let dropoff_coordinate: Option<Coordinate> =
            match self.resolver.resolve(&ride.dropoff_location) {
                Ok(coordinate) => Some(coordinate),
                Err(err) => {
                    tracing::warn!(ride_id, error = %err, "dropoff not resolvable at pickup");
                    None
                }
            };

        let now = self.clock.now();
        let outcome = self.store.update_if(
            ride_id,
            &|r| r.status == RideStatus::Accepted && r.driver_id.is_some(),
            &|r| {
                r.status = RideStatus::InProgress;
                r.pickup_time = Some(now);
                if let Some(coordinate) = dropoff_coordinate {
                    r.dropoff_location = Location::Resolved(coordinate);
                }
            },
        );

        match outcome {
            UpdateOutcome::Updated(ride) => {
                self.tracking.switch_to_dropoff(ride_id, dropoff_coordinate);
                tracing::info!(ride_id, "ride in progress");
                Ok(ride)
            }
            UpdateOutcome::PredicateFailed(ride) => {
                Err(Self::transition_error(&ride, LifecycleAction::PickUp))
            }
            UpdateOutcome::NotFound => Err(DispatchError::NotFound(ride_id)),
        }
    }

    /// Driver confirms dropoff: InProgress → Completed. Stamps
    /// `dropoff_time` and tears down the ride's transient sessions.
    pub fn mark_completed(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        let now = self.clock.now();
        let outcome = self.store.update_if(
            ride_id,
            &|r| r.status == RideStatus::InProgress,
            &|r| {
                r.status = RideStatus::Completed;
                r.dropoff_time = Some(now);
            },
        );

        match outcome {
            UpdateOutcome::Updated(ride) => {
                self.tracking.end_session(ride_id);
                self.wait.clear(ride_id);
                DispatchTelemetry::bump(&self.telemetry.rides_completed);
                tracing::info!(ride_id, "ride completed");
                Ok(ride)
            }
            UpdateOutcome::PredicateFailed(ride) => {
                Err(Self::transition_error(&ride, LifecycleAction::Complete))
            }
            UpdateOutcome::NotFound => Err(DispatchError::NotFound(ride_id)),
        }
    }

    /// Cancel from any non-terminal state, recording the acting party.
    /// The non-cancelling party is notified best-effort; a cancel that
    /// loses to a racing transition fails with `InvalidTransition`, which
    /// callers treat as a no-op.
    pub fn cancel(&self, ride_id: RideId, actor: CancelActor) -> Result<Ride, DispatchError> {
        let outcome = self.store.update_if(
            ride_id,
            &|r| r.status.next_for(LifecycleAction::Cancel).is_some(),
            &|r| {
                r.status = RideStatus::Cancelled;
                // Cancellation clears the binding: the ride will never be
                // served, and the driver is released.
                r.driver_id = None;
                r.cancelled_by = Some(actor);
            },
        );

        match outcome {
            UpdateOutcome::Updated(ride) => {
                self.tracking.end_session(ride_id);
                self.wait.clear(ride_id);
                DispatchTelemetry::bump(&self.telemetry.rides_cancelled);
                tracing::info!(ride_id, ?actor, "ride cancelled");
                if actor != CancelActor::Passenger {
                    notify_best_effort(
                        self.gateway.as_ref(),
                        &self.telemetry,
                        ride.passenger_contact.as_deref(),
                        &cancellation_message(actor),
                    );
                }
                Ok(ride)
            }
            UpdateOutcome::PredicateFailed(ride) => {
                Err(Self::transition_error(&ride, LifecycleAction::Cancel))
            }
            UpdateOutcome::NotFound => Err(DispatchError::NotFound(ride_id)),
        }
    }
}
