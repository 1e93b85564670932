//! Dispatch matching: the unclaimed pool and the race-safe claim.
//!
//! Any number of drivers may poll [`DispatchMatcher::list_unclaimed`] and
//! race on [`DispatchMatcher::claim`]. The claim is a single conditional
//! update against the store, so concurrent claims on one ride commit
//! exactly once: first committer wins, with no fairness ordering among
//! simultaneous claimants. Losers are told the ride is gone and must
//! re-fetch the list rather than retry blindly.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::DispatchError;
use crate::geo::Coordinate;
use crate::geocode::GeoResolver;
use crate::notify::{confirmation_message, notify_best_effort, NotificationGateway};
use crate::ride::{DriverId, DriverProfile, LifecycleAction, Ride, RideId, RideStatus};
use crate::store::{RideStore, UpdateOutcome};
use crate::telemetry::DispatchTelemetry;

/// One entry of the unclaimed pool. The pickup coordinate is resolved
/// best-effort: rides whose pickup cannot be geocoded keep their raw text
/// and stay listed rather than being dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct UnclaimedRide {
    pub ride: Ride,
    pub pickup_coordinate: Option<Coordinate>,
}

/// Surfaces unclaimed rides to polling drivers and performs claims.
pub struct DispatchMatcher {
    store: Arc<dyn RideStore>,
    clock: SharedClock,
    resolver: Arc<GeoResolver>,
    gateway: Arc<dyn NotificationGateway>,
    telemetry: Arc<DispatchTelemetry>,
    /// Base URL for the ride-details link in the confirmation message.
    details_base_url: Option<String>,
}

impl DispatchMatcher {
    pub fn new(
        store: Arc<dyn RideStore>,
        clock: SharedClock,
        resolver: Arc<GeoResolver>,
        gateway: Arc<dyn NotificationGateway>,
        telemetry: Arc<DispatchTelemetry>,
        details_base_url: Option<String>,
    ) -> Self {
        Self {
            store,
            clock,
            resolver,
            gateway,
            telemetry,
            details_base_url,
        }
    }

    /// Promote every `Scheduled` ride whose pickup time has arrived into
    /// the unclaimed pool. Each promotion is its own conditional update,
    /// so a racing claim or cancel can never be overwritten.
    pub fn promote_due_scheduled(&self) -> usize {
        let now = self.clock.now();
        let mut promoted = 0;
        for ride in self.store.list() {
            if ride.status != RideStatus::Scheduled {
                continue;
            }
            let due = ride
                .scheduled_pickup_time
                .map(|at| at <= now)
                .unwrap_or(false);
            if !due {
                continue;
            }
            let outcome = self.store.update_if(
                ride.id,
                &|r| {
                    r.status.next_for(LifecycleAction::Promote).is_some()
                        && r.scheduled_pickup_time.is_some_and(|at| at <= now)
                },
                &|r| r.status = RideStatus::Requested,
            );
            if let UpdateOutcome::Updated(ride) = outcome {
                tracing::info!(ride_id = ride.id, "scheduled ride promoted to requested");
                DispatchTelemetry::bump(&self.telemetry.scheduled_promotions);
                promoted += 1;
            }
        }
        promoted
    }

    /// All rides currently open for claiming, with pickup coordinates
    /// resolved where possible. A lazy, restartable snapshot; staleness up
    /// to the caller's polling interval is acceptable.
    pub fn list_unclaimed(&self) -> Vec<UnclaimedRide> {
        self.promote_due_scheduled();
        self.store
            .list()
            .into_iter()
            .filter(|ride| ride.status == RideStatus::Requested)
            .map(|ride| {
                // Geocoding happens on the snapshot, outside any store
                // lock; failures leave the raw text for display.
                let pickup_coordinate = self.resolver.resolve(&ride.pickup_location).ok();
                if pickup_coordinate.is_none() {
                    tracing::debug!(
                        ride_id = ride.id,
                        pickup = %ride.pickup_location.display_text(),
                        "pickup not geocodable, listing with raw text"
                    );
                }
                UnclaimedRide {
                    ride,
                    pickup_coordinate,
                }
            })
            .collect()
    }

    /// Atomically bind `driver_id` to the ride. Succeeds only while the
    /// ride is still `Requested` with no driver; the winner's update
    /// transitions it to `Accepted` and triggers the one-time passenger
    /// confirmation. Losers get `InvalidTransition` and should refresh
    /// the unclaimed list.
    pub fn claim(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        driver_profile: Option<&DriverProfile>,
    ) -> Result<Ride, DispatchError> {
        let outcome = self.store.update_if(
            ride_id,
            &|ride| ride.status == RideStatus::Requested && ride.driver_id.is_none(),
            &|ride| {
                ride.status = RideStatus::Accepted;
                ride.driver_id = Some(driver_id);
            },
        );

        match outcome {
            UpdateOutcome::Updated(ride) => {
                tracing::info!(ride_id, driver_id, "ride claimed");
                DispatchTelemetry::bump(&self.telemetry.claims_won);
                notify_best_effort(
                    self.gateway.as_ref(),
                    &self.telemetry,
                    ride.passenger_contact.as_deref(),
                    &confirmation_message(&ride, driver_profile, self.details_base_url.as_deref()),
                );
                Ok(ride)
            }
            UpdateOutcome::PredicateFailed(ride) => {
                tracing::debug!(
                    ride_id,
                    driver_id,
                    status = ?ride.status,
                    "claim rejected, ride no longer available"
                );
                DispatchTelemetry::bump(&self.telemetry.claims_rejected);
                Err(DispatchError::InvalidTransition {
                    from: ride.status,
                    action: LifecycleAction::Claim,
                })
            }
            UpdateOutcome::NotFound => Err(DispatchError::NotFound(ride_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::geo::Location;
    use crate::store::InMemoryRideStore;
    use crate::test_helpers::{RecordingGateway, StaticGeocoder};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryRideStore>,
        gateway: Arc<RecordingGateway>,
        matcher: DispatchMatcher,
    }

    fn fixture() -> Fixture {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(InMemoryRideStore::new());
        let gateway = Arc::new(RecordingGateway::default());
        let geocoder = StaticGeocoder::with_entry("12 Bay St", Coordinate::new(25.07, -77.34));
        let matcher = DispatchMatcher::new(
            Arc::clone(&store) as Arc<dyn RideStore>,
            Arc::clone(&clock) as SharedClock,
            Arc::new(GeoResolver::new(Box::new(geocoder))),
            Arc::clone(&gateway) as Arc<dyn NotificationGateway>,
            Arc::new(DispatchTelemetry::default()),
            None,
        );
        Fixture {
            clock,
            store,
            gateway,
            matcher,
        }
    }

    fn requested_ride(id: RideId) -> Ride {
        Ride::requested(
            id,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            10.0,
            "cash",
        )
    }

    #[test]
    fn lists_requested_rides_with_resolved_pickup() {
        let f = fixture();
        f.store.insert(requested_ride(1));

        let pool = f.matcher.list_unclaimed();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].ride.id, 1);
        assert_eq!(
            pool[0].pickup_coordinate,
            Some(Coordinate::new(25.07, -77.34))
        );
    }

    #[test]
    fn ungeocodable_pickup_stays_listed_as_text() {
        let f = fixture();
        let mut ride = requested_ride(1);
        ride.pickup_location = Location::parse("unknown alley");
        f.store.insert(ride);

        let pool = f.matcher.list_unclaimed();
        assert_eq!(pool.len(), 1);
        assert!(pool[0].pickup_coordinate.is_none());
        assert_eq!(pool[0].ride.pickup_location.display_text(), "unknown alley");
    }

    #[test]
    fn scheduled_ride_enters_pool_when_due() {
        let f = fixture();
        let pickup_at = f.clock.now() + Duration::minutes(30);
        f.store.insert(Ride::scheduled(
            2,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            10.0,
            "card",
            pickup_at,
        ));

        assert!(f.matcher.list_unclaimed().is_empty());

        f.clock.advance_secs(30 * 60);
        let pool = f.matcher.list_unclaimed();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].ride.status, RideStatus::Requested);
    }

    #[test]
    fn claim_binds_driver_and_notifies_once() {
        let f = fixture();
        f.store
            .insert(requested_ride(1).with_passenger_contact("+1-242-555-0100"));

        let ride = f.matcher.claim(1, 7, None).expect("claim");
        assert_eq!(ride.status, RideStatus::Accepted);
        assert_eq!(ride.driver_id, Some(7));
        assert_eq!(f.gateway.sent().len(), 1);

        // Loser sees a rejection, ride leaves the pool, no second message.
        let err = f.matcher.claim(1, 8, None).expect_err("second claim");
        assert!(err.is_benign_race());
        assert!(f.matcher.list_unclaimed().is_empty());
        assert_eq!(f.gateway.sent().len(), 1);

        let stored = f.store.get(1).expect("ride");
        assert_eq!(stored.driver_id, Some(7), "driver binding is write-once");
    }

    #[test]
    fn claim_of_missing_ride_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.matcher.claim(99, 7, None),
            Err(DispatchError::NotFound(99))
        ));
    }
}
