#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use dispatch_core::geo::Coordinate;
use dispatch_core::ride::{DriverId, Ride, RideId, RideStatus};
use dispatch_core::routing::{HaversineRouteProvider, RoutePlan, RouteProvider};
use dispatch_core::test_helpers::test_ride;

/// A route provider whose calls block until the test opens the gate.
/// Used to pin a recomputation in flight while the test races a leg
/// switch or a newer recomputation against it.
pub struct GatedRouteProvider {
    open: Mutex<bool>,
    cv: Condvar,
    calls: AtomicUsize,
}

impl GatedRouteProvider {
    pub fn closed() -> Self {
        Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Let all pending and future calls through.
    pub fn open(&self) {
        let mut open = self.open.lock().expect("gate lock poisoned");
        *open = true;
        self.cv.notify_all();
    }

    /// Number of route calls started so far.
    pub fn calls_started(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Spin until `n` route calls have started.
    pub fn wait_for_calls(&self, n: usize) {
        let mut waited = Duration::ZERO;
        while self.calls_started() < n {
            std::thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
            assert!(
                waited < Duration::from_secs(5),
                "timed out waiting for {n} route calls"
            );
        }
    }
}

impl RouteProvider for GatedRouteProvider {
    fn route(&self, origin: Coordinate, destination: Coordinate) -> Option<RoutePlan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().expect("gate lock poisoned");
        while !*open {
            open = self.cv.wait(open).expect("gate lock poisoned");
        }
        drop(open);
        HaversineRouteProvider.route(origin, destination)
    }
}

/// A test ride forced into the given state, with a driver bound where the
/// state requires one.
pub fn ride_in_state(id: RideId, status: RideStatus, driver_id: DriverId) -> Ride {
    let mut ride = test_ride(id);
    ride.status = status;
    if matches!(
        status,
        RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed
    ) {
        ride.driver_id = Some(driver_id);
    }
    ride
}
