//! Test helpers for common test setup and utilities.
//!
//! Shared fixtures for unit and integration tests: a deterministic
//! geocoder, a recording notification gateway and a fully wired engine on
//! a manual clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use crate::clock::{ManualClock, SharedClock};
use crate::engine::{DispatchEngine, EngineConfig};
use crate::geo::{Coordinate, Location};
use crate::geocode::Geocoder;
use crate::notify::{NotificationGateway, NotifyError};
use crate::ride::{DriverProfile, Ride, RideId};
use crate::routing::HaversineRouteProvider;
use crate::store::{InMemoryRideStore, RideStore};

/// Standard test addresses with known coordinates (Nassau area).
pub const TEST_PICKUP_ADDRESS: &str = "12 Bay St";
pub const TEST_DROPOFF_ADDRESS: &str = "5 Elm Ct";

pub fn test_pickup_coordinate() -> Coordinate {
    Coordinate::new(25.078, -77.338)
}

pub fn test_dropoff_coordinate() -> Coordinate {
    Coordinate::new(25.072, -77.407)
}

/// Geocoder backed by a fixed address table.
#[derive(Debug, Default)]
pub struct StaticGeocoder {
    entries: HashMap<String, Coordinate>,
    reverse: Option<String>,
}

impl StaticGeocoder {
    /// A geocoder that resolves nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A geocoder knowing exactly one address.
    pub fn with_entry(address: &str, coordinate: Coordinate) -> Self {
        let mut geocoder = Self::default();
        geocoder.insert(address, coordinate);
        geocoder
    }

    /// A geocoder knowing the standard test pickup and dropoff.
    pub fn with_test_addresses() -> Self {
        let mut geocoder = Self::default();
        geocoder.insert(TEST_PICKUP_ADDRESS, test_pickup_coordinate());
        geocoder.insert(TEST_DROPOFF_ADDRESS, test_dropoff_coordinate());
        geocoder
    }

    pub fn insert(&mut self, address: &str, coordinate: Coordinate) {
        self.entries.insert(address.to_string(), coordinate);
    }

    /// Answer every reverse lookup with this text.
    pub fn with_reverse(mut self, address: &str) -> Self {
        self.reverse = Some(address.to_string());
        self
    }
}

impl Geocoder for StaticGeocoder {
    fn forward_geocode(&self, address: &str) -> Option<Coordinate> {
        self.entries.get(address).copied()
    }

    fn reverse_geocode(&self, _coordinate: Coordinate) -> Option<String> {
        self.reverse.clone()
    }
}

/// Notification gateway that records every delivery.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    /// All (contact, message) pairs delivered so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("gateway lock poisoned").clone()
    }

    /// Make every subsequent delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl NotificationGateway for RecordingGateway {
    fn notify(&self, contact: &str, message: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("recording gateway set to fail".to_string()));
        }
        self.sent
            .lock()
            .expect("gateway lock poisoned")
            .push((contact.to_string(), message.to_string()));
        Ok(())
    }
}

/// A fully wired engine on a manual clock, for integration tests.
pub struct TestEngine {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryRideStore>,
    pub gateway: Arc<RecordingGateway>,
    pub engine: DispatchEngine,
}

/// Build the standard test engine: in-memory store, manual clock started
/// at a fixed instant, test-address geocoder, haversine routing and a
/// recording gateway.
pub fn test_engine() -> TestEngine {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(InMemoryRideStore::new());
    let gateway = Arc::new(RecordingGateway::default());

    let engine = DispatchEngine::new(
        Arc::clone(&store) as Arc<dyn RideStore>,
        Arc::clone(&clock) as SharedClock,
        Box::new(StaticGeocoder::with_test_addresses()),
        Arc::new(HaversineRouteProvider),
        Arc::clone(&gateway) as Arc<dyn NotificationGateway>,
        EngineConfig::default(),
    );

    TestEngine {
        clock,
        store,
        gateway,
        engine,
    }
}

/// A requested ride between the standard test addresses.
pub fn test_ride(id: RideId) -> Ride {
    Ride::requested(
        id,
        Location::parse(TEST_PICKUP_ADDRESS),
        Location::parse(TEST_DROPOFF_ADDRESS),
        14.50,
        "cash",
    )
    .with_passenger_contact("+1-242-555-0100")
}

/// A driver profile for confirmation-message assertions.
pub fn test_driver_profile() -> DriverProfile {
    DriverProfile {
        name: "Alonzo".to_string(),
        car_type: "Honda Accord".to_string(),
        license_plate: "AB 1234".to_string(),
    }
}
