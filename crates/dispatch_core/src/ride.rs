//! Ride entity and its lifecycle state machine.
//!
//! The transition table lives here as data
//! ([`RideStatus::next_for`]); the controllers in `matching` and
//! `lifecycle` consult it and never hand-roll state checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Location;

pub type RideId = u64;
pub type DriverId = u64;

/// Lifecycle status of a ride.
///
/// Terminal states are `Completed` and `Cancelled`; no transition is
/// defined out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RideStatus {
    Requested,
    Scheduled,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// The state reached by applying `action` from this state, or `None`
    /// when the move is illegal.
    pub fn next_for(self, action: LifecycleAction) -> Option<RideStatus> {
        use LifecycleAction::*;
        use RideStatus::*;
        match (self, action) {
            (Requested, Claim) => Some(Accepted),
            (Scheduled, Promote) => Some(Requested),
            (Accepted, PickUp) => Some(InProgress),
            (InProgress, Complete) => Some(Completed),
            (Requested | Scheduled | Accepted | InProgress, Cancel) => Some(Cancelled),
            _ => None,
        }
    }
}

/// Action names for the transition table and error messages. `StartWait`
/// and `Track` are not lifecycle transitions; they appear only in
/// `InvalidTransition` errors when invoked against a ride whose state does
/// not admit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Claim,
    Promote,
    PickUp,
    Complete,
    Cancel,
    StartWait,
    Track,
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleAction::Claim => "claim",
            LifecycleAction::Promote => "promote",
            LifecycleAction::PickUp => "mark picked up",
            LifecycleAction::Complete => "mark completed",
            LifecycleAction::Cancel => "cancel",
            LifecycleAction::StartWait => "start waiting on",
            LifecycleAction::Track => "track",
        };
        f.write_str(name)
    }
}

/// Who triggered a cancellation; recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelActor {
    Passenger,
    Driver,
    System,
}

/// Driver details used for the passenger confirmation message. Supplied by
/// the caller at claim time; the core never stores driver records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub name: String,
    pub car_type: String,
    pub license_plate: String,
}

/// The central ride entity.
///
/// `driver_id` is write-once: the only path that sets it is a successful
/// claim, and it is never reassigned afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub status: RideStatus,
    pub pickup_location: Location,
    pub dropoff_location: Location,
    pub driver_id: Option<DriverId>,
    /// Fare agreed at creation; read-only to this engine.
    pub fare: f64,
    /// Payment method chosen at creation; read-only to this engine.
    pub payment_method: String,
    /// Phone number (or similar) the notification gateway delivers to.
    pub passenger_contact: Option<String>,
    /// Present only for `Scheduled` rides; defers entry into the
    /// unclaimed pool until the time arrives.
    pub scheduled_pickup_time: Option<DateTime<Utc>>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub dropoff_time: Option<DateTime<Utc>>,
    /// Ordered intermediate waypoints, read-only to this engine.
    pub stops: Vec<Location>,
    pub cancelled_by: Option<CancelActor>,
}

impl Ride {
    /// A ride requested for immediate dispatch.
    pub fn requested(
        id: RideId,
        pickup_location: Location,
        dropoff_location: Location,
        fare: f64,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            id,
            status: RideStatus::Requested,
            pickup_location,
            dropoff_location,
            driver_id: None,
            fare,
            payment_method: payment_method.into(),
            passenger_contact: None,
            scheduled_pickup_time: None,
            pickup_time: None,
            dropoff_time: None,
            stops: Vec::new(),
            cancelled_by: None,
        }
    }

    /// A ride scheduled for a future pickup time; it stays out of the
    /// unclaimed pool until promoted.
    pub fn scheduled(
        id: RideId,
        pickup_location: Location,
        dropoff_location: Location,
        fare: f64,
        payment_method: impl Into<String>,
        pickup_at: DateTime<Utc>,
    ) -> Self {
        let mut ride = Self::requested(id, pickup_location, dropoff_location, fare, payment_method);
        ride.status = RideStatus::Scheduled;
        ride.scheduled_pickup_time = Some(pickup_at);
        ride
    }

    pub fn with_passenger_contact(mut self, contact: impl Into<String>) -> Self {
        self.passenger_contact = Some(contact.into());
        self
    }

    /// Invariant from the data model: `driver_id` is set if and only if
    /// the ride has been claimed (Accepted, InProgress or Completed).
    pub fn driver_binding_consistent(&self) -> bool {
        let expects_driver = matches!(
            self.status,
            RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed
        );
        expects_driver == self.driver_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Location;

    fn ride() -> Ride {
        Ride::requested(
            1,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            14.50,
            "cash",
        )
    }

    #[test]
    fn transition_table_matches_state_machine() {
        use LifecycleAction::*;
        use RideStatus::*;

        assert_eq!(Requested.next_for(Claim), Some(Accepted));
        assert_eq!(Scheduled.next_for(Promote), Some(Requested));
        assert_eq!(Accepted.next_for(PickUp), Some(InProgress));
        assert_eq!(InProgress.next_for(Complete), Some(Completed));

        for from in [Requested, Scheduled, Accepted, InProgress] {
            assert_eq!(from.next_for(Cancel), Some(Cancelled));
        }
    }

    #[test]
    fn terminal_states_admit_no_action() {
        use LifecycleAction::*;
        use RideStatus::*;

        for terminal in [Completed, Cancelled] {
            assert!(terminal.is_terminal());
            for action in [Claim, Promote, PickUp, Complete, Cancel] {
                assert_eq!(terminal.next_for(action), None);
            }
        }
    }

    #[test]
    fn undefined_pairs_are_rejected() {
        use LifecycleAction::*;
        use RideStatus::*;

        assert_eq!(Requested.next_for(PickUp), None);
        assert_eq!(Requested.next_for(Complete), None);
        assert_eq!(Scheduled.next_for(Claim), None);
        assert_eq!(Accepted.next_for(Claim), None);
        assert_eq!(Accepted.next_for(Complete), None);
        assert_eq!(InProgress.next_for(PickUp), None);
    }

    #[test]
    fn fresh_ride_satisfies_driver_binding_invariant() {
        let r = ride();
        assert!(r.driver_binding_consistent());

        let mut accepted = ride();
        accepted.status = RideStatus::Accepted;
        assert!(!accepted.driver_binding_consistent());
        accepted.driver_id = Some(7);
        assert!(accepted.driver_binding_consistent());
    }
}
