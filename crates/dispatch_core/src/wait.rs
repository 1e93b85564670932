//! Per-ride wait timer: free waiting allowance, then per-minute surcharge.
//!
//! Sessions are owned exclusively by [`WaitTimer`], keyed by ride id, and
//! live only for the ride's active window. Accrual is computed lazily by
//! folding elapsed running time into the session on every operation, so
//! there is no background thread and tests drive time with a manual clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::clock::SharedClock;
use crate::error::DispatchError;
use crate::notify::{notify_best_effort, wait_exhausted_message, NotificationGateway};
use crate::ride::{LifecycleAction, RideId, RideStatus};
use crate::store::RideStore;
use crate::telemetry::DispatchTelemetry;

/// Free waiting allowance before surcharges begin.
pub const WAIT_ALLOWANCE_SECS: i64 = 600;

/// One surcharge unit accrues per this many seconds beyond the allowance.
pub const SURCHARGE_UNIT_SECS: i64 = 60;

/// Read-only view of one wait session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus {
    pub running: bool,
    /// Seconds of free allowance left; 0 once in surcharge mode.
    pub allowance_remaining_secs: i64,
    /// Whole surcharge units accrued so far (partial minutes not counted).
    pub extra_units: u64,
}

impl WaitStatus {
    pub fn in_surcharge(&self) -> bool {
        self.allowance_remaining_secs == 0
    }
}

#[derive(Debug)]
struct WaitSession {
    running: bool,
    /// Instant the session last transitioned to running.
    resumed_at: Option<DateTime<Utc>>,
    /// Total running seconds folded in so far.
    accrued_secs: i64,
    exhausted_notified: bool,
    passenger_contact: Option<String>,
}

impl WaitSession {
    fn status(&self) -> WaitStatus {
        WaitStatus {
            running: self.running,
            allowance_remaining_secs: (WAIT_ALLOWANCE_SECS - self.accrued_secs).max(0),
            extra_units: ((self.accrued_secs - WAIT_ALLOWANCE_SECS).max(0) / SURCHARGE_UNIT_SECS)
                as u64,
        }
    }

    /// Fold elapsed running time up to `now` into the accrued total.
    /// Returns true when this fold first observed the allowance running
    /// out, so the caller can fire the one-shot notification.
    fn fold(&mut self, now: DateTime<Utc>) -> bool {
        if self.running {
            if let Some(resumed_at) = self.resumed_at {
                let elapsed = (now - resumed_at).num_seconds().max(0);
                self.accrued_secs += elapsed;
                self.resumed_at = Some(now);
            }
        }
        let newly_exhausted =
            self.accrued_secs >= WAIT_ALLOWANCE_SECS && !self.exhausted_notified;
        if newly_exhausted {
            self.exhausted_notified = true;
        }
        newly_exhausted
    }
}

/// Per-ride stopwatch for waiting time and extra charges.
pub struct WaitTimer {
    store: Arc<dyn RideStore>,
    clock: SharedClock,
    gateway: Arc<dyn NotificationGateway>,
    telemetry: Arc<DispatchTelemetry>,
    sessions: Mutex<HashMap<RideId, WaitSession>>,
}

impl WaitTimer {
    pub fn new(
        store: Arc<dyn RideStore>,
        clock: SharedClock,
        gateway: Arc<dyn NotificationGateway>,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            store,
            clock,
            gateway,
            telemetry,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The wait clock only makes sense once a driver is bound and the ride
    /// is still active.
    fn check_ride(&self, ride_id: RideId) -> Result<Option<String>, DispatchError> {
        let ride = self
            .store
            .get(ride_id)
            .ok_or(DispatchError::NotFound(ride_id))?;
        match ride.status {
            RideStatus::Accepted | RideStatus::InProgress => Ok(ride.passenger_contact),
            from => Err(DispatchError::InvalidTransition {
                from,
                action: LifecycleAction::StartWait,
            }),
        }
    }

    /// Start the wait clock, or resume a paused session. Resuming after
    /// the allowance is exhausted does not reset it; only a fresh session
    /// (new ride) starts the allowance over.
    pub fn start(&self, ride_id: RideId) -> Result<WaitStatus, DispatchError> {
        let contact = self.check_ride(ride_id)?;
        let now = self.clock.now();

        let (status, notify) = {
            let mut sessions = self.sessions.lock().expect("wait sessions lock poisoned");
            let session = sessions.entry(ride_id).or_insert_with(|| WaitSession {
                running: false,
                resumed_at: None,
                accrued_secs: 0,
                exhausted_notified: false,
                passenger_contact: contact,
            });
            let notify = session.fold(now);
            session.running = true;
            session.resumed_at = Some(now);
            (session.status(), notify.then(|| session.passenger_contact.clone()))
        };

        if let Some(contact) = notify {
            self.send_exhausted_notice(ride_id, contact.as_deref());
        }
        Ok(status)
    }

    /// Pause the wait clock, preserving remaining allowance and accrued
    /// extra units.
    pub fn stop(&self, ride_id: RideId) -> Result<WaitStatus, DispatchError> {
        let now = self.clock.now();
        let (status, notify) = {
            let mut sessions = self.sessions.lock().expect("wait sessions lock poisoned");
            let session = sessions
                .get_mut(&ride_id)
                .ok_or(DispatchError::NotFound(ride_id))?;
            let notify = session.fold(now);
            session.running = false;
            session.resumed_at = None;
            (session.status(), notify.then(|| session.passenger_contact.clone()))
        };

        if let Some(contact) = notify {
            self.send_exhausted_notice(ride_id, contact.as_deref());
        }
        Ok(status)
    }

    /// Accrued surcharge units for display/billing. Zero when no session
    /// was ever started for an existing ride.
    pub fn current_charge(&self, ride_id: RideId) -> Result<u64, DispatchError> {
        self.status(ride_id).map(|status| status.extra_units)
    }

    /// Read-only snapshot, folding elapsed time first.
    pub fn status(&self, ride_id: RideId) -> Result<WaitStatus, DispatchError> {
        if self.store.get(ride_id).is_none() {
            return Err(DispatchError::NotFound(ride_id));
        }
        let now = self.clock.now();
        let (status, notify) = {
            let mut sessions = self.sessions.lock().expect("wait sessions lock poisoned");
            match sessions.get_mut(&ride_id) {
                Some(session) => {
                    let notify = session.fold(now);
                    (
                        session.status(),
                        notify.then(|| session.passenger_contact.clone()),
                    )
                }
                None => {
                    return Ok(WaitStatus {
                        running: false,
                        allowance_remaining_secs: WAIT_ALLOWANCE_SECS,
                        extra_units: 0,
                    })
                }
            }
        };

        if let Some(contact) = notify {
            self.send_exhausted_notice(ride_id, contact.as_deref());
        }
        Ok(status)
    }

    /// Destroy the session when the ride leaves its active window.
    pub fn clear(&self, ride_id: RideId) {
        let mut sessions = self.sessions.lock().expect("wait sessions lock poisoned");
        sessions.remove(&ride_id);
    }

    fn send_exhausted_notice(&self, ride_id: RideId, contact: Option<&str>) {
        tracing::info!(ride_id, "wait allowance exhausted, surcharge accrual begins");
        notify_best_effort(
            self.gateway.as_ref(),
            &self.telemetry,
            contact,
            &wait_exhausted_message(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::Location;
    use crate::ride::Ride;
    use crate::store::InMemoryRideStore;
    use crate::test_helpers::RecordingGateway;
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, Arc<RecordingGateway>, WaitTimer) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(InMemoryRideStore::new());
        let gateway = Arc::new(RecordingGateway::default());

        let mut ride = Ride::requested(
            1,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            10.0,
            "cash",
        )
        .with_passenger_contact("+1-242-555-0100");
        ride.status = RideStatus::Accepted;
        ride.driver_id = Some(7);
        store.insert(ride);

        let timer = WaitTimer::new(
            store,
            Arc::clone(&clock) as SharedClock,
            Arc::clone(&gateway) as Arc<dyn NotificationGateway>,
            Arc::new(DispatchTelemetry::default()),
        );
        (clock, gateway, timer)
    }

    #[test]
    fn allowance_counts_down_then_surcharge_accrues() {
        let (clock, gateway, timer) = setup();

        let status = timer.start(1).expect("start");
        assert!(status.running);
        assert_eq!(status.allowance_remaining_secs, WAIT_ALLOWANCE_SECS);

        clock.advance_secs(600);
        let status = timer.status(1).expect("status");
        assert_eq!(status.allowance_remaining_secs, 0);
        assert!(status.in_surcharge());
        assert_eq!(status.extra_units, 0);
        assert_eq!(gateway.sent().len(), 1, "one-shot exhaustion notice");

        clock.advance_secs(125);
        assert_eq!(timer.current_charge(1).expect("charge"), 2);
        // Notification does not repeat.
        assert_eq!(gateway.sent().len(), 1);
    }

    #[test]
    fn pause_preserves_allowance_and_charges() {
        let (clock, _gateway, timer) = setup();

        timer.start(1).expect("start");
        clock.advance_secs(100);
        let status = timer.stop(1).expect("stop");
        assert_eq!(status.allowance_remaining_secs, 500);
        assert!(!status.running);

        // Paused time does not accrue.
        clock.advance_secs(1000);
        let status = timer.status(1).expect("status");
        assert_eq!(status.allowance_remaining_secs, 500);

        let status = timer.start(1).expect("resume");
        assert!(status.running);
        clock.advance_secs(500);
        assert!(timer.status(1).expect("status").in_surcharge());
    }

    #[test]
    fn restart_after_exhaustion_does_not_reset() {
        let (clock, _gateway, timer) = setup();

        timer.start(1).expect("start");
        clock.advance_secs(700);
        timer.stop(1).expect("stop");

        let status = timer.start(1).expect("restart");
        assert_eq!(status.allowance_remaining_secs, 0);
        assert_eq!(status.extra_units, 1);

        clock.advance_secs(60);
        assert_eq!(timer.current_charge(1).expect("charge"), 2);
    }

    #[test]
    fn clear_destroys_the_session() {
        let (clock, _gateway, timer) = setup();
        timer.start(1).expect("start");
        clock.advance_secs(700);
        timer.clear(1);

        let status = timer.status(1).expect("status");
        assert_eq!(status.allowance_remaining_secs, WAIT_ALLOWANCE_SECS);
        assert_eq!(status.extra_units, 0);
    }

    #[test]
    fn unknown_ride_is_rejected() {
        let (_clock, _gateway, timer) = setup();
        assert!(matches!(
            timer.start(99),
            Err(DispatchError::NotFound(99))
        ));
    }
}
