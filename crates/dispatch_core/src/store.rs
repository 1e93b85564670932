//! Ride persistence seam.
//!
//! [`RideStore`] is the single source of truth for ride rows and the only
//! mutator of persisted fields. Its one write primitive, `update_if`,
//! applies a mutation only while a predicate over the current row holds,
//! with the check and the write as one atomic unit. Claims and lifecycle
//! transitions are built entirely on that primitive, which is what makes
//! them linearizable per ride.
//!
//! The in-memory implementation backs tests and single-node deployments; a
//! database-backed store implements the same trait with a conditional
//! `UPDATE ... WHERE` statement.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ride::{Ride, RideId};

/// Result of a conditional update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Predicate held; mutation applied. Carries the updated row.
    Updated(Ride),
    /// Predicate did not hold. Carries the untouched current row so the
    /// caller can report the actual state it lost to.
    PredicateFailed(Ride),
    /// No row with that id.
    NotFound,
}

/// Durable record of ride entities.
pub trait RideStore: Send + Sync {
    /// Insert or replace a ride row. Id allocation is the caller's
    /// concern; the engine never invents ids.
    fn insert(&self, ride: Ride);

    /// Point read; returns a snapshot clone.
    fn get(&self, id: RideId) -> Option<Ride>;

    /// Snapshot of all rows, ordered by id. Staleness up to the caller's
    /// polling interval is acceptable.
    fn list(&self) -> Vec<Ride>;

    /// Atomic conditional update: while holding the row exclusively,
    /// evaluate `predicate` and, only if it holds, apply `mutation`.
    /// No external call may be made from inside either closure.
    fn update_if(
        &self,
        id: RideId,
        predicate: &dyn Fn(&Ride) -> bool,
        mutation: &dyn Fn(&mut Ride),
    ) -> UpdateOutcome;
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryRideStore {
    rides: Mutex<HashMap<RideId, Ride>>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RideStore for InMemoryRideStore {
    fn insert(&self, ride: Ride) {
        let mut rides = self.rides.lock().expect("ride store lock poisoned");
        rides.insert(ride.id, ride);
    }

    fn get(&self, id: RideId) -> Option<Ride> {
        let rides = self.rides.lock().expect("ride store lock poisoned");
        rides.get(&id).cloned()
    }

    fn list(&self) -> Vec<Ride> {
        let rides = self.rides.lock().expect("ride store lock poisoned");
        let mut rows: Vec<Ride> = rides.values().cloned().collect();
        rows.sort_by_key(|ride| ride.id);
        rows
    }

    fn update_if(
        &self,
        id: RideId,
        predicate: &dyn Fn(&Ride) -> bool,
        mutation: &dyn Fn(&mut Ride),
    ) -> UpdateOutcome {
        let mut rides = self.rides.lock().expect("ride store lock poisoned");
        let Some(ride) = rides.get_mut(&id) else {
            return UpdateOutcome::NotFound;
        };
        if !predicate(ride) {
            return UpdateOutcome::PredicateFailed(ride.clone());
        }
        mutation(ride);
        debug_assert!(
            ride.driver_binding_consistent(),
            "mutation left ride {} with inconsistent driver binding",
            ride.id
        );
        UpdateOutcome::Updated(ride.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Location;
    use crate::ride::RideStatus;
    use std::sync::Arc;

    fn sample_ride(id: RideId) -> Ride {
        Ride::requested(
            id,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            10.0,
            "cash",
        )
    }

    #[test]
    fn get_returns_inserted_row() {
        let store = InMemoryRideStore::new();
        store.insert(sample_ride(1));
        let ride = store.get(1).expect("ride");
        assert_eq!(ride.status, RideStatus::Requested);
        assert!(store.get(2).is_none());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let store = InMemoryRideStore::new();
        store.insert(sample_ride(3));
        store.insert(sample_ride(1));
        store.insert(sample_ride(2));
        let ids: Vec<RideId> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn update_if_respects_predicate() {
        let store = InMemoryRideStore::new();
        store.insert(sample_ride(1));

        let outcome = store.update_if(
            1,
            &|ride| ride.status == RideStatus::Requested,
            &|ride| {
                ride.status = RideStatus::Accepted;
                ride.driver_id = Some(9);
            },
        );
        assert!(matches!(outcome, UpdateOutcome::Updated(_)));

        // Second attempt sees the new state and fails the predicate.
        let outcome = store.update_if(
            1,
            &|ride| ride.status == RideStatus::Requested,
            &|ride| ride.driver_id = Some(10),
        );
        match outcome {
            UpdateOutcome::PredicateFailed(ride) => {
                assert_eq!(ride.driver_id, Some(9));
            }
            other => panic!("expected predicate failure, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_conditional_updates_commit_exactly_once() {
        let store = Arc::new(InMemoryRideStore::new());
        store.insert(sample_ride(1));

        let handles: Vec<_> = (0..8u64)
            .map(|driver| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let outcome = store.update_if(
                        1,
                        &|ride| ride.status == RideStatus::Requested && ride.driver_id.is_none(),
                        &|ride| {
                            ride.status = RideStatus::Accepted;
                            ride.driver_id = Some(driver);
                        },
                    );
                    matches!(outcome, UpdateOutcome::Updated(_))
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1, "exactly one conditional update must commit");

        let ride = store.get(1).expect("ride");
        assert_eq!(ride.status, RideStatus::Accepted);
        assert!(ride.driver_id.is_some());
    }
}
