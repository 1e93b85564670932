//! Error taxonomy shared across the dispatch engine.
//!
//! Every outward operation returns `Result<T, DispatchError>`; nothing in
//! the engine panics across the API boundary. External-capability failures
//! (geocoding, routing) map to `ResolutionFailed`/`RouteUnavailable` and
//! leave ride state untouched.

use thiserror::Error;

use crate::ride::{DriverId, LifecycleAction, RideId, RideStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Referenced ride does not exist.
    #[error("ride {0} not found")]
    NotFound(RideId),

    /// Requested lifecycle move is illegal from the current state. Also
    /// covers the claim-race loser: the ride was Requested when listed but
    /// no longer is.
    #[error("cannot {action} a ride in state {from:?}")]
    InvalidTransition {
        from: RideStatus,
        action: LifecycleAction,
    },

    /// Actor does not own the ride (e.g. position update from a driver
    /// other than the bound one).
    #[error("driver {driver_id} is not bound to ride {ride_id}")]
    Unauthorized { ride_id: RideId, driver_id: DriverId },

    /// The geocoding capability could not resolve an address. The ride's
    /// location fields are left unchanged; callers may retry later.
    #[error("could not resolve location: {0}")]
    ResolutionFailed(String),

    /// No route is available: either no destination is resolved yet or the
    /// routing capability failed.
    #[error("no route available for ride {0}")]
    RouteUnavailable(RideId),
}

impl DispatchError {
    /// True for the benign-race outcomes callers may silently drop after
    /// refreshing state; a losing cancel or claim is a no-op.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, DispatchError::InvalidTransition { .. })
    }
}
