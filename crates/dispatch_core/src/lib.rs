pub mod clock;
pub mod engine;
pub mod error;
pub mod geo;
pub mod geocode;
pub mod lifecycle;
pub mod matching;
pub mod notify;
pub mod ride;
pub mod routing;
pub mod store;
pub mod telemetry;
pub mod tracking;
pub mod wait;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
