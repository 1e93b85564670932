//! Passenger notification seam.
//!
//! Delivery is best-effort and never transactional with ride state: a
//! failed send is logged and counted, and the lifecycle transition that
//! triggered it stands. The Twilio SMS gateway lives behind the `twilio`
//! feature; the default gateway only logs.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ride::{CancelActor, DriverProfile, Ride};

#[derive(Debug, Clone, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// External delivery capability (SMS or similar).
pub trait NotificationGateway: Send + Sync {
    fn notify(&self, contact: &str, message: &str) -> Result<(), NotifyError>;
}

/// Gateway that only logs; used when no delivery channel is configured.
#[derive(Debug, Default)]
pub struct LogOnlyGateway;

impl NotificationGateway for LogOnlyGateway {
    fn notify(&self, contact: &str, message: &str) -> Result<(), NotifyError> {
        tracing::info!(contact, message, "notification (log-only gateway)");
        Ok(())
    }
}

/// Deliver a message without letting a gateway failure propagate. Failures
/// are logged and counted; a missing contact is a quiet no-op.
pub fn notify_best_effort(
    gateway: &dyn NotificationGateway,
    telemetry: &crate::telemetry::DispatchTelemetry,
    contact: Option<&str>,
    message: &str,
) {
    let Some(contact) = contact else {
        return;
    };
    if let Err(err) = gateway.notify(contact, message) {
        tracing::warn!(contact, error = %err, "notification delivery failed");
        crate::telemetry::DispatchTelemetry::bump(&telemetry.notifications_failed);
    }
}

fn format_pickup_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%B %-d, %Y, %I:%M %p").to_string(),
        None => String::new(),
    }
}

/// Confirmation text sent once when a driver is bound to a ride.
pub fn confirmation_message(
    ride: &Ride,
    driver: Option<&DriverProfile>,
    details_base_url: Option<&str>,
) -> String {
    let mut message = String::from("Good news! Your ride has been confirmed.\n");
    if let Some(driver) = driver {
        message.push_str(&format!(
            "\nDriver: {}\nCar: {} - {}",
            driver.name, driver.car_type, driver.license_plate
        ));
    }
    let pickup = format_pickup_time(ride.scheduled_pickup_time);
    if !pickup.is_empty() {
        message.push_str(&format!("\nEstimated Pickup Time: {pickup}"));
    }
    if let Some(base) = details_base_url {
        message.push_str(&format!(
            "\nFor more details: {}/{}",
            base.trim_end_matches('/'),
            ride.id
        ));
    }
    message.push_str("\n\nHave a safe and pleasant journey!");
    message
}

/// One-shot text sent when the free waiting allowance runs out.
pub fn wait_exhausted_message() -> String {
    "Your driver has been waiting for 10 minutes. \
     Additional waiting time is now charged per minute."
        .to_string()
}

/// Text sent to the non-cancelling party when a ride is cancelled.
pub fn cancellation_message(cancelled_by: CancelActor) -> String {
    match cancelled_by {
        CancelActor::Passenger => "The passenger has cancelled this ride.".to_string(),
        CancelActor::Driver => {
            "Your driver had to cancel this ride. We are finding you another one.".to_string()
        }
        CancelActor::System => "This ride has been cancelled.".to_string(),
    }
}

#[cfg(feature = "twilio")]
pub mod twilio {
    //! Twilio SMS gateway (blocking, bounded timeout).

    use std::time::Duration;

    use reqwest::blocking::Client;

    use super::{NotificationGateway, NotifyError};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    pub struct TwilioSmsGateway {
        client: Client,
        account_sid: String,
        auth_token: String,
        from_number: String,
    }

    impl TwilioSmsGateway {
        pub fn new(account_sid: &str, auth_token: &str, from_number: &str) -> Self {
            let client = Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build SMS HTTP client");
            Self {
                client,
                account_sid: account_sid.to_string(),
                auth_token: auth_token.to_string(),
                from_number: from_number.to_string(),
            }
        }
    }

    impl NotificationGateway for TwilioSmsGateway {
        fn notify(&self, contact: &str, message: &str) -> Result<(), NotifyError> {
            let url = format!(
                "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
                self.account_sid
            );
            let response = self
                .client
                .post(&url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
                .form(&[
                    ("From", self.from_number.as_str()),
                    ("To", contact),
                    ("Body", message),
                ])
                .send()
                .map_err(|err| NotifyError(err.to_string()))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(NotifyError(format!(
                    "twilio returned status {}",
                    response.status()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Location;
    use chrono::TimeZone;

    #[test]
    fn confirmation_message_includes_driver_details() {
        let mut ride = Ride::requested(
            42,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            12.0,
            "cash",
        );
        ride.scheduled_pickup_time = Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap());
        let driver = DriverProfile {
            name: "Alonzo".to_string(),
            car_type: "Honda Accord".to_string(),
            license_plate: "AB 1234".to_string(),
        };

        let message = confirmation_message(&ride, Some(&driver), Some("https://rides.example/ride"));
        assert!(message.contains("Driver: Alonzo"));
        assert!(message.contains("Honda Accord - AB 1234"));
        assert!(message.contains("March 1, 2024"));
        assert!(message.contains("https://rides.example/ride/42"));
    }

    #[test]
    fn confirmation_message_degrades_without_profile() {
        let ride = Ride::requested(
            7,
            Location::parse("12 Bay St"),
            Location::parse("5 Elm Ct"),
            12.0,
            "cash",
        );
        let message = confirmation_message(&ride, None, None);
        assert!(message.contains("confirmed"));
        assert!(!message.contains("Driver:"));
    }

    #[test]
    fn cancellation_messages_name_the_other_party() {
        assert!(cancellation_message(CancelActor::Driver).contains("driver"));
        assert!(cancellation_message(CancelActor::Passenger).contains("passenger"));
    }
}
