use thiserror::Error;

use sweep_vehicle::VehicleError;

use crate::mission::UploadError;

/// Fatal conditions that unwind to the flight session. The session turns
/// these into a `Failed` report after best-effort cleanup; nothing is
/// retried automatically.
#[derive(Debug, Error)]
pub enum FlightError {
    #[error(transparent)]
    Vehicle(#[from] VehicleError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// A velocity command was rejected mid-run; remaining legs abandoned.
    #[error("velocity control failed after {legs_completed} legs: {source}")]
    Control {
        legs_completed: u32,
        source: VehicleError,
    },

    #[error("flight cancelled")]
    Cancelled,
}
