use thiserror::Error;

/// Failures surfaced by the vehicle link. Timeouts on the bounded protocol
/// waits are not errors; those come back as `Ok(None)` from the wait calls.
#[derive(Debug, Error)]
pub enum VehicleError {
    /// The vehicle explicitly refused a command (arm, takeoff, mode, RTL...).
    #[error("vehicle rejected {command}")]
    CommandRejected { command: &'static str },

    /// Offboard mode could not be started or stopped.
    #[error("offboard control: {0}")]
    Offboard(String),

    /// The link itself failed (connect, send, reader gone).
    #[error("vehicle link: {0}")]
    Link(String),
}
