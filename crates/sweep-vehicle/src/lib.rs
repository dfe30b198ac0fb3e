pub mod error;
pub mod mav;
pub mod wait;

use std::time::Duration;

use serde::Deserialize;
use sweep_plan::Waypoint;

pub use error::VehicleError;
pub use wait::ClimbWait;

/// Velocity setpoint in the local NED frame plus a target heading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityNedYaw {
    pub north_mps: f32,
    pub east_mps: f32,
    pub down_mps: f32,
    pub yaw_deg: f32,
}

impl VelocityNedYaw {
    /// Zero translation, hold the given heading.
    pub fn neutral(yaw_deg: f32) -> Self {
        Self { north_mps: 0.0, east_mps: 0.0, down_mps: 0.0, yaw_deg }
    }

    /// Travel along the primary (north) axis at the given signed speed.
    pub fn forward(speed_mps: f32, yaw_deg: f32) -> Self {
        Self { north_mps: speed_mps, east_mps: 0.0, down_mps: 0.0, yaw_deg }
    }
}

/// Final acknowledgement of a mission transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionAck {
    pub accepted: bool,
}

/// Black-box vehicle interface the flight stack drives. One implementation
/// speaks MAVLink ([`mav::MavVehicle`]); tests script a fake.
///
/// Every bounded wait returns `Ok(None)` on timeout; `Err` is reserved for
/// link failures and explicit command rejection.
#[allow(async_fn_in_trait)]
pub trait Vehicle {
    /// Block until the vehicle reports a heartbeat. No timeout by design.
    async fn wait_connected(&mut self) -> Result<(), VehicleError>;

    async fn arm(&mut self) -> Result<(), VehicleError>;
    async fn disarm(&mut self) -> Result<(), VehicleError>;
    async fn set_takeoff_altitude(&mut self, alt_m: f32) -> Result<(), VehicleError>;
    async fn takeoff(&mut self) -> Result<(), VehicleError>;
    async fn return_to_launch(&mut self) -> Result<(), VehicleError>;
    async fn set_mode(&mut self, mode: &str) -> Result<(), VehicleError>;

    async fn start_offboard(&mut self) -> Result<(), VehicleError>;
    async fn stop_offboard(&mut self) -> Result<(), VehicleError>;
    async fn set_velocity(&mut self, v: VelocityNedYaw) -> Result<(), VehicleError>;

    async fn clear_mission(&mut self) -> Result<(), VehicleError>;
    async fn send_item_count(&mut self, count: u16) -> Result<(), VehicleError>;
    /// Wait for the vehicle to request a mission item by index.
    async fn await_item_request(&mut self, timeout: Duration)
        -> Result<Option<u16>, VehicleError>;
    async fn send_item(&mut self, wp: &Waypoint) -> Result<(), VehicleError>;
    async fn await_ack(&mut self, timeout: Duration)
        -> Result<Option<MissionAck>, VehicleError>;
    async fn start_mission(&mut self) -> Result<(), VehicleError>;

    /// Latest known altitude above launch, if telemetry has reported one.
    async fn relative_altitude(&mut self) -> Result<Option<f32>, VehicleError>;
}

/// Link settings, `[link]` section of the config file. Missing keys fall
/// back to the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// mavlink address string, e.g. "udpin:0.0.0.0:14540" or
    /// "serial:/dev/ttyACM0:57600".
    pub url: String,

    /// MAVLink ids we use (companion side).
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (autopilot side). 1/1 is common.
    pub target_sys: u8,
    pub target_comp: u8,

    /// How long to wait for a COMMAND_ACK before treating the command as
    /// fire-and-forget. Silence is tolerated; explicit denial is not.
    pub command_ack_timeout_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: "udpin:0.0.0.0:14540".into(),
            sys_id: 245,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            command_ack_timeout_ms: None,
        }
    }
}

impl LinkConfig {
    pub fn command_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.command_ack_timeout_ms.unwrap_or(1000))
    }
}
