//! Scripted vehicle double for controller and session tests.

use std::collections::VecDeque;
use std::time::Duration;

use sweep_plan::Waypoint;
use sweep_vehicle::{MissionAck, Vehicle, VehicleError, VelocityNedYaw};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WaitConnected,
    Arm,
    Disarm,
    SetTakeoffAltitude(f32),
    Takeoff,
    Rtl,
    SetMode(String),
    StartOffboard,
    StopOffboard,
    SetVelocity(VelocityNedYaw),
    ClearMission,
    SendCount(u16),
    SendItem(u16),
    StartMission,
    RelativeAltitude,
}

/// Records every call and plays back scripted protocol outcomes.
/// Empty script queues mean "timed out" for the bounded waits.
pub struct FakeVehicle {
    pub calls: Vec<Call>,
    pub item_requests: VecDeque<Option<u16>>,
    pub acks: VecDeque<Option<MissionAck>>,
    pub altitudes: VecDeque<Option<f32>>,
    pub reject_arm: bool,
    pub reject_offboard: bool,
    /// Reject `set_velocity` once this many calls have gone through.
    pub fail_velocity_after: Option<usize>,
    velocity_calls: usize,
    last_alt: Option<f32>,
}

impl FakeVehicle {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            item_requests: VecDeque::new(),
            acks: VecDeque::new(),
            altitudes: VecDeque::new(),
            reject_arm: false,
            reject_offboard: false,
            fail_velocity_after: None,
            velocity_calls: 0,
            last_alt: None,
        }
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| f(c)).count()
    }
}

impl Vehicle for FakeVehicle {
    async fn wait_connected(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::WaitConnected);
        Ok(())
    }

    async fn arm(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::Arm);
        if self.reject_arm {
            return Err(VehicleError::CommandRejected { command: "arm" });
        }
        Ok(())
    }

    async fn disarm(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::Disarm);
        Ok(())
    }

    async fn set_takeoff_altitude(&mut self, alt_m: f32) -> Result<(), VehicleError> {
        self.calls.push(Call::SetTakeoffAltitude(alt_m));
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::Takeoff);
        Ok(())
    }

    async fn return_to_launch(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::Rtl);
        Ok(())
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), VehicleError> {
        self.calls.push(Call::SetMode(mode.to_string()));
        Ok(())
    }

    async fn start_offboard(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::StartOffboard);
        if self.reject_offboard {
            return Err(VehicleError::Offboard("offboard denied".into()));
        }
        Ok(())
    }

    async fn stop_offboard(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::StopOffboard);
        Ok(())
    }

    async fn set_velocity(&mut self, v: VelocityNedYaw) -> Result<(), VehicleError> {
        if let Some(limit) = self.fail_velocity_after {
            if self.velocity_calls >= limit {
                return Err(VehicleError::CommandRejected { command: "set_velocity" });
            }
        }
        self.velocity_calls += 1;
        self.calls.push(Call::SetVelocity(v));
        Ok(())
    }

    async fn clear_mission(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::ClearMission);
        Ok(())
    }

    async fn send_item_count(&mut self, count: u16) -> Result<(), VehicleError> {
        self.calls.push(Call::SendCount(count));
        Ok(())
    }

    async fn await_item_request(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<u16>, VehicleError> {
        Ok(self.item_requests.pop_front().flatten())
    }

    async fn send_item(&mut self, wp: &Waypoint) -> Result<(), VehicleError> {
        self.calls.push(Call::SendItem(wp.seq));
        Ok(())
    }

    async fn await_ack(&mut self, _timeout: Duration) -> Result<Option<MissionAck>, VehicleError> {
        Ok(self.acks.pop_front().flatten())
    }

    async fn start_mission(&mut self) -> Result<(), VehicleError> {
        self.calls.push(Call::StartMission);
        Ok(())
    }

    async fn relative_altitude(&mut self) -> Result<Option<f32>, VehicleError> {
        self.calls.push(Call::RelativeAltitude);
        if let Some(alt) = self.altitudes.pop_front() {
            if alt.is_some() {
                self.last_alt = alt;
            }
            return Ok(alt);
        }
        Ok(self.last_alt)
    }
}
