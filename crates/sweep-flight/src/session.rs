use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sweep_plan::{CoveragePath, Origin};
use sweep_vehicle::wait::{ClimbConfig, ClimbWait};
use sweep_vehicle::{Vehicle, VehicleError};

use crate::mission::{MissionUploader, UploadConfig, UploadError};
use crate::velocity::{VelocityConfig, VelocityController};
use crate::{cancellable, FlightError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Offboard velocity vectors on a fixed cadence.
    Velocity,
    /// Waypoint mission upload + autonomous execution.
    Mission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Armed,
    Airborne,
    VelocityRun,
    MissionRun,
    Returning,
    Done,
    Failed,
}

/// Delay and timeout knobs, `[timing]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub arm_settle_s: f64,
    pub confirm_climb: bool,
    pub climb_delay_s: f64,
    pub climb_timeout_s: f64,
    pub turn_settle_s: f64,
    pub brake_hold_s: f64,
    pub clear_settle_s: f64,
    pub request_timeout_s: f64,
    pub ack_timeout_s: f64,
    pub mission_run_wait_s: f64,
    pub rtl_settle_s: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            arm_settle_s: 1.0,
            confirm_climb: false,
            climb_delay_s: 6.0,
            climb_timeout_s: 20.0,
            turn_settle_s: 2.0,
            brake_hold_s: 1.0,
            clear_settle_s: 2.0,
            request_timeout_s: 5.0,
            ack_timeout_s: 5.0,
            mission_run_wait_s: 60.0,
            rtl_settle_s: 1.0,
        }
    }
}

impl TimingConfig {
    pub fn arm_settle(&self) -> Duration {
        Duration::from_secs_f64(self.arm_settle_s)
    }

    pub fn rtl_settle(&self) -> Duration {
        Duration::from_secs_f64(self.rtl_settle_s)
    }

    pub fn mission_run_wait(&self) -> Duration {
        Duration::from_secs_f64(self.mission_run_wait_s)
    }

    pub fn climb_wait(&self) -> ClimbWait {
        ClimbWait::from_config(&ClimbConfig {
            confirm: self.confirm_climb,
            delay_s: self.climb_delay_s,
            timeout_s: self.climb_timeout_s,
        })
    }

    pub fn velocity(&self) -> VelocityConfig {
        VelocityConfig {
            turn_settle: Duration::from_secs_f64(self.turn_settle_s),
            brake_hold: Duration::from_secs_f64(self.brake_hold_s),
        }
    }

    pub fn upload(&self) -> UploadConfig {
        UploadConfig {
            clear_settle: Duration::from_secs_f64(self.clear_settle_s),
            request_timeout: Duration::from_secs_f64(self.request_timeout_s),
            ack_timeout: Duration::from_secs_f64(self.ack_timeout_s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub strategy: Strategy,
    pub origin: Origin,
    pub timing: TimingConfig,
}

/// What a finished session reports back: terminal state plus partial
/// progress, whether or not the flight succeeded.
#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    pub error: Option<FlightError>,
    pub legs_completed: u32,
    pub items_sent: u16,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
}

impl SessionReport {
    pub fn succeeded(&self) -> bool {
        self.state == SessionState::Done
    }
}

/// Orchestrates one flight: connect, arm, take off, run the selected
/// strategy, return to launch. Owns the vehicle handle exclusively for the
/// duration of the run; all failures unwind here for best-effort cleanup.
pub struct FlightSession<V: Vehicle> {
    vehicle: V,
    path: CoveragePath,
    cfg: SessionConfig,
    cancel: CancellationToken,
    state: SessionState,
    airborne: bool,
    cleaned_up: bool,
    legs_completed: u32,
    items_sent: u16,
}

impl<V: Vehicle> FlightSession<V> {
    pub fn new(vehicle: V, path: CoveragePath, cfg: SessionConfig, cancel: CancellationToken) -> Self {
        Self {
            vehicle,
            path,
            cfg,
            cancel,
            state: SessionState::Disconnected,
            airborne: false,
            cleaned_up: false,
            legs_completed: 0,
            items_sent: 0,
        }
    }

    /// The vehicle handle, for inspection after a run.
    pub fn vehicle(&self) -> &V {
        &self.vehicle
    }

    pub async fn run(&mut self) -> SessionReport {
        let started_at = OffsetDateTime::now_utc();
        let result = self.fly().await;

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                // Surface partial progress carried inside the error.
                match &e {
                    FlightError::Control { legs_completed, .. } => {
                        self.legs_completed = *legs_completed;
                    }
                    FlightError::Upload(
                        UploadError::Aborted { items_sent, .. }
                        | UploadError::Unconfirmed { items_sent },
                    ) => {
                        self.items_sent = *items_sent;
                    }
                    _ => {}
                }
                warn!("session failed: {}", e);
                self.state = SessionState::Failed;
                self.safe_state().await;
                Some(e)
            }
        };

        SessionReport {
            state: self.state,
            error,
            legs_completed: self.legs_completed,
            items_sent: self.items_sent,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    async fn fly(&mut self) -> Result<(), FlightError> {
        let cancel = self.cancel.clone();
        let alt = self.path.altitude_m();

        info!("session: waiting for vehicle connection");
        not_cancelled(cancellable(&cancel, self.vehicle.wait_connected()).await)?;
        self.enter(SessionState::Connected);

        self.vehicle.set_takeoff_altitude(alt).await?;
        self.vehicle.arm().await?;
        self.enter(SessionState::Armed);
        self.sleep(&cancel, self.cfg.timing.arm_settle()).await?;

        self.vehicle.takeoff().await?;
        not_cancelled(
            cancellable(&cancel, self.cfg.timing.climb_wait().wait(&mut self.vehicle, alt)).await,
        )?;
        self.airborne = true;
        self.enter(SessionState::Airborne);

        match self.cfg.strategy {
            Strategy::Velocity => {
                if let Err(e) = self.vehicle.start_offboard().await {
                    // Offboard never engaged: disarm rather than RTL.
                    let _ = self.vehicle.disarm().await;
                    self.cleaned_up = true;
                    return Err(e.into());
                }
                self.enter(SessionState::VelocityRun);

                let controller = VelocityController::new(self.cfg.timing.velocity());
                self.legs_completed =
                    controller.run(&mut self.vehicle, &self.path, &cancel).await?;

                self.vehicle.stop_offboard().await?;
                self.sleep(&cancel, self.cfg.timing.rtl_settle()).await?;
            }
            Strategy::Mission => {
                self.enter(SessionState::MissionRun);

                let waypoints = self.path.waypoints(&self.cfg.origin);
                let uploader = MissionUploader::new(self.cfg.timing.upload());
                // Confirmed completion is required before mission start.
                self.items_sent =
                    uploader.upload(&mut self.vehicle, &waypoints, &cancel).await?;

                self.vehicle.set_mode("AUTO.MISSION").await?;
                self.vehicle.start_mission().await?;
                info!(
                    "session: mission running, waiting {:?}",
                    self.cfg.timing.mission_run_wait()
                );
                self.sleep(&cancel, self.cfg.timing.mission_run_wait()).await?;
            }
        }

        self.enter(SessionState::Returning);
        self.vehicle.return_to_launch().await?;
        self.enter(SessionState::Done);
        Ok(())
    }

    fn enter(&mut self, state: SessionState) {
        info!("session: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    async fn sleep(&self, cancel: &CancellationToken, d: Duration) -> Result<(), FlightError> {
        cancellable(cancel, tokio::time::sleep(d))
            .await
            .ok_or(FlightError::Cancelled)
    }

    /// Best-effort move to a safe state after a failure: RTL once airborne,
    /// disarm otherwise. Skipped when the failure path already cleaned up.
    async fn safe_state(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        if self.airborne {
            if let Err(e) = self.vehicle.return_to_launch().await {
                warn!("cleanup RTL failed: {}", e);
            }
        } else if let Err(e) = self.vehicle.disarm().await {
            warn!("cleanup disarm failed: {}", e);
        }
    }
}

fn not_cancelled<T>(out: Option<Result<T, VehicleError>>) -> Result<T, FlightError> {
    match out {
        None => Err(FlightError::Cancelled),
        Some(res) => res.map_err(Into::into),
    }
}
