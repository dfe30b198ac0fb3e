use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sweep_plan::{CoveragePath, SegmentKind};
use sweep_vehicle::{Vehicle, VehicleError, VelocityNedYaw};

use crate::{cancellable, FlightError};

/// Velocity strategy settings.
#[derive(Debug, Clone)]
pub struct VelocityConfig {
    /// Hold after a turn-in-place command before translating.
    pub turn_settle: Duration,
    /// Hold after zeroing velocity at the end of a segment to bound overshoot.
    pub brake_hold: Duration,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            turn_settle: Duration::from_secs(2),
            brake_hold: Duration::from_secs(1),
        }
    }
}

/// Drives the sweep leg-by-leg with held velocity vectors.
///
/// Scheduling by duration: each command is held for `length / speed` and
/// geometry correctness relies on the vehicle tracking the commanded
/// velocity over that window. Commands never overlap; a hold always runs
/// to completion before the next command goes out.
pub struct VelocityController {
    cfg: VelocityConfig,
}

impl VelocityController {
    pub fn new(cfg: VelocityConfig) -> Self {
        Self { cfg }
    }

    /// Fly the path against a vehicle already in offboard mode. Returns the
    /// number of legs fully completed. Any rejected command aborts the run
    /// with that progress; no further segments are attempted.
    pub async fn run<V: Vehicle>(
        &self,
        vehicle: &mut V,
        path: &CoveragePath,
        cancel: &CancellationToken,
    ) -> Result<u32, FlightError> {
        let speed = path.speed_mps();
        let mut legs_completed = 0u32;

        for (i, seg) in path.segments().iter().enumerate() {
            match seg.kind {
                SegmentKind::Leg { forward } => info!(
                    "leg {}/{}: {} pass, yaw {:.0}",
                    legs_completed + 1,
                    path.leg_count(),
                    if forward { "forward" } else { "backward" },
                    seg.yaw_deg
                ),
                SegmentKind::Shift => debug!("segment {}: lateral shift", i),
            }

            // Turn in place, then translate, then brake.
            self.command(vehicle, VelocityNedYaw::neutral(seg.yaw_deg), legs_completed)
                .await?;
            self.hold(cancel, self.cfg.turn_settle).await?;

            let v = VelocityNedYaw::forward(seg.signed_speed(speed) as f32, seg.yaw_deg);
            self.command(vehicle, v, legs_completed).await?;
            self.hold(cancel, Duration::from_secs_f64(seg.duration_s(speed)))
                .await?;

            self.command(vehicle, VelocityNedYaw::neutral(seg.yaw_deg), legs_completed)
                .await?;
            self.hold(cancel, self.cfg.brake_hold).await?;

            if matches!(seg.kind, SegmentKind::Leg { .. }) {
                legs_completed += 1;
            }
        }

        Ok(legs_completed)
    }

    async fn command<V: Vehicle>(
        &self,
        vehicle: &mut V,
        v: VelocityNedYaw,
        legs_completed: u32,
    ) -> Result<(), FlightError> {
        vehicle
            .set_velocity(v)
            .await
            .map_err(|source: VehicleError| FlightError::Control { legs_completed, source })
    }

    async fn hold(&self, cancel: &CancellationToken, d: Duration) -> Result<(), FlightError> {
        cancellable(cancel, tokio::time::sleep(d))
            .await
            .ok_or(FlightError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Call, FakeVehicle};
    use sweep_plan::AreaSpec;

    fn path(legs: u32) -> CoveragePath {
        CoveragePath::generate(&AreaSpec {
            legs,
            leg_length_m: 10.0,
            spacing_m: 3.0,
            speed_mps: 1.0,
            altitude_m: 5.0,
        })
    }

    fn velocities(v: &FakeVehicle) -> Vec<(f32, f32)> {
        v.calls
            .iter()
            .filter_map(|c| match c {
                Call::SetVelocity(v) => Some((v.north_mps, v.yaw_deg)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn two_leg_path_emits_reference_command_sequence() {
        let mut v = FakeVehicle::new();
        let cancel = CancellationToken::new();
        let legs = VelocityController::new(VelocityConfig::default())
            .run(&mut v, &path(2), &cancel)
            .await
            .unwrap();
        assert_eq!(legs, 2);

        // turn(0), move(+1,0), brake(0), turn(90), move(+1,90), brake(90),
        // turn(180), move(-1,180), brake(180)
        assert_eq!(
            velocities(&v),
            vec![
                (0.0, 0.0),
                (1.0, 0.0),
                (0.0, 0.0),
                (0.0, 90.0),
                (1.0, 90.0),
                (0.0, 90.0),
                (0.0, 180.0),
                (-1.0, 180.0),
                (0.0, 180.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_aborts_with_progress() {
        let mut v = FakeVehicle::new();
        // First leg completes (3 commands), fail on the shift's move command.
        v.fail_velocity_after = Some(4);
        let cancel = CancellationToken::new();
        let err = VelocityController::new(VelocityConfig::default())
            .run(&mut v, &path(2), &cancel)
            .await
            .unwrap_err();
        match err {
            FlightError::Control { legs_completed, .. } => assert_eq!(legs_completed, 1),
            other => panic!("expected control error, got {other:?}"),
        }
        // No commands after the rejected one.
        assert_eq!(velocities(&v).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_hold() {
        let mut v = FakeVehicle::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = VelocityController::new(VelocityConfig::default())
            .run(&mut v, &path(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FlightError::Cancelled));
        // The turn command went out; the hold was interrupted before the move.
        assert_eq!(velocities(&v).len(), 1);
    }
}
